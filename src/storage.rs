// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Upload storage layout
//!
//! Catalog rows store art as root-relative paths (`/static/uploads/fox.png`
//! or `/fox.png`). The layout maps those strings to files on disk and back,
//! and strips the serving prefix so a thread attachment's bare filename can
//! be compared with the catalog value.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::StorageConfig;

/// A stored file name, relative to the uploads root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath(String);

impl StoragePath {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoragePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where uploads live and how the catalog refers to them
#[derive(Debug, Clone)]
pub struct StorageLayout {
    uploads_root: PathBuf,
    serving_prefix: String,
    /// Root-relative paths outside the serving prefix resolve here
    base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(uploads_root: impl Into<PathBuf>, serving_prefix: impl Into<String>) -> Self {
        let mut serving_prefix = serving_prefix.into();
        if !serving_prefix.starts_with('/') {
            serving_prefix.insert(0, '/');
        }
        if !serving_prefix.ends_with('/') {
            serving_prefix.push('/');
        }
        let uploads_root = uploads_root.into();
        Self {
            base_dir: uploads_root.clone(),
            uploads_root,
            serving_prefix,
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Pick the static or media layout depending on whether the probe
    /// directory exists under the base directory.
    pub fn probe(config: &StorageConfig) -> Self {
        let base = &config.base_dir;
        let layout = if base.join(&config.probe_dir).is_dir() {
            Self::new(base.join(&config.static_uploads), config.static_prefix.clone())
        } else {
            Self::new(base.join(&config.media_uploads), config.media_prefix.clone())
        }
        .with_base_dir(base.clone());
        debug!("Storage layout: {:?} (prefix {})", layout.uploads_root, layout.serving_prefix);
        layout
    }

    pub fn uploads_root(&self) -> &Path {
        &self.uploads_root
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn serving_prefix(&self) -> &str {
        &self.serving_prefix
    }

    /// Catalog value for a freshly stored file
    pub fn catalog_path(&self, stored: &StoragePath) -> String {
        format!("{}{}", self.serving_prefix, stored.as_str())
    }

    /// Strip the serving prefix (or a bare leading slash)
    pub fn normalize<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.serving_prefix.as_str())
            .unwrap_or(path)
            .trim_start_matches('/')
    }

    /// Whether an attachment filename and a catalog path name the same file
    pub fn same_file(&self, attachment: &str, catalog_path: &str) -> bool {
        self.normalize(attachment) == self.normalize(catalog_path)
    }

    /// File on disk a catalog path refers to.
    ///
    /// Paths under the serving prefix and bare stored names live in the
    /// uploads root; any other root-relative path (a default art shipped
    /// with the static files, say) is taken from the base directory.
    pub fn resolve(&self, catalog_path: &str) -> PathBuf {
        match catalog_path.strip_prefix(self.serving_prefix.as_str()) {
            Some(stored) => self.uploads_root.join(stored),
            None if catalog_path.starts_with('/') => self.base_dir.join(catalog_path.trim_start_matches('/')),
            None => self.uploads_root.join(catalog_path),
        }
    }
}
