// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Collision-safe upload storage
//!
//! An upload named `fox.png` lands at `fox.png`, or at `fox-1.png`,
//! `fox-2.png`, ... if earlier versions are already stored. Files are opened
//! with create-new semantics so an existing file is never overwritten, even
//! if another writer claims a name between the probe and the write.

use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::storage::StoragePath;
use crate::{GalleristError, Result};

/// An in-memory upload
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// A filename split into stem, extension and version suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedFile {
    stem: String,
    extension: String,
    suffix: Option<u32>,
}

impl VersionedFile {
    /// Split `name` at its last dot. The extension keeps its dot.
    pub fn parse(name: &str) -> Result<Self> {
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(GalleristError::Validation(format!(
                "`{}` is not a plain file name",
                name
            )));
        }

        match name.rfind('.') {
            Some(dot) if dot > 0 && dot + 1 < name.len() => Ok(Self {
                stem: name[..dot].to_string(),
                extension: name[dot..].to_string(),
                suffix: None,
            }),
            _ => Err(GalleristError::Validation(format!(
                "The file you uploaded (`{}`) lacks an extension",
                name
            ))),
        }
    }

    pub fn file_name(&self) -> String {
        match self.suffix {
            Some(n) => format!("{}-{}{}", self.stem, n, self.extension),
            None => format!("{}{}", self.stem, self.extension),
        }
    }

    /// Move on to the next candidate name
    pub fn bump(&mut self) {
        self.suffix = Some(self.suffix.map_or(1, |n| n + 1));
    }

    pub fn suffix(&self) -> Option<u32> {
        self.suffix
    }
}

/// Writes uploads under a storage root without clobbering existing files
#[derive(Debug, Clone)]
pub struct FileVersioner {
    root: PathBuf,
}

impl FileVersioner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// First free name for `name` in the current directory snapshot
    pub async fn resolve(&self, name: &str) -> Result<VersionedFile> {
        let mut candidate = VersionedFile::parse(name)?;
        while fs::try_exists(self.root.join(candidate.file_name())).await? {
            candidate.bump();
        }
        Ok(candidate)
    }

    /// Store `file` and return its name relative to the root
    pub async fn save(&self, file: &IncomingFile) -> Result<StoragePath> {
        fs::create_dir_all(&self.root).await?;
        let mut candidate = self.resolve(&file.name).await?;

        loop {
            let path = self.root.join(candidate.file_name());
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut handle) => {
                    handle.write_all(&file.bytes).await?;
                    handle.flush().await?;
                    info!("Stored upload {} as {:?}", file.name, path);
                    return Ok(StoragePath::new(candidate.file_name()));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("{:?} appeared while saving, trying next version", path);
                    candidate.bump();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}
