// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Package host backed by the filesystem
//!
//! Packages live in directories named after their dotted name
//! (`packages.gallerist` -> `packages/gallerist`). Loading reads the
//! package's `package.json` and optional `commands.json`; the command
//! definitions of every loaded package are what gets pushed to the platform
//! on resync.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::gallery::{RestGateway, Snowflake};
use crate::installer::{ModuleHost, ReloadOutcome};
use crate::{GalleristError, Result};

const LIST_KEY: &str = "packages:";

/// Add `package` under the `packages:` key of a package list.
///
/// Returns `None` when the key is missing or the package is already listed.
pub fn insert_package_entry(text: &str, package: &str) -> Option<String> {
    let entry = format!("  - {}", package);
    let mut lines: Vec<&str> = text.lines().collect();
    let key = lines.iter().position(|line| line.trim_end() == LIST_KEY)?;
    if listed_packages(text).iter().any(|p| p == package) {
        return None;
    }

    lines.insert(key + 1, &entry);
    let mut updated = lines.join("\n");
    updated.push('\n');
    Some(updated)
}

/// Entries of the `packages:` list, in file order
pub fn listed_packages(text: &str) -> Vec<String> {
    text.lines()
        .skip_while(|line| line.trim_end() != LIST_KEY)
        .skip(1)
        .take_while(|line| line.trim().is_empty() || line.starts_with(' ') || line.starts_with('-'))
        .filter_map(|line| line.trim().strip_prefix("- "))
        .map(|name| name.trim().to_string())
        .collect()
}

/// Where resynced commands go
pub struct CommandRegistry {
    pub gateway: Arc<RestGateway>,
    pub application_id: Snowflake,
}

#[derive(Debug, Clone)]
struct LoadedPackage {
    version: Option<String>,
    commands: Vec<Value>,
    loaded_at: DateTime<Utc>,
}

pub struct PackageHost {
    base_dir: PathBuf,
    package_list: PathBuf,
    loaded: Mutex<BTreeMap<String, LoadedPackage>>,
    registry: Option<CommandRegistry>,
}

impl PackageHost {
    pub fn new(base_dir: impl Into<PathBuf>, package_list: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            package_list: package_list.into(),
            loaded: Mutex::new(BTreeMap::new()),
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    fn loaded(&self) -> MutexGuard<'_, BTreeMap<String, LoadedPackage>> {
        self.loaded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Directory holding a dotted package
    pub fn package_dir(&self, package: &str) -> PathBuf {
        package
            .split('.')
            .fold(self.base_dir.clone(), |dir, part| dir.join(part))
    }

    pub fn is_loaded(&self, package: &str) -> bool {
        self.loaded().contains_key(package)
    }

    /// When `package` was last (re)loaded
    pub fn loaded_at(&self, package: &str) -> Option<DateTime<Utc>> {
        self.loaded().get(package).map(|p| p.loaded_at)
    }

    /// Load every listed package that is installed, returning how many
    pub async fn boot(&self) -> Result<usize> {
        let text = match tokio::fs::read_to_string(&self.package_list).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        for package in listed_packages(&text) {
            if !tokio::fs::try_exists(self.package_dir(&package).join("package.json")).await? {
                debug!("Listed package {} is not installed", package);
                continue;
            }
            self.load(&package).await?;
            count += 1;
        }
        Ok(count)
    }

    async fn read_package(&self, package: &str) -> Result<LoadedPackage> {
        let dir = self.package_dir(package);
        let manifest = read_json(&dir.join("package.json"))
            .await?
            .ok_or_else(|| GalleristError::NotFound(format!("package {} ({:?})", package, dir)))?;

        let commands = match read_json(&dir.join("commands.json")).await? {
            Some(Value::Array(commands)) => commands,
            Some(_) => {
                return Err(GalleristError::Validation(format!(
                    "{}: commands.json must be a list",
                    package
                )))
            }
            None => Vec::new(),
        };

        Ok(LoadedPackage {
            version: manifest.get("version").and_then(Value::as_str).map(str::to_string),
            commands,
            loaded_at: Utc::now(),
        })
    }
}

async fn read_json(path: &Path) -> Result<Option<Value>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ModuleHost for PackageHost {
    async fn reload(&self, package: &str) -> Result<ReloadOutcome> {
        if !self.is_loaded(package) {
            return Ok(ReloadOutcome::NotLoaded);
        }
        let fresh = self.read_package(package).await?;
        info!("Reloaded {} ({})", package, fresh.version.as_deref().unwrap_or("unversioned"));
        self.loaded().insert(package.to_string(), fresh);
        Ok(ReloadOutcome::Reloaded)
    }

    async fn load(&self, package: &str) -> Result<()> {
        let fresh = self.read_package(package).await?;
        info!("Loaded {} with {} command(s)", package, fresh.commands.len());
        self.loaded().insert(package.to_string(), fresh);
        Ok(())
    }

    async fn persist_package_list(&self, package: &str) -> Result<bool> {
        let text = match tokio::fs::read_to_string(&self.package_list).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Package list {:?} does not exist, not registering {}", self.package_list, package);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        match insert_package_entry(&text, package) {
            Some(updated) => {
                tokio::fs::write(&self.package_list, updated).await?;
                info!("Added {} to {:?}", package, self.package_list);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn resync_command_registry(&self) -> Result<usize> {
        let commands: Vec<Value> = self
            .loaded()
            .values()
            .flat_map(|p| p.commands.iter().cloned())
            .collect();

        match &self.registry {
            Some(registry) => registry.gateway.sync_commands(registry.application_id, &commands).await,
            None => {
                info!("No application id configured, skipping command sync ({} defined)", commands.len());
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LIST: &str = "token: abc\npackages:\n  - packages.countryballs\n  - packages.admin\nprefix: b.\n";

    #[test]
    fn test_insert_package_entry() {
        let updated = insert_package_entry(LIST, "packages.gallerist").unwrap();
        assert_eq!(
            updated,
            "token: abc\npackages:\n  - packages.gallerist\n  - packages.countryballs\n  - packages.admin\nprefix: b.\n"
        );
        assert_eq!(insert_package_entry(&updated, "packages.gallerist"), None);
    }

    #[test]
    fn test_insert_needs_packages_key() {
        assert_eq!(insert_package_entry("token: abc\n", "packages.gallerist"), None);
    }

    #[test]
    fn test_listed_packages_stops_at_next_key() {
        assert_eq!(listed_packages(LIST), vec!["packages.countryballs", "packages.admin"]);
    }

    fn install(dir: &TempDir, commands: &str) {
        let pkg = dir.path().join("packages/gallerist");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("package.json"), r#"{"name":"gallerist","version":"1.0.0"}"#).unwrap();
        std::fs::write(pkg.join("commands.json"), commands).unwrap();
    }

    #[tokio::test]
    async fn test_reload_only_when_loaded() {
        let dir = TempDir::new().unwrap();
        install(&dir, r#"[{"name":"art"}]"#);
        let host = PackageHost::new(dir.path(), dir.path().join("config.yml"));

        assert_eq!(host.reload("packages.gallerist").await.unwrap(), ReloadOutcome::NotLoaded);
        host.load("packages.gallerist").await.unwrap();
        assert!(host.is_loaded("packages.gallerist"));
        assert_eq!(host.reload("packages.gallerist").await.unwrap(), ReloadOutcome::Reloaded);
        assert_eq!(host.resync_command_registry().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_load_missing_package() {
        let dir = TempDir::new().unwrap();
        let host = PackageHost::new(dir.path(), dir.path().join("config.yml"));
        assert!(host.load("packages.nothing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_commands_must_be_a_list() {
        let dir = TempDir::new().unwrap();
        install(&dir, r#"{"name":"art"}"#);
        let host = PackageHost::new(dir.path(), dir.path().join("config.yml"));
        assert!(matches!(
            host.load("packages.gallerist").await,
            Err(GalleristError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_persist_and_boot() {
        let dir = TempDir::new().unwrap();
        install(&dir, "[]");
        let list = dir.path().join("config.yml");
        std::fs::write(&list, "packages:\n  - packages.admin\n").unwrap();
        let host = PackageHost::new(dir.path(), &list);

        assert!(host.persist_package_list("packages.gallerist").await.unwrap());
        assert!(!host.persist_package_list("packages.gallerist").await.unwrap());

        // packages.admin is listed but not installed
        let fresh = PackageHost::new(dir.path(), &list);
        assert_eq!(fresh.boot().await.unwrap(), 1);
        assert!(fresh.is_loaded("packages.gallerist"));
        assert!(fresh.loaded_at("packages.gallerist").is_some());
    }

    #[tokio::test]
    async fn test_persist_without_list_file() {
        let dir = TempDir::new().unwrap();
        let host = PackageHost::new(dir.path(), dir.path().join("config.yml"));
        assert!(!host.persist_package_list("packages.gallerist").await.unwrap());
    }
}
