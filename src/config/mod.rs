// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Gallerist

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gallery::Snowflake;
use crate::installer::{ManifestEntry, UpdateManifest};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Gallery (chat platform) connection settings
    #[serde(default)]
    pub gallery: GalleryConfig,

    /// Upload storage layout
    #[serde(default)]
    pub storage: StorageConfig,

    /// Batch reconciliation settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Art acceptance settings
    #[serde(default)]
    pub intake: IntakeConfig,

    /// Self-update settings
    #[serde(default)]
    pub installer: InstallerConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GalleryConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable holding the bot token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Application id used when syncing command definitions
    #[serde(default)]
    pub application_id: Option<Snowflake>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory the layout is probed and resolved against
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Directory whose presence selects the static layout
    #[serde(default = "default_probe_dir")]
    pub probe_dir: String,
    #[serde(default = "default_static_uploads")]
    pub static_uploads: String,
    #[serde(default = "default_static_prefix")]
    pub static_prefix: String,
    #[serde(default = "default_media_uploads")]
    pub media_uploads: String,
    #[serde(default = "default_media_prefix")]
    pub media_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BatchConfig {
    /// Delay between items, respecting the gateway's rate limits
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
    /// Emit a progress report every N successes
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IntakeConfig {
    /// Direct message sent to the artist; `$ball` and `$user` are substituted
    #[serde(default = "default_accepted_message")]
    pub accepted_message: String,
    /// Reaction added to accepted messages
    #[serde(default = "default_accepted_marker")]
    pub accepted_marker: String,
    /// Replace the thread's anchor art right away on accept
    #[serde(default = "default_true")]
    pub sync_thread_art: bool,
    /// Containers (guilds) submissions may come from; empty allows all
    #[serde(default)]
    pub allowed_containers: Vec<Snowflake>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InstallerConfig {
    #[serde(default = "default_source_api")]
    pub api_url: String,
    /// `owner/repo/contents/dir` on the remote source
    #[serde(default = "default_source_path")]
    pub source: String,
    #[serde(default = "default_manifest")]
    pub files: Vec<ManifestEntry>,
    /// Local package directory, relative to the working directory
    #[serde(default = "default_package_path")]
    pub package_path: String,
    /// YAML file holding the `packages:` list
    #[serde(default = "default_package_list")]
    pub package_list: PathBuf,
    #[serde(default = "default_fetch_delay_ms")]
    pub fetch_delay_ms: u64,
    /// Fetch everything before writing anything
    #[serde(default)]
    pub staged: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

// Default value functions
fn default_api_url() -> String { "https://discord.com/api/v10".to_string() }
fn default_token_env() -> String { "GALLERIST_TOKEN".to_string() }
fn default_timeout() -> u64 { 30 }
fn default_retries() -> u32 { 3 }
fn default_base_dir() -> PathBuf { PathBuf::from(".") }
fn default_probe_dir() -> String { "static".to_string() }
fn default_static_uploads() -> String { "static/uploads".to_string() }
fn default_static_prefix() -> String { "/static/uploads/".to_string() }
fn default_media_uploads() -> String { "admin_panel/media".to_string() }
fn default_media_prefix() -> String { "/".to_string() }
fn default_item_delay_ms() -> u64 { 750 }
fn default_progress_every() -> usize { 5 }
fn default_true() -> bool { true }
fn default_accepted_marker() -> String { "✅".to_string() }
fn default_source_api() -> String { "https://api.github.com".to_string() }
fn default_source_path() -> String { "hyperpolymath/gallerist-package/contents/package".to_string() }
fn default_package_path() -> String { "packages/gallerist".to_string() }
fn default_package_list() -> PathBuf { PathBuf::from("config.yml") }
fn default_fetch_delay_ms() -> u64 { 1000 }
fn default_db_path() -> String { "gallerist.db".to_string() }

fn default_accepted_message() -> String {
    "Your art for **$ball** has been accepted! Thank you for contributing, $user.".to_string()
}

fn default_manifest() -> Vec<ManifestEntry> {
    vec![
        ManifestEntry::new("package.json"),
        ManifestEntry::new("commands.json"),
        ManifestEntry::skip_if_present("config.json"),
    ]
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_env: default_token_env(),
            application_id: None,
            timeout_secs: default_timeout(),
            retries: default_retries(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            probe_dir: default_probe_dir(),
            static_uploads: default_static_uploads(),
            static_prefix: default_static_prefix(),
            media_uploads: default_media_uploads(),
            media_prefix: default_media_prefix(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            item_delay_ms: default_item_delay_ms(),
            progress_every: default_progress_every(),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            accepted_message: default_accepted_message(),
            accepted_marker: default_accepted_marker(),
            sync_thread_art: true,
            allowed_containers: Vec::new(),
        }
    }
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            api_url: default_source_api(),
            source: default_source_path(),
            files: default_manifest(),
            package_path: default_package_path(),
            package_list: default_package_list(),
            fetch_delay_ms: default_fetch_delay_ms(),
            staged: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl BatchConfig {
    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }
}

impl InstallerConfig {
    pub fn manifest(&self) -> UpdateManifest {
        UpdateManifest::new(self.files.clone())
    }

    /// Dotted package name as registered in the package list
    pub fn package_name(&self) -> String {
        self.package_path.trim_matches('/').replace('/', ".")
    }

    pub fn fetch_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::GalleristError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch.progress_every == 0 {
            return Err(crate::GalleristError::Config(
                "batch.progress_every must be at least 1".to_string(),
            ));
        }
        if self.installer.package_path.trim_matches('/').is_empty() {
            return Err(crate::GalleristError::Config(
                "installer.package_path must not be empty".to_string(),
            ));
        }
        if self.installer.files.iter().any(|e| e.file.contains("..") || e.file.starts_with('/')) {
            return Err(crate::GalleristError::Config(
                "installer.files must be relative names inside the package".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the gateway token from the configured environment variable
    pub fn gateway_token(&self) -> crate::Result<String> {
        std::env::var(&self.gallery.token_env).map_err(|_| {
            crate::GalleristError::Config(format!(
                "Set {} to the bot token before talking to the gallery",
                self.gallery.token_env
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.batch.item_delay_ms, 750);
        assert_eq!(config.intake.accepted_marker, "✅");
        assert_eq!(config.installer.package_name(), "packages.gallerist");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "batch": { "progress_every": 2 } }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.batch.progress_every, 2);
        assert_eq!(config.batch.item_delay_ms, 750);
        assert!(config.intake.sync_thread_art);
        assert_eq!(config.installer.files.len(), 3);
        assert!(config.installer.files[2].skip_if_present);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.intake.allowed_containers = vec![42];
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.intake.allowed_containers, vec![42]);
    }

    #[test]
    fn test_zero_cadence_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "batch": { "progress_every": 0 } }"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(crate::GalleristError::Config(_))));
    }
}
