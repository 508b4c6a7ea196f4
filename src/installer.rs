// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Self-update: fetch the package files from a remote source, write them
//! locally, register the package and reload it in the running host.
//!
//! In incremental mode every file is written as soon as it arrives, and a
//! failed fetch stops the remaining entries while earlier writes stay. Staged
//! mode fetches everything first and writes nothing unless every fetch
//! succeeded.

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::InstallerConfig;
use crate::report::{ReportEvent, Reporter};
use crate::Result;

/// One file of the package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the package directory (and the remote source)
    pub file: String,
    /// Keep the local copy if there is one
    #[serde(default)]
    pub skip_if_present: bool,
}

impl ManifestEntry {
    pub fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            skip_if_present: false,
        }
    }

    /// An entry that is only installed when missing locally, like local
    /// configuration
    pub fn skip_if_present(file: &str) -> Self {
        Self {
            file: file.to_string(),
            skip_if_present: true,
        }
    }
}

/// Ordered list of files making up the package
#[derive(Debug, Clone, Default)]
pub struct UpdateManifest {
    entries: Vec<ManifestEntry>,
}

impl UpdateManifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Response of the remote source for one file
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub status: u16,
    /// Base64 content, present on success
    pub content: Option<String>,
}

impl RemoteFile {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Where package files are downloaded from
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch(&self, file: &str) -> Result<RemoteFile>;
}

#[derive(Deserialize)]
struct ContentsResponse {
    content: String,
}

/// GitHub contents API (`GET /repos/{owner}/{repo}/contents/{dir}/{file}`)
pub struct GitHubSource {
    client: Client,
    base_url: String,
}

impl GitHubSource {
    pub fn new(api_url: &str, source: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let base_url = format!(
            "{}/repos/{}",
            api_url.trim_end_matches('/'),
            source.trim_matches('/')
        );
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &InstallerConfig) -> Result<Self> {
        Self::new(&config.api_url, &config.source)
    }

    fn file_url(&self, file: &str) -> String {
        format!("{}/{}", self.base_url, file.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteSource for GitHubSource {
    async fn fetch(&self, file: &str) -> Result<RemoteFile> {
        let url = self.file_url(file);
        debug!("Fetching {}", url);

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, concat!("gallerist/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Ok(RemoteFile { status, content: None });
        }

        let body: ContentsResponse = response.json().await?;
        Ok(RemoteFile {
            status,
            content: Some(body.content),
        })
    }
}

/// What `reload` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded,
    NotLoaded,
}

/// The running process's package loader
#[async_trait]
pub trait ModuleHost: Send + Sync {
    async fn reload(&self, package: &str) -> Result<ReloadOutcome>;

    async fn load(&self, package: &str) -> Result<()>;

    /// Add `package` to the persisted package list; `false` if it was there
    async fn persist_package_list(&self, package: &str) -> Result<bool>;

    /// Push command definitions to the platform, returning how many were synced
    async fn resync_command_registry(&self) -> Result<usize>;
}

/// Installer behaviour taken from the configuration
#[derive(Debug, Clone)]
pub struct InstallSettings {
    /// Local package directory
    pub local_root: PathBuf,
    /// Dotted package name
    pub package: String,
    pub fetch_delay: Duration,
    pub staged: bool,
}

impl From<&InstallerConfig> for InstallSettings {
    fn from(config: &InstallerConfig) -> Self {
        Self {
            local_root: PathBuf::from(&config.package_path),
            package: config.package_name(),
            fetch_delay: config.fetch_delay(),
            staged: config.staged,
        }
    }
}

/// Entry whose fetch stopped the install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallAbort {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub written: Vec<String>,
    pub skipped: Vec<String>,
    pub aborted: Option<InstallAbort>,
    /// Package newly added to the package list
    pub registered: bool,
    /// Reloaded in place rather than loaded fresh
    pub reloaded: bool,
    pub commands_synced: usize,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }
}

/// Decode base64 file content, ignoring the line breaks the contents API
/// inserts
pub fn decode_content(content: &str) -> Result<Vec<u8>> {
    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}

enum Fetched {
    Content(Vec<u8>),
    Failed(String),
}

pub struct UpdateInstaller {
    source: Arc<dyn RemoteSource>,
    host: Arc<dyn ModuleHost>,
    settings: InstallSettings,
}

impl UpdateInstaller {
    pub fn new(source: Arc<dyn RemoteSource>, host: Arc<dyn ModuleHost>, settings: InstallSettings) -> Self {
        Self { source, host, settings }
    }

    pub fn settings(&self) -> &InstallSettings {
        &self.settings
    }

    /// Install or update every file of `manifest`, then register and reload
    /// the package
    pub async fn install(&self, manifest: &UpdateManifest, reporter: &mut dyn Reporter) -> Result<InstallReport> {
        self.install_with(manifest, self.settings.staged, reporter).await
    }

    /// [`install`](Self::install), choosing staged or incremental writes per call
    pub async fn install_with(
        &self,
        manifest: &UpdateManifest,
        staged: bool,
        reporter: &mut dyn Reporter,
    ) -> Result<InstallReport> {
        tokio::fs::create_dir_all(&self.settings.local_root).await?;

        let mut report = if staged {
            self.install_staged(manifest, reporter).await?
        } else {
            self.install_incremental(manifest, reporter).await?
        };

        let package = self.settings.package.as_str();
        report.registered = self.host.persist_package_list(package).await?;
        if report.registered {
            reporter.emit(ReportEvent::notice("Added package to the package list"));
        }

        report.reloaded = match self.host.reload(package).await? {
            ReloadOutcome::Reloaded => true,
            ReloadOutcome::NotLoaded => {
                self.host.load(package).await?;
                false
            }
        };
        info!("{} {}", if report.reloaded { "Reloaded" } else { "Loaded" }, package);

        report.commands_synced = self.host.resync_command_registry().await?;
        reporter.emit(ReportEvent::notice(match &report.aborted {
            None => "Finished installing/updating everything!".to_string(),
            Some(abort) => format!("Finished with errors: stopped at `{}`", abort.file),
        }));
        Ok(report)
    }

    async fn install_incremental(&self, manifest: &UpdateManifest, reporter: &mut dyn Reporter) -> Result<InstallReport> {
        let mut report = InstallReport::default();
        let total = manifest.len();
        reporter.emit(ReportEvent::progress("Installing files", 0, total));

        for (index, entry) in manifest.entries().iter().enumerate() {
            if self.should_skip(entry, reporter).await? {
                report.skipped.push(entry.file.clone());
            } else {
                match self.fetch(entry).await {
                    Fetched::Content(bytes) => {
                        self.write(entry, &bytes).await?;
                        reporter.emit(ReportEvent::notice(format!("Installed `{}`", entry.file)));
                        report.written.push(entry.file.clone());
                    }
                    Fetched::Failed(reason) => {
                        reporter.emit(ReportEvent::notice(format!("Failed to fetch {}. `({})`", entry.file, reason)));
                        report.aborted = Some(InstallAbort { file: entry.file.clone(), reason });
                        break;
                    }
                }
            }

            reporter.emit(ReportEvent::progress("Installing files", index + 1, total));
            if index + 1 < total && !self.settings.fetch_delay.is_zero() {
                tokio::time::sleep(self.settings.fetch_delay).await;
            }
        }

        Ok(report)
    }

    async fn install_staged(&self, manifest: &UpdateManifest, reporter: &mut dyn Reporter) -> Result<InstallReport> {
        let mut report = InstallReport::default();
        let total = manifest.len();
        let mut staged: Vec<(&ManifestEntry, Vec<u8>)> = Vec::with_capacity(total);
        reporter.emit(ReportEvent::progress("Fetching files", 0, total));

        for (index, entry) in manifest.entries().iter().enumerate() {
            if self.should_skip(entry, reporter).await? {
                report.skipped.push(entry.file.clone());
            } else {
                match self.fetch(entry).await {
                    Fetched::Content(bytes) => staged.push((entry, bytes)),
                    Fetched::Failed(reason) => {
                        reporter.emit(ReportEvent::notice(format!(
                            "Failed to fetch {}. `({})`, nothing was written",
                            entry.file, reason
                        )));
                        report.aborted = Some(InstallAbort { file: entry.file.clone(), reason });
                        return Ok(report);
                    }
                }
            }

            reporter.emit(ReportEvent::progress("Fetching files", index + 1, total));
            if index + 1 < total && !self.settings.fetch_delay.is_zero() {
                tokio::time::sleep(self.settings.fetch_delay).await;
            }
        }

        let count = staged.len();
        for (done, (entry, bytes)) in staged.into_iter().enumerate() {
            self.write(entry, &bytes).await?;
            reporter.emit(ReportEvent::notice(format!("Installed `{}`", entry.file)));
            reporter.emit(ReportEvent::progress("Installing files", done + 1, count));
            report.written.push(entry.file.clone());
        }

        Ok(report)
    }

    fn local_path(&self, entry: &ManifestEntry) -> PathBuf {
        self.settings.local_root.join(&entry.file)
    }

    async fn should_skip(&self, entry: &ManifestEntry, reporter: &mut dyn Reporter) -> Result<bool> {
        if !entry.skip_if_present || !tokio::fs::try_exists(self.local_path(entry)).await? {
            return Ok(false);
        }
        reporter.emit(ReportEvent::notice(format!("`{}` file already found.", entry.file)));
        Ok(true)
    }

    async fn fetch(&self, entry: &ManifestEntry) -> Fetched {
        let remote = match self.source.fetch(&entry.file).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Fetching {} failed: {}", entry.file, e);
                return Fetched::Failed(e.to_string());
            }
        };

        if !remote.is_success() {
            warn!("Fetching {} returned status {}", entry.file, remote.status);
            return Fetched::Failed(remote.status.to_string());
        }

        let Some(content) = remote.content else {
            return Fetched::Failed("empty response".to_string());
        };
        match decode_content(&content) {
            Ok(bytes) => Fetched::Content(bytes),
            Err(e) => Fetched::Failed(e.to_string()),
        }
    }

    async fn write(&self, entry: &ManifestEntry, bytes: &[u8]) -> Result<()> {
        let path = self.local_path(entry);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!("Wrote {:?} ({} bytes)", path, bytes.len());
        Ok(())
    }
}
