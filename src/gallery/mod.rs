// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Gallery threads, messages and the gateway that manages them

pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::Result;

pub use rest::RestGateway;

/// Platform-assigned identifier
pub type Snowflake = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Snowflake,
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub author: User,
    pub attachments: Vec<Attachment>,
}

/// A thread in a gallery (forum) container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryThread {
    pub id: Snowflake,
    /// Forum channel the thread lives in
    pub parent_id: Snowflake,
    /// Guild (container) the thread belongs to
    pub container_id: Snowflake,
    pub name: String,
}

impl GalleryThread {
    /// The starter message of a forum thread shares the thread's id
    pub fn anchor_id(&self) -> Snowflake {
        self.id
    }
}

/// A thread just created together with its anchor message
#[derive(Debug, Clone)]
pub struct NewThread {
    pub thread: GalleryThread,
    pub anchor: Message,
}

/// A file on disk to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub name: String,
    pub path: PathBuf,
}

impl OutgoingFile {
    /// Upload `path` under its own file name
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "art.png".to_string());
        Self { name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Chat platform operations used by the reconciliation and intake flows
#[async_trait]
pub trait GalleryGateway: Send + Sync {
    /// Every thread (active and archived) of a forum channel
    async fn list_threads(&self, forum_id: Snowflake) -> Result<Vec<GalleryThread>>;

    /// Create a thread titled `name` whose starter message carries `file`
    async fn create_thread(&self, forum_id: Snowflake, name: &str, file: &OutgoingFile) -> Result<NewThread>;

    /// Resolve a thread inside a container, `NotFound` if it is elsewhere
    async fn fetch_thread(&self, container_id: Snowflake, thread_id: Snowflake) -> Result<GalleryThread>;

    async fn fetch_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<Message>;

    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>>;

    /// Replace all attachments of `message` with `files`
    async fn edit_message_attachments(&self, message: &Message, files: &[OutgoingFile]) -> Result<()>;

    async fn pin_message(&self, message: &Message) -> Result<()>;

    async fn add_reaction(&self, message: &Message, emoji: &str) -> Result<()>;

    async fn send_direct_message(&self, user: &User, text: &str) -> Result<()>;
}
