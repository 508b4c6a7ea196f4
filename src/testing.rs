// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-memory gallery used by the unit tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::gallery::{Attachment, GalleryGateway, GalleryThread, Message, NewThread, OutgoingFile, Snowflake, User};
use crate::{GalleristError, Result};

/// Every gateway call, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListThreads(Snowflake),
    CreateThread { name: String, file: String },
    FetchThread(Snowflake),
    FetchMessage(Snowflake),
    Download(String),
    EditAttachments { message: Snowflake, files: Vec<String> },
    Pin(Snowflake),
    React { message: Snowflake, emoji: String },
    DirectMessage { user: Snowflake, text: String },
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::CreateThread { .. } | Call::EditAttachments { .. } | Call::Pin(_) | Call::React { .. } | Call::DirectMessage { .. }
        )
    }
}

#[derive(Default)]
struct State {
    threads: Vec<GalleryThread>,
    messages: HashMap<(Snowflake, Snowflake), Message>,
    downloads: HashMap<String, Vec<u8>>,
    calls: Vec<Call>,
    failing_names: HashSet<String>,
    fail_listing: bool,
    fail_direct_messages: bool,
    next_id: Snowflake,
}

pub struct MockGallery {
    state: Mutex<State>,
}

pub const CONTAINER: Snowflake = 10;
pub const FORUM: Snowflake = 20;

impl MockGallery {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1000,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Add a thread whose anchor carries `anchor_file`
    pub fn add_thread(&self, name: &str, anchor_file: &str) -> GalleryThread {
        let mut state = self.state();
        state.next_id += 1;
        let thread = GalleryThread {
            id: state.next_id,
            parent_id: FORUM,
            container_id: CONTAINER,
            name: name.to_string(),
        };
        let anchor = Message {
            id: thread.id,
            channel_id: thread.id,
            author: User { id: 1, name: "gallerist".to_string() },
            attachments: vec![attachment(thread.id, anchor_file)],
        };
        state.messages.insert((thread.id, thread.id), anchor);
        state.threads.push(thread.clone());
        thread
    }

    /// Add a submission message to `thread` with one attachment per file
    pub fn add_submission(&self, thread: &GalleryThread, author: &User, files: &[(&str, &[u8])]) -> Message {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        let attachments = files
            .iter()
            .enumerate()
            .map(|(i, (name, bytes))| {
                let attachment = attachment(id * 10 + i as u64, name);
                state.downloads.insert(attachment.url.clone(), bytes.to_vec());
                attachment
            })
            .collect();
        let message = Message {
            id,
            channel_id: thread.id,
            author: author.clone(),
            attachments,
        };
        state.messages.insert((thread.id, id), message.clone());
        message
    }

    pub fn fail_create_for(&self, name: &str) {
        self.state().failing_names.insert(name.to_string());
    }

    pub fn fail_listing(&self) {
        self.state().fail_listing = true;
    }

    pub fn fail_direct_messages(&self) {
        self.state().fail_direct_messages = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn thread_names(&self) -> Vec<String> {
        self.state().threads.iter().map(|t| t.name.clone()).collect()
    }

    pub fn anchor_filename(&self, thread: &GalleryThread) -> Option<String> {
        self.state()
            .messages
            .get(&(thread.id, thread.anchor_id()))
            .and_then(|m| m.attachments.first())
            .map(|a| a.filename.clone())
    }

    pub fn thread(&self, name: &str) -> Option<GalleryThread> {
        self.state().threads.iter().find(|t| t.name == name).cloned()
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }
}

fn attachment(id: Snowflake, filename: &str) -> Attachment {
    Attachment {
        id,
        filename: filename.to_string(),
        url: format!("https://cdn.test/{}/{}", id, filename),
    }
}

#[async_trait]
impl GalleryGateway for MockGallery {
    async fn list_threads(&self, forum_id: Snowflake) -> Result<Vec<GalleryThread>> {
        self.record(Call::ListThreads(forum_id));
        let state = self.state();
        if state.fail_listing {
            return Err(GalleristError::ExternalService("listing unavailable".to_string()));
        }
        Ok(state.threads.iter().filter(|t| t.parent_id == forum_id).cloned().collect())
    }

    async fn create_thread(&self, _forum_id: Snowflake, name: &str, file: &OutgoingFile) -> Result<NewThread> {
        self.record(Call::CreateThread {
            name: name.to_string(),
            file: file.path.to_string_lossy().into_owned(),
        });
        if self.state().failing_names.contains(name) {
            return Err(GalleristError::ExternalService(format!("cannot create {}", name)));
        }
        tokio::fs::metadata(&file.path).await?;

        let thread = self.add_thread(name, &file.name);
        let anchor = self.state().messages[&(thread.id, thread.id)].clone();
        Ok(NewThread { thread, anchor })
    }

    async fn fetch_thread(&self, container_id: Snowflake, thread_id: Snowflake) -> Result<GalleryThread> {
        self.record(Call::FetchThread(thread_id));
        self.state()
            .threads
            .iter()
            .find(|t| t.id == thread_id && t.container_id == container_id)
            .cloned()
            .ok_or_else(|| GalleristError::NotFound(format!("thread {}", thread_id)))
    }

    async fn fetch_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<Message> {
        self.record(Call::FetchMessage(message_id));
        self.state()
            .messages
            .get(&(channel_id, message_id))
            .cloned()
            .ok_or_else(|| GalleristError::NotFound(format!("message {}", message_id)))
    }

    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        self.record(Call::Download(attachment.filename.clone()));
        self.state()
            .downloads
            .get(&attachment.url)
            .cloned()
            .ok_or_else(|| GalleristError::ExternalService(format!("download {}", attachment.url)))
    }

    async fn edit_message_attachments(&self, message: &Message, files: &[OutgoingFile]) -> Result<()> {
        self.record(Call::EditAttachments {
            message: message.id,
            files: files.iter().map(|f| f.name.clone()).collect(),
        });
        for file in files {
            tokio::fs::metadata(&file.path).await?;
        }
        let mut state = self.state();
        let stored = state
            .messages
            .get_mut(&(message.channel_id, message.id))
            .ok_or_else(|| GalleristError::NotFound(format!("message {}", message.id)))?;
        stored.attachments = files.iter().map(|f| attachment(message.id, &f.name)).collect();
        Ok(())
    }

    async fn pin_message(&self, message: &Message) -> Result<()> {
        self.record(Call::Pin(message.id));
        Ok(())
    }

    async fn add_reaction(&self, message: &Message, emoji: &str) -> Result<()> {
        self.record(Call::React {
            message: message.id,
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn send_direct_message(&self, user: &User, text: &str) -> Result<()> {
        self.record(Call::DirectMessage {
            user: user.id,
            text: text.to_string(),
        });
        if self.state().fail_direct_messages {
            return Err(GalleristError::ExternalService("Cannot send messages to this user".to_string()));
        }
        Ok(())
    }
}
