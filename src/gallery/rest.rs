// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! REST client for a Discord-compatible chat API (v10)

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Attachment, GalleryGateway, GalleryThread, Message, NewThread, OutgoingFile, Snowflake, User};
use crate::{GalleristError, Result};

/// Gateway speaking the platform's HTTP API
pub struct RestGateway {
    client: Client,
    base_url: Url,
    auth: HeaderValue,
    retries: u32,
}

#[derive(Deserialize)]
struct ChannelDto {
    #[serde(deserialize_with = "snowflake")]
    id: Snowflake,
    #[serde(default, deserialize_with = "opt_snowflake")]
    guild_id: Option<Snowflake>,
    #[serde(default, deserialize_with = "opt_snowflake")]
    parent_id: Option<Snowflake>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    thread_metadata: Option<ThreadMetadataDto>,
    /// Starter message, present when a forum thread was just created
    #[serde(default)]
    message: Option<MessageDto>,
}

#[derive(Deserialize)]
struct ThreadMetadataDto {
    #[serde(default)]
    archive_timestamp: Option<String>,
}

#[derive(Deserialize)]
struct ThreadListDto {
    threads: Vec<ChannelDto>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Deserialize)]
struct UserDto {
    #[serde(deserialize_with = "snowflake")]
    id: Snowflake,
    username: String,
}

#[derive(Deserialize)]
struct AttachmentDto {
    #[serde(deserialize_with = "snowflake")]
    id: Snowflake,
    filename: String,
    url: String,
}

#[derive(Deserialize)]
struct MessageDto {
    #[serde(deserialize_with = "snowflake")]
    id: Snowflake,
    #[serde(deserialize_with = "snowflake")]
    channel_id: Snowflake,
    author: UserDto,
    #[serde(default)]
    attachments: Vec<AttachmentDto>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSnowflake {
    Text(String),
    Number(Snowflake),
}

impl RawSnowflake {
    fn into_id<E: serde::de::Error>(self) -> std::result::Result<Snowflake, E> {
        match self {
            RawSnowflake::Text(s) => s.parse().map_err(E::custom),
            RawSnowflake::Number(n) => Ok(n),
        }
    }
}

fn snowflake<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Snowflake, D::Error> {
    RawSnowflake::deserialize(d)?.into_id()
}

fn opt_snowflake<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Snowflake>, D::Error> {
    Option::<RawSnowflake>::deserialize(d)?
        .map(RawSnowflake::into_id)
        .transpose()
}

/// The account name, never the display name: it is what confirmations and
/// thank-you messages address the artist by.
impl From<UserDto> for User {
    fn from(dto: UserDto) -> Self {
        Self {
            id: dto.id,
            name: dto.username,
        }
    }
}

impl From<MessageDto> for Message {
    fn from(dto: MessageDto) -> Self {
        Self {
            id: dto.id,
            channel_id: dto.channel_id,
            author: dto.author.into(),
            attachments: dto
                .attachments
                .into_iter()
                .map(|a| Attachment { id: a.id, filename: a.filename, url: a.url })
                .collect(),
        }
    }
}

impl ChannelDto {
    fn into_thread(self) -> Result<GalleryThread> {
        Ok(GalleryThread {
            id: self.id,
            parent_id: self.parent_id.ok_or_else(|| {
                GalleristError::NotFound(format!("channel {} is not a thread", self.id))
            })?,
            container_id: self.guild_id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
        })
    }
}

/// Attachment descriptors announcing `files` as new uploads
fn attachment_descriptors(files: &[(String, Vec<u8>)]) -> serde_json::Value {
    files
        .iter()
        .enumerate()
        .map(|(i, (name, _))| json!({ "id": i, "filename": name }))
        .collect()
}

/// Multipart body carrying a JSON payload plus `files`
fn file_form(payload: &serde_json::Value, files: &[(String, Vec<u8>)]) -> Form {
    let mut form = Form::new().text("payload_json", payload.to_string());
    for (i, (name, bytes)) in files.iter().enumerate() {
        form = form.part(format!("files[{}]", i), Part::bytes(bytes.clone()).file_name(name.clone()));
    }
    form
}

async fn read_files(files: &[OutgoingFile]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut loaded = Vec::with_capacity(files.len());
    for file in files {
        let bytes = tokio::fs::read(&file.path).await?;
        loaded.push((file.name.clone(), bytes));
    }
    Ok(loaded)
}

fn retry_delay(response: &Response) -> Duration {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::from_secs(1))
}

impl RestGateway {
    /// Create a new gateway client
    pub fn new(api_url: &str, token: &str, timeout: Duration, retries: u32) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        // Normalize URL so segments append below the version path
        let base_url = Url::parse(api_url.trim_end_matches('/'))
            .map_err(|e| GalleristError::Config(format!("Invalid API url {}: {}", api_url, e)))?;

        let auth = HeaderValue::from_str(&format!("Bot {}", token))
            .map_err(|_| GalleristError::Config("Token contains invalid characters".to_string()))?;

        Ok(Self { client, base_url, auth, retries })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GalleristError::Config(format!("{} cannot be used as an API base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send an authorized request, waiting out rate limits
    async fn send<F>(&self, what: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let response = build()
                .header(AUTHORIZATION, self.auth.clone())
                .send()
                .await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.retries {
                let delay = retry_delay(&response);
                attempt += 1;
                warn!("Rate limited while trying to {}, retrying in {:?} (attempt {})", what, delay, attempt + 1);
                tokio::time::sleep(delay).await;
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                return Err(GalleristError::NotFound(format!("{} (404)", what)));
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(GalleristError::ExternalService(format!(
                    "Failed to {}: status {} {}",
                    what, status, body
                )));
            }

            debug!("{} -> {}", what, status);
            return Ok(response);
        }
    }

    async fn get_channel(&self, channel_id: Snowflake) -> Result<ChannelDto> {
        let url = self.endpoint(&["channels", &channel_id.to_string()])?;
        let what = format!("fetch channel {}", channel_id);
        let response = self.send(&what, || self.client.get(url.clone())).await?;
        Ok(response.json().await?)
    }

    async fn archived_threads(&self, forum_id: Snowflake) -> Result<Vec<ChannelDto>> {
        let forum = forum_id.to_string();
        let mut threads = Vec::new();
        let mut before: Option<String> = None;

        loop {
            let mut url = self.endpoint(&["channels", &forum, "threads", "archived", "public"])?;
            url.query_pairs_mut().append_pair("limit", "100");
            if let Some(ref ts) = before {
                url.query_pairs_mut().append_pair("before", ts);
            }

            let page: ThreadListDto = self
                .send("list archived threads", || self.client.get(url.clone()))
                .await?
                .json()
                .await?;

            let has_more = page.has_more;
            before = page
                .threads
                .last()
                .and_then(|t| t.thread_metadata.as_ref())
                .and_then(|m| m.archive_timestamp.clone());
            threads.extend(page.threads);

            if !has_more || before.is_none() {
                return Ok(threads);
            }
        }
    }

    /// Overwrite the application's command definitions, returning how many
    /// the platform accepted
    pub async fn sync_commands(&self, application_id: Snowflake, commands: &[serde_json::Value]) -> Result<usize> {
        let url = self.endpoint(&["applications", &application_id.to_string(), "commands"])?;
        let accepted: Vec<serde_json::Value> = self
            .send("sync commands", || self.client.put(url.clone()).json(commands))
            .await?
            .json()
            .await?;
        Ok(accepted.len())
    }
}

#[async_trait]
impl GalleryGateway for RestGateway {
    async fn list_threads(&self, forum_id: Snowflake) -> Result<Vec<GalleryThread>> {
        let forum = self.get_channel(forum_id).await?;
        let guild = forum.guild_id.ok_or_else(|| {
            GalleristError::NotFound(format!("channel {} is not in a guild", forum_id))
        })?;

        let url = self.endpoint(&["guilds", &guild.to_string(), "threads", "active"])?;
        let active: ThreadListDto = self
            .send("list active threads", || self.client.get(url.clone()))
            .await?
            .json()
            .await?;

        let mut threads = Vec::new();
        for channel in active.threads.into_iter().chain(self.archived_threads(forum_id).await?) {
            if channel.parent_id != Some(forum_id) || threads.iter().any(|t: &GalleryThread| t.id == channel.id) {
                continue;
            }
            let mut thread = channel.into_thread()?;
            thread.container_id = guild;
            threads.push(thread);
        }

        debug!("Forum {} has {} threads", forum_id, threads.len());
        Ok(threads)
    }

    async fn create_thread(&self, forum_id: Snowflake, name: &str, file: &OutgoingFile) -> Result<NewThread> {
        let files = read_files(std::slice::from_ref(file)).await?;
        let url = self.endpoint(&["channels", &forum_id.to_string(), "threads"])?;
        // Forum threads nest the starter message under `message`
        let payload = json!({
            "name": name,
            "message": { "attachments": attachment_descriptors(&files) },
        });
        let what = format!("create thread {}", name);

        let mut channel: ChannelDto = self
            .send(&what, || self.client.post(url.clone()).multipart(file_form(&payload, &files)))
            .await?
            .json()
            .await?;

        let starter = channel.message.take();
        let thread = channel.into_thread()?;
        let anchor = match starter {
            Some(message) => message.into(),
            None => self.fetch_message(thread.id, thread.anchor_id()).await?,
        };
        Ok(NewThread { thread, anchor })
    }

    async fn fetch_thread(&self, container_id: Snowflake, thread_id: Snowflake) -> Result<GalleryThread> {
        let channel = self.get_channel(thread_id).await?;
        if channel.guild_id != Some(container_id) {
            return Err(GalleristError::NotFound(format!(
                "thread {} in container {}",
                thread_id, container_id
            )));
        }
        channel.into_thread()
    }

    async fn fetch_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<Message> {
        let url = self.endpoint(&["channels", &channel_id.to_string(), "messages", &message_id.to_string()])?;
        let what = format!("fetch message {}", message_id);
        let dto: MessageDto = self.send(&what, || self.client.get(url.clone())).await?.json().await?;
        Ok(dto.into())
    }

    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        let response = self.client.get(&attachment.url).send().await?;
        if !response.status().is_success() {
            return Err(GalleristError::ExternalService(format!(
                "Failed to download {}: status {}",
                attachment.filename,
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn edit_message_attachments(&self, message: &Message, files: &[OutgoingFile]) -> Result<()> {
        let files = read_files(files).await?;
        let url = self.endpoint(&["channels", &message.channel_id.to_string(), "messages", &message.id.to_string()])?;
        let what = format!("edit message {}", message.id);
        let payload = json!({ "attachments": attachment_descriptors(&files) });
        self.send(&what, || self.client.patch(url.clone()).multipart(file_form(&payload, &files)))
            .await?;
        Ok(())
    }

    async fn pin_message(&self, message: &Message) -> Result<()> {
        let url = self.endpoint(&["channels", &message.channel_id.to_string(), "pins", &message.id.to_string()])?;
        let what = format!("pin message {}", message.id);
        self.send(&what, || self.client.put(url.clone())).await?;
        Ok(())
    }

    async fn add_reaction(&self, message: &Message, emoji: &str) -> Result<()> {
        let url = self.endpoint(&[
            "channels",
            &message.channel_id.to_string(),
            "messages",
            &message.id.to_string(),
            "reactions",
            emoji,
            "@me",
        ])?;
        let what = format!("react to message {}", message.id);
        self.send(&what, || self.client.put(url.clone())).await?;
        Ok(())
    }

    async fn send_direct_message(&self, user: &User, text: &str) -> Result<()> {
        let url = self.endpoint(&["users", "@me", "channels"])?;
        let body = json!({ "recipient_id": user.id.to_string() });
        let dm: ChannelDto = self
            .send("open direct message", || self.client.post(url.clone()).json(&body))
            .await?
            .json()
            .await?;

        let url = self.endpoint(&["channels", &dm.id.to_string(), "messages"])?;
        let body = json!({ "content": text });
        self.send("send direct message", || self.client.post(url.clone()).json(&body)).await?;
        Ok(())
    }
}
