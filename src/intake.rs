// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Accepting community art submissions
//!
//! A staff member points at a message in a gallery thread and picks one of
//! its attachments. The file is stored under a fresh versioned name, the
//! catalog item named after the thread is pointed at it, and the artist is
//! thanked. Everything that can reject the request is checked before the
//! first write.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::{ArtSlot, CatalogField, CatalogStore};
use crate::config::IntakeConfig;
use crate::gallery::{GalleryGateway, Snowflake, User};
use crate::reconcile::replace_thread_art;
use crate::reference::SubmissionReference;
use crate::storage::StorageLayout;
use crate::versioner::{FileVersioner, IncomingFile, VersionedFile};
use crate::{GalleristError, Result};

/// Intake behaviour taken from the configuration
#[derive(Debug, Clone)]
pub struct IntakeSettings {
    pub accepted_message: String,
    pub accepted_marker: String,
    pub sync_thread_art: bool,
    pub allowed_containers: Vec<Snowflake>,
}

impl From<&IntakeConfig> for IntakeSettings {
    fn from(config: &IntakeConfig) -> Self {
        Self {
            accepted_message: config.accepted_message.clone(),
            accepted_marker: config.accepted_marker.clone(),
            sync_thread_art: config.sync_thread_art,
            allowed_containers: config.allowed_containers.clone(),
        }
    }
}

impl IntakeSettings {
    /// Fill the `$ball` and `$user` placeholders of the thank-you message
    pub fn render_message(&self, item: &str, user: &User) -> String {
        self.accepted_message
            .replace("$ball", item)
            .replace("$user", &user.name)
    }

    fn allows(&self, container: Snowflake) -> bool {
        self.allowed_containers.is_empty() || self.allowed_containers.contains(&container)
    }
}

/// Result of a successful accept
#[derive(Debug, Clone, Serialize)]
pub struct Acceptance {
    pub item: String,
    pub slot: ArtSlot,
    pub artist: User,
    /// Value written to the catalog
    pub catalog_path: String,
    /// Whether the thread's anchor art was replaced as well
    pub thread_synced: bool,
    pub warnings: Vec<String>,
}

impl Acceptance {
    pub fn confirmation(&self) -> String {
        let mut text = format!(
            "Accepted {} art made by **{}** (`{}`)",
            self.item, self.artist.name, self.catalog_path
        );
        for warning in &self.warnings {
            text.push_str("\n-# ");
            text.push_str(warning);
        }
        text
    }
}

pub struct SubmissionIntake {
    catalog: Arc<dyn CatalogStore>,
    gallery: Arc<dyn GalleryGateway>,
    layout: StorageLayout,
    versioner: FileVersioner,
    settings: IntakeSettings,
}

impl SubmissionIntake {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        gallery: Arc<dyn GalleryGateway>,
        layout: StorageLayout,
        settings: IntakeSettings,
    ) -> Self {
        let versioner = FileVersioner::new(layout.uploads_root());
        Self { catalog, gallery, layout, versioner, settings }
    }

    /// Accept attachment `index` (zero-based) of the referenced message as
    /// the `slot` art of the item the thread is named after.
    pub async fn accept(&self, reference: &SubmissionReference, slot: ArtSlot, index: usize) -> Result<Acceptance> {
        if !self.settings.allows(reference.container_id) {
            return Err(GalleristError::NotFound(format!(
                "message {} (server {} is not a gallery server)",
                reference, reference.container_id
            )));
        }

        let thread = self.gallery.fetch_thread(reference.container_id, reference.thread_id).await?;
        let message = self.gallery.fetch_message(thread.id, reference.message_id).await?;

        let count = message.attachments.len();
        let attachment = message
            .attachments
            .get(index)
            .ok_or(GalleristError::Range { index, count })?;

        let mut item = self
            .catalog
            .get(&thread.name)
            .await?
            .ok_or_else(|| GalleristError::NotFound(format!("collectible {}", thread.name)))?;

        VersionedFile::parse(&attachment.filename)?;

        // Nothing has been written up to here
        self.gallery
            .add_reaction(&message, &self.settings.accepted_marker)
            .await
            .map_err(|e| e.into_external("adding the accepted marker"))?;

        let bytes = self
            .gallery
            .download_attachment(attachment)
            .await
            .map_err(|e| e.into_external("downloading the attachment"))?;
        let stored = self
            .versioner
            .save(&IncomingFile::new(attachment.filename.clone(), bytes))
            .await
            .map_err(|e| e.into_external("storing the attachment"))?;

        let catalog_path = self.layout.catalog_path(&stored);
        item.set_art(slot, catalog_path.clone());
        self.catalog
            .save(&item, &[CatalogField::Art(slot)])
            .await
            .map_err(|e| e.into_external("saving the catalog"))?;
        info!("{} {} art is now {}", item.name, slot, catalog_path);

        let mut warnings = Vec::new();
        let text = self.settings.render_message(&item.name, &message.author);
        if let Err(e) = self.gallery.send_direct_message(&message.author, &text).await {
            warn!("Could not message {}: {}", message.author.name, e);
            warnings.push(format!("Could not DM {} about the accepted art", message.author.name));
        }

        // Always re-upload: a same-named file may still have new content
        let thread_synced = if self.settings.sync_thread_art {
            replace_thread_art(self.gallery.as_ref(), &self.layout, &thread, &catalog_path)
                .await
                .map_err(|e| e.into_external("updating the thread art"))?;
            true
        } else {
            false
        };

        Ok(Acceptance {
            item: item.name,
            slot,
            artist: message.author.clone(),
            catalog_path,
            thread_synced,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, SqliteCatalog};
    use crate::testing::{Call, MockGallery, CONTAINER};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        catalog: Arc<SqliteCatalog>,
        gallery: Arc<MockGallery>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let catalog = Arc::new(SqliteCatalog::in_memory().unwrap());
            catalog.upsert(&CatalogItem::new("Fox", "/x/fox.png")).unwrap();
            Self { dir, catalog, gallery: Arc::new(MockGallery::new()) }
        }

        fn intake(&self, sync: bool, allowed: Vec<Snowflake>) -> SubmissionIntake {
            let settings = IntakeSettings {
                accepted_message: "Your art for **$ball** was accepted, $user!".to_string(),
                accepted_marker: "✅".to_string(),
                sync_thread_art: sync,
                allowed_containers: allowed,
            };
            SubmissionIntake::new(
                self.catalog.clone(),
                self.gallery.clone(),
                StorageLayout::new(self.dir.path(), "/x/"),
                settings,
            )
        }

        /// Thread "Fox" with one submission carrying two attachments
        fn submission(&self) -> SubmissionReference {
            let thread = self.gallery.add_thread("Fox", "fox.png");
            let artist = User { id: 7, name: "ana".to_string() };
            let message = self
                .gallery
                .add_submission(&thread, &artist, &[("fox.png", b"one"), ("fox.jpg", b"two")]);
            SubmissionReference {
                container_id: CONTAINER,
                thread_id: thread.id,
                message_id: message.id,
            }
        }
    }

    #[tokio::test]
    async fn test_accept_stores_versioned_file() {
        let f = Fixture::new();
        std::fs::write(f.dir.path().join("fox.png"), b"old").unwrap();
        let reference = f.submission();

        let acceptance = f.intake(false, vec![]).accept(&reference, ArtSlot::Primary, 0).await.unwrap();

        assert_eq!(acceptance.catalog_path, "/x/fox-1.png");
        assert_eq!(std::fs::read(f.dir.path().join("fox-1.png")).unwrap(), b"one");
        assert_eq!(std::fs::read(f.dir.path().join("fox.png")).unwrap(), b"old");
        assert_eq!(f.catalog.find("Fox").unwrap().unwrap().primary_art, "/x/fox-1.png");
        assert_eq!(acceptance.confirmation(), "Accepted Fox art made by **ana** (`/x/fox-1.png`)");

        let calls = f.gallery.calls();
        assert!(calls.iter().any(|c| matches!(c, Call::React { emoji, .. } if emoji == "✅")));
        assert!(calls.contains(&Call::DirectMessage {
            user: 7,
            text: "Your art for **Fox** was accepted, ana!".to_string(),
        }));
        assert!(!calls.iter().any(|c| matches!(c, Call::EditAttachments { .. })));
    }

    #[tokio::test]
    async fn test_accept_second_attachment_into_detail_slot() {
        let f = Fixture::new();
        let reference = f.submission();

        let acceptance = f.intake(false, vec![]).accept(&reference, ArtSlot::Detail, 1).await.unwrap();

        assert_eq!(acceptance.catalog_path, "/x/fox.jpg");
        let item = f.catalog.find("Fox").unwrap().unwrap();
        assert_eq!(item.detail_art, "/x/fox.jpg");
        assert_eq!(item.primary_art, "/x/fox.png");
    }

    #[tokio::test]
    async fn test_out_of_range_index_changes_nothing() {
        let f = Fixture::new();
        let reference = f.submission();
        f.gallery.clear_calls();

        let err = f.intake(true, vec![]).accept(&reference, ArtSlot::Primary, 2).await.unwrap_err();

        assert!(matches!(err, GalleristError::Range { index: 2, count: 2 }));
        assert_eq!(err.to_string(), "There are only 2 attachments; 3 is an invalid attachment number");
        assert!(f.gallery.calls().iter().all(|c| !c.is_mutation()));
        assert_eq!(std::fs::read_dir(f.dir.path()).unwrap().count(), 0);
        assert_eq!(f.catalog.find("Fox").unwrap().unwrap().primary_art, "/x/fox.png");
    }

    #[tokio::test]
    async fn test_unknown_item_is_not_found() {
        let f = Fixture::new();
        let thread = f.gallery.add_thread("Wolf", "wolf.png");
        let artist = User { id: 8, name: "bo".to_string() };
        let message = f.gallery.add_submission(&thread, &artist, &[("wolf.png", b"w")]);
        let reference = SubmissionReference {
            container_id: CONTAINER,
            thread_id: thread.id,
            message_id: message.id,
        };

        let err = f.intake(true, vec![]).accept(&reference, ArtSlot::Primary, 0).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(f.gallery.calls().iter().all(|c| !c.is_mutation()));
    }

    #[tokio::test]
    async fn test_foreign_container_is_not_found() {
        let f = Fixture::new();
        let reference = f.submission();
        let mut elsewhere = reference;
        elsewhere.container_id = 99;

        let err = f.intake(true, vec![]).accept(&elsewhere, ArtSlot::Primary, 0).await.unwrap_err();
        assert!(err.is_not_found());

        f.gallery.clear_calls();
        let err = f.intake(true, vec![55]).accept(&reference, ArtSlot::Primary, 0).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(f.gallery.calls().is_empty());
    }

    #[tokio::test]
    async fn test_attachment_without_extension_is_rejected_first() {
        let f = Fixture::new();
        let thread = f.gallery.add_thread("Fox", "fox.png");
        let artist = User { id: 7, name: "ana".to_string() };
        let message = f.gallery.add_submission(&thread, &artist, &[("README", b"text")]);
        let reference = SubmissionReference {
            container_id: CONTAINER,
            thread_id: thread.id,
            message_id: message.id,
        };

        let err = f.intake(true, vec![]).accept(&reference, ArtSlot::Primary, 0).await.unwrap_err();
        assert!(matches!(err, GalleristError::Validation(_)));
        assert!(f.gallery.calls().iter().all(|c| !c.is_mutation()));
    }

    #[tokio::test]
    async fn test_direct_message_failure_is_a_warning() {
        let f = Fixture::new();
        let reference = f.submission();
        f.gallery.fail_direct_messages();

        let acceptance = f.intake(false, vec![]).accept(&reference, ArtSlot::Primary, 0).await.unwrap();

        assert_eq!(acceptance.warnings.len(), 1);
        assert!(acceptance
            .confirmation()
            .starts_with("Accepted Fox art made by **ana** (`/x/fox.png`)\n-# Could not DM ana"));
        assert_eq!(f.catalog.find("Fox").unwrap().unwrap().primary_art, "/x/fox.png");
    }

    #[tokio::test]
    async fn test_sync_replaces_thread_art() {
        let f = Fixture::new();
        std::fs::write(f.dir.path().join("fox.png"), b"old").unwrap();
        let reference = f.submission();

        let acceptance = f.intake(true, vec![]).accept(&reference, ArtSlot::Primary, 0).await.unwrap();

        assert!(acceptance.thread_synced);
        let thread = f.gallery.thread("Fox").unwrap();
        assert_eq!(f.gallery.anchor_filename(&thread).as_deref(), Some("fox-1.png"));
    }

    #[tokio::test]
    async fn test_sync_reuploads_file_with_unchanged_name() {
        // Nothing stored yet, so the new file keeps the anchor's name
        let f = Fixture::new();
        let reference = f.submission();
        f.gallery.clear_calls();

        let acceptance = f.intake(true, vec![]).accept(&reference, ArtSlot::Primary, 0).await.unwrap();

        assert_eq!(acceptance.catalog_path, "/x/fox.png");
        assert!(acceptance.thread_synced);
        let edits: Vec<_> = f
            .gallery
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::EditAttachments { .. }))
            .collect();
        assert_eq!(edits.len(), 1);
        assert!(matches!(&edits[0], Call::EditAttachments { files, .. } if files == &vec!["fox.png".to_string()]));
    }

    #[test]
    fn test_confirmation_lists_warnings_after_the_path() {
        let acceptance = Acceptance {
            item: "Owl".to_string(),
            slot: ArtSlot::Detail,
            artist: User { id: 1, name: "cy".to_string() },
            catalog_path: "/x/owl-2.png".to_string(),
            thread_synced: false,
            warnings: vec!["first".to_string(), "second".to_string()],
        };
        assert_eq!(
            acceptance.confirmation(),
            "Accepted Owl art made by **cy** (`/x/owl-2.png`)\n-# first\n-# second"
        );
    }

    #[test]
    fn test_render_message() {
        let settings = IntakeSettings::from(&IntakeConfig::default());
        let text = settings.render_message("Owl", &User { id: 1, name: "cy".to_string() });
        assert_eq!(text, "Your art for **Owl** has been accepted! Thank you for contributing, cy.");
    }
}
