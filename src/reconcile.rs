// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch reconciliation between the catalog and the gallery
//!
//! `create` opens a thread for every enabled item that has none yet;
//! `update` points every thread's anchor attachment at the item's current
//! art. Both walk their items strictly in order, one at a time, with a fixed
//! delay between items. A failing item becomes a `Failed` outcome and the
//! batch moves on; failing to list the catalog or the threads aborts before
//! any item is touched.

use futures_util::{stream, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{ArtSlot, CatalogItem, CatalogStore};
use crate::config::BatchConfig;
use crate::gallery::{GalleryGateway, GalleryThread, Message, OutgoingFile, Snowflake};
use crate::guard::{BatchKind, BatchOp, ConcurrencyGuard, GuardPermit};
use crate::report::{BatchSummary, ItemOutcome, ItemStatus, ReportEvent, Reporter};
use crate::storage::StorageLayout;
use crate::{GalleristError, Result};

/// Pacing for batch runs
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub item_delay: Duration,
    /// Report progress every N successful items
    pub progress_every: usize,
}

impl From<&BatchConfig> for BatchSettings {
    fn from(config: &BatchConfig) -> Self {
        Self {
            item_delay: config.item_delay(),
            progress_every: config.progress_every.max(1),
        }
    }
}

/// Enabled items without a thread of the same name, in catalog order
pub fn select_missing(items: Vec<CatalogItem>, existing: &HashSet<String>) -> Vec<CatalogItem> {
    items
        .into_iter()
        .filter(|item| item.enabled && !existing.contains(&item.name))
        .collect()
}

/// Point `thread`'s anchor attachment at `catalog_path`.
///
/// Returns `false` without editing anything when the anchor already carries
/// that file.
pub async fn sync_thread_art(
    gallery: &dyn GalleryGateway,
    layout: &StorageLayout,
    thread: &GalleryThread,
    catalog_path: &str,
) -> Result<bool> {
    let anchor = gallery.fetch_message(thread.id, thread.anchor_id()).await?;

    let current = anchor.attachments.first().map(|a| a.filename.as_str());
    if current.is_some_and(|name| layout.same_file(name, catalog_path)) {
        debug!("{} already shows {}", thread.name, catalog_path);
        return Ok(false);
    }

    replace_anchor_art(gallery, layout, &anchor, catalog_path).await?;
    Ok(true)
}

/// Re-upload `catalog_path` as `thread`'s anchor attachment unconditionally.
///
/// Used after an accept: the new file may carry the same name as the one the
/// anchor shows while its content differs.
pub async fn replace_thread_art(
    gallery: &dyn GalleryGateway,
    layout: &StorageLayout,
    thread: &GalleryThread,
    catalog_path: &str,
) -> Result<()> {
    let anchor = gallery.fetch_message(thread.id, thread.anchor_id()).await?;
    replace_anchor_art(gallery, layout, &anchor, catalog_path).await
}

async fn replace_anchor_art(
    gallery: &dyn GalleryGateway,
    layout: &StorageLayout,
    anchor: &Message,
    catalog_path: &str,
) -> Result<()> {
    let file = OutgoingFile::from_path(layout.resolve(catalog_path));
    gallery.edit_message_attachments(anchor, &[file]).await
}

fn held_kind(permit: &GuardPermit, op: BatchOp) -> Result<BatchKind> {
    let kind = permit.kind();
    if kind.op != op {
        return Err(GalleristError::Validation(format!("permit for {} cannot run {:?}", kind, op)));
    }
    Ok(kind)
}

/// Runs create/update batches
pub struct ReconciliationEngine {
    catalog: Arc<dyn CatalogStore>,
    gallery: Arc<dyn GalleryGateway>,
    layout: StorageLayout,
    guard: ConcurrencyGuard,
    settings: BatchSettings,
}

impl ReconciliationEngine {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        gallery: Arc<dyn GalleryGateway>,
        layout: StorageLayout,
        guard: ConcurrencyGuard,
        settings: BatchSettings,
    ) -> Self {
        Self { catalog, gallery, layout, guard, settings }
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    fn enter(&self, kind: BatchKind, reporter: &mut dyn Reporter) -> Result<GuardPermit> {
        self.guard.try_acquire(kind).map_err(|err| {
            reporter.emit(ReportEvent::notice(format!(
                "`{}` is still running, wait for it to finish",
                kind
            )));
            err
        })
    }

    /// Take the flag for a batch up front, so a caller can hand the run to
    /// another task knowing it was not refused.
    pub fn begin(&self, op: BatchOp, slot: ArtSlot) -> Result<GuardPermit> {
        self.guard.try_acquire(BatchKind::new(op, slot))
    }

    /// Create a thread for every enabled item of the catalog that has none
    pub async fn create(&self, forum: Snowflake, slot: ArtSlot, reporter: &mut dyn Reporter) -> Result<BatchSummary> {
        let permit = self.enter(BatchKind::new(BatchOp::Create, slot), reporter)?;
        self.create_held(permit, forum, reporter).await
    }

    /// Bring every thread's anchor art in line with the catalog
    pub async fn update(&self, forum: Snowflake, slot: ArtSlot, reporter: &mut dyn Reporter) -> Result<BatchSummary> {
        let permit = self.enter(BatchKind::new(BatchOp::Update, slot), reporter)?;
        self.update_held(permit, forum, reporter).await
    }

    /// [`create`](Self::create) under a permit taken with [`begin`](Self::begin)
    pub async fn create_held(
        &self,
        permit: GuardPermit,
        forum: Snowflake,
        reporter: &mut dyn Reporter,
    ) -> Result<BatchSummary> {
        let kind = held_kind(&permit, BatchOp::Create)?;
        let slot = kind.slot;

        let existing: HashSet<String> = self
            .gallery
            .list_threads(forum)
            .await?
            .into_iter()
            .map(|thread| thread.name)
            .collect();
        let items = self.catalog.list_enabled().await?;
        let selected = select_missing(items, &existing);
        info!("{} threads to create ({} already exist)", selected.len(), existing.len());

        let summary = self
            .drive(kind, "Creating threads", selected, reporter, |item| self.create_one(forum, item, slot))
            .await;
        drop(permit);
        Ok(summary)
    }

    /// [`update`](Self::update) under a permit taken with [`begin`](Self::begin)
    pub async fn update_held(
        &self,
        permit: GuardPermit,
        forum: Snowflake,
        reporter: &mut dyn Reporter,
    ) -> Result<BatchSummary> {
        let kind = held_kind(&permit, BatchOp::Update)?;
        let slot = kind.slot;

        let threads = self.gallery.list_threads(forum).await?;

        let summary = self
            .drive(kind, "Updating threads", threads, reporter, |thread| self.update_one(thread, slot))
            .await;
        drop(permit);
        Ok(summary)
    }

    async fn create_one(&self, forum: Snowflake, item: CatalogItem, slot: ArtSlot) -> ItemOutcome {
        match self.seed_thread(forum, &item, slot).await {
            Ok(()) => ItemOutcome::new(item.name, ItemStatus::Created),
            Err(e) => {
                warn!("Failed to create thread {}: {}", item.name, e);
                ItemOutcome::new(item.name, ItemStatus::Failed { error: e.to_string() })
            }
        }
    }

    async fn seed_thread(&self, forum: Snowflake, item: &CatalogItem, slot: ArtSlot) -> Result<()> {
        let path = item.art(slot);
        if path.is_empty() {
            return Err(GalleristError::Validation(format!("{} has no {} art", item.name, slot)));
        }

        let file = OutgoingFile::from_path(self.layout.resolve(path));
        let created = self.gallery.create_thread(forum, &item.name, &file).await?;
        self.gallery.pin_message(&created.anchor).await?;
        info!("Created thread {} ({})", item.name, created.thread.id);
        Ok(())
    }

    async fn update_one(&self, thread: GalleryThread, slot: ArtSlot) -> ItemOutcome {
        let item = match self.catalog.get(&thread.name).await {
            Ok(Some(item)) => item,
            Ok(None) => return ItemOutcome::new(thread.name, ItemStatus::Missing),
            Err(e) => return ItemOutcome::new(thread.name, ItemStatus::Failed { error: e.to_string() }),
        };

        let path = item.art(slot);
        if path.is_empty() {
            let error = format!("{} has no {} art", item.name, slot);
            return ItemOutcome::new(thread.name, ItemStatus::Failed { error });
        }

        match sync_thread_art(self.gallery.as_ref(), &self.layout, &thread, path).await {
            Ok(true) => {
                info!("Updated thread {} to {}", thread.name, path);
                ItemOutcome::new(thread.name, ItemStatus::Updated)
            }
            Ok(false) => ItemOutcome::new(thread.name, ItemStatus::Unchanged),
            Err(e) => {
                warn!("Failed to update thread {}: {}", thread.name, e);
                ItemOutcome::new(thread.name, ItemStatus::Failed { error: e.to_string() })
            }
        }
    }

    /// Process `items` one by one, reporting each outcome and periodic progress
    async fn drive<T, F, Fut>(
        &self,
        kind: BatchKind,
        label: &str,
        items: Vec<T>,
        reporter: &mut dyn Reporter,
        mut process: F,
    ) -> BatchSummary
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ItemOutcome>,
    {
        let total = items.len();
        let delay = self.settings.item_delay;
        let every = self.settings.progress_every.max(1);

        let mut summary = BatchSummary::new(kind, total);
        reporter.emit(ReportEvent::Started { kind, total });

        let outcomes = stream::iter(items.into_iter().enumerate()).then(|(index, item)| {
            let pending = process(item);
            async move {
                let outcome = pending.await;
                if index + 1 < total && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (index, outcome)
            }
        });
        let mut outcomes = std::pin::pin!(outcomes);

        while let Some((index, outcome)) = outcomes.next().await {
            summary.record(&outcome);
            let counted = outcome.is_success();
            reporter.emit(ReportEvent::Item(outcome));

            let done = summary.succeeded + summary.unchanged;
            let last = index + 1 == total;
            if last || (counted && summary.succeeded % every == 0) {
                reporter.emit(ReportEvent::progress(label, done, total));
            }
        }

        summary.finish();
        reporter.emit(ReportEvent::Finished(summary.clone()));
        summary
    }
}
