// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Progress and outcome reporting for batch operations
//!
//! The engines emit [`ReportEvent`]s; a [`Reporter`] decides how they reach
//! the operator (console text, JSON lines, collected for a final dump).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::guard::{BatchKind, BatchOp};

/// What happened to one item of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Created,
    Updated,
    Unchanged,
    /// No catalog item matches the thread title
    Missing,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub name: String,
    #[serde(flatten)]
    pub status: ItemStatus,
}

impl ItemOutcome {
    pub fn new(name: impl Into<String>, status: ItemStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }

    /// Created or updated
    pub fn is_success(&self) -> bool {
        matches!(self.status, ItemStatus::Created | ItemStatus::Updated)
    }
}

/// Totals for a finished batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub kind: BatchKind,
    pub total: usize,
    pub succeeded: usize,
    pub unchanged: usize,
    pub missing: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchSummary {
    pub fn new(kind: BatchKind, total: usize) -> Self {
        let now = Utc::now();
        Self {
            kind,
            total,
            succeeded: 0,
            unchanged: 0,
            missing: 0,
            failed: 0,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn record(&mut self, outcome: &ItemOutcome) {
        match outcome.status {
            ItemStatus::Created | ItemStatus::Updated => self.succeeded += 1,
            ItemStatus::Unchanged => self.unchanged += 1,
            ItemStatus::Missing => self.missing += 1,
            ItemStatus::Failed { .. } => self.failed += 1,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReportEvent {
    Started { kind: BatchKind, total: usize },
    Item(ItemOutcome),
    Progress { label: String, done: usize, total: usize, percent: u32 },
    Finished(BatchSummary),
    Notice { message: String },
}

impl ReportEvent {
    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
        }
    }

    pub fn progress(label: impl Into<String>, done: usize, total: usize) -> Self {
        Self::Progress {
            label: label.into(),
            done,
            total,
            percent: percentage(done, total),
        }
    }

    /// Operator-facing text for this event
    pub fn render(&self) -> String {
        match self {
            ReportEvent::Started { kind, total } => match kind.op {
                BatchOp::Create => format!(
                    "Generating {} threads...\n-# This may take a while depending on the amount of collectibles you have.",
                    total
                ),
                BatchOp::Update => format!(
                    "Updating threads ({} to check)...\n-# This may take a while depending on the amount of collectibles you updated.",
                    total
                ),
            },
            ReportEvent::Item(outcome) => match &outcome.status {
                ItemStatus::Created => format!("Created `{}`", outcome.name),
                ItemStatus::Updated => format!("Updated `{}`", outcome.name),
                ItemStatus::Unchanged => format!("`{}` is already up to date", outcome.name),
                ItemStatus::Missing => format!("Could not find {}", outcome.name),
                ItemStatus::Failed { error } => {
                    format!("Failed to process `{}`\n```\n{}\n```\nContinuing...", outcome.name, error)
                }
            },
            ReportEvent::Progress { label, done, total, percent } => {
                format!("{}: {}% ({}/{})", label, percent, done, total)
            }
            ReportEvent::Finished(summary) => {
                let verb = match summary.kind.op {
                    BatchOp::Create => "Created",
                    BatchOp::Update => "Updated",
                };
                let mut text = format!("{} `{}` threads", verb, summary.succeeded);
                if summary.failed > 0 {
                    text.push_str(&format!(" ({} failed)", summary.failed));
                }
                text
            }
            ReportEvent::Notice { message } => message.clone(),
        }
    }
}

/// `done / total` as a rounded whole percentage
pub fn percentage(done: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).round() as u32
}

/// Receives events from the engines
pub trait Reporter: Send {
    fn emit(&mut self, event: ReportEvent);
}

/// Output format for the console reporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    JsonLines,
}

/// Prints events as they arrive
pub struct ConsoleReporter {
    format: ReportFormat,
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(format: ReportFormat, quiet: bool) -> Self {
        Self { format, quiet }
    }
}

impl Reporter for ConsoleReporter {
    fn emit(&mut self, event: ReportEvent) {
        match self.format {
            ReportFormat::Text => {
                let essential = matches!(
                    event,
                    ReportEvent::Finished(_)
                        | ReportEvent::Item(ItemOutcome { status: ItemStatus::Failed { .. } | ItemStatus::Missing, .. })
                );
                if self.quiet && !essential {
                    return;
                }
                println!("{}", event.render());
            }
            ReportFormat::JsonLines => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize report event: {}", e),
            },
        }
    }
}

/// Keeps every event, for a final JSON dump or inspection
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Vec<ReportEvent>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ReportEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<ReportEvent> {
        self.events
    }

    /// Rendered text of every event
    pub fn lines(&self) -> Vec<String> {
        self.events.iter().map(ReportEvent::render).collect()
    }

    pub fn outcomes(&self) -> Vec<&ItemOutcome> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ReportEvent::Item(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    /// Progress percentages in emission order
    pub fn progress(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ReportEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }
}

impl Reporter for MemoryReporter {
    fn emit(&mut self, event: ReportEvent) {
        if let ReportEvent::Finished(ref summary) = event {
            info!("{} finished: {} succeeded, {} failed", summary.kind, summary.succeeded, summary.failed);
        }
        self.events.push(event);
    }
}
