// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Long-running operator session
//!
//! One process owns the engine, the intake and the installer for as long as
//! it runs, so every command typed into it shares the same batch guard and
//! the same loaded packages. Commands arrive one per line and use the same
//! clap definitions as the one-shot subcommands. Each job runs as its own
//! task; a job whose batch is already in flight is refused before it starts.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::catalog::ArtSlot;
use crate::gallery::Snowflake;
use crate::guard::{BatchOp, GuardPermit};
use crate::installer::{InstallReport, UpdateInstaller, UpdateManifest};
use crate::intake::{Acceptance, SubmissionIntake};
use crate::reconcile::ReconciliationEngine;
use crate::reference::SubmissionReference;
use crate::report::{BatchSummary, ReportFormat, Reporter};
use crate::{GalleristError, Result};

/// Work an operator can start
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Create a thread for every enabled collectible that has none
    Create {
        /// Forum channel holding the gallery threads
        forum: Snowflake,

        /// Art slot shown in the threads (primary or detail)
        #[arg(short, long, default_value = "primary")]
        slot: ArtSlot,
    },

    /// Refresh the art of every gallery thread from the catalog
    Update {
        /// Forum channel holding the gallery threads
        forum: Snowflake,

        /// Art slot shown in the threads (primary or detail)
        #[arg(short, long, default_value = "primary")]
        slot: ArtSlot,
    },

    /// Accept a submitted attachment as a collectible's art
    Accept {
        /// Link to the submission message
        link: String,

        /// Art slot to replace (primary or detail)
        #[arg(short, long, default_value = "primary")]
        slot: ArtSlot,

        /// Attachment number, starting at 1
        #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
        attachment: u64,
    },

    /// Install or update the gallery package from its remote source
    Install {
        /// Fetch every file before writing any
        #[arg(long)]
        staged: bool,
    },
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Create { forum, slot } => write!(f, "create {} ({})", forum, slot),
            Job::Update { forum, slot } => write!(f, "update {} ({})", forum, slot),
            Job::Accept { link, slot, attachment } => write!(f, "accept {} #{} ({})", link, attachment, slot),
            Job::Install { staged: true } => f.write_str("install (staged)"),
            Job::Install { staged: false } => f.write_str("install"),
        }
    }
}

/// One line typed into a session
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    #[command(flatten)]
    Job(Job),

    /// List the batches and installs still running
    Status,

    /// Wait for running jobs, then leave
    #[command(alias = "exit")]
    Quit,
}

#[derive(Parser, Debug)]
#[command(name = "gallerist>", no_binary_name = true, disable_version_flag = true)]
struct OperatorLine {
    #[command(subcommand)]
    command: OperatorCommand,
}

impl OperatorCommand {
    /// Parse a whitespace-separated command line; `help` comes back as an
    /// error carrying the help text.
    pub fn parse_line(line: &str) -> std::result::Result<Self, clap::Error> {
        OperatorLine::try_parse_from(line.split_whitespace()).map(|line| line.command)
    }
}

/// What a finished job produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "job", rename_all = "lowercase")]
pub enum JobOutcome {
    Batch(BatchSummary),
    Accepted(Acceptance),
    Installed(InstallReport),
}

impl JobOutcome {
    /// Text for the operator; batches already reported their summary
    pub fn confirmation(&self) -> Option<String> {
        match self {
            JobOutcome::Batch(_) => None,
            JobOutcome::Accepted(acceptance) => Some(acceptance.confirmation()),
            JobOutcome::Installed(report) => Some(match &report.aborted {
                None => format!(
                    "Installed {} file(s), kept {}, {} command(s) synced",
                    report.written.len(),
                    report.skipped.len(),
                    report.commands_synced
                ),
                Some(abort) => format!("Install stopped at `{}` ({})", abort.file, abort.reason),
            }),
        }
    }
}

/// Builds a fresh reporter for every job
pub type ReporterFactory = Arc<dyn Fn() -> Box<dyn Reporter> + Send + Sync>;

/// Counts of how the jobs of a session ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub completed: usize,
    pub failed: usize,
    pub refused: usize,
}

/// Shared handles for every job of a session; clones share everything
#[derive(Clone)]
pub struct Session {
    engine: Arc<ReconciliationEngine>,
    intake: Arc<SubmissionIntake>,
    installer: Arc<UpdateInstaller>,
    manifest: UpdateManifest,
    installing: Arc<Mutex<()>>,
}

enum Hold {
    Batch(GuardPermit),
    Install(OwnedMutexGuard<()>),
    Nothing,
}

/// A job that passed its single-flight check and may run
pub struct PreparedJob {
    session: Session,
    job: Job,
    hold: Hold,
}

impl Session {
    pub fn new(
        engine: ReconciliationEngine,
        intake: SubmissionIntake,
        installer: UpdateInstaller,
        manifest: UpdateManifest,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            intake: Arc::new(intake),
            installer: Arc::new(installer),
            manifest,
            installing: Arc::new(Mutex::new(())),
        }
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// Take the flag `job` needs, refusing it if the same kind is running
    pub fn prepare(&self, job: Job) -> Result<PreparedJob> {
        let hold = match &job {
            Job::Create { slot, .. } => Hold::Batch(self.engine.begin(BatchOp::Create, *slot)?),
            Job::Update { slot, .. } => Hold::Batch(self.engine.begin(BatchOp::Update, *slot)?),
            Job::Install { .. } => match self.installing.clone().try_lock_owned() {
                Ok(lock) => Hold::Install(lock),
                Err(_) => return Err(GalleristError::ConcurrencyConflict("install".to_string())),
            },
            Job::Accept { .. } => Hold::Nothing,
        };
        Ok(PreparedJob { session: self.clone(), job, hold })
    }

    /// Names of the batches and installs in flight
    pub fn running(&self) -> Vec<String> {
        let mut running: Vec<String> = self.engine.guard().held().iter().map(ToString::to_string).collect();
        if self.installing.try_lock().is_err() {
            running.push("install".to_string());
        }
        running
    }

    /// Read operator commands from `input` until `quit`, end of input or a
    /// shutdown signal.
    ///
    /// `quit` and end of input wait for running jobs. A shutdown aborts them;
    /// their flags are released as the tasks are dropped.
    pub async fn serve<R>(
        &self,
        input: R,
        mut shutdown: watch::Receiver<bool>,
        reporters: ReporterFactory,
        format: ReportFormat,
    ) -> Result<ServeStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut jobs: JoinSet<(String, Result<JobOutcome>)> = JoinSet::new();
        let mut stats = ServeStats::default();
        let mut reading = true;

        loop {
            tokio::select! {
                Ok(()) = shutdown.changed() => {
                    if !*shutdown.borrow() {
                        continue;
                    }
                    if !jobs.is_empty() {
                        warn!("Stopping {} running job(s)", jobs.len());
                    }
                    jobs.abort_all();
                    while let Some(joined) = jobs.join_next().await {
                        settle(joined, format, &mut stats);
                    }
                    break;
                }
                line = lines.next_line(), if reading => match line? {
                    Some(line) => reading = self.handle_line(&line, &mut jobs, &reporters, format, &mut stats),
                    None => {
                        debug!("Input closed");
                        reading = false;
                    }
                },
                Some(joined) = jobs.join_next() => settle(joined, format, &mut stats),
                else => break,
            }

            if !reading && jobs.is_empty() {
                break;
            }
        }

        Ok(stats)
    }

    /// Act on one input line; `false` once the operator asked to leave
    fn handle_line(
        &self,
        line: &str,
        jobs: &mut JoinSet<(String, Result<JobOutcome>)>,
        reporters: &ReporterFactory,
        format: ReportFormat,
        stats: &mut ServeStats,
    ) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return true;
        }

        let command = match OperatorCommand::parse_line(line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                return true;
            }
        };

        match command {
            OperatorCommand::Quit => {
                if !jobs.is_empty() {
                    info!("Waiting for {} running job(s)", jobs.len());
                }
                return false;
            }
            OperatorCommand::Status => {
                let running = self.running();
                match format {
                    ReportFormat::Text if running.is_empty() => println!("Nothing is running"),
                    ReportFormat::Text => println!("Running: {}", running.join(", ")),
                    ReportFormat::JsonLines => println!("{}", serde_json::json!({ "running": running })),
                }
            }
            OperatorCommand::Job(job) => {
                let label = job.to_string();
                match self.prepare(job) {
                    Ok(prepared) => {
                        info!("Started {}", label);
                        let reporters = reporters.clone();
                        jobs.spawn(async move {
                            let mut reporter = (*reporters)();
                            let result = prepared.run(&mut *reporter).await;
                            (label, result)
                        });
                    }
                    Err(e) => {
                        stats.refused += 1;
                        announce_error(format, &label, &e);
                    }
                }
            }
        }
        true
    }
}

impl PreparedJob {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub async fn run(self, reporter: &mut dyn Reporter) -> Result<JobOutcome> {
        let PreparedJob { session, job, hold } = self;
        match (job, hold) {
            (Job::Create { forum, .. }, Hold::Batch(permit)) => {
                session.engine.create_held(permit, forum, reporter).await.map(JobOutcome::Batch)
            }
            (Job::Update { forum, .. }, Hold::Batch(permit)) => {
                session.engine.update_held(permit, forum, reporter).await.map(JobOutcome::Batch)
            }
            (Job::Accept { link, slot, attachment }, _) => {
                let reference = SubmissionReference::parse(&link)?;
                let index = attachment_index(attachment)?;
                session.intake.accept(&reference, slot, index).await.map(JobOutcome::Accepted)
            }
            (Job::Install { staged }, Hold::Install(lock)) => {
                let staged = staged || session.installer.settings().staged;
                let report = session.installer.install_with(&session.manifest, staged, reporter).await;
                drop(lock);
                report.map(JobOutcome::Installed)
            }
            (job, _) => Err(GalleristError::Validation(format!("{} was not prepared", job))),
        }
    }
}

/// Zero-based index of a one-based attachment number
fn attachment_index(number: u64) -> Result<usize> {
    number
        .checked_sub(1)
        .and_then(|index| usize::try_from(index).ok())
        .ok_or_else(|| GalleristError::Validation(format!("{} is not an attachment number", number)))
}

fn settle(
    joined: std::result::Result<(String, Result<JobOutcome>), JoinError>,
    format: ReportFormat,
    stats: &mut ServeStats,
) {
    match joined {
        Ok((label, Ok(outcome))) => {
            stats.completed += 1;
            info!("Finished {}", label);
            match format {
                ReportFormat::Text => {
                    if let Some(text) = outcome.confirmation() {
                        println!("{}", text);
                    }
                }
                ReportFormat::JsonLines => println!("{}", serde_json::json!({ "job": label, "result": outcome })),
            }
        }
        Ok((label, Err(e))) => {
            stats.failed += 1;
            warn!("{} failed: {}", label, e);
            announce_error(format, &label, &e);
        }
        Err(e) if e.is_cancelled() => debug!("Job cancelled"),
        Err(e) => {
            stats.failed += 1;
            warn!("Job panicked: {}", e);
        }
    }
}

fn announce_error(format: ReportFormat, label: &str, error: &GalleristError) {
    match format {
        ReportFormat::Text => println!("`{}`: {}", label, error),
        ReportFormat::JsonLines => println!("{}", serde_json::json!({ "job": label, "error": error.to_string() })),
    }
}
