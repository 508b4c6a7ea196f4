// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Gallerist: forum art gallery reconciliation and intake
//!
//! Keeps a forum of per-collectible threads in step with the catalog,
//! accepts community art submissions into versioned storage, and updates
//! its own hosting package from a remote source.

pub mod catalog;
pub mod config;
pub mod error;
pub mod gallery;
pub mod guard;
pub mod host;
pub mod installer;
pub mod intake;
pub mod reconcile;
pub mod reference;
pub mod report;
pub mod session;
pub mod storage;
pub mod versioner;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use error::{GalleristError, Result};
