// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Single-flight gate for batch operations
//!
//! Each (operation, art slot) pair can have at most one batch in flight.
//! Acquiring hands out a [`GuardPermit`]; the flag is cleared when the permit
//! is dropped, so every exit path of the guarded batch releases it,
//! including errors, panics and a cancelled future.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::catalog::ArtSlot;
use crate::{GalleristError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOp {
    Create,
    Update,
}

/// Identifies one kind of batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BatchKind {
    pub op: BatchOp,
    pub slot: ArtSlot,
}

impl BatchKind {
    pub fn new(op: BatchOp, slot: ArtSlot) -> Self {
        Self { op, slot }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            BatchOp::Create => "create",
            BatchOp::Update => "update",
        };
        write!(f, "{} {} art", op, self.slot)
    }
}

/// Per-kind in-flight flags, shared by clones
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGuard {
    held: Arc<Mutex<HashSet<BatchKind>>>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<BatchKind>> {
        // A panic while holding the lock cannot leave the set half-updated.
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the flag for `kind`, or `None` if a batch of that kind is running
    pub fn acquire(&self, kind: BatchKind) -> Option<GuardPermit> {
        if !self.lock().insert(kind) {
            debug!("{} already in flight", kind);
            return None;
        }
        debug!("Acquired guard for {}", kind);
        Some(GuardPermit {
            guard: self.clone(),
            kind,
        })
    }

    /// Like [`acquire`](Self::acquire) but reports a held flag as a conflict
    pub fn try_acquire(&self, kind: BatchKind) -> Result<GuardPermit> {
        self.acquire(kind)
            .ok_or_else(|| GalleristError::ConcurrencyConflict(kind.to_string()))
    }

    pub fn is_held(&self, kind: BatchKind) -> bool {
        self.lock().contains(&kind)
    }

    /// Kinds currently in flight, by name
    pub fn held(&self) -> Vec<BatchKind> {
        let mut held: Vec<BatchKind> = self.lock().iter().copied().collect();
        held.sort_by_key(|kind| kind.to_string());
        held
    }

    fn release(&self, kind: BatchKind) {
        if !self.lock().remove(&kind) {
            warn!("Released guard for {} that was not held", kind);
        }
    }
}

/// Proof that a batch of `kind` owns the flag; releases it on drop
#[derive(Debug)]
pub struct GuardPermit {
    guard: ConcurrencyGuard,
    kind: BatchKind,
}

impl GuardPermit {
    pub fn kind(&self) -> BatchKind {
        self.kind
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        self.guard.release(self.kind);
        debug!("Released guard for {}", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE_PRIMARY: BatchKind = BatchKind { op: BatchOp::Create, slot: ArtSlot::Primary };

    #[test]
    fn test_second_acquire_is_refused() {
        let guard = ConcurrencyGuard::new();
        let permit = guard.acquire(CREATE_PRIMARY).unwrap();
        assert!(guard.is_held(CREATE_PRIMARY));
        assert!(guard.acquire(CREATE_PRIMARY).is_none());
        assert!(matches!(
            guard.try_acquire(CREATE_PRIMARY),
            Err(GalleristError::ConcurrencyConflict(_))
        ));
        drop(permit);
        assert!(!guard.is_held(CREATE_PRIMARY));
        assert!(guard.acquire(CREATE_PRIMARY).is_some());
    }

    #[test]
    fn test_kinds_are_independent() {
        let guard = ConcurrencyGuard::new();
        let _create = guard.acquire(CREATE_PRIMARY).unwrap();
        assert!(guard.acquire(BatchKind::new(BatchOp::Create, ArtSlot::Detail)).is_some());
        assert!(guard.acquire(BatchKind::new(BatchOp::Update, ArtSlot::Primary)).is_some());
    }

    #[test]
    fn test_held_lists_running_kinds() {
        let guard = ConcurrencyGuard::new();
        assert!(guard.held().is_empty());
        let _update = guard.acquire(BatchKind::new(BatchOp::Update, ArtSlot::Primary)).unwrap();
        let _create = guard.acquire(CREATE_PRIMARY).unwrap();
        assert_eq!(
            guard.held(),
            vec![CREATE_PRIMARY, BatchKind::new(BatchOp::Update, ArtSlot::Primary)]
        );
    }

    #[test]
    fn test_released_on_error_path() {
        fn guarded(guard: &ConcurrencyGuard) -> Result<()> {
            let _permit = guard.try_acquire(CREATE_PRIMARY)?;
            Err(GalleristError::ExternalService("boom".to_string()))
        }

        let guard = ConcurrencyGuard::new();
        assert!(guarded(&guard).is_err());
        assert!(!guard.is_held(CREATE_PRIMARY));
    }

    #[tokio::test]
    async fn test_released_when_future_is_cancelled() {
        let guard = ConcurrencyGuard::new();
        let task_guard = guard.clone();
        let handle = tokio::spawn(async move {
            let _permit = task_guard.acquire(CREATE_PRIMARY).unwrap();
            std::future::pending::<()>().await;
        });

        while !guard.is_held(CREATE_PRIMARY) {
            tokio::task::yield_now().await;
        }
        handle.abort();
        let _ = handle.await;
        assert!(!guard.is_held(CREATE_PRIMARY));
    }

    #[test]
    fn test_display() {
        assert_eq!(CREATE_PRIMARY.to_string(), "create primary art");
    }
}
