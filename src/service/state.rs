//! Set-once holder for the process-wide connection handle.

use crate::error::BootstrapError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};

enum Slot<H> {
    Empty,
    /// Connected, reconciliation still running.
    Staged(Arc<H>),
    Ready {
        handle: Arc<H>,
        attempt: u32,
        ready_at: DateTime<Utc>,
    },
}

/// When and on which attempt the ready handle was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyInfo {
    pub attempt: u32,
    pub ready_at: DateTime<Utc>,
}

/// Guarded single-assignment cell for one connection handle.
///
/// Bootstrap stages a handle as soon as it connects and promotes it once the
/// schema is reconciled. The first promotion wins and is never replaced.
/// The lock is only held for the slot swap, never across an `.await`.
pub struct DatabaseState<H> {
    slot: RwLock<Slot<H>>,
}

impl<H> Default for DatabaseState<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> DatabaseState<H> {
    pub const fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::Empty),
        }
    }

    /// The published handle, staged or ready.
    pub fn get(&self) -> Result<Arc<H>, BootstrapError> {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            Slot::Empty => Err(BootstrapError::NotInitialized),
            Slot::Staged(handle) | Slot::Ready { handle, .. } => Ok(handle.clone()),
        }
    }

    /// The handle only once its schema has been reconciled.
    pub fn ready(&self) -> Option<Arc<H>> {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            Slot::Ready { handle, .. } => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready_info().is_some()
    }

    pub fn ready_info(&self) -> Option<ReadyInfo> {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            Slot::Ready {
                attempt, ready_at, ..
            } => Some(ReadyInfo {
                attempt: *attempt,
                ready_at: *ready_at,
            }),
            _ => None,
        }
    }

    /// Publish a freshly connected handle ahead of reconciliation.
    ///
    /// Replaces a handle staged by an earlier failed attempt. A ready handle
    /// is left in place; the caller still gets its own handle back to reconcile.
    pub(crate) fn stage(&self, handle: H) -> Arc<H> {
        let handle = Arc::new(handle);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*slot, Slot::Ready { .. }) {
            *slot = Slot::Staged(handle.clone());
        }
        handle
    }

    /// Mark `staged` ready, or return the handle that won an earlier promotion.
    pub(crate) fn promote(&self, staged: &Arc<H>, attempt: u32) -> Arc<H> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Slot::Ready { handle, .. } = &*slot {
            return handle.clone();
        }
        *slot = Slot::Ready {
            handle: staged.clone(),
            attempt,
            ready_at: Utc::now(),
        };
        staged.clone()
    }

    /// Drop `staged` from the slot if it is still the staged handle.
    pub(crate) fn retract(&self, staged: &Arc<H>) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Slot::Staged(handle) = &*slot
            && Arc::ptr_eq(handle, staged)
        {
            *slot = Slot::Empty;
        }
    }
}
