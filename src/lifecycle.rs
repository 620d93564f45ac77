use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::error::SqlRuntimeError;

/// Lifecycle state shared by every entity. Streams end in `Closed` or `Cancelled`,
/// everything else ends in `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Active = 1,
    Finished = 2,
    Closed = 3,
    Cancelled = 4,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Active,
            2 => LifecycleState::Finished,
            3 => LifecycleState::Closed,
            _ => LifecycleState::Cancelled,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::Finished | LifecycleState::Closed | LifecycleState::Cancelled
        )
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: LifecycleState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// `Ok` only in `Active`; `NotReady` before initialisation, `AlreadyFinished` after.
    pub(crate) fn ensure_active(
        &self,
        entity: &str,
        not_ready: &str,
    ) -> Result<(), SqlRuntimeError> {
        match self.get() {
            LifecycleState::Active => Ok(()),
            LifecycleState::Uninitialized => Err(SqlRuntimeError::NotReady(not_ready.into())),
            _ => Err(SqlRuntimeError::AlreadyFinished(entity.into())),
        }
    }
}

/// Number of open children a parent must wait out before its own teardown.
#[derive(Debug, Default)]
pub(crate) struct ChildCounter(AtomicUsize);

impl ChildCounter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Reserve a slot ahead of the native call that opens the child. The slot is
    /// given back unless [`ChildReservation::keep`] is called.
    pub(crate) fn reserve(&self) -> ChildReservation<'_> {
        self.0.fetch_add(1, Ordering::AcqRel);
        ChildReservation {
            counter: self,
            kept: false,
        }
    }

    pub(crate) fn release(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn ensure_zero(
        &self,
        entity: &'static str,
        child: &'static str,
    ) -> Result<(), SqlRuntimeError> {
        match self.get() {
            0 => Ok(()),
            count => Err(SqlRuntimeError::OpenChildren {
                entity,
                child,
                count,
            }),
        }
    }
}

pub(crate) struct ChildReservation<'a> {
    counter: &'a ChildCounter,
    kept: bool,
}

impl ChildReservation<'_> {
    pub(crate) fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for ChildReservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.counter.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_active_maps_states() {
        let cell = StateCell::new(LifecycleState::Uninitialized);
        assert!(matches!(
            cell.ensure_active("Transaction", "Need to open transaction"),
            Err(SqlRuntimeError::NotReady(msg)) if msg == "Need to open transaction"
        ));
        cell.set(LifecycleState::Active);
        assert!(cell.ensure_active("Transaction", "").is_ok());
        cell.set(LifecycleState::Cancelled);
        assert!(matches!(
            cell.ensure_active("Blob stream", ""),
            Err(SqlRuntimeError::AlreadyFinished(_))
        ));
    }

    #[test]
    fn reservation_rolls_back_unless_kept() {
        let counter = ChildCounter::default();
        {
            let _slot = counter.reserve();
            assert_eq!(counter.get(), 1);
        }
        assert_eq!(counter.get(), 0);
        counter.reserve().keep();
        assert_eq!(counter.get(), 1);
        assert!(matches!(
            counter.ensure_zero("Connection", "transactions"),
            Err(SqlRuntimeError::OpenChildren { count: 1, .. })
        ));
        counter.release();
        counter.release();
        assert_eq!(counter.get(), 0);
    }
}
