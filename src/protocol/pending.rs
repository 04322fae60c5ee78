use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::trace;

use super::{CompletionSlot, Error, Outcome};

#[derive(Debug, Default)]
struct TableState {
    closed: bool,
    slots: HashMap<u32, Arc<CompletionSlot>>,
}

/// Outstanding requests of one connection, keyed by request id.
///
/// A single lock guards both the entries and the connection's closed flag. It is held
/// only for the map operation itself; nobody waits for I/O while holding it. Removing
/// an entry is what decides between a delivered response and a timeout: the caller
/// that takes the entry out fires its slot, the other one finds nothing and does
/// nothing.
#[derive(Debug, Default)]
pub struct PendingTable {
    state: Mutex<TableState>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `slot` under `id`; fails fast once the connection is closed.
    ///
    /// `id` must not be outstanding already.
    pub fn register(&self, id: u32, slot: Arc<CompletionSlot>) -> Result<(), Error> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::ClosedConnection);
        }
        debug_assert!(
            !state.slots.contains_key(&id),
            "request {id} is already outstanding"
        );
        state.slots.insert(id, slot);
        trace!("registered request {id}, {} outstanding", state.slots.len());
        Ok(())
    }

    /// Delivers `outcome` to the request registered under `id`.
    ///
    /// Returns `false` when no such request is outstanding, e.g. because it already
    /// timed out.
    pub fn resolve(&self, id: u32, outcome: Outcome) -> bool {
        let Some(slot) = self.lock().slots.remove(&id) else {
            trace!("request {id} is not pending");
            return false;
        };
        trace!("resolved request {id}");
        slot.fire(outcome)
    }

    /// Times the request out if it is still outstanding.
    pub fn cancel(&self, id: u32) -> bool {
        let Some(slot) = self.lock().slots.remove(&id) else {
            return false;
        };
        trace!("cancelled request {id}");
        slot.cancel()
    }

    /// Drops the registration without firing the slot.
    pub fn remove(&self, id: u32) -> Option<Arc<CompletionSlot>> {
        self.lock().slots.remove(&id)
    }

    /// Marks the table closed and hands back every outstanding slot.
    ///
    /// The returned slots are not fired; resolving them is up to the caller.
    pub fn close(&self) -> Vec<Arc<CompletionSlot>> {
        let mut state = self.lock();
        state.closed = true;
        state.slots.drain().map(|(_, slot)| slot).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn contains(&self, id: u32) -> bool {
        self.lock().slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
