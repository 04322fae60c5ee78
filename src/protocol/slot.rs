use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use super::{Error, Response};

/// What a request resolved to.
pub type Outcome = Result<Response, Error>;

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Pending,
    Resolved(Outcome),
    Cancelled,
}

impl SlotState {
    fn outcome(&self) -> Option<Outcome> {
        match self {
            SlotState::Pending => None,
            SlotState::Resolved(outcome) => Some(outcome.clone()),
            SlotState::Cancelled => Some(Err(Error::ClientTimeout)),
        }
    }
}

/// One-shot cell holding the eventual outcome of a single request.
///
/// The slot leaves `Pending` exactly once, either through [`fire`](Self::fire) (a
/// response or error was delivered) or through [`cancel`](Self::cancel) (the deadline
/// passed). Whichever transition comes second is ignored. Once fired the outcome never
/// changes and can be read any number of times.
#[derive(Debug, Default)]
pub struct CompletionSlot {
    state: Mutex<SlotState>,
    fired: Condvar,
}

impl CompletionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot that is already resolved with `outcome`.
    pub fn resolved(outcome: Outcome) -> Self {
        Self {
            state: Mutex::new(SlotState::Resolved(outcome)),
            fired: Condvar::new(),
        }
    }

    /// Resolves the slot. Returns `false` if it had already fired.
    pub fn fire(&self, outcome: Outcome) -> bool {
        self.transition(SlotState::Resolved(outcome))
    }

    /// Resolves the slot with [`Error::ClientTimeout`]. Returns `false` if it had
    /// already fired.
    pub fn cancel(&self) -> bool {
        self.transition(SlotState::Cancelled)
    }

    pub fn is_fired(&self) -> bool {
        !matches!(*self.lock(), SlotState::Pending)
    }

    /// Non-blocking read.
    pub fn try_get(&self) -> Option<Outcome> {
        self.lock().outcome()
    }

    /// Blocks until the slot fires.
    pub fn wait(&self) -> Outcome {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return outcome;
            }
            state = self
                .fired
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the slot fires or `deadline` passes, whichever is first.
    pub fn wait_until(&self, deadline: Instant) -> Option<Outcome> {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return Some(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .fired
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn transition(&self, next: SlotState) -> bool {
        let mut state = self.lock();
        if !matches!(*state, SlotState::Pending) {
            return false;
        }
        *state = next;
        drop(state);
        self.fired.notify_all();
        true
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    use super::*;
    use crate::protocol::Value;

    #[test]
    fn fires_once() {
        let slot = CompletionSlot::new();
        assert!(slot.try_get().is_none());

        assert!(slot.fire(Ok(Response::new(1, vec![]))));
        assert!(!slot.fire(Err(Error::ClosedConnection)));
        assert!(!slot.cancel());

        assert_eq!(slot.wait(), Ok(Response::new(1, vec![])));
        assert_eq!(slot.try_get(), Some(Ok(Response::new(1, vec![]))));
    }

    #[test]
    fn cancelled_slot_reads_as_timeout() {
        let slot = CompletionSlot::new();

        assert!(slot.cancel());
        assert!(!slot.fire(Ok(Response::new(1, vec![]))));
        assert_eq!(slot.wait(), Err(Error::ClientTimeout));
    }

    #[test]
    fn wait_until_expires() {
        let slot = CompletionSlot::new();
        let start = Instant::now();

        assert!(slot.wait_until(start + Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!slot.is_fired());
    }

    #[test]
    fn wakes_waiter_on_another_thread() {
        let slot = Arc::new(CompletionSlot::new());
        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.wait_until(Instant::now() + Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(10));
        slot.fire(Ok(Response::new(3, vec![Value::UInt(1)])));

        assert_eq!(
            waiter.join().unwrap(),
            Some(Ok(Response::new(3, vec![Value::UInt(1)])))
        );
    }

    #[test]
    fn concurrent_fire_and_cancel_pick_one_winner() {
        for _ in 0..200 {
            let slot = Arc::new(CompletionSlot::new());
            let barrier = Arc::new(Barrier::new(2));

            let firing = {
                let (slot, barrier) = (Arc::clone(&slot), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    slot.fire(Ok(Response::new(1, vec![])))
                })
            };
            barrier.wait();
            let cancelled = slot.cancel();
            let fired = firing.join().unwrap();

            assert!(fired ^ cancelled);
            let expected = if fired {
                Ok(Response::new(1, vec![]))
            } else {
                Err(Error::ClientTimeout)
            };
            assert_eq!(slot.wait(), expected);
        }
    }
}
