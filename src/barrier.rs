//! The Collective Barrier (spec §4.1): a re-entrant, sense-reversing phase
//! barrier that supports dynamic join/leave between and even during phases.
//!
//! Grounded on `group_barrier_wait`/`group_barrier_join`/`group_barrier_leave`
//! in `original_source/src/nautilus/group.c`. The original signals phase
//! completion with a `notify` flag that the last arriver sets and that is
//! reset once `remaining` has climbed back up to `init_count` -- a detail
//! that relies on one thread's raw spinlock bit being released by whichever
//! *other* thread's atomic increment happens to restore the count. Per
//! spec §9 ("sense-reversing reset via counter climb"), we re-express this
//! with an explicit phase generation counter instead: equivalent semantics
//! (nothing but the last arriver proceeds until every arriver has been
//! accounted for), no baton-passed lock release to reason about.

use crate::error::{GroupError, GroupResult};
use crate::sync::SpinLock;

/// Result of a completed `wait`/`leave` call: whether the caller was the
/// one whose arrival released the rest of the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// The caller was the last to arrive and released the phase.
    Last,
    /// The caller arrived before the last thread and was released by it.
    Released,
}

struct BarrierState {
    /// Current number of enrolled threads.
    init_count: usize,
    /// Count yet to arrive in the current phase.
    remaining: usize,
    /// Bumped every time a phase completes; waiters spin until it changes.
    generation: u64,
}

/// A dynamically-sized, re-entrant sense-reversing barrier.
pub struct CollectiveBarrier {
    state: SpinLock<BarrierState>,
}

impl CollectiveBarrier {
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(BarrierState {
                init_count: 0,
                remaining: 0,
                generation: 0,
            }),
        }
    }

    /// Enroll the caller. Safe to call concurrently with `wait` of other
    /// members; the new member participates starting at the next
    /// uncompleted phase, since both counters move together and the gap
    /// between them (the number of arrivals already observed this phase)
    /// is unaffected.
    pub fn join(&self) {
        let mut state = self.state.lock();
        state.init_count += 1;
        state.remaining += 1;
    }

    /// Withdraw the caller. Leavers do not block: if this withdrawal
    /// causes `remaining` to hit zero, the phase completes exactly as if
    /// the leaver had arrived.
    pub fn leave(&self) -> GroupResult<Arrival> {
        let mut state = self.state.lock();
        state.init_count = state
            .init_count
            .checked_sub(1)
            .ok_or(GroupError::BadState)?;
        state.remaining = state
            .remaining
            .checked_sub(1)
            .ok_or(GroupError::BadState)?;
        if state.remaining == 0 {
            state.remaining = state.init_count;
            state.generation = state.generation.wrapping_add(1);
            Ok(Arrival::Last)
        } else {
            Ok(Arrival::Released)
        }
    }

    /// Block until every currently-enrolled member has called `wait` for
    /// this phase.
    pub fn wait(&self) -> GroupResult<Arrival> {
        let mut state = self.state.lock();
        state.remaining = state
            .remaining
            .checked_sub(1)
            .ok_or(GroupError::BadState)?;
        if state.remaining == 0 {
            state.remaining = state.init_count;
            state.generation = state.generation.wrapping_add(1);
            Ok(Arrival::Last)
        } else {
            let generation = state.generation;
            drop(state);
            loop {
                if self.state.lock().generation != generation {
                    break;
                }
                std::hint::spin_loop();
            }
            Ok(Arrival::Released)
        }
    }

    pub fn init_count(&self) -> usize {
        self.state.lock().init_count
    }

    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }
}

impl Default for CollectiveBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_member_completes_immediately() {
        let barrier = CollectiveBarrier::new();
        barrier.join();
        assert_eq!(barrier.wait().unwrap(), Arrival::Last);
    }

    #[test]
    fn eight_members_ten_phases_with_churn() {
        let barrier = Arc::new(CollectiveBarrier::new());
        for _ in 0..8 {
            barrier.join();
        }

        let phase_counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let barrier = barrier.clone();
            let phase_counter = phase_counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..10 {
                    barrier.wait().unwrap();
                }
                phase_counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let joiner_barrier = barrier.clone();
        let joiner = thread::spawn(move || {
            joiner_barrier.join();
            for _ in 0..7 {
                joiner_barrier.wait().unwrap();
            }
        });

        let leaver_barrier = barrier.clone();
        let leaver = thread::spawn(move || {
            for _ in 0..7 {
                leaver_barrier.wait().unwrap();
            }
            leaver_barrier.leave().unwrap();
        });

        for h in handles {
            h.join().unwrap();
        }
        joiner.join().unwrap();
        leaver.join().unwrap();

        assert_eq!(phase_counter.load(Ordering::SeqCst), 8);
        assert_eq!(barrier.init_count(), 8);
        assert_eq!(barrier.remaining(), 8);
    }

    #[test]
    fn join_then_leave_restores_prior_size() {
        let barrier = CollectiveBarrier::new();
        barrier.join();
        let before = barrier.init_count();
        barrier.join();
        barrier.leave().unwrap();
        assert_eq!(barrier.init_count(), before);
    }

    #[test]
    fn leave_of_last_outstanding_arriver_fires_release() {
        let barrier = CollectiveBarrier::new();
        barrier.join();
        barrier.join();
        assert_eq!(barrier.leave().unwrap(), Arrival::Released);
        assert_eq!(barrier.leave().unwrap(), Arrival::Last);
    }
}
