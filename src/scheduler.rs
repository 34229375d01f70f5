//! The local scheduler collaborator (spec §6): named but not implemented by
//! this core. Expressed as a trait so the constraint-change protocol has no
//! hidden dependency on a real kernel scheduler.

use crate::sync::SpinLock;
use std::collections::HashMap;

/// A scheduling constraint a thread may run under. Field shapes are
/// grounded on `struct nk_sched_constraints` usage in
/// `original_source/src/nautilus/parthread.c` (`periodic.phase/period/slice`)
/// and `original_source/src/nautilus/group_sched.c` (`aperiodic.priority`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraints {
    Aperiodic {
        priority: u32,
        interrupt_priority_class: u8,
    },
    Sporadic {
        phase: u64,
        size: u64,
        deadline: u64,
        aperiodic_priority: u32,
        interrupt_priority_class: u8,
    },
    Periodic {
        phase: u64,
        period: u64,
        slice: u64,
        start: Option<u64>,
        interrupt_priority_class: u8,
    },
}

impl Constraints {
    /// The constraint deep rollback (§4.4 P6) installs: default aperiodic
    /// priority, per `config::DEFAULT_PRIORITY`.
    pub fn default_aperiodic() -> Self {
        Constraints::Aperiodic {
            priority: crate::config::DEFAULT_PRIORITY,
            interrupt_priority_class: 0,
        }
    }
}

/// The local scheduler collaborator named in spec §6.
pub trait Scheduler: Send + Sync {
    /// Atomically update the caller's scheduling constraint. `Err` means
    /// the new constraint was rejected with no observable state change.
    fn thread_change_constraints(&self, thread: ThreadId, c: Constraints) -> Result<(), ()>;

    /// Snapshot a thread's current scheduling constraint.
    fn thread_get_constraints(&self, thread: ThreadId) -> Constraints;

    fn get_cur_time(&self) -> u64;
}

/// Opaque thread identity, as handed out by the thread runtime collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

/// An in-memory scheduler double for tests. Every thread starts aperiodic
/// at `DEFAULT_PRIORITY`. A thread's Nth call to `thread_change_constraints`
/// can be programmed to fail, which is enough to drive every scenario in
/// spec §8: the forward commit is always a thread's first call during an
/// attempt, a rollback-to-prior attempt (if any) is its second.
pub struct TestScheduler {
    constraints: SpinLock<HashMap<ThreadId, Constraints>>,
    call_count: SpinLock<HashMap<ThreadId, u32>>,
    reject_calls: SpinLock<HashMap<ThreadId, u32>>,
    clock: std::sync::atomic::AtomicU64,
}

impl TestScheduler {
    pub fn new() -> Self {
        Self {
            constraints: SpinLock::new(HashMap::new()),
            call_count: SpinLock::new(HashMap::new()),
            reject_calls: SpinLock::new(HashMap::new()),
            clock: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Make `thread`'s `call_index`th call (1-based) to
    /// `thread_change_constraints` fail.
    pub fn reject_nth_call(&self, thread: ThreadId, call_index: u32) {
        self.reject_calls.lock().insert(thread, call_index);
    }
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TestScheduler {
    fn thread_change_constraints(&self, thread: ThreadId, c: Constraints) -> Result<(), ()> {
        let call_index = {
            let mut counts = self.call_count.lock();
            let entry = counts.entry(thread).or_insert(0);
            *entry += 1;
            *entry
        };
        if self.reject_calls.lock().get(&thread) == Some(&call_index) {
            return Err(());
        }
        self.constraints.lock().insert(thread, c);
        Ok(())
    }

    fn thread_get_constraints(&self, thread: ThreadId) -> Constraints {
        *self
            .constraints
            .lock()
            .entry(thread)
            .or_insert_with(Constraints::default_aperiodic)
    }

    fn get_cur_time(&self) -> u64 {
        self.clock.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}
