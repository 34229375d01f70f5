//! The Collective Constraint-Change Protocol (spec §4.4): a leader-driven,
//! barrier-anchored attempt to move every member of a group onto a new
//! scheduling constraint, with per-thread commit and two-level rollback.
//!
//! Grounded on `nk_group_sched_change_constraints` /
//! `nk_group_sched_set_state` / `group_roll_back_constraint` in
//! `original_source/src/nautilus/group_sched.c`. That source rolls back
//! straight to the default aperiodic constraint on any commit failure; this
//! protocol instead tries each thread's own prior constraint first (P4) and
//! only falls through to the default (P6) if a prior-rollback itself fails
//! for some member, per the richer two-stage contract this subsystem
//! specifies.

use super::{Group, LocalId};
use crate::error::{GroupError, GroupResult};
use crate::log::error;
use crate::scheduler::{Constraints, Scheduler, ThreadId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-attempt shared record, published to every member via
/// `Group::attach_state` for the duration of one `change_constraints` call.
pub struct AttemptState {
    target: Constraints,
    fail: AtomicBool,
    rollback_to_old_fail: AtomicBool,
    changing_count: AtomicUsize,
}

impl AttemptState {
    fn new(target: Constraints, changing_count: usize) -> Self {
        Self {
            target,
            fail: AtomicBool::new(false),
            rollback_to_old_fail: AtomicBool::new(false),
            changing_count: AtomicUsize::new(changing_count),
        }
    }
}

/// Global protocol mutex (spec §4.4: "the protocol mutex is global to
/// prevent scheduler-state interference observed under concurrent attempts
/// in the source"). Acquired by the leader in P0; released by whichever
/// member's P7 decrement observes `changing_count` reach zero -- not
/// necessarily the leader, so this is a plain flag with explicit
/// acquire/release rather than a scope-tied guard.
static PROTOCOL_LOCK: AtomicBool = AtomicBool::new(false);

fn acquire_protocol_lock() {
    while PROTOCOL_LOCK
        .compare_exchange_weak(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        std::hint::spin_loop();
    }
}

fn release_protocol_lock() {
    PROTOCOL_LOCK.store(false, Ordering::Release);
}

/// Run one full attempt to move `group` onto `target` constraints. Every
/// member of `group` must call this between matched barrier phases; `group`
/// must have a unique elected leader at entry (spec §4.4 preconditions).
///
/// Returns `Ok(())` if every member committed `target`, or
/// `Err(GroupError::FailedWithRollback)` if any member's commit failed and
/// every member was rolled back to its prior constraint (or, if a
/// prior-rollback itself failed somewhere, to the default aperiodic
/// constraint). A failure during deep recovery is unrecoverable and
/// surfaces as `GroupError::Fatal`.
pub fn change_constraints(
    group: &Group,
    target: Constraints,
    my_local_id: LocalId,
    thread: ThreadId,
    scheduler: &dyn Scheduler,
) -> GroupResult<()> {
    // P0: record local prior constraint; leader additionally acquires the
    // protocol mutex and publishes the attempt.
    let prior = scheduler.thread_get_constraints(thread);

    if group.check_leader(my_local_id) {
        acquire_protocol_lock();
        let state = Arc::new(AttemptState::new(target, group.size()));
        group.attach_state(state);
    }

    // P1: synchronization point S1 -- every member has now observed target.
    group.barrier_wait()?;

    let state = group.get_state().ok_or(GroupError::BadState)?;

    // P2: local commit.
    if !state.fail.load(Ordering::Acquire)
        && scheduler.thread_change_constraints(thread, state.target).is_err()
    {
        let _ = state
            .fail
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire);
    }

    // P3: synchronization point S2 -- every commit attempt has completed.
    group.barrier_wait()?;

    let failed = state.fail.load(Ordering::Acquire);

    // P4: recover to prior constraint, only on the branch every member
    // agrees on (S2 made `fail` stable before anyone inspects it here).
    if failed && scheduler.thread_change_constraints(thread, prior).is_err() {
        let _ = state.rollback_to_old_fail.compare_exchange(
            false,
            true,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    // P5: synchronization point S3, only entered on the failure branch.
    if failed {
        group.barrier_wait()?;
    }

    // P6: deep recover, if rollback-to-prior itself failed for any member.
    if state.rollback_to_old_fail.load(Ordering::Acquire)
        && scheduler
            .thread_change_constraints(thread, Constraints::default_aperiodic())
            .is_err()
    {
        error!("deep recovery to default aperiodic constraint failed; unrecoverable");
        return Err(GroupError::Fatal);
    }

    // P7: finalize. The member observing the count reach zero tears down
    // the attempt and releases the mutex -- may not be the leader.
    if state.changing_count.fetch_sub(1, Ordering::AcqRel) == 1 {
        group.detach_state();
        release_protocol_lock();
    }

    if failed {
        Err(GroupError::FailedWithRollback)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupName;
    use crate::runtime::TestRuntime;
    use crate::scheduler::TestScheduler;
    use std::sync::Arc;
    use std::thread;

    fn setup(n: usize) -> (Arc<Group>, Arc<TestRuntime>, Vec<LocalId>, Vec<ThreadId>) {
        let group = Group::new(GroupName::new("g").unwrap(), super::GroupId(0));
        let runtime = Arc::new(TestRuntime::new());
        let mut local_ids = Vec::new();
        let mut thread_ids = Vec::new();
        for cpu in 0..n {
            let tid = runtime.bind_current(cpu);
            let local_id = group.join(runtime.as_ref()).unwrap();
            local_ids.push(local_id);
            thread_ids.push(tid);
        }
        group.election(local_ids[0]);
        (group, runtime, local_ids, thread_ids)
    }

    #[test]
    fn happy_path_all_commit_target() {
        let (group, _runtime, local_ids, thread_ids) = setup(4);
        let scheduler = Arc::new(TestScheduler::new());
        let target = Constraints::Periodic {
            phase: 0,
            period: 150_000,
            slice: 75_000,
            start: None,
            interrupt_priority_class: 0,
        };

        let mut handles = Vec::new();
        for i in 0..4 {
            let group = group.clone();
            let scheduler = scheduler.clone();
            let local_id = local_ids[i];
            let thread = thread_ids[i];
            handles.push(thread::spawn(move || {
                change_constraints(&group, target, local_id, thread, scheduler.as_ref())
            }));
        }

        for h in handles {
            assert_eq!(h.join().unwrap(), Ok(()));
        }
        for tid in thread_ids {
            assert_eq!(scheduler.thread_get_constraints(tid), target);
        }
    }

    #[test]
    fn commit_failure_rolls_back_to_prior() {
        let (group, _runtime, local_ids, thread_ids) = setup(4);
        let scheduler = Arc::new(TestScheduler::new());
        let priors: Vec<Constraints> = thread_ids
            .iter()
            .map(|t| scheduler.thread_get_constraints(*t))
            .collect();
        // The 2nd caller's first call (the forward commit) fails.
        scheduler.reject_nth_call(thread_ids[1], 1);

        let target = Constraints::Periodic {
            phase: 0,
            period: 150_000,
            slice: 75_000,
            start: None,
            interrupt_priority_class: 0,
        };

        let mut handles = Vec::new();
        for i in 0..4 {
            let group = group.clone();
            let scheduler = scheduler.clone();
            let local_id = local_ids[i];
            let thread = thread_ids[i];
            handles.push(thread::spawn(move || {
                change_constraints(&group, target, local_id, thread, scheduler.as_ref())
            }));
        }

        for h in handles {
            assert_eq!(h.join().unwrap(), Err(GroupError::FailedWithRollback));
        }
        for (tid, prior) in thread_ids.iter().zip(priors) {
            assert_eq!(scheduler.thread_get_constraints(*tid), prior);
        }
    }

    #[test]
    fn rollback_failure_deep_recovers_to_default_aperiodic() {
        let (group, _runtime, local_ids, thread_ids) = setup(4);
        let scheduler = Arc::new(TestScheduler::new());
        // 2nd caller's commit fails (call #1); member 0's rollback-to-prior
        // (its call #2) also fails.
        scheduler.reject_nth_call(thread_ids[1], 1);
        scheduler.reject_nth_call(thread_ids[0], 2);

        let target = Constraints::Periodic {
            phase: 0,
            period: 150_000,
            slice: 75_000,
            start: None,
            interrupt_priority_class: 0,
        };

        let mut handles = Vec::new();
        for i in 0..4 {
            let group = group.clone();
            let scheduler = scheduler.clone();
            let local_id = local_ids[i];
            let thread = thread_ids[i];
            handles.push(thread::spawn(move || {
                change_constraints(&group, target, local_id, thread, scheduler.as_ref())
            }));
        }

        for h in handles {
            assert_eq!(h.join().unwrap(), Err(GroupError::FailedWithRollback));
        }
        for tid in thread_ids {
            assert_eq!(
                scheduler.thread_get_constraints(tid),
                Constraints::default_aperiodic()
            );
        }
    }

    #[test]
    fn repeated_identical_attempt_after_failure_is_permitted() {
        let (group, _runtime, local_ids, thread_ids) = setup(2);
        let scheduler = Arc::new(TestScheduler::new());
        scheduler.reject_nth_call(thread_ids[0], 1);

        let target = Constraints::Aperiodic {
            priority: 7,
            interrupt_priority_class: 0,
        };

        for _ in 0..2 {
            let mut handles = Vec::new();
            for i in 0..2 {
                let group = group.clone();
                let scheduler = scheduler.clone();
                let local_id = local_ids[i];
                let thread = thread_ids[i];
                handles.push(thread::spawn(move || {
                    change_constraints(&group, target, local_id, thread, scheduler.as_ref())
                }));
            }
            for h in handles {
                let _ = h.join().unwrap();
            }
        }

        for tid in thread_ids {
            assert_eq!(scheduler.thread_get_constraints(tid), target);
        }
    }
}
