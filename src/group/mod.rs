//! The Group object (spec §4.3): per-group membership roster, barrier,
//! leader slot, broadcast slot, and attempt-state attachment point.
//!
//! Grounded on `struct nk_thread_group` and its `nk_thread_group_*`
//! operations in `original_source/src/nautilus/group.c`.

pub mod protocol;

use crate::barrier::CollectiveBarrier;
use crate::config::{MAX_CPU_COUNT, MAX_GROUP_NAME};
use crate::error::{GroupError, GroupResult};
use crate::runtime::ThreadRuntime;
use crate::scheduler::ThreadId;
use crate::sync::SpinLock;
use std::any::Any;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

pub use protocol::AttemptState;

/// Sentinel stored in `leader_slot` before any election commits.
const UNCLAIMED: i64 = -1;

/// Monotonically increasing group identifier, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u64);

/// Zero-based index unique within a group, assigned at join order and
/// never recycled for the lifetime of the group (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(pub usize);

/// Bounded-length group name, unique within the registry and immutable
/// after creation. Backed by a fixed-size byte array rather than a `String`,
/// matching `group.group_name[MAX_GROUP_NAME]` in
/// `original_source/src/nautilus/group.c` -- no heap allocation, no
/// unbounded growth.
#[derive(Debug, Clone, Copy, Eq, Hash)]
pub struct GroupName {
    bytes: [u8; MAX_GROUP_NAME],
    len: usize,
}

impl GroupName {
    pub fn new(name: &str) -> GroupResult<Self> {
        let raw = name.as_bytes();
        if raw.is_empty() || raw.len() > MAX_GROUP_NAME {
            return Err(GroupError::InvalidName);
        }
        let mut bytes = [0u8; MAX_GROUP_NAME];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self { bytes, len: raw.len() })
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len])
            .expect("GroupName bytes are valid UTF-8 by construction")
    }
}

impl PartialEq for GroupName {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

struct GroupMember {
    local_id: LocalId,
    thread: ThreadId,
}

struct Roster {
    members_by_cpu: Vec<Vec<GroupMember>>,
    next_local_id: usize,
}

struct BroadcastSlot {
    message: Option<Arc<dyn Any + Send + Sync>>,
    flag: bool,
    receiver_count: usize,
}

/// A named collection of threads supporting collective operations.
pub struct Group {
    name: GroupName,
    group_id: GroupId,
    size: AtomicUsize,
    roster: SpinLock<Roster>,
    barrier: CollectiveBarrier,
    leader_slot: AtomicI64,
    broadcast_slot: SpinLock<BroadcastSlot>,
    broadcast_terminate: std::sync::atomic::AtomicBool,
    state_ptr: SpinLock<Option<Arc<AttemptState>>>,
}

impl Group {
    pub(crate) fn new(name: GroupName, group_id: GroupId) -> Arc<Self> {
        Arc::new(Self {
            name,
            group_id,
            size: AtomicUsize::new(0),
            roster: SpinLock::new(Roster {
                members_by_cpu: (0..MAX_CPU_COUNT).map(|_| Vec::new()).collect(),
                next_local_id: 0,
            }),
            barrier: CollectiveBarrier::new(),
            leader_slot: AtomicI64::new(UNCLAIMED),
            broadcast_slot: SpinLock::new(BroadcastSlot {
                message: None,
                flag: false,
                receiver_count: 0,
            }),
            broadcast_terminate: std::sync::atomic::AtomicBool::new(false),
            state_ptr: SpinLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Current thread joins the group. Returns the assigned local-id.
    ///
    /// A CPU index at or beyond `MAX_CPU_COUNT` has no roster partition to
    /// allocate into, which is exactly the "no member-record slot
    /// available" case spec §4.3 assigns `kind=ALLOC_FAIL` to -- distinct
    /// from `GroupError::InvalidName`/`DuplicateName`, which guard the
    /// registry's name validation, not roster allocation.
    pub fn join(&self, runtime: &dyn ThreadRuntime) -> GroupResult<LocalId> {
        let cpu = runtime.current_cpu();
        if cpu >= MAX_CPU_COUNT {
            return Err(GroupError::AllocFail);
        }
        let thread = runtime.current_thread();

        self.barrier.join();

        let mut roster = self.roster.lock();
        let local_id = LocalId(roster.next_local_id);
        roster.next_local_id += 1;
        roster.members_by_cpu[cpu].push(GroupMember { local_id, thread });
        drop(roster);

        self.size.fetch_add(1, Ordering::AcqRel);
        Ok(local_id)
    }

    /// Current thread leaves the group. The barrier is drained even when
    /// the caller is not a member, to preserve counter invariants.
    pub fn leave(&self, runtime: &dyn ThreadRuntime) -> GroupResult<()> {
        let cpu = runtime.current_cpu();
        let thread = runtime.current_thread();

        let found = if cpu < MAX_CPU_COUNT {
            let mut roster = self.roster.lock();
            let bucket = &mut roster.members_by_cpu[cpu];
            if let Some(pos) = bucket.iter().position(|m| m.thread == thread) {
                bucket.remove(pos);
                true
            } else {
                false
            }
        } else {
            false
        };

        self.barrier.leave().map_err(|_| GroupError::BadState)?;

        if !found {
            return Err(GroupError::NotMember);
        }
        self.size.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Synchronize with every other current member at a phase boundary.
    pub fn barrier_wait(&self) -> GroupResult<()> {
        self.barrier.wait().map(|_| ()).map_err(|_| GroupError::BadState)
    }

    /// Attempt to become leader. Returns `true` exactly to the thread
    /// whose compare-and-swap succeeded.
    pub fn election(&self, my_local_id: LocalId) -> bool {
        self.leader_slot
            .compare_exchange(
                UNCLAIMED,
                my_local_id.0 as i64,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn check_leader(&self, my_local_id: LocalId) -> bool {
        self.leader_slot.load(Ordering::Acquire) == my_local_id.0 as i64
    }

    pub fn reset_leader(&self) {
        self.leader_slot.store(UNCLAIMED, Ordering::Release);
    }

    pub fn attach_state(&self, state: Arc<AttemptState>) {
        *self.state_ptr.lock() = Some(state);
    }

    pub fn detach_state(&self) -> Option<Arc<AttemptState>> {
        self.state_ptr.lock().take()
    }

    pub fn get_state(&self) -> Option<Arc<AttemptState>> {
        self.state_ptr.lock().clone()
    }

    /// Best-effort rendezvous broadcast (spec §4.3). `sender_local_id`
    /// identifies who is sending; when it equals `my_local_id` the caller
    /// is the sender, otherwise the caller is a receiver. There is no
    /// guarantee every receiver observes every broadcast -- late arrivals
    /// may skip a message, by design.
    pub fn broadcast(
        &self,
        message: Option<Arc<dyn Any + Send + Sync>>,
        my_local_id: LocalId,
        sender_local_id: LocalId,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        if my_local_id == sender_local_id {
            loop {
                if self.broadcast_terminate.load(Ordering::Acquire) {
                    return None;
                }
                let mut slot = self.broadcast_slot.lock();
                if !slot.flag {
                    slot.message = message;
                    slot.flag = true;
                    return None;
                }
                drop(slot);
                std::hint::spin_loop();
            }
        } else {
            self.broadcast_slot.lock().receiver_count += 1;
            loop {
                if self.broadcast_terminate.load(Ordering::Acquire) {
                    return None;
                }
                let mut slot = self.broadcast_slot.lock();
                if slot.flag {
                    let received = slot.message.clone();
                    slot.receiver_count -= 1;
                    if slot.receiver_count == 0 {
                        slot.message = None;
                        slot.flag = false;
                    }
                    return received;
                }
                drop(slot);
                std::hint::spin_loop();
            }
        }
    }

    /// Short-circuit any in-progress or future broadcast rendezvous.
    pub fn terminate_broadcast(&self) {
        self.broadcast_terminate.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TestRuntime;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn join_then_leave_returns_to_prior_size() {
        let group = Group::new(GroupName::new("g").unwrap(), GroupId(0));
        let runtime = TestRuntime::new();
        runtime.bind_current(0);
        let before = group.size();
        group.join(&runtime).unwrap();
        group.leave(&runtime).unwrap();
        assert_eq!(group.size(), before);
    }

    #[test]
    fn leave_by_non_member_still_drains_barrier() {
        let group = Group::new(GroupName::new("g").unwrap(), GroupId(0));
        let runtime = TestRuntime::new();
        runtime.bind_current(0);
        group.join(&runtime).unwrap();
        // A second, never-joined thread identity "leaves" -- emulate by
        // leaving twice without a second join.
        group.leave(&runtime).unwrap();
        assert_eq!(group.leave(&runtime), Err(GroupError::NotMember));
    }

    #[test]
    fn election_is_unique_under_race() {
        let group = Arc::new(Group::new(GroupName::new("g").unwrap(), GroupId(0)));
        let runtime = Arc::new(TestRuntime::new());
        for cpu in 0..16 {
            runtime.bind_current(cpu % MAX_CPU_COUNT);
            group.join(runtime.as_ref()).unwrap();
        }

        let mut handles = Vec::new();
        for local_id in 0..16 {
            let group = group.clone();
            handles.push(thread::spawn(move || group.election(LocalId(local_id))));
        }
        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn reset_leader_behaves_like_fresh_election() {
        let group = Group::new(GroupName::new("g").unwrap(), GroupId(0));
        assert!(group.election(LocalId(0)));
        assert!(!group.election(LocalId(1)));
        group.reset_leader();
        assert!(group.election(LocalId(1)));
        assert!(group.check_leader(LocalId(1)));
    }

    #[test]
    fn broadcast_is_best_effort_single_slot() {
        let group = Arc::new(Group::new(GroupName::new("g").unwrap(), GroupId(0)));
        let sender = LocalId(0);
        let receiver = LocalId(1);

        let g2 = group.clone();
        let sender_thread = thread::spawn(move || {
            g2.broadcast(Some(Arc::new(42i32)), sender, sender);
        });

        let received = group.broadcast(None, receiver, sender);
        sender_thread.join().unwrap();

        let value = received.and_then(|m| m.downcast_ref::<i32>().copied());
        assert_eq!(value, Some(42));
    }
}
