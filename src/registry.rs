//! The Group Registry (spec §4.2): a process-wide mapping from unique group
//! name to group handle, plus monotonic group-id allocation.
//!
//! Grounded on `nk_thread_group_create`/`nk_thread_group_find`/
//! `nk_thread_group_delete` in `original_source/src/nautilus/group.c`, and on
//! the teacher's single-mutex-guarded global table pattern in
//! `kernel/src/task/task_manager.rs` (`TaskManager::global_task_pool`).

use crate::error::{GroupError, GroupResult};
use crate::group::{Group, GroupId, GroupName};
use crate::log::{debug, warn};
use crate::sync::RwSpinLock;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Table {
    groups: HashMap<String, Arc<Group>>,
}

/// Process-wide group registry. Lookups (`find`) take a read lock and run
/// concurrently with each other; mutations (`create`/`delete`) take a write
/// lock and are mutually exclusive with everything (spec §4.2: "lookups
/// are short; contention is low relative to per-group work").
pub struct Registry {
    table: RwSpinLock<Table>,
    next_group_id: AtomicU64,
}

impl Registry {
    /// A standalone registry, independent of the process-wide singleton.
    /// Intended for test isolation so concurrent tests don't collide on
    /// group names.
    pub fn new() -> Self {
        Self {
            table: RwSpinLock::new(Table {
                groups: HashMap::new(),
            }),
            next_group_id: AtomicU64::new(0),
        }
    }

    /// Create a new, empty group under `name`. Fails if the name is already
    /// taken or malformed.
    pub fn create(&self, name: &str) -> GroupResult<Arc<Group>> {
        let name = GroupName::new(name)?;
        let mut table = self.table.write();
        if table.groups.contains_key(name.as_str()) {
            return Err(GroupError::DuplicateName);
        }
        let group_id = GroupId(self.next_group_id.fetch_add(1, Ordering::AcqRel));
        let group = Group::new(name.clone(), group_id);
        table.groups.insert(name.as_str().to_string(), group.clone());
        debug!("created group '{}' (id={})", group.name(), group_id.0);
        Ok(group)
    }

    /// Look up a group by name.
    pub fn find(&self, name: &str) -> GroupResult<Arc<Group>> {
        self.table
            .read()
            .groups
            .get(name)
            .cloned()
            .ok_or(GroupError::NotFound)
    }

    /// Remove a group from the registry. Refuses if the group still has
    /// members.
    pub fn delete(&self, name: &str) -> GroupResult<()> {
        let mut table = self.table.write();
        match table.groups.get(name) {
            None => Err(GroupError::NotFound),
            Some(group) if group.size() != 0 => {
                warn!("refusing to delete '{}': {} members still joined", name, group.size());
                Err(GroupError::NotEmpty)
            }
            Some(_) => {
                table.groups.remove(name);
                debug!("deleted group '{}'", name);
                Ok(())
            }
        }
    }

    pub fn num_groups(&self) -> usize {
        self.table.read().groups.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// The process-wide registry singleton. Most callers outside of tests
    /// should use this rather than constructing their own `Registry`.
    pub static ref GLOBAL: Registry = Registry::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_find_round_trips() {
        let registry = Registry::new();
        let created = registry.create("alpha").unwrap();
        let found = registry.find("alpha").unwrap();
        assert_eq!(found.group_id(), created.group_id());
    }

    #[test]
    fn create_duplicate_name_fails() {
        let registry = Registry::new();
        registry.create("alpha").unwrap();
        assert_eq!(registry.create("alpha").unwrap_err(), GroupError::DuplicateName);
    }

    #[test]
    fn delete_refuses_non_empty_then_succeeds_once_empty() {
        let registry = Registry::new();
        let group = registry.create("h").unwrap();
        let runtime = crate::runtime::TestRuntime::new();
        runtime.bind_current(0);
        group.join(&runtime).unwrap();

        assert_eq!(registry.delete("h").unwrap_err(), GroupError::NotEmpty);

        group.leave(&runtime).unwrap();
        registry.delete("h").unwrap();
        assert_eq!(registry.find("h").unwrap_err(), GroupError::NotFound);
    }

    #[test]
    fn group_ids_are_monotonic_and_never_reused() {
        let registry = Registry::new();
        let a = registry.create("a").unwrap();
        let b = registry.create("b").unwrap();
        assert!(b.group_id().0 > a.group_id().0);
        registry.delete("a").unwrap();
        let c = registry.create("a").unwrap();
        assert!(c.group_id().0 > b.group_id().0);
    }
}
