//! Error kinds returned by the group coordination core (spec §7).

use core::fmt;

/// Every failure mode the core can report. Barrier-internal anomalies
/// (`BadState`) are invariant violations, not user conditions, but we
/// surface them as a value rather than panicking so a `std`-hosted caller
/// can decide how to react instead of aborting the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupError {
    /// Registry lookup found no group with the given name.
    NotFound,
    /// `create` was attempted under a name that already names a group.
    DuplicateName,
    /// A group name was empty or exceeded `MAX_GROUP_NAME`.
    InvalidName,
    /// `delete` was attempted on a group that still has members.
    NotEmpty,
    /// Dynamic allocation was denied -- e.g. `join` found no roster slot for
    /// the caller's CPU.
    AllocFail,
    /// `leave` was called by a thread that is not a member of the group.
    NotMember,
    /// At least one peer failed to commit the target constraint; every
    /// member has been rolled back to its prior constraint, or to the
    /// default aperiodic constraint if prior rollback itself failed.
    FailedWithRollback,
    /// Deep recovery (rollback to default) failed. Unrecoverable.
    Fatal,
    /// A barrier counter would have gone negative. Implementation bug, not
    /// a caller error.
    BadState,
}

impl fmt::Display for GroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            GroupError::NotFound => "group not found",
            GroupError::DuplicateName => "a group with this name already exists",
            GroupError::InvalidName => "group name is empty or exceeds the maximum length",
            GroupError::NotEmpty => "group is not empty",
            GroupError::AllocFail => "allocation failed",
            GroupError::NotMember => "caller is not a member of the group",
            GroupError::FailedWithRollback => {
                "constraint change failed; group rolled back to prior or default constraints"
            }
            GroupError::Fatal => "unrecoverable scheduler state",
            GroupError::BadState => "barrier counter invariant violated",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for GroupError {}

pub type GroupResult<T> = Result<T, GroupError>;
