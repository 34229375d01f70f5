//! Process-wide configuration constants for the group coordination core.

/// Maximum length, in bytes, of a group name (including no terminator --
/// names are stored and compared as raw byte slices, not C strings).
pub const MAX_GROUP_NAME: usize = 32;

/// Compile-time upper bound on the number of CPUs a roster can partition
/// membership records across. Mirrors `kernel::arch::hart::MAX_CORES`.
pub const MAX_CPU_COUNT: usize = 8;

/// Aperiodic priority installed by deep rollback (§4.4 P6).
pub const DEFAULT_PRIORITY: u32 = 1;
