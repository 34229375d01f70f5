//! Multi-core synchronization primitives used throughout the group core.

pub mod spinlock;

pub use spinlock::{ReadGuard, RwSpinLock, SpinLock, SpinLockGuard, WriteGuard};

pub use std::sync::atomic::{fence, AtomicBool, AtomicI64, AtomicIsize, AtomicU64, AtomicUsize, Ordering};
