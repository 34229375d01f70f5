//! Thread-group coordination core: a registry of named groups, a
//! re-entrant sense-reversing barrier, and a collective scheduling-
//! constraint-change protocol with per-thread commit and two-level
//! rollback.
//!
//! The local scheduler, thread runtime, and diagnostic sink are named as
//! external collaborators (see [`scheduler::Scheduler`],
//! [`runtime::ThreadRuntime`], [`log::DiagnosticSink`]) rather than
//! implemented here -- this crate has no dependency on a real kernel.

pub mod barrier;
pub mod config;
pub mod error;
pub mod group;
pub mod log;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod sync;

pub use error::{GroupError, GroupResult};
pub use group::{Group, GroupId, GroupName, LocalId};
pub use registry::Registry;
