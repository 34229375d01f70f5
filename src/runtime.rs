//! The thread runtime collaborator (spec §6): current-thread identity,
//! current CPU id, thread creation with CPU binding, and join. Grounded on
//! `current_cpu_id`/`cpu_data`/`cpu_count` in
//! `kernel/src/task/task_manager.rs` and `hart_id()` in
//! `kernel/src/arch/riscv64/hart.rs`.

use crate::scheduler::ThreadId;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Thread identity, CPU-affinity, creation, and join operations the core
/// needs from the runtime, without depending on a real kernel thread
/// implementation.
pub trait ThreadRuntime: Send + Sync {
    /// Identity of the calling thread.
    fn current_thread(&self) -> ThreadId;

    /// CPU the calling thread is currently bound to.
    fn current_cpu(&self) -> usize;

    /// Spawn a new thread pinned to `cpu`, running `f`. Returns the new
    /// thread's identity immediately; `f` runs asynchronously.
    fn create_thread(&self, cpu: usize, f: Box<dyn FnOnce() + Send>) -> ThreadId;

    /// Block until `thread` (as returned by `create_thread`) has finished.
    fn join(&self, thread: ThreadId);
}

thread_local! {
    static CURRENT: Cell<Option<(ThreadId, usize)>> = const { Cell::new(None) };
}

/// A runtime double backed by `std::thread`. A thread either registers
/// itself via [`TestRuntime::bind_current`] (for test code that drives the
/// group core from threads it spawned itself) or is spawned directly by
/// [`TestRuntime::create_thread`], which binds it automatically;
/// `current_thread`/`current_cpu` read that thread-local registration.
#[derive(Default)]
pub struct TestRuntime {
    next_id: Arc<Mutex<u64>>,
    names: Arc<Mutex<HashMap<std::thread::ThreadId, u64>>>,
    handles: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(Mutex::new(0)),
            names: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn alloc_id(next_id: &Mutex<u64>) -> u64 {
        let mut next = next_id.lock().unwrap();
        let id = *next;
        *next += 1;
        id
    }

    /// Bind the calling OS thread to a logical `ThreadId` and CPU for the
    /// remainder of its lifetime. Must be called once per thread before
    /// any group operation, unless the thread was spawned via
    /// `create_thread`, which binds it automatically.
    pub fn bind_current(&self, cpu: usize) -> ThreadId {
        let std_id = std::thread::current().id();
        let mut names = self.names.lock().unwrap();
        let id = *names
            .entry(std_id)
            .or_insert_with(|| Self::alloc_id(&self.next_id));
        let thread_id = ThreadId(id);
        CURRENT.with(|c| c.set(Some((thread_id, cpu))));
        thread_id
    }
}

impl ThreadRuntime for TestRuntime {
    fn current_thread(&self) -> ThreadId {
        CURRENT
            .with(|c| c.get())
            .expect("TestRuntime::bind_current must be called before use on this thread")
            .0
    }

    fn current_cpu(&self) -> usize {
        CURRENT
            .with(|c| c.get())
            .expect("TestRuntime::bind_current must be called before use on this thread")
            .1
    }

    fn create_thread(&self, cpu: usize, f: Box<dyn FnOnce() + Send>) -> ThreadId {
        let id = Self::alloc_id(&self.next_id);
        let names = self.names.clone();

        let handle = std::thread::Builder::new()
            .name(format!("group-core-{id}"))
            .spawn(move || {
                let std_id = std::thread::current().id();
                names.lock().unwrap().insert(std_id, id);
                CURRENT.with(|c| c.set(Some((ThreadId(id), cpu))));
                f();
            })
            .expect("failed to spawn thread");

        self.handles.lock().unwrap().insert(id, handle);
        ThreadId(id)
    }

    fn join(&self, thread: ThreadId) {
        let handle = self.handles.lock().unwrap().remove(&thread.0);
        if let Some(handle) = handle {
            handle.join().expect("spawned thread panicked");
        }
    }
}
