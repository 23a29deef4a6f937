//! User process management.
//!
//! A process is born through [`execute`]: the command line is tokenized,
//! a fresh thread is spawned to load the executable, and the parent
//! blocks until the child reports whether the load worked. From then on
//! the two sides share a single [`ChildStatus`] — the rendezvous that
//! carries the child's exit code across its lifetime boundary — until
//! each has dropped its half: the child at [`exit`], the parent either
//! when it reaps the child with [`wait`] or when it exits itself.

pub mod args;
pub mod loader;

use crate::interrupt::{self, Registers};
use crate::mm::pagedir::PageDirectory;
use crate::sync::Semaphore;
use crate::teletype;
use crate::thread::{self, TID_ERROR, ThreadBuilder, Tid, with_current};
use crate::util::lock;
use args::ArgVector;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

/// The rendezvous a parent shares with one spawned child.
///
/// The child records its exit code here and signals the gate exactly
/// once, on exit; a parent reaping the child blocks on the gate and is
/// therefore guaranteed to observe the final code. Each side holds one
/// reference; the object is freed when the second reference drops, in
/// whichever order the two sides finish.
pub struct ChildStatus {
    /// The child's thread id.
    pub tid: Tid,
    exit_code: AtomicI32,
    gate: Semaphore,
}

impl ChildStatus {
    pub(crate) fn new(tid: Tid) -> Self {
        Self {
            tid,
            exit_code: AtomicI32::new(-1),
            gate: Semaphore::new(0),
        }
    }

    /// Child side: publish the exit code. Must happen before
    /// [`ChildStatus::signal_exit`].
    fn record_exit(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    /// Child side: open the gate. Called exactly once, on exit.
    fn signal_exit(&self) {
        self.gate.signal();
    }

    /// Parent side: block until the child has exited, then read its
    /// code.
    fn wait_exit(&self) -> i32 {
        self.gate.wait();
        self.exit_code.load(Ordering::SeqCst)
    }
}

/// The handoff record shared between a parent in [`execute`] and the
/// child it is spawning. Lives only until the child signals `loaded`.
struct StartHandoff {
    argv: ArgVector,
    loaded: Semaphore,
    /// Set by the child before signalling: its [`ChildStatus`] on a
    /// successful load, `None` on failure.
    result: Mutex<Option<Arc<ChildStatus>>>,
}

/// Launch a user process running `cmd`.
///
/// Spawns a new thread named after the executable and blocks until that
/// thread has loaded the binary or failed trying. On success the child's
/// [`ChildStatus`] is recorded in the caller's children table and the
/// child's tid is returned; any failure — unparseable command, thread
/// creation, load — yields [`TID_ERROR`] and records nothing.
pub fn execute(cmd: &str) -> Tid {
    let Ok(argv) = ArgVector::parse(cmd) else {
        return TID_ERROR;
    };
    let handoff = Arc::new(StartHandoff {
        argv,
        loaded: Semaphore::new(0),
        result: Mutex::new(None),
    });

    let builder = ThreadBuilder::new(handoff.argv.file_name());
    let tid = builder.tid();
    let for_child = Arc::clone(&handoff);
    if builder.spawn(move || start_process(&for_child)).is_err() {
        return TID_ERROR;
    }

    // Wait for the load to finish.
    handoff.loaded.wait();

    let Some(cs) = lock(&handoff.result).take() else {
        return TID_ERROR;
    };
    with_current(|cur| cur.children.insert(tid, cs));
    tid
}

/// Body of a freshly spawned process thread: load the executable and
/// enter user mode.
fn start_process(handoff: &StartHandoff) {
    let mut frame = Registers::new_user();
    let loaded = loader::load(&handoff.argv);

    // Report the outcome to the waiting parent. A parent only ever sees
    // a fully initialized ChildStatus: the child publishes it here,
    // after load() constructed it, and the parent reads it only after
    // the signal below.
    *lock(&handoff.result) = match &loaded {
        Ok(_) => with_current(|th| th.child_status.clone()),
        Err(_) => None,
    };
    handoff.loaded.signal();

    match loaded {
        Err(e) => {
            log::debug!("launch of {} failed: {:?}", handoff.argv.file_name(), e);
            exit(-1)
        }
        Ok(image) => {
            frame.eip = image.entry;
            frame.esp = image.esp;
            // Start the user process by simulating a return from an
            // interrupt. Control does not come back.
            interrupt::return_to_user(frame)
        }
    }
}

/// Wait for child `tid` to die and return its exit status.
///
/// Returns `-1` immediately if `tid` is not an unreaped child of the
/// calling process; reaping is at-most-once, so a second wait for the
/// same child also returns `-1`.
pub fn wait(tid: Tid) -> i32 {
    let Some(cs) = with_current(|cur| cur.children.get(&tid).cloned()) else {
        return -1;
    };
    let exit_code = cs.wait_exit();
    with_current(|cur| cur.children.remove(&tid));
    exit_code
}

/// Terminate the current process with `exit_code`, releasing its
/// resources, and exit the thread.
pub fn exit(exit_code: i32) -> ! {
    // Tear down the address space. The ordering is crucial: the thread's
    // directory pointer goes away before the kernel-only directory is
    // activated, and the directory is destroyed only after the switch —
    // an interrupt between these steps must not be able to reload a
    // freed directory.
    let pd = with_current(|cur| cur.pagedir.take());
    if let Some(pd) = pd {
        PageDirectory::activate(None);
        drop(pd);
    }

    // Close whatever the process still has open.
    if let Some(mut files) = with_current(|cur| cur.files.take()) {
        files.close_all();
    }

    // Tell the parent. Every non-initial process has a ChildStatus; the
    // code is recorded before the gate opens so the parent always reads
    // the final value.
    let (name, cs) = with_current(|cur| (cur.name.clone(), cur.child_status.take()));
    if let Some(cs) = cs {
        cs.record_exit(exit_code);
        teletype::putbuf(format!("{}: exit({})\n", name, exit_code).as_bytes());
        cs.signal_exit();
        drop(cs);
    }

    // Drop this side of every un-reaped child's rendezvous. An orphaned
    // child frees the shared object itself when it later exits.
    let children = with_current(|cur| std::mem::take(&mut cur.children));
    drop(children);

    thread::exit_thread(exit_code)
}

/// Set up the CPU for running user code in the current thread: load its
/// page directory, or the kernel-only one if it has none.
///
/// Called on every switch to the thread. The bare-metal half of this —
/// pointing the task-state segment at the thread's kernel stack — has no
/// hosted counterpart.
pub fn activate() {
    with_current(|cur| PageDirectory::activate(cur.pagedir.as_ref()));
}
