//! Thread abstraction.
//!
//! A kernel consists of a collection of threads, each with its own stack
//! and local state. Here a kernel thread is backed by a host OS thread;
//! the [`Thread`] record travels in thread-local storage and carries the
//! per-process state the user-process subsystem works on: the address
//! space, the open-file table, and the parent/child bookkeeping.
//!
//! [`with_current`] grants access to the running thread's record, the
//! exact pattern a bare-metal kernel implements by carving the record out
//! of the stack base.

use crate::file_struct::FileStruct;
use crate::mm::pagedir::PageDirectory;
use crate::process::ChildStatus;
use crate::teletype::TtyCapture;
use crate::{KernelError, process};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

/// Identity of a thread.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Tid(pub i32);

/// The tid returned when a thread cannot be created or a launch fails.
pub const TID_ERROR: Tid = Tid(-1);

impl core::fmt::Display for Tid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A kernel thread's record, including its per-process state.
pub struct Thread {
    /// Thread id.
    pub tid: Tid,
    /// Thread name; for a process, the executable name.
    pub name: String,
    /// The process's address space, owned. `None` for pure kernel
    /// threads and for processes mid-teardown.
    pub pagedir: Option<PageDirectory>,
    /// The rendezvous this process shares with its parent. `None` for
    /// the initial process and kernel threads.
    pub child_status: Option<Arc<ChildStatus>>,
    /// Children this thread has launched, keyed by tid. Ownership of
    /// each [`ChildStatus`] is shared with that child.
    pub children: BTreeMap<Tid, Arc<ChildStatus>>,
    /// The open-file table. `None` until a user process is loaded.
    pub files: Option<FileStruct>,
    pub(crate) tty_hook: Option<Arc<std::sync::Mutex<crate::teletype::TtyState>>>,
}

thread_local! {
    static CURRENT: RefCell<Option<Thread>> = const { RefCell::new(None) };
}

/// Run `f` with the current thread's record.
///
/// Panics when invoked from a thread that was not spawned through
/// [`ThreadBuilder`]. Calls must not nest.
pub fn with_current<R>(f: impl FnOnce(&mut Thread) -> R) -> R {
    try_with_current(f).expect("not on a kernel thread")
}

/// Like [`with_current`], but `None` off kernel threads.
pub(crate) fn try_with_current<R>(f: impl FnOnce(&mut Thread) -> R) -> Option<R> {
    CURRENT.with(|c| c.borrow_mut().as_mut().map(f))
}

pub(crate) fn current_tty_hook()
-> Option<Arc<std::sync::Mutex<crate::teletype::TtyState>>> {
    try_with_current(|th| th.tty_hook.clone()).flatten()
}

fn alloc_tid() -> Tid {
    static NEXT_TID: AtomicI32 = AtomicI32::new(1);
    Tid(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

/// Payload carried by an exiting thread's unwind.
struct ThreadExit(i32);

/// Terminate the current thread with `code`, without process teardown.
///
/// [`process::exit`] is the public path; it performs the teardown and
/// then lands here.
pub(crate) fn exit_thread(code: i32) -> ! {
    std::panic::resume_unwind(Box::new(ThreadExit(code)))
}

/// The opaque handle to the running thread.
pub struct Current;

impl Current {
    /// The current thread's id.
    pub fn tid() -> Tid {
        with_current(|th| th.tid)
    }

    /// Exit the current thread with `code`, releasing its process
    /// resources.
    pub fn exit(code: i32) -> ! {
        process::exit(code)
    }
}

/// A handle to join a thread and collect its exit code.
pub struct JoinHandle {
    tid: Tid,
    inner: std::thread::JoinHandle<i32>,
}

impl JoinHandle {
    /// Thread id of the joined thread.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Wait for the thread to finish and return its exit code.
    pub fn join(self) -> i32 {
        self.inner.join().unwrap_or(-1)
    }
}

/// A builder for a new kernel thread.
pub struct ThreadBuilder {
    name: String,
    tid: Tid,
    tty_hook: Option<Arc<std::sync::Mutex<crate::teletype::TtyState>>>,
}

impl ThreadBuilder {
    /// Create a builder for a thread named `name`.
    ///
    /// The thread inherits the spawner's console capture, if any.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tid: alloc_tid(),
            tty_hook: current_tty_hook(),
        }
    }

    /// The tid the thread will carry. Valid before `spawn`, which is how
    /// a launcher can record the child before it runs.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Attach a console capture to the thread (and its descendants).
    pub fn attach_tty(mut self, capture: &TtyCapture) -> Self {
        self.tty_hook = Some(Arc::clone(&capture.0));
        self
    }

    /// Spawn the thread running `f`.
    ///
    /// `f` runs with a fresh [`Thread`] record installed. A thread whose
    /// closure returns normally exits with code 0 through the regular
    /// process-teardown path; an unhandled panic is treated as a kill and
    /// exits with -1.
    pub fn spawn<F>(self, f: F) -> Result<JoinHandle, KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        let Self {
            name,
            tid,
            tty_hook,
        } = self;
        let record = Thread {
            tid,
            name: name.clone(),
            pagedir: None,
            child_status: None,
            children: BTreeMap::new(),
            files: None,
            tty_hook,
        };
        let inner = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                CURRENT.with(|c| *c.borrow_mut() = Some(record));
                let result = catch_unwind(AssertUnwindSafe(|| {
                    f();
                    process::exit(0);
                }));
                let code = match result {
                    // `process::exit` diverges, so the closure cannot
                    // return normally.
                    Ok(()) => unreachable!(),
                    Err(payload) => match payload.downcast::<ThreadExit>() {
                        Ok(exit) => exit.0,
                        Err(_panic) => {
                            // Unhandled exception: kill the thread through
                            // the ordinary teardown.
                            log::warn!("thread killed by unhandled panic");
                            let _ = catch_unwind(AssertUnwindSafe(|| process::exit(-1)));
                            -1
                        }
                    },
                };
                CURRENT.with(|c| c.borrow_mut().take());
                code
            })
            .map_err(|_| KernelError::NoMemory)?;
        Ok(JoinHandle { tid, inner })
    }
}
