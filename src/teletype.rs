//! The console device.
//!
//! Character I/O for user processes and the kernel's own user-visible
//! messages. Output normally reaches the host's stdout and input is fed
//! through [`feed_input`]; a thread may instead carry a [`TtyCapture`]
//! hook, which children inherit at spawn, so a whole process tree's
//! console traffic can be scripted and observed. The exit line a process
//! prints on termination travels this path, which is what lets it be
//! asserted on even when the parent is long gone.

use crate::KernelError;
use crate::thread;
use crate::util::lock;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// A generic character-based input/output device.
pub trait Teletype: Send {
    /// Write data to the teletype, returning the number of bytes written.
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError>;
    /// Read data from the teletype, returning the number of bytes read.
    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError>;
}

pub(crate) struct TtyState {
    input: Vec<u8>,
    idx: usize,
    output: String,
}

impl Teletype for TtyState {
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        match std::str::from_utf8(data) {
            Ok(s) => {
                self.output.push_str(s);
                Ok(data.len())
            }
            Err(_) => Err(KernelError::InvalidArgument),
        }
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError> {
        let n = (self.input.len() - self.idx).min(data.len());
        data[..n].copy_from_slice(&self.input[self.idx..self.idx + n]);
        self.idx += n;
        Ok(n)
    }
}

/// A scripted console attached to a thread tree.
///
/// Attach one to a [`crate::thread::ThreadBuilder`]; the spawned thread
/// and every process it launches write their console output here and read
/// their console input from the provided bytes.
#[derive(Clone)]
pub struct TtyCapture(pub(crate) Arc<Mutex<TtyState>>);

impl TtyCapture {
    /// Create a capture whose console input is `input`.
    pub fn new(input: &[u8]) -> Self {
        Self(Arc::new(Mutex::new(TtyState {
            input: input.to_vec(),
            idx: 0,
            output: String::new(),
        })))
    }

    /// Everything written to the console so far.
    pub fn output(&self) -> String {
        lock(&self.0).output.clone()
    }
}

struct ConsoleInput {
    queue: Mutex<VecDeque<u8>>,
    avail: Condvar,
}

static INPUT: ConsoleInput = ConsoleInput {
    queue: Mutex::new(VecDeque::new()),
    avail: Condvar::new(),
};

/// Queue bytes on the global console input device.
pub fn feed_input(bytes: &[u8]) {
    let mut queue = lock(&INPUT.queue);
    queue.extend(bytes.iter().copied());
    drop(queue);
    INPUT.avail.notify_all();
}

/// Write a buffer to the console.
pub fn putbuf(data: &[u8]) {
    let hook = thread::current_tty_hook();
    match hook {
        Some(hook) => {
            let _ = lock(&hook).write(data);
        }
        None => {
            print!("{}", String::from_utf8_lossy(data));
        }
    }
}

/// Read one byte from the console.
///
/// With a capture hook attached this drains the scripted input, returning
/// 0 at its end. Without one it blocks until [`feed_input`] supplies a
/// byte.
pub fn getc() -> u8 {
    match thread::current_tty_hook() {
        Some(hook) => {
            let mut byte = [0u8; 1];
            match lock(&hook).read(&mut byte) {
                Ok(1) => byte[0],
                _ => 0,
            }
        }
        None => {
            let mut queue = lock(&INPUT.queue);
            loop {
                if let Some(b) = queue.pop_front() {
                    return b;
                }
                queue = match INPUT.avail.wait(queue) {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_records_output_and_serves_input() {
        let capture = TtyCapture::new(b"hi");
        {
            let mut state = lock(&capture.0);
            state.write(b"hello").unwrap();
            let mut buf = [0u8; 4];
            assert_eq!(state.read(&mut buf).unwrap(), 2);
            assert_eq!(&buf[..2], b"hi");
            assert_eq!(state.read(&mut buf).unwrap(), 0);
        }
        assert_eq!(capture.output(), "hello");
    }

    #[test]
    fn global_input_queue_delivers_fed_bytes() {
        feed_input(b"a");
        // No hook on plain test threads, so this drains the global queue.
        assert_eq!(getc(), b'a');
    }
}
