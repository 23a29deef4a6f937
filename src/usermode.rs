//! The user-mode execution model.
//!
//! A bare-metal kernel leaves user-mode execution to the CPU: it restores
//! a register frame and the hardware runs the mapped code until the next
//! trap. This host substitutes a pluggable model for the hardware half.
//! A *user program* is registered under its executable name; when the
//! kernel returns to user mode on a thread running that executable, the
//! program body runs with a [`UserContext`] standing in for the CPU.
//!
//! The context exposes exactly what the hardware would: the register
//! frame, loads and stores against the process's own address space (a
//! touch outside it faults and kills the process), and the software
//! interrupt that enters the kernel's system-call path at the wire level
//! — argument words pushed on the user stack, result in `eax`.

use crate::addressing::Va;
use crate::interrupt::{self, Registers, SYSCALL_VECTOR};
use crate::util::lock;
use crate::{process, thread};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A user program body, run by the execution model.
pub trait UserProgram: Send + Sync + 'static {
    /// Execute the program. Returning without an exit system call is the
    /// moral equivalent of running off `main` into a bogus return
    /// address: the process is killed.
    fn run(&self, ctx: &mut UserContext);
}

impl<F> UserProgram for F
where
    F: Fn(&mut UserContext) + Send + Sync + 'static,
{
    fn run(&self, ctx: &mut UserContext) {
        self(ctx)
    }
}

static PROGRAMS: Mutex<BTreeMap<String, Arc<dyn UserProgram>>> = Mutex::new(BTreeMap::new());

/// Register the user program for executable `name`.
pub fn install_program(name: &str, program: impl UserProgram) {
    lock(&PROGRAMS).insert(name.to_string(), Arc::new(program));
}

/// The simulated CPU state a user program runs on.
pub struct UserContext {
    /// The register frame, as restored by the kernel's return path.
    pub regs: Registers,
}

impl UserContext {
    /// Load a 32-bit word from the process's own memory.
    ///
    /// An unmapped or kernel address is a page fault in user mode: the
    /// process dies with exit code -1.
    pub fn read_u32(&self, addr: u32) -> u32 {
        self.try_read_u32(addr)
            .unwrap_or_else(|| process::exit(-1))
    }

    fn try_read_u32(&self, addr: u32) -> Option<u32> {
        let va = Va::new(addr);
        if !va.is_user() {
            return None;
        }
        thread::with_current(|th| th.pagedir.as_ref()?.read_u32(va).ok())
    }

    /// Store bytes into the process's own memory, faulting like
    /// [`UserContext::read_u32`] on a bad address.
    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) {
        let ok = Va::new(addr).is_user()
            && thread::with_current(|th| match th.pagedir.as_mut() {
                Some(pd) => pd.write_bytes(Va::new(addr), bytes).is_ok(),
                None => false,
            });
        if !ok {
            process::exit(-1)
        }
    }

    /// Load a NUL-terminated string from the process's own memory.
    pub fn read_cstr(&self, addr: u32) -> String {
        let mut bytes = Vec::new();
        let mut cursor = addr;
        loop {
            let word = self.read_u32(cursor & !3);
            let byte = word.to_le_bytes()[(cursor & 3) as usize];
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            cursor = cursor.checked_add(1).unwrap_or_else(|| process::exit(-1));
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// The `argv` strings the kernel placed on the initial stack.
    ///
    /// Reads `argc` and `argv` relative to the current stack pointer per
    /// the startup convention: dummy return address at `esp`, then
    /// `argc`, then `argv`.
    pub fn args(&self) -> Vec<String> {
        let argc = self.read_u32(self.regs.esp + 4);
        let argv = self.read_u32(self.regs.esp + 8);
        (0..argc)
            .map(|i| self.read_cstr(self.read_u32(argv + 4 * i)))
            .collect()
    }

    /// Invoke a system call at the wire level.
    ///
    /// Pushes the call number and arguments as 32-bit words onto the
    /// user stack and raises the system-call interrupt. Returns the
    /// value the kernel left in `eax`. Does not return if the kernel
    /// terminates the process.
    pub fn syscall(&mut self, nr: u32, args: &[u32]) -> u32 {
        let frame_len = 4 * (1 + args.len() as u32);
        let base = self
            .regs
            .esp
            .checked_sub(frame_len)
            .unwrap_or_else(|| process::exit(-1));
        self.write_bytes(base, &nr.to_le_bytes());
        for (i, arg) in args.iter().enumerate() {
            self.write_bytes(base + 4 * (1 + i as u32), &arg.to_le_bytes());
        }
        let mut frame = self.regs;
        frame.esp = base;
        interrupt::raise(SYSCALL_VECTOR, &mut frame);
        self.regs.eax = frame.eax;
        frame.eax
    }
}

/// Enter user mode with the given frame.
///
/// Runs the program registered for the current executable. A missing
/// program, like a return from the program body, lands on an address no
/// process can execute and kills the process.
pub(crate) fn enter(regs: Registers) -> ! {
    let name = thread::with_current(|th| th.name.clone());
    let program = lock(&PROGRAMS).get(&name).cloned();
    match program {
        Some(program) => {
            let mut ctx = UserContext { regs };
            program.run(&mut ctx);
        }
        None => log::warn!("{}: no user program registered", name),
    }
    process::exit(-1)
}
