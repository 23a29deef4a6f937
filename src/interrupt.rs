//! Interrupt frames and the software-interrupt path.
//!
//! User programs request kernel services by raising a software interrupt;
//! the kernel hands the handler a snapshot of the user register state and
//! returns to user mode by restoring such a snapshot. On this host the
//! restore hands the frame to the user-mode execution model (see
//! [`crate::usermode`]); everything up to that hand-off matches the
//! bare-metal shape.

use crate::usermode;
use crate::util::lock;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// User-mode code segment selector.
pub const SEL_UCSEG: u16 = 0x1B;
/// User-mode data segment selector.
pub const SEL_UDSEG: u16 = 0x23;

/// Interrupt-enable flag in `eflags`.
pub const FLAG_IF: u32 = 1 << 9;
/// The must-be-set bit in `eflags`.
pub const FLAG_MBS: u32 = 1 << 1;

/// The interrupt vector used for system calls.
pub const SYSCALL_VECTOR: u8 = 0x30;

/// A saved user register frame.
///
/// This is the state captured when user mode traps into the kernel, and
/// the state restored when the kernel returns to user mode. System-call
/// handlers read arguments relative to `esp` and leave their result in
/// `eax`.
#[derive(Clone, Copy, Debug)]
pub struct Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    /// User stack pointer at the time of the trap.
    pub esp: u32,
    /// Instruction pointer; the entry point for a fresh process.
    pub eip: u32,
    pub eflags: u32,
    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub ss: u16,
}

impl Registers {
    /// Create a register frame for a new user thread: user segment
    /// selectors loaded, interrupts enabled, `eip`/`esp` to be filled in
    /// by the loader.
    pub fn new_user() -> Self {
        Self {
            eax: 0,
            ebx: 0,
            ecx: 0,
            edx: 0,
            esi: 0,
            edi: 0,
            ebp: 0,
            esp: 0,
            eip: 0,
            eflags: FLAG_IF | FLAG_MBS,
            cs: SEL_UCSEG,
            ds: SEL_UDSEG,
            es: SEL_UDSEG,
            fs: SEL_UDSEG,
            gs: SEL_UDSEG,
            ss: SEL_UDSEG,
        }
    }
}

type Handler = fn(&mut Registers);

static HANDLERS: Mutex<BTreeMap<u8, Handler>> = Mutex::new(BTreeMap::new());

/// Register `handler` for software interrupt vector `vec`.
pub fn register(vec: u8, handler: Handler) {
    lock(&HANDLERS).insert(vec, handler);
}

/// Raise software interrupt `vec` with the given user frame.
///
/// An unregistered vector is an exception the process cannot handle: the
/// raiser is killed.
pub fn raise(vec: u8, regs: &mut Registers) {
    let handler = lock(&HANDLERS).get(&vec).copied();
    match handler {
        Some(handler) => handler(regs),
        None => {
            log::warn!("unexpected interrupt {:#04x}", vec);
            crate::process::exit(-1)
        }
    }
}

/// Return to user mode by restoring the saved frame.
///
/// Control does not come back: the frame is handed to the user-mode
/// execution model, and the thread only re-enters the kernel through a
/// trap.
pub fn return_to_user(regs: Registers) -> ! {
    usermode::enter(regs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_frame_defaults() {
        let regs = Registers::new_user();
        assert_eq!(regs.cs, SEL_UCSEG);
        assert_eq!(regs.ss, SEL_UDSEG);
        assert_ne!(regs.eflags & FLAG_IF, 0);
        assert_eq!(regs.eip, 0);
    }
}
