//! System-call dispatch.
//!
//! User mode raises the system-call interrupt with the call number and
//! its arguments laid out as 32-bit words on the user stack: the number
//! at `esp`, arguments at `esp + 4`, `esp + 8`, `esp + 12`. The result
//! travels back in `eax`.
//!
//! Nothing on that stack is trusted. Every word is read through
//! [`uaccess`], and every pointer argument is validated against the
//! current address space before the kernel dereferences it. A process
//! caught passing a bad address — including a bad stack pointer — or an
//! unknown call number is terminated with exit code `-1`; the trap is
//! consumed and no result is written. Ordinary failures (a missing file,
//! a bad descriptor) come back as `-1` in `eax` instead.

pub mod uaccess;

use crate::fs::FileSystem;
use crate::interrupt::{self, Registers, SYSCALL_VECTOR};
use crate::thread::{Tid, with_current};
use crate::{KernelError, power, process, teletype};
use num_enum::TryFromPrimitive;
use uaccess::{UserCString, UserPtrRO, UserU8SliceRO, UserU8SliceWO};

/// The system-call numbers user programs invoke.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u32)]
pub enum SyscallNumber {
    /// Power off the machine.
    Halt = 0,
    /// Terminate this process.
    Exit = 1,
    /// Spawn a child process from a command line.
    Exec = 2,
    /// Reap a child and collect its exit code.
    Wait = 3,
    /// Create a file of a given size.
    Create = 4,
    /// Unlink a file.
    Remove = 5,
    /// Open a file.
    Open = 6,
    /// Size of an open file.
    Filesize = 7,
    /// Read from a descriptor.
    Read = 8,
    /// Write to a descriptor.
    Write = 9,
    /// Set the position of an open file.
    Seek = 10,
    /// Position of an open file.
    Tell = 11,
    /// Close a descriptor.
    Close = 12,
}

/// Console input descriptor.
const STDIN_FILENO: i32 = 0;
/// Console output descriptor.
const STDOUT_FILENO: i32 = 1;

/// Register the system-call handler on its interrupt vector.
pub fn syscall_init() {
    interrupt::register(SYSCALL_VECTOR, syscall_handler);
}

/// Read the `idx`-th argument word above the validated stack pointer.
/// A stack pointer that has wandered out of the mapped user range kills
/// the process on the spot.
fn arg(esp: u32, idx: u32) -> u32 {
    let addr = match esp.checked_add(4 * idx) {
        Some(a) => a,
        None => process::exit(-1),
    };
    match UserPtrRO::<u32>::new(addr).get() {
        Ok(v) => v,
        Err(_) => process::exit(-1),
    }
}

fn syscall_handler(frame: &mut Registers) {
    let esp = frame.esp;
    let nr = arg(esp, 0);
    let Ok(number) = SyscallNumber::try_from(nr) else {
        log::warn!("system call {} is not implemented", nr);
        process::exit(-1)
    };

    let result = match number {
        SyscallNumber::Halt => power::power_off(),
        SyscallNumber::Exit => process::exit(arg(esp, 1) as i32),
        SyscallNumber::Exec => sys_exec(arg(esp, 1)),
        SyscallNumber::Wait => Ok(process::wait(Tid(arg(esp, 1) as i32)) as u32),
        SyscallNumber::Create => sys_create(arg(esp, 1), arg(esp, 2)),
        SyscallNumber::Remove => sys_remove(arg(esp, 1)),
        SyscallNumber::Open => sys_open(arg(esp, 1)),
        SyscallNumber::Filesize => sys_filesize(arg(esp, 1) as i32),
        SyscallNumber::Read => sys_read(arg(esp, 1) as i32, arg(esp, 2), arg(esp, 3)),
        SyscallNumber::Write => sys_write(arg(esp, 1) as i32, arg(esp, 2), arg(esp, 3)),
        SyscallNumber::Seek => sys_seek(arg(esp, 1) as i32, arg(esp, 2)),
        SyscallNumber::Tell => sys_tell(arg(esp, 1) as i32),
        SyscallNumber::Close => sys_close(arg(esp, 1) as i32),
    };

    frame.eax = match result {
        Ok(v) => v,
        // A bad pointer consumes the trap: no result reaches user mode.
        Err(KernelError::BadAddress) => process::exit(-1),
        Err(_) => -1i32 as u32,
    };
}

fn sys_exec(cmd_ptr: u32) -> Result<u32, KernelError> {
    let cmd = UserCString::new(cmd_ptr).read()?;
    Ok(process::execute(&cmd).0 as u32)
}

fn sys_create(name_ptr: u32, size: u32) -> Result<u32, KernelError> {
    let name = UserCString::new(name_ptr).read()?;
    Ok(FileSystem::create(&name, size as usize) as u32)
}

fn sys_remove(name_ptr: u32) -> Result<u32, KernelError> {
    let name = UserCString::new(name_ptr).read()?;
    Ok(FileSystem::remove(&name) as u32)
}

fn sys_open(name_ptr: u32) -> Result<u32, KernelError> {
    let name = UserCString::new(name_ptr).read()?;
    with_current(|th| {
        let files = th.files.as_mut().ok_or(KernelError::BadFileDescriptor)?;
        files
            .open(&name)
            .map(|fd| fd as u32)
            .ok_or(KernelError::NoSuchEntry)
    })
}

fn sys_filesize(fd: i32) -> Result<u32, KernelError> {
    with_current(|th| {
        let files = th.files.as_mut().ok_or(KernelError::BadFileDescriptor)?;
        let file = files.get_mut(fd).ok_or(KernelError::BadFileDescriptor)?;
        Ok(file.length() as u32)
    })
}

fn sys_read(fd: i32, buf: u32, n: u32) -> Result<u32, KernelError> {
    let dst = UserU8SliceWO::new(buf, n);
    if fd == STDIN_FILENO {
        // Validate before draining the console so a doomed read
        // consumes no input.
        dst.check()?;
        let bytes: Vec<u8> = (0..n).map(|_| teletype::getc()).collect();
        dst.put(&bytes)?;
        return Ok(n);
    }
    dst.check()?;
    let data = with_current(|th| {
        let files = th.files.as_mut().ok_or(KernelError::BadFileDescriptor)?;
        let file = files.get_mut(fd).ok_or(KernelError::BadFileDescriptor)?;
        let mut data = vec![0u8; n as usize];
        let got = file.read(&mut data);
        data.truncate(got);
        Ok(data)
    })?;
    let written = dst.put(&data)?;
    Ok(written as u32)
}

fn sys_write(fd: i32, buf: u32, n: u32) -> Result<u32, KernelError> {
    let data = UserU8SliceRO::new(buf, n).get()?;
    if fd == STDOUT_FILENO {
        teletype::putbuf(&data);
        return Ok(n);
    }
    with_current(|th| {
        let files = th.files.as_mut().ok_or(KernelError::BadFileDescriptor)?;
        let file = files.get_mut(fd).ok_or(KernelError::BadFileDescriptor)?;
        Ok(file.write(&data) as u32)
    })
}

fn sys_seek(fd: i32, pos: u32) -> Result<u32, KernelError> {
    with_current(|th| {
        if let Some(files) = th.files.as_mut() {
            if let Some(file) = files.get_mut(fd) {
                file.seek(pos as usize);
            }
        }
        Ok(0)
    })
}

fn sys_tell(fd: i32) -> Result<u32, KernelError> {
    with_current(|th| {
        let files = th.files.as_mut().ok_or(KernelError::BadFileDescriptor)?;
        let file = files.get_mut(fd).ok_or(KernelError::BadFileDescriptor)?;
        Ok(file.tell() as u32)
    })
}

fn sys_close(fd: i32) -> Result<u32, KernelError> {
    with_current(|th| {
        if let Some(files) = th.files.as_mut() {
            files.close(fd);
        }
        Ok(0)
    })
}
