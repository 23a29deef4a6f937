//! The user program loader.
//!
//! [`load`] turns an executable file into a runnable address space for
//! the current thread: it creates the page directory and the process
//! bookkeeping, builds the initial stack, and installs every loadable
//! ELF segment. On failure nothing needs unmapping by hand — the
//! partially populated page directory is owned by the thread and is torn
//! down by its exit path.

pub mod elf;
pub mod stack_builder;

use crate::addressing::{PGSIZE, PHYS_BASE, Va};
use crate::fs::{File, FileSystem};
use crate::mm::pagedir::PageDirectory;
use crate::mm::{AllocFlags, Page};
use crate::process::args::{ArgVector, MAX_ARGS};
use crate::process::{self, ChildStatus};
use crate::thread::with_current;
use crate::{KernelError, file_struct::FileStruct};
use arrayvec::ArrayVec;
use elf::{ElfHeader, Phdr, ptype};
use stack_builder::StackBuilder;
use std::sync::Arc;

/// What [`load`] hands back: where execution starts.
pub(crate) struct LoadedImage {
    /// Program entry point.
    pub entry: u32,
    /// Initial user stack pointer.
    pub esp: u32,
}

/// Load the executable named by `argv` into the current thread.
///
/// Creates the address space, the open-file table, and the rendezvous
/// this process shares with its parent, then populates memory from the
/// ELF image and builds the argument stack. The image file is opened
/// once, positioned before each segment, and closed on success and
/// failure alike.
pub(crate) fn load(argv: &ArgVector) -> Result<LoadedImage, KernelError> {
    with_current(|th| {
        th.pagedir = Some(PageDirectory::new());
        th.files = Some(FileStruct::new());
        th.child_status = Some(Arc::new(ChildStatus::new(th.tid)));
    });
    process::activate();

    let esp = setup_stack(argv)?;

    let mut file = FileSystem::open(argv.file_name()).ok_or_else(|| {
        log::warn!("load: {}: open failed", argv.file_name());
        KernelError::NoSuchEntry
    })?;

    let ehdr = ElfHeader::read_from(&mut file).inspect_err(|_| {
        log::warn!("load: {}: error loading executable", argv.file_name());
    })?;

    let file_len = file.length() as u32;
    for phdr in elf::read_phdrs(&mut file, &ehdr)? {
        match phdr.p_type {
            ptype::PT_DYNAMIC | ptype::PT_INTERP | ptype::PT_SHLIB => {
                // No dynamic linking.
                return Err(KernelError::NoExec);
            }
            ptype::PT_LOAD => {
                if !phdr.validate(file_len) {
                    return Err(KernelError::NoExec);
                }
                install_segment(&mut file, &phdr)?;
            }
            // PT_NULL, PT_NOTE, PT_PHDR, PT_STACK, anything unknown.
            _ => {}
        }
    }

    Ok(LoadedImage {
        entry: ehdr.e_entry,
        esp,
    })
}

/// Map a validated `PT_LOAD` segment, page by page.
fn install_segment(file: &mut File, phdr: &Phdr) -> Result<(), KernelError> {
    let page_offset = phdr.p_vaddr % PGSIZE;
    let file_page = phdr.p_offset - page_offset;
    let mut mem_page = Va::new(phdr.p_vaddr - page_offset);
    let (mut read_bytes, mut zero_bytes) = if phdr.p_filesz > 0 {
        let read = page_offset + phdr.p_filesz;
        let total = (page_offset + phdr.p_memsz).next_multiple_of(PGSIZE);
        (read, total - read)
    } else {
        (0, (page_offset + phdr.p_memsz).next_multiple_of(PGSIZE))
    };
    debug_assert_eq!((read_bytes + zero_bytes) % PGSIZE, 0);
    debug_assert_eq!(file_page % PGSIZE, 0);

    file.seek(file_page as usize);
    while read_bytes > 0 || zero_bytes > 0 {
        let page_read = read_bytes.min(PGSIZE);
        let page_zero = PGSIZE - page_read;

        let mut page = Page::alloc(AllocFlags::empty()).ok_or(KernelError::NoMemory)?;
        file.read_exact(&mut page.inner_mut()[..page_read as usize])?;
        page.inner_mut()[page_read as usize..].fill(0);

        let installed = with_current(|th| match th.pagedir.as_mut() {
            Some(pd) => pd.set_page(mem_page, page, phdr.writable()),
            None => false,
        });
        if !installed {
            return Err(KernelError::InvalidArgument);
        }

        read_bytes -= page_read;
        zero_bytes -= page_zero;
        mem_page = mem_page + PGSIZE;
    }
    Ok(())
}

/// Install the single zeroed stack page at the top of user memory and
/// lay out the startup convention: argument strings, a 4-byte-aligned
/// NUL sentinel, the argument pointers in reverse, `argv`, `argc`, and a
/// dummy return address.
fn setup_stack(argv: &ArgVector) -> Result<u32, KernelError> {
    let page = Page::alloc(AllocFlags::ZERO).ok_or(KernelError::NoMemory)?;
    with_current(|th| {
        let pd = th.pagedir.as_mut().ok_or(KernelError::NoMemory)?;
        if !pd.set_page(PHYS_BASE - PGSIZE, page, true) {
            return Err(KernelError::InvalidArgument);
        }

        let mut sb = StackBuilder::new(pd);
        let mut arg_addrs = ArrayVec::<Va, MAX_ARGS>::new();
        for arg in argv.iter() {
            arg_addrs.push(sb.push_str(arg)?);
        }
        sb.align(4);
        sb.push_u32(0)?;
        for addr in arg_addrs.iter().rev() {
            sb.push_u32(addr.into_u32())?;
        }
        let argv_base = sb.sp();
        sb.push_u32(argv_base.into_u32())?;
        sb.push_u32(argv.argc() as u32)?;
        // Dummy return address: the entry point never returns anywhere.
        sb.push_u32(0)?;
        Ok(sb.finish().into_u32())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The startup stack read back through the page directory, checked
    /// against the calling convention word by word.
    #[test]
    fn startup_stack_layout() {
        crate::thread::ThreadBuilder::new("stack-layout")
            .spawn(|| {
                with_current(|th| th.pagedir = Some(PageDirectory::new()));
                let argv = ArgVector::parse("echo hello world").unwrap();
                let esp = setup_stack(&argv).unwrap();

                with_current(|th| {
                    let pd = th.pagedir.as_ref().unwrap();
                    let at = |ofs: u32| pd.read_u32(Va::new(esp + ofs)).unwrap();

                    // Dummy return address, then argc, then argv.
                    assert_eq!(at(0), 0);
                    assert_eq!(at(4), 3);
                    let argv_base = at(8);
                    assert_eq!(argv_base, esp + 12);

                    // argv[i] point at the strings in order; argv[argc]
                    // is the NUL sentinel.
                    let expected = ["echo", "hello", "world"];
                    for (i, want) in expected.iter().enumerate() {
                        let str_addr = pd.read_u32(Va::new(argv_base + 4 * i as u32)).unwrap();
                        let mut buf = vec![0u8; want.len() + 1];
                        pd.read_bytes(Va::new(str_addr), &mut buf).unwrap();
                        assert_eq!(&buf[..want.len()], want.as_bytes());
                        assert_eq!(buf[want.len()], 0);
                    }
                    assert_eq!(pd.read_u32(Va::new(argv_base + 12)).unwrap(), 0);

                    // The stack pointer is 4-byte aligned and below the
                    // top of user memory.
                    assert_eq!(esp % 4, 0);
                    assert!(Va::new(esp).is_user());
                });
            })
            .unwrap()
            .join();
    }
}
