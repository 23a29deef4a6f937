//! What a freshly loaded process actually sees: its image mapped at the
//! linked address, zero fill past the file extent, an unmapped null
//! page, and a register frame pointing at the entry.

mod common;

use minos::process;
use minos::syscall::SyscallNumber;
use minos::thread::TID_ERROR;
use minos::usermode::{self, UserContext};

const EXIT: u32 = SyscallNumber::Exit as u32;

#[test]
fn loaded_image_is_visible_at_its_linked_address() {
    let payload = 0xFEED_C0DEu32.to_le_bytes();
    common::install_image("peek", &common::elf_image(2, &payload));
    usermode::install_program("peek", |ctx: &mut UserContext| {
        assert_eq!(ctx.regs.eip, common::ENTRY);
        assert_eq!(ctx.read_u32(common::ENTRY), 0xFEED_C0DE);
        // Past the payload the segment is zero-filled.
        assert_eq!(ctx.read_u32(common::ENTRY + 0x800), 0);
        ctx.syscall(EXIT, &[0]);
    });

    let (code, _) = common::run_kernel("peek-main", b"", || {
        let tid = process::execute("peek");
        assert_eq!(process::wait(tid), 0);
    });
    assert_eq!(code, 0);
}

#[test]
fn null_dereference_kills_the_process() {
    common::install_executable("nullref");
    usermode::install_program("nullref", |ctx: &mut UserContext| {
        // The first page is never mapped; this faults.
        ctx.read_u32(0);
        ctx.syscall(EXIT, &[0]);
    });

    let (code, out) = common::run_kernel("nullref-main", b"", || {
        let tid = process::execute("nullref");
        assert_eq!(process::wait(tid), -1);
    });
    assert_eq!(code, 0);
    assert!(out.contains("nullref: exit(-1)\n"), "console output: {out:?}");
}

#[test]
fn dynamic_linking_is_refused() {
    // Same image, but the segment claims PT_DYNAMIC.
    let mut image = common::elf_image(2, &[0x90; 16]);
    image[52..56].copy_from_slice(&2u32.to_le_bytes());
    common::install_image("dyn-bad", &image);

    let (code, _) = common::run_kernel("dyn-main", b"", || {
        assert_eq!(process::execute("dyn-bad"), TID_ERROR);
    });
    assert_eq!(code, 0);
}

#[test]
fn note_segments_are_ignored() {
    // A PT_NOTE segment must not stop the load.
    let mut image = common::elf_image(2, &[0x90; 16]);
    image[44..46].copy_from_slice(&2u16.to_le_bytes()); // phnum = 2
    // Second program header right behind the first, typed PT_NOTE.
    let base = 52 + 32;
    image[base..base + 4].copy_from_slice(&4u32.to_le_bytes());
    common::install_image("noted", &image);
    usermode::install_program("noted", |ctx: &mut UserContext| {
        ctx.syscall(EXIT, &[0]);
    });

    let (code, _) = common::run_kernel("noted-main", b"", || {
        let tid = process::execute("noted");
        assert_ne!(tid, TID_ERROR);
        assert_eq!(process::wait(tid), 0);
    });
    assert_eq!(code, 0);
}

#[test]
fn overlapping_segments_fail_the_load() {
    // Two PT_LOAD headers mapping the same page: the second install
    // collides and the launch is rolled back.
    let mut image = common::elf_image(2, &[0x90; 16]);
    image[44..46].copy_from_slice(&2u16.to_le_bytes()); // phnum = 2
    let base = 52 + 32;
    let (first, second) = image.split_at_mut(base);
    second[..32].copy_from_slice(&first[52..84]);
    common::install_image("overlap", &image);

    let (code, _) = common::run_kernel("overlap-main", b"", || {
        assert_eq!(process::execute("overlap"), TID_ERROR);
    });
    assert_eq!(code, 0);
}
