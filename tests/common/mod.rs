//! Shared scaffolding for the end-to-end tests: an assembled ELF32 image
//! and a "kernel main" harness that runs a scenario on a capture-hooked
//! kernel thread.
#![allow(dead_code)]

use minos::fs::FileSystem;
use minos::teletype::TtyCapture;
use minos::thread::ThreadBuilder;

/// Entry point used by [`elf_image`].
pub const ENTRY: u32 = 0x0804_8000;

/// Build a minimal statically linked ELF32 executable: one `PT_LOAD`
/// segment mapped at [`ENTRY`] whose first bytes are `payload`.
///
/// `e_type` is parameterized so tests can produce a binary the loader
/// must reject; `2` is a well-formed executable.
pub fn elf_image(e_type: u16, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 0x1000);
    let mut image = vec![0u8; 0x2000];

    // Executable header.
    image[0..7].copy_from_slice(b"\x7fELF\x01\x01\x01");
    image[16..18].copy_from_slice(&e_type.to_le_bytes());
    image[18..20].copy_from_slice(&3u16.to_le_bytes()); // Intel 80386
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[24..28].copy_from_slice(&ENTRY.to_le_bytes());
    image[28..32].copy_from_slice(&52u32.to_le_bytes()); // phoff
    image[42..44].copy_from_slice(&32u16.to_le_bytes()); // phentsize
    image[44..46].copy_from_slice(&1u16.to_le_bytes()); // phnum

    // The one program header: PT_LOAD, offset 0x1000 -> ENTRY, 4 KiB.
    let ph = &mut image[52..84];
    ph[0..4].copy_from_slice(&1u32.to_le_bytes());
    ph[4..8].copy_from_slice(&0x1000u32.to_le_bytes());
    ph[8..12].copy_from_slice(&ENTRY.to_le_bytes());
    ph[16..20].copy_from_slice(&0x1000u32.to_le_bytes()); // filesz
    ph[20..24].copy_from_slice(&0x1000u32.to_le_bytes()); // memsz
    ph[24..28].copy_from_slice(&0x5u32.to_le_bytes()); // R+X
    ph[28..32].copy_from_slice(&0x1000u32.to_le_bytes());

    image[0x1000..0x1000 + payload.len()].copy_from_slice(payload);
    image
}

/// Install `image` in the filesystem under `name`.
pub fn install_image(name: &str, image: &[u8]) {
    assert!(FileSystem::create(name, image.len()), "duplicate image {name}");
    let mut f = FileSystem::open(name).expect("image just created");
    assert_eq!(f.write(image), image.len());
}

/// Install a well-formed executable under `name` with an arbitrary code
/// payload.
pub fn install_executable(name: &str) {
    install_image(name, &elf_image(2, &[0x90; 16]));
}

/// Run `main` as the kernel's initial thread with a scripted console,
/// returning its exit code and everything the thread tree wrote to the
/// console.
pub fn run_kernel(
    name: &str,
    input: &[u8],
    main: impl FnOnce() + Send + 'static,
) -> (i32, String) {
    minos::syscall::syscall_init();
    let tty = TtyCapture::new(input);
    let handle = ThreadBuilder::new(name)
        .attach_tty(&tty)
        .spawn(main)
        .expect("spawn kernel main");
    let code = handle.join();
    (code, tty.output())
}

/// Like [`run_kernel`], but hands the scenario the capture so it can
/// watch output from threads that outlive the main thread.
pub fn run_kernel_with_tty(
    name: &str,
    input: &[u8],
    main: impl FnOnce() + Send + 'static,
) -> (i32, TtyCapture) {
    minos::syscall::syscall_init();
    let tty = TtyCapture::new(input);
    let handle = ThreadBuilder::new(name)
        .attach_tty(&tty)
        .spawn(main)
        .expect("spawn kernel main");
    let code = handle.join();
    (code, tty)
}

/// Poll `pred` for up to two seconds.
pub fn eventually(mut pred: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if pred() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    false
}
