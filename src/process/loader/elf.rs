//! ELF32 executable parsing.
//!
//! The Executable and Linkable Format is the standard file format for
//! executables. The loader consumes a narrow slice of it: statically
//! linked 32-bit little-endian executables for the Intel 80386, read
//! through their program headers. Section headers, relocation and
//! dynamic linking are outside the dialect and rejected where they would
//! matter.

use crate::KernelError;
use crate::addressing::{PGSIZE, Va};
use crate::fs::File;

/// Expected `e_machine`: Intel 80386.
const EM_386: u16 = 3;
/// Expected `e_type`: executable object file.
const ET_EXEC: u16 = 2;
/// Size of [`ElfHeader`] on the wire.
pub const EHDR_SIZE: usize = 52;
/// Size of a program header on the wire; `e_phentsize` must match.
pub const PHDR_SIZE: usize = 32;
/// Upper bound on `e_phnum`.
const PHNUM_LIMIT: u16 = 1024;

/// Segment types from the program header.
pub mod ptype {
    /// Unused entry.
    pub const PT_NULL: u32 = 0;
    /// Loadable segment.
    pub const PT_LOAD: u32 = 1;
    /// Dynamic linking information.
    pub const PT_DYNAMIC: u32 = 2;
    /// Interpreter path name.
    pub const PT_INTERP: u32 = 3;
    /// Auxiliary information.
    pub const PT_NOTE: u32 = 4;
    /// Reserved.
    pub const PT_SHLIB: u32 = 5;
    /// The program header table itself.
    pub const PT_PHDR: u32 = 6;
    /// Stack segment.
    pub const PT_STACK: u32 = 0x6474_e551;
}

bitflags::bitflags! {
    /// Segment permission flags.
    pub struct PFlags: u32 {
        /// Segment is executable.
        const X = 1 << 0;
        /// Segment is writable.
        const W = 1 << 1;
        /// Segment is readable.
        const R = 1 << 2;
    }
}

/// The ELF executable header, already validated against the dialect this
/// loader speaks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElfHeader {
    /// Entry point of the program.
    pub e_entry: u32,
    /// File offset of the program header table.
    pub e_phoff: u32,
    /// Number of program headers.
    pub e_phnum: u16,
}

impl ElfHeader {
    /// Read and verify the executable header of `file`.
    ///
    /// Any mismatch — wrong magic, class, byte order or version, a
    /// non-executable type, a foreign machine, an unexpected program
    /// header entry size, or an outsized header count — is a load
    /// failure.
    pub fn read_from(file: &mut File) -> Result<Self, KernelError> {
        let mut raw = [0u8; EHDR_SIZE];
        file.seek(0);
        file.read_exact(&mut raw).map_err(|_| KernelError::NoExec)?;

        // e_ident: magic, 32-bit class, little-endian, version 1.
        if raw[0..7] != *b"\x7fELF\x01\x01\x01" {
            return Err(KernelError::NoExec);
        }
        let e_type = u16::from_le_bytes([raw[16], raw[17]]);
        let e_machine = u16::from_le_bytes([raw[18], raw[19]]);
        let e_version = u32::from_le_bytes([raw[20], raw[21], raw[22], raw[23]]);
        let e_entry = u32::from_le_bytes([raw[24], raw[25], raw[26], raw[27]]);
        let e_phoff = u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]);
        let e_phentsize = u16::from_le_bytes([raw[42], raw[43]]);
        let e_phnum = u16::from_le_bytes([raw[44], raw[45]]);

        if e_type != ET_EXEC
            || e_machine != EM_386
            || e_version != 1
            || e_phentsize as usize != PHDR_SIZE
            || e_phnum > PHNUM_LIMIT
        {
            return Err(KernelError::NoExec);
        }

        Ok(Self {
            e_entry,
            e_phoff,
            e_phnum,
        })
    }
}

/// One program header.
#[derive(Clone, Copy, Debug)]
pub struct Phdr {
    /// Segment type; see [`ptype`].
    pub p_type: u32,
    /// File offset of the segment.
    pub p_offset: u32,
    /// Virtual address the segment is mapped at.
    pub p_vaddr: u32,
    /// Bytes of the segment present in the file.
    pub p_filesz: u32,
    /// Bytes of the segment in memory; at least `p_filesz`.
    pub p_memsz: u32,
    /// Permission flags.
    pub p_flags: PFlags,
    /// Alignment of the segment.
    pub p_align: u32,
}

impl Phdr {
    fn parse(raw: &[u8; PHDR_SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Self {
            p_type: word(0),
            p_offset: word(4),
            p_vaddr: word(8),
            // p_paddr at offset 12 is irrelevant to loading.
            p_filesz: word(16),
            p_memsz: word(20),
            p_flags: PFlags::from_bits_truncate(word(24)),
            p_align: word(28),
        }
    }

    /// Whether this header describes a segment the loader may install.
    ///
    /// Rejects segments whose file and memory addresses disagree on the
    /// page offset, that lie past the end of the file, whose memory size
    /// is zero or smaller than the file size, that leave the user
    /// address range or wrap around it, or that would map the first page
    /// (kept unmapped so null dereferences trap).
    pub fn validate(&self, file_len: u32) -> bool {
        if self.p_offset % PGSIZE != self.p_vaddr % PGSIZE {
            return false;
        }
        if self.p_offset > file_len {
            return false;
        }
        if self.p_memsz < self.p_filesz {
            return false;
        }
        if self.p_memsz == 0 {
            return false;
        }
        let start = Va::new(self.p_vaddr);
        let Some(end) = start.checked_add(self.p_memsz) else {
            return false;
        };
        if !start.is_user() || !end.is_user() {
            return false;
        }
        if self.p_vaddr < PGSIZE {
            return false;
        }
        true
    }

    /// Whether pages of this segment are mapped writable.
    pub fn writable(&self) -> bool {
        self.p_flags.contains(PFlags::W)
    }
}

/// Read the program header table described by `ehdr`.
pub fn read_phdrs(file: &mut File, ehdr: &ElfHeader) -> Result<Vec<Phdr>, KernelError> {
    let mut phdrs = Vec::with_capacity(ehdr.e_phnum as usize);
    let mut ofs = ehdr.e_phoff as usize;
    for _ in 0..ehdr.e_phnum {
        if ofs > file.length() {
            return Err(KernelError::NoExec);
        }
        let mut raw = [0u8; PHDR_SIZE];
        file.seek(ofs);
        file.read_exact(&mut raw).map_err(|_| KernelError::NoExec)?;
        phdrs.push(Phdr::parse(&raw));
        ofs += PHDR_SIZE;
    }
    Ok(phdrs)
}
