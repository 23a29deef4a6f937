//! The per-process open-file table.
//!
//! Each process owns a fixed table of [`MAX_FILES`] slots and a bitmap
//! whose set bits mark the occupied ones. Descriptors 0 and 1 name the
//! console; descriptor `n >= 2` names slot `n - 2`. The table is private
//! to its owning thread, so no locking is involved.

use crate::fs::{File, FileSystem};
use crate::util::Bitmap;

/// Number of slots in a process's file table.
pub const MAX_FILES: usize = 128;

/// Descriptor number of the first table slot.
pub const FD_OFFSET: i32 = 2;

/// The file-table state of one process.
pub struct FileStruct {
    files: Vec<Option<File>>,
    bitmap: Bitmap,
}

impl Default for FileStruct {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStruct {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            files: (0..MAX_FILES).map(|_| None).collect(),
            bitmap: Bitmap::new(MAX_FILES),
        }
    }

    /// Open `name` into the lowest free slot.
    ///
    /// The slot is claimed before the filesystem is consulted and handed
    /// back if the open fails, so a failed open consumes nothing.
    /// Returns the descriptor, or `None` when the table is full or the
    /// file does not exist.
    pub fn open(&mut self, name: &str) -> Option<i32> {
        let slot = self.bitmap.scan_and_flip(false)?;
        match FileSystem::open(name) {
            Some(file) => {
                self.files[slot] = Some(file);
                Some(slot as i32 + FD_OFFSET)
            }
            None => {
                self.bitmap.reset(slot);
                None
            }
        }
    }

    /// The open file behind descriptor `fd`, if the slot is occupied.
    pub fn get_mut(&mut self, fd: i32) -> Option<&mut File> {
        let slot = Self::slot_of(fd)?;
        if self.bitmap.test(slot) {
            self.files[slot].as_mut()
        } else {
            None
        }
    }

    /// Close descriptor `fd`. Only occupied slots are acted on.
    pub fn close(&mut self, fd: i32) {
        if let Some(slot) = Self::slot_of(fd) {
            if self.bitmap.test(slot) {
                self.bitmap.reset(slot);
                self.files[slot] = None;
            }
        }
    }

    /// Close every open file and empty the table.
    pub fn close_all(&mut self) {
        while let Some(slot) = self.bitmap.scan_and_flip(true) {
            self.files[slot] = None;
        }
    }

    /// Number of occupied slots.
    pub fn open_count(&self) -> usize {
        self.bitmap.count_ones()
    }

    fn slot_of(fd: i32) -> Option<usize> {
        if (FD_OFFSET..FD_OFFSET + MAX_FILES as i32).contains(&fd) {
            Some((fd - FD_OFFSET) as usize)
        } else {
            None
        }
    }
}
