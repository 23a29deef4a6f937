//! Per-process page directories.
//!
//! A [`PageDirectory`] is the root of one process's virtual-to-physical
//! translation state: a mapping from page-aligned user virtual addresses
//! to owned user-pool frames. Destroying the directory (dropping it)
//! releases every frame it maps.
//!
//! Each CPU — here, each kernel thread — tracks which directory it has
//! loaded. [`PageDirectory::activate`] switches the current CPU between a
//! process directory and the kernel-only directory; the distinction
//! matters during process teardown, where the dying thread must stop
//! using a directory before freeing it.

use crate::KernelError;
use crate::addressing::{PGSIZE, Va};
use crate::mm::Page;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of the kernel-only page directory.
const KERNEL_PD: u64 = 0;

thread_local! {
    static ACTIVE_PD: Cell<u64> = const { Cell::new(KERNEL_PD) };
}

struct Mapping {
    page: Page,
    writable: bool,
}

/// One process's address-translation state.
pub struct PageDirectory {
    id: u64,
    entries: BTreeMap<Va, Mapping>,
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PageDirectory {
    /// Create an empty page directory.
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            entries: BTreeMap::new(),
        }
    }

    /// Load `pd` into the current CPU's translation state, or the
    /// kernel-only directory when `None`.
    pub fn activate(pd: Option<&PageDirectory>) {
        ACTIVE_PD.with(|a| a.set(pd.map(|pd| pd.id).unwrap_or(KERNEL_PD)));
    }

    /// Whether this directory is the one loaded on the current CPU.
    pub fn is_active(&self) -> bool {
        ACTIVE_PD.with(|a| a.get()) == self.id
    }

    /// Whether the current CPU runs on the kernel-only directory.
    pub fn kernel_only_active() -> bool {
        ACTIVE_PD.with(|a| a.get()) == KERNEL_PD
    }

    /// Map the page-aligned user address `upage` to `page`.
    ///
    /// Fails when `upage` is already mapped, unaligned, or not a user
    /// address; the refused frame is released back to the pool.
    pub fn set_page(&mut self, upage: Va, page: Page, writable: bool) -> bool {
        if upage.page_offset() != 0 || !upage.is_user() {
            return false;
        }
        match self.entries.entry(upage) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(Mapping { page, writable });
                true
            }
        }
    }

    /// Look up the frame backing the page containing `va`.
    pub fn get_page(&self, va: Va) -> Option<&Page> {
        self.entries.get(&va.page_round_down()).map(|m| &m.page)
    }

    /// Whether the page containing `va` is mapped.
    pub fn is_mapped(&self, va: Va) -> bool {
        self.entries.contains_key(&va.page_round_down())
    }

    /// Whether the page containing `va` is mapped writable.
    pub fn is_writable(&self, va: Va) -> bool {
        self.entries
            .get(&va.page_round_down())
            .map(|m| m.writable)
            .unwrap_or(false)
    }

    /// Number of mapped pages.
    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }

    /// Copy bytes out of this address space, crossing page boundaries as
    /// needed. Fails with [`KernelError::BadAddress`] if any touched page
    /// is unmapped.
    ///
    /// This is kernel-side access: write protection does not apply.
    pub fn read_bytes(&self, va: Va, buf: &mut [u8]) -> Result<(), KernelError> {
        let mut cursor = va;
        let mut done = 0;
        while done < buf.len() {
            let page = self
                .get_page(cursor)
                .ok_or(KernelError::BadAddress)?
                .inner();
            let ofs = cursor.page_offset() as usize;
            let chunk = (PGSIZE as usize - ofs).min(buf.len() - done);
            buf[done..done + chunk].copy_from_slice(&page[ofs..ofs + chunk]);
            done += chunk;
            cursor = cursor
                .checked_add(chunk as u32)
                .ok_or(KernelError::BadAddress)?;
        }
        Ok(())
    }

    /// Copy bytes into this address space, crossing page boundaries as
    /// needed. Fails with [`KernelError::BadAddress`] if any touched page
    /// is unmapped.
    ///
    /// This is kernel-side access: write protection does not apply.
    pub fn write_bytes(&mut self, va: Va, bytes: &[u8]) -> Result<(), KernelError> {
        let mut cursor = va;
        let mut done = 0;
        while done < bytes.len() {
            let ofs = cursor.page_offset() as usize;
            let chunk = (PGSIZE as usize - ofs).min(bytes.len() - done);
            let mapping = self
                .entries
                .get_mut(&cursor.page_round_down())
                .ok_or(KernelError::BadAddress)?;
            mapping.page.inner_mut()[ofs..ofs + chunk].copy_from_slice(&bytes[done..done + chunk]);
            done += chunk;
            cursor = cursor
                .checked_add(chunk as u32)
                .ok_or(KernelError::BadAddress)?;
        }
        Ok(())
    }

    /// Read a 32-bit little-endian word.
    pub fn read_u32(&self, va: Va) -> Result<u32, KernelError> {
        let mut buf = [0u8; 4];
        self.read_bytes(va, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Write a 32-bit little-endian word.
    pub fn write_u32(&mut self, va: Va, v: u32) -> Result<(), KernelError> {
        self.write_bytes(va, &v.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::AllocFlags;

    fn fresh_page() -> Page {
        Page::alloc(AllocFlags::ZERO).unwrap()
    }

    #[test]
    fn install_rejects_collision() {
        let mut pd = PageDirectory::new();
        assert!(pd.set_page(Va::new(0x8000), fresh_page(), true));
        assert!(!pd.set_page(Va::new(0x8000), fresh_page(), true));
        assert_eq!(pd.mapped_pages(), 1);
    }

    #[test]
    fn install_rejects_unaligned_and_kernel_addresses() {
        let mut pd = PageDirectory::new();
        assert!(!pd.set_page(Va::new(0x8010), fresh_page(), true));
        assert!(!pd.set_page(crate::addressing::PHYS_BASE, fresh_page(), true));
    }

    #[test]
    fn rw_crosses_page_boundary() {
        let mut pd = PageDirectory::new();
        assert!(pd.set_page(Va::new(0x8000), fresh_page(), true));
        assert!(pd.set_page(Va::new(0x9000), fresh_page(), true));
        let data: Vec<u8> = (0..64).collect();
        pd.write_bytes(Va::new(0x8FE0), &data).unwrap();
        let mut out = vec![0u8; 64];
        pd.read_bytes(Va::new(0x8FE0), &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn unmapped_access_is_a_fault() {
        let mut pd = PageDirectory::new();
        assert!(pd.set_page(Va::new(0x8000), fresh_page(), true));
        let mut buf = [0u8; 8];
        // Runs off the end of the single mapped page.
        assert_eq!(
            pd.read_bytes(Va::new(0x8FFC), &mut buf),
            Err(KernelError::BadAddress)
        );
        assert_eq!(
            pd.write_bytes(Va::new(0xA000), &buf),
            Err(KernelError::BadAddress)
        );
    }

    #[test]
    fn activation_tracks_per_cpu_state() {
        let pd = PageDirectory::new();
        PageDirectory::activate(Some(&pd));
        assert!(pd.is_active());
        assert!(!PageDirectory::kernel_only_active());
        PageDirectory::activate(None);
        assert!(PageDirectory::kernel_only_active());
        assert!(!pd.is_active());
    }
}
