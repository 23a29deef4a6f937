//! Memory management.
//!
//! The core abstraction is the [`Page`], a single 4 KiB frame drawn from
//! the user pool. Allocation is tied to ownership: dropping a [`Page`]
//! returns its frame to the pool, so a destroyed address space releases
//! every frame it held without further bookkeeping.

pub mod pagedir;

use crate::addressing::PGSIZE;
use crate::util::{Bitmap, lock};
use std::sync::Mutex;

/// Default number of frames in the user pool.
pub const USER_POOL_DEFAULT_FRAMES: usize = 512;

bitflags::bitflags! {
    /// Flags for frame allocation.
    pub struct AllocFlags: u32 {
        /// Zero-fill the frame before returning it.
        const ZERO = 1 << 0;
    }
}

struct UserPool {
    slots: Bitmap,
}

static USER_POOL: Mutex<Option<UserPool>> = Mutex::new(None);

/// Size the user pool to `frames` frames.
///
/// Takes effect only while no frame is outstanding; later calls are
/// ignored so a running system cannot have frames pulled out from under
/// it.
pub fn configure_user_pool(frames: usize) {
    let mut pool = lock(&USER_POOL);
    let untouched = match pool.as_ref() {
        Some(p) => p.slots.count_ones() == 0,
        None => true,
    };
    if untouched {
        *pool = Some(UserPool {
            slots: Bitmap::new(frames),
        });
    }
}

/// Number of user-pool frames currently allocated.
pub fn user_pool_in_use() -> usize {
    lock(&USER_POOL)
        .as_ref()
        .map(|p| p.slots.count_ones())
        .unwrap_or(0)
}

/// A single frame of user-pool memory.
///
/// The frame is owned: when the [`Page`] is dropped, the frame returns to
/// the pool. Contents are accessed through [`Page::inner`] and
/// [`Page::inner_mut`].
pub struct Page {
    slot: usize,
    buf: Box<[u8; PGSIZE as usize]>,
}

impl Page {
    /// Allocate a frame from the user pool.
    ///
    /// Frames are handed out zero-filled; [`AllocFlags::ZERO`] states
    /// the requirement where a caller depends on it. Returns `None` when
    /// the pool is exhausted; callers in the launch path convert this
    /// into a clean load failure.
    pub fn alloc(_flags: AllocFlags) -> Option<Page> {
        let mut pool = lock(&USER_POOL);
        let pool = pool.get_or_insert_with(|| UserPool {
            slots: Bitmap::new(USER_POOL_DEFAULT_FRAMES),
        });
        let slot = pool.slots.scan_and_flip(false)?;
        let buf = Box::new([0u8; PGSIZE as usize]);
        Some(Page { slot, buf })
    }

    /// Read-only view of the frame contents.
    #[inline]
    pub fn inner(&self) -> &[u8] {
        &self.buf[..]
    }

    /// Mutable view of the frame contents.
    #[inline]
    pub fn inner_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..]
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        let mut pool = lock(&USER_POOL);
        if let Some(pool) = pool.as_mut() {
            pool.slots.reset(self.slot);
        }
    }
}
