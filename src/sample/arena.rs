use std::fs::File;
use std::io::Result;
use std::ptr::{null_mut, NonNull};

use crate::ffi::linux_syscall::{mmap, munmap};

/// A shared mapping released on drop.
#[derive(Debug)]
pub struct Arena {
    ptr: NonNull<u8>,
    len: usize,
}

impl Arena {
    pub fn new(file: &File, len: usize, offset: usize) -> Result<Self> {
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L6582
        let flags = libc::MAP_SHARED;
        let ptr: *mut u8 = unsafe { mmap(null_mut(), len, prot, flags, file, offset as _) }?;
        // `mmap` never returns null on success without `MAP_FIXED`.
        let ptr = NonNull::new(ptr).ok_or_else(|| std::io::Error::other("null mapping"))?;
        Ok(Self { ptr, len })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr(), self.len) } {
            log::error!("failed to unmap {} bytes at {:p}: {}", self.len, self.ptr, e);
        }
    }
}

// The mapping is only reached through `Arena`, which is moved, never shared.
unsafe impl Send for Arena {}
