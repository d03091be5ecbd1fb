use std::fmt;
use std::io::{Error, ErrorKind, Result};
use std::mem;
use std::ptr::{self, addr_of_mut, copy_nonoverlapping};
use std::sync::atomic::{AtomicU64, Ordering as MemOrd};

use super::Arena;
use crate::error::DecodeError;
use crate::ffi::{Header, Metadata, PAGE_SIZE};


pub(crate) const HEADER_LEN: usize = size_of::<Header>();

/// The kernel ring buffer of one CPU.
///
/// One control page followed by a circular data region, mapped over the group
/// leader of that CPU. The kernel is the only producer and the dispatcher the
/// only consumer, so the positions are synchronized with acquire/release
/// ordering alone.
pub struct RingBuffer {
    arena: Arena,
    data_offset: usize,
    size: u64,
    // Consumer position. Only this side writes `data_tail`, so a local copy
    // is always up to date.
    tail: u64,
    scratch: Vec<u8>,
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("arena", &self.arena)
            .field("size", &self.size)
            .field("tail", &self.tail)
            .finish()
    }
}

impl RingBuffer {
    pub fn new(arena: Arena) -> Result<Self> {
        let metadata = arena.as_ptr() as *mut Metadata;
        let (offset, size, tail) = unsafe {
            (
                ptr::read_volatile(addr_of_mut!((*metadata).data_offset)),
                ptr::read_volatile(addr_of_mut!((*metadata).data_size)),
                ptr::read_volatile(addr_of_mut!((*metadata).data_tail)),
            )
        };

        // Kernels before 4.1 leave these zero, data starts right after the control page:
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L6212
        let (offset, size) = match size {
            0 => {
                let page = *PAGE_SIZE as u64;
                (page, (arena.len() as u64).saturating_sub(page))
            }
            _ => (offset, size),
        };

        if !size.is_power_of_two() || offset + size > arena.len() as u64 {
            let msg = format!("invalid ring buffer layout: offset {}, size {}", offset, size);
            return Err(Error::new(ErrorKind::InvalidData, msg));
        }

        Ok(Self {
            arena,
            data_offset: offset as _,
            size,
            tail,
            scratch: Vec::with_capacity(size as _),
        })
    }

    /// Size of the data region in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn head(&self) -> &AtomicU64 {
        let metadata = self.arena.as_ptr() as *mut Metadata;
        unsafe { AtomicU64::from_ptr(addr_of_mut!((*metadata).data_head)) }
    }

    fn publish(&mut self, tail: u64) {
        let metadata = self.arena.as_ptr() as *mut Metadata;
        let data_tail = unsafe { AtomicU64::from_ptr(addr_of_mut!((*metadata).data_tail)) };
        // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L723
        data_tail.store(tail, MemOrd::Release);
        self.tail = tail;
    }

    /// Calls `on_frame` for every complete frame available on entry, in
    /// arrival order, then hands the consumed space back to the kernel.
    ///
    /// An incomplete trailing frame stays in the buffer for the next call.
    /// Returns the number of frames delivered.
    ///
    /// If the framing can not be trusted anymore, everything available is
    /// skipped and [`DecodeError::Corrupted`] is returned after the frames
    /// preceding the damage were delivered.
    pub fn drain<F>(&mut self, mut on_frame: F) -> std::result::Result<usize, DecodeError>
    where
        F: FnMut(&[u8]),
    {
        // About acquire:
        // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L720
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/ring_buffer.c#L99
        let head = self.head().load(MemOrd::Acquire);
        let tail = self.tail;
        let available = head.wrapping_sub(tail);

        if available == 0 {
            return Ok(0);
        }
        if available > self.size {
            self.publish(head);
            return Err(DecodeError::Corrupted {
                position: tail,
                skipped: available,
            });
        }

        let mut buf = mem::take(&mut self.scratch);
        self.copy_out(tail, available as _, &mut buf);

        let len = buf.len();
        let mut offset = 0;
        let mut frames = 0;
        let mut result = Ok(());
        while len - offset >= HEADER_LEN {
            // struct perf_event_header {
            //     u32 type; # 4 bytes
            //     u16 misc; # 2 bytes
            //     u16 size; # 2 bytes
            // };
            let frame_len = u16::from_ne_bytes([buf[offset + 6], buf[offset + 7]]) as usize;
            if frame_len < HEADER_LEN {
                result = Err(DecodeError::Corrupted {
                    position: tail.wrapping_add(offset as u64),
                    skipped: (len - offset) as _,
                });
                offset = len;
                break;
            }
            if frame_len > len - offset {
                break;
            }
            on_frame(&buf[offset..offset + frame_len]);
            offset += frame_len;
            frames += 1;
        }

        self.scratch = buf;
        self.publish(tail.wrapping_add(offset as u64));

        result.map(|()| frames)
    }

    // Copies `len` bytes starting at position `tail`, in two parts if the
    // region wraps around its physical end.
    fn copy_out(&self, tail: u64, len: usize, buf: &mut Vec<u8>) {
        let data = unsafe { self.arena.as_ptr().add(self.data_offset) };
        let start = (tail & (self.size - 1)) as usize;
        let hi_part_len = len.min(self.size as usize - start);
        let lo_part_len = len - hi_part_len;

        buf.clear();
        buf.reserve(len);
        unsafe {
            let buf_ptr = buf.as_mut_ptr();
            copy_nonoverlapping(data.add(start), buf_ptr, hi_part_len);
            copy_nonoverlapping(data, buf_ptr.add(hi_part_len), lo_part_len);
            buf.set_len(len);
        }
    }
}
