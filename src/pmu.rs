//! The kernel calls behind a [`Monitor`][crate::monitor::Monitor].

use std::fs::File;
use std::io::Result;
use std::os::fd::AsRawFd;

use crate::config::{attr, CounterDescriptor};
use crate::ffi::linux_syscall::{ioctl, online_cpus, perf_event_open};
use crate::ffi::{bindings as b, ioctls};
use crate::sample::Arena;

/// Source of performance counters.
///
/// [`Kernel`] is the only real implementation, the trait exists so counters
/// can be backed by something else where `perf_event_open` is not available.
pub trait Pmu: Send + Sync {
    /// Ids of the CPUs to open counters on, ascending.
    fn online_cpus(&self) -> Result<Vec<u32>>;

    /// Opens a counter for every task on `cpu`, as a sibling of `group` if given.
    fn open(
        &self,
        descriptor: &CounterDescriptor,
        cpu: u32,
        group: Option<&File>,
        flags: u64,
    ) -> Result<File>;

    /// Format id the kernel assigned to `counter`.
    fn id(&self, counter: &File) -> Result<u64>;

    /// Maps the ring buffer of a group leader.
    fn map(&self, leader: &File, len: usize) -> Result<Arena>;

    /// Sends the records of `counter` to the ring buffer of `leader`.
    fn set_output(&self, counter: &File, leader: &File) -> Result<()>;

    /// Enables a whole group.
    fn enable(&self, leader: &File) -> Result<()>;

    /// Disables a whole group.
    fn disable(&self, leader: &File) -> Result<()>;
}

/// `perf_event_open` and friends.
#[derive(Clone, Copy, Debug, Default)]
pub struct Kernel;

impl Pmu for Kernel {
    fn online_cpus(&self) -> Result<Vec<u32>> {
        online_cpus()
    }

    fn open(
        &self,
        descriptor: &CounterDescriptor,
        cpu: u32,
        group: Option<&File>,
        flags: u64,
    ) -> Result<File> {
        let mut attr = attr::from(descriptor);
        let group_fd = group.map_or(-1, |f| f.as_raw_fd());
        // pid == -1 and cpu >= 0 measures all processes on the CPU:
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L12851
        perf_event_open(&mut attr, -1, cpu as _, group_fd, flags)
    }

    fn id(&self, counter: &File) -> Result<u64> {
        let mut id = 0;
        ioctl(counter, ioctls::ID, &mut id as *mut u64)?;
        Ok(id)
    }

    fn map(&self, leader: &File, len: usize) -> Result<Arena> {
        Arena::new(leader, len, 0)
    }

    fn set_output(&self, counter: &File, leader: &File) -> Result<()> {
        ioctl(counter, ioctls::SET_OUTPUT, leader.as_raw_fd())?;
        Ok(())
    }

    fn enable(&self, leader: &File) -> Result<()> {
        ioctl(leader, ioctls::ENABLE, b::PERF_IOC_FLAG_GROUP as _)?;
        Ok(())
    }

    fn disable(&self, leader: &File) -> Result<()> {
        ioctl(leader, ioctls::DISABLE, b::PERF_IOC_FLAG_GROUP as _)?;
        Ok(())
    }
}
