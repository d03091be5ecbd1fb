//! A PMU living in the test process.
//!
//! Counters are eventfds, ring buffers are temporary files mapped twice: once
//! for the monitor, once for the [`Producer`] playing the kernel.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Result, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::ptr::{addr_of_mut, copy_nonoverlapping};
use std::sync::atomic::{AtomicU64, Ordering as MemOrd};
use std::sync::Mutex;

use crate::config::CounterDescriptor;
use crate::ffi::bindings as b;
use crate::ffi::linux_syscall::{epoll_create1, epoll_ctl, epoll_wait, eventfd};
use crate::ffi::{Metadata, PAGE_SIZE};
use crate::pmu::Pmu;
use crate::sample::record::{SampleRecord, Values};
use crate::sample::Arena;

/// Kernel side of one ring buffer.
pub(crate) struct Producer {
    arena: Arena,
    data_offset: usize,
    size: u64,
    head: u64,
}

impl Producer {
    /// Returns the consumer mapping and the producer of a ring buffer with
    /// `size` bytes of data, both positions starting at `start`.
    pub fn new(size: u64, start: u64) -> (Arena, Self) {
        let page = *PAGE_SIZE;
        let len = page + size as usize;
        let file = tempfile::tempfile().unwrap();
        file.set_len(len.next_multiple_of(page) as _).unwrap();

        let consumer = Arena::new(&file, len, 0).unwrap();
        let arena = Arena::new(&file, len, 0).unwrap();

        let metadata = arena.as_ptr() as *mut Metadata;
        unsafe {
            (*metadata).data_offset = page as _;
            (*metadata).data_size = size;
            (*metadata).data_head = start;
            (*metadata).data_tail = start;
        }

        let producer = Self {
            arena,
            data_offset: page,
            size,
            head: start,
        };
        (consumer, producer)
    }

    /// Consumer position last published by the monitor.
    pub fn tail(&self) -> u64 {
        let metadata = self.arena.as_ptr() as *mut Metadata;
        let tail = unsafe { AtomicU64::from_ptr(addr_of_mut!((*metadata).data_tail)) };
        tail.load(MemOrd::Acquire)
    }

    /// Copies `bytes` in without making them visible.
    pub fn write(&mut self, bytes: &[u8]) {
        let used = self.head.wrapping_sub(self.tail());
        assert!(used + bytes.len() as u64 <= self.size, "ring buffer full");

        let data = unsafe { self.arena.as_ptr().add(self.data_offset) };
        let start = (self.head & (self.size - 1)) as usize;
        let hi_part_len = bytes.len().min(self.size as usize - start);
        unsafe {
            copy_nonoverlapping(bytes.as_ptr(), data.add(start), hi_part_len);
            copy_nonoverlapping(
                bytes.as_ptr().add(hi_part_len),
                data,
                bytes.len() - hi_part_len,
            );
        }
        self.head = self.head.wrapping_add(bytes.len() as u64);
    }

    /// Makes everything written so far visible.
    pub fn publish(&self) {
        let metadata = self.arena.as_ptr() as *mut Metadata;
        let head = unsafe { AtomicU64::from_ptr(addr_of_mut!((*metadata).data_head)) };
        head.store(self.head, MemOrd::Release);
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.write(bytes);
        self.publish();
    }
}

struct Counter {
    cpu: u32,
    id: u64,
}

struct Group {
    leader: RawFd,
    producer: Producer,
    enabled: bool,
}

#[derive(Default)]
struct State {
    next_id: u64,
    opened: HashMap<u32, usize>,
    counters: HashMap<RawFd, Counter>,
    groups: HashMap<u32, Group>,
    outputs: usize,
}

pub(crate) struct SimPmu {
    cpus: Vec<u32>,
    fail_open: Option<(u32, usize)>,
    repeat_ids: bool,
    // Every open counter is registered here, closed ones drop out on their own.
    live: File,
    state: Mutex<State>,
}

impl SimPmu {
    /// A PMU with CPUs `0..cpus` online.
    pub fn new(cpus: u32) -> Self {
        Self::with_cpus((0..cpus).collect())
    }

    pub fn with_cpus(cpus: Vec<u32>) -> Self {
        Self {
            cpus,
            fail_open: None,
            repeat_ids: false,
            live: epoll_create1(libc::EPOLL_CLOEXEC).unwrap(),
            state: Mutex::new(State {
                next_id: 1000,
                ..Default::default()
            }),
        }
    }

    /// Fails opening the `index`-th descriptor on `cpu`.
    pub fn fail_open(mut self, cpu: u32, index: usize) -> Self {
        self.fail_open = Some((cpu, index));
        self
    }

    /// Hands out the same format id to every counter.
    pub fn repeat_ids(mut self) -> Self {
        self.repeat_ids = true;
        self
    }

    /// Number of counters not closed yet.
    pub fn live_counters(&self) -> usize {
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; 1024];
        epoll_wait(&self.live, &mut events, 0).unwrap().len()
    }

    pub fn enabled_groups(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.groups.values().filter(|g| g.enabled).count()
    }

    pub fn redirected_outputs(&self) -> usize {
        self.state.lock().unwrap().outputs
    }

    /// Writes `frames` into the ring buffer of `cpu` as one batch and wakes
    /// up the monitor.
    pub fn produce(&self, cpu: u32, frames: &[Vec<u8>]) {
        let mut state = self.state.lock().unwrap();
        let group = state.groups.get_mut(&cpu).unwrap();
        for frame in frames {
            group.producer.write(frame);
        }
        group.producer.publish();

        // The monitor owns the counter, borrow its fd without closing it.
        let leader = ManuallyDrop::new(unsafe { File::from_raw_fd(group.leader) });
        (&*leader).write_all(&1_u64.to_ne_bytes()).unwrap();
    }

    /// Consumer position of the ring buffer of `cpu`.
    pub fn tail(&self, cpu: u32) -> u64 {
        let state = self.state.lock().unwrap();
        state.groups[&cpu].producer.tail()
    }

    fn cpu_of(&self, file: &File) -> Result<u32> {
        let state = self.state.lock().unwrap();
        state
            .counters
            .get(&file.as_raw_fd())
            .map(|c| c.cpu)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn set_enabled(&self, leader: &File, enabled: bool) -> Result<()> {
        let cpu = self.cpu_of(leader)?;
        let mut state = self.state.lock().unwrap();
        match state.groups.get_mut(&cpu) {
            Some(group) => {
                group.enabled = enabled;
                Ok(())
            }
            None => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }
}

impl Pmu for SimPmu {
    fn online_cpus(&self) -> Result<Vec<u32>> {
        Ok(self.cpus.clone())
    }

    fn open(
        &self,
        _: &CounterDescriptor,
        cpu: u32,
        group: Option<&File>,
        _: u64,
    ) -> Result<File> {
        if !self.cpus.contains(&cpu) {
            return Err(io::Error::from_raw_os_error(libc::ENODEV));
        }
        let mut state = self.state.lock().unwrap();
        let index = state.opened.entry(cpu).or_default();
        if self.fail_open == Some((cpu, *index)) {
            return Err(io::Error::from_raw_os_error(libc::EMFILE));
        }
        *index += 1;

        if let Some(leader) = group {
            if !state.counters.contains_key(&leader.as_raw_fd()) {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
        }

        // Starts readable and stays so, see `live`.
        let file = eventfd(1, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK)?;
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as _,
            u64: file.as_raw_fd() as _,
        };
        epoll_ctl(&self.live, libc::EPOLL_CTL_ADD, &file, &mut event)?;

        let id = state.next_id;
        if !self.repeat_ids {
            state.next_id += 1;
        }
        state.counters.insert(file.as_raw_fd(), Counter { cpu, id });
        Ok(file)
    }

    fn id(&self, counter: &File) -> Result<u64> {
        let state = self.state.lock().unwrap();
        state
            .counters
            .get(&counter.as_raw_fd())
            .map(|c| c.id)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn map(&self, leader: &File, len: usize) -> Result<Arena> {
        let cpu = self.cpu_of(leader)?;
        let (arena, producer) = Producer::new((len - *PAGE_SIZE) as _, 0);
        let group = Group {
            leader: leader.as_raw_fd(),
            producer,
            enabled: false,
        };
        self.state.lock().unwrap().groups.insert(cpu, group);
        Ok(arena)
    }

    fn set_output(&self, counter: &File, leader: &File) -> Result<()> {
        if self.cpu_of(counter)? != self.cpu_of(leader)? {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.state.lock().unwrap().outputs += 1;
        Ok(())
    }

    fn enable(&self, leader: &File) -> Result<()> {
        self.set_enabled(leader, true)
    }

    fn disable(&self, leader: &File) -> Result<()> {
        self.set_enabled(leader, false)
    }
}

/// Encodes `record` the way the kernel lays it out for these fields.
pub(crate) fn encode(record: &SampleRecord, sample_type: u64, read_format: u64) -> Vec<u8> {
    let mut buf = vec![];
    buf.extend(b::PERF_RECORD_SAMPLE.to_ne_bytes());
    buf.extend(record.misc.to_ne_bytes());
    buf.extend(0_u16.to_ne_bytes());

    let mut put = |v: u64| buf.extend(v.to_ne_bytes());
    macro_rules! when {
        ($flag:ident, $val:expr) => {
            if sample_type & b::$flag as u64 > 0 {
                put($val);
            }
        };
    }
    when!(PERF_SAMPLE_IDENTIFIER, record.identifier);
    when!(PERF_SAMPLE_IP, record.code_addr.unwrap_or_default());
    if sample_type & b::PERF_SAMPLE_TID as u64 > 0 {
        let task = record.task.unwrap();
        put((task.tid as u64) << 32 | task.pid as u64);
    }
    when!(PERF_SAMPLE_TIME, record.time);
    when!(PERF_SAMPLE_ADDR, record.data_addr.unwrap_or_default());
    when!(PERF_SAMPLE_ID, record.id.unwrap_or_default());
    when!(PERF_SAMPLE_STREAM_ID, record.stream_id);
    when!(PERF_SAMPLE_CPU, record.cpu as u64);
    when!(PERF_SAMPLE_PERIOD, record.period.unwrap_or_default());
    if sample_type & b::PERF_SAMPLE_READ as u64 > 0 {
        let values = record.values.clone().unwrap_or_default();
        encode_values(&values, read_format, &mut put);
    }

    let len = buf.len() as u16;
    buf[6..8].copy_from_slice(&len.to_ne_bytes());
    buf
}

fn encode_values(values: &Values, read_format: u64, put: &mut impl FnMut(u64)) {
    let has = |flag| read_format & flag > 0;
    if has(b::PERF_FORMAT_GROUP as u64) {
        put(values.counters.len() as _);
        if has(b::PERF_FORMAT_TOTAL_TIME_ENABLED as u64) {
            put(values.time_enabled.unwrap_or_default());
        }
        if has(b::PERF_FORMAT_TOTAL_TIME_RUNNING as u64) {
            put(values.time_running.unwrap_or_default());
        }
        for counter in &values.counters {
            put(counter.value);
            put(counter.format_id);
            if has(b::PERF_FORMAT_LOST as u64) {
                put(counter.lost_records.unwrap_or_default());
            }
        }
    } else {
        let counter = &values.counters[0];
        put(counter.value);
        if has(b::PERF_FORMAT_TOTAL_TIME_ENABLED as u64) {
            put(values.time_enabled.unwrap_or_default());
        }
        if has(b::PERF_FORMAT_TOTAL_TIME_RUNNING as u64) {
            put(values.time_running.unwrap_or_default());
        }
        put(counter.format_id);
        if has(b::PERF_FORMAT_LOST as u64) {
            put(counter.lost_records.unwrap_or_default());
        }
    }
}

/// A record of another kind with `body` bytes of payload.
pub(crate) fn encode_other(kind: u32, body: usize) -> Vec<u8> {
    let len = (8 + body) as u16;
    let mut buf = vec![];
    buf.extend(kind.to_ne_bytes());
    buf.extend(0_u16.to_ne_bytes());
    buf.extend(len.to_ne_bytes());
    buf.resize(len as _, 0xab);
    buf
}

/// A sample carrying only the mandatory fields.
pub(crate) fn sample(identifier: u64, cpu: u32, time: u64) -> SampleRecord {
    SampleRecord {
        misc: b::PERF_RECORD_MISC_KERNEL as u16,
        identifier,
        code_addr: None,
        task: None,
        time,
        data_addr: None,
        id: None,
        stream_id: identifier,
        cpu,
        period: None,
        values: None,
    }
}
