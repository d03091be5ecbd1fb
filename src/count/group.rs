use std::sync::Arc;

use super::registry::{Entry, Registry};
use super::Counter;
use crate::config::CounterDescriptor;
use crate::error::Error;
use crate::pmu::Pmu;
use crate::sample::RingBuffer;

/// The counters of one CPU.
///
/// An event group is scheduled onto the CPU as a unit: it will be put onto
/// the CPU only if all of the events in the group can be put onto the CPU.
///
/// The leader owns the ring buffer of its CPU, every sibling that samples
/// writes its records there too.
#[derive(Debug)]
pub struct CounterGroup {
    cpu: u32,
    rb: RingBuffer,
    leader: Counter,
    siblings: Vec<Counter>,
}

impl CounterGroup {
    /// Opens one counter per descriptor on `cpu`, the first one leading.
    ///
    /// Every counter is added to `registry`. On failure, whatever was opened
    /// so far is closed again, but the registry is left as is: it is meant to
    /// be thrown away with the whole setup.
    pub(crate) fn open(
        pmu: &dyn Pmu,
        cpu: u32,
        descriptors: &[Arc<CounterDescriptor>],
        flags: u64,
        mmap_len: usize,
        registry: &mut Registry,
    ) -> Result<Self, Error> {
        let (leader_desc, sibling_descs) = match descriptors.split_first() {
            Some(split) => split,
            None => return Err(crate::error::ConfigError::NoDescriptors.into()),
        };

        let leader = Counter::open(pmu, Arc::clone(leader_desc), cpu, None, flags)?;
        register(registry, &leader, cpu, 0)?;

        // The ring buffer has to exist before any output is redirected to it:
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L12715
        let arena = pmu
            .map(leader.file(), mmap_len)
            .map_err(Error::resource("map ring buffer", cpu))?;
        let rb = RingBuffer::new(arena).map_err(Error::resource("map ring buffer", cpu))?;

        let mut siblings = Vec::with_capacity(sibling_descs.len());
        for (i, desc) in sibling_descs.iter().enumerate() {
            let sibling = Counter::open(pmu, Arc::clone(desc), cpu, Some(leader.file()), flags)?;
            register(registry, &sibling, cpu, i + 1)?;

            if desc.sample_on().is_sampling() {
                pmu.set_output(sibling.file(), leader.file())
                    .map_err(Error::resource("redirect sibling output", cpu))?;
            }
            siblings.push(sibling);
        }

        Ok(Self {
            cpu,
            rb,
            leader,
            siblings,
        })
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    pub fn leader(&self) -> &Counter {
        &self.leader
    }

    /// Returns the sibling counters in the order of their descriptors.
    pub fn siblings(&self) -> &[Counter] {
        &self.siblings
    }

    pub fn counters(&self) -> impl Iterator<Item = &Counter> {
        std::iter::once(&self.leader).chain(&self.siblings)
    }

    pub fn ring_buffer(&self) -> &RingBuffer {
        &self.rb
    }

    pub(crate) fn ring_buffer_mut(&mut self) -> &mut RingBuffer {
        &mut self.rb
    }

    pub(crate) fn enable(&self, pmu: &dyn Pmu) -> Result<(), Error> {
        pmu.enable(self.leader.file())
            .map_err(Error::resource("enable counters", self.cpu))
    }

    pub(crate) fn disable(&self, pmu: &dyn Pmu) -> Result<(), Error> {
        pmu.disable(self.leader.file())
            .map_err(Error::resource("disable counters", self.cpu))
    }
}

fn register(
    registry: &mut Registry,
    counter: &Counter,
    cpu: u32,
    index: usize,
) -> Result<(), Error> {
    let entry = Entry {
        descriptor: Arc::clone(counter.descriptor()),
        cpu,
        index,
    };
    registry.insert(counter.id(), entry)
}
