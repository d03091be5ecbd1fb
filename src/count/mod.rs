use std::fs::File;
use std::sync::Arc;

use crate::config::CounterDescriptor;
use crate::error::Error;
use crate::pmu::Pmu;

pub mod group;
pub mod registry;

/// One open kernel counter.
///
/// The counter is closed when this is dropped.
#[derive(Debug)]
pub struct Counter {
    file: File,
    descriptor: Arc<CounterDescriptor>,
    id: u64,
}

impl Counter {
    pub(crate) fn open(
        pmu: &dyn Pmu,
        descriptor: Arc<CounterDescriptor>,
        cpu: u32,
        group: Option<&File>,
        flags: u64,
    ) -> Result<Self, Error> {
        let file = pmu
            .open(&descriptor, cpu, group, flags)
            .map_err(Error::resource("open counter", cpu))?;
        let id = pmu.id(&file).map_err(Error::resource("query format id", cpu))?;

        log::debug!(
            "opened counter {}:{:#x} on cpu {} with format id {}",
            descriptor.ty(),
            descriptor.config(),
            cpu,
            id
        );

        Ok(Self {
            file,
            descriptor,
            id,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn descriptor(&self) -> &Arc<CounterDescriptor> {
        &self.descriptor
    }

    /// Format id assigned by the kernel, unique among all open counters.
    pub fn id(&self) -> u64 {
        self.id
    }
}
