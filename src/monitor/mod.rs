//! System-wide counter groups and their dispatch loop.

use std::borrow::Borrow;
use std::fs::File;
use std::sync::Arc;

use crate::config::{CounterDescriptor, Opts};
use crate::count::group::CounterGroup;
use crate::count::registry::Registry;
use crate::error::{ConfigError, Error};
use crate::ffi::bindings as b;
use crate::ffi::linux_syscall::{epoll_create1, epoll_ctl, eventfd};
use crate::ffi::PAGE_SIZE;
use crate::pmu::{Kernel, Pmu};
use crate::sample::record::Parser;

mod dispatch;
mod stream;

pub use dispatch::*;
pub use stream::*;

// Epoll token of the cancellation eventfd, groups use their index.
const CANCEL_TOKEN: u64 = u64::MAX;

/// Counter groups on every online CPU, sampled into one ring buffer per CPU.
///
/// # Examples
///
/// ```rust,no_run
/// use pmu_telemetry::config::{CounterDescriptor, DescriptorOpts, SampleOn};
/// use pmu_telemetry::event::hw::Hardware;
/// use pmu_telemetry::monitor::Monitor;
/// use pmu_telemetry::sample::record::Sample;
///
/// let mut opts = DescriptorOpts::default();
/// opts.sample_on = SampleOn::Freq(1000);
/// opts.sample_format.task = true;
///
/// let instrs = CounterDescriptor::new(Hardware::Instr, &opts).unwrap();
/// let mut monitor = Monitor::open([instrs], &Default::default()).unwrap();
///
/// let canceller = monitor.canceller();
/// std::thread::spawn(move || {
///     std::thread::sleep(std::time::Duration::from_secs(1));
///     canceller.cancel().unwrap();
/// });
///
/// monitor.run(|sample: Sample| println!("{:?}", sample)).unwrap();
/// ```
pub struct Monitor {
    pmu: Arc<dyn Pmu>,
    groups: Vec<CounterGroup>,
    registry: Arc<Registry>,
    parser: Parser,
    epoll: File,
    cancel: Arc<File>,
}

impl Monitor {
    /// Opens the descriptors on every online CPU with [`Kernel`].
    ///
    /// The first descriptor leads the group of each CPU. Either every counter
    /// and ring buffer is set up, or nothing is left open.
    pub fn open<I>(descriptors: I, opts: &Opts) -> Result<Self, Error>
    where
        I: IntoIterator,
        I::Item: Borrow<CounterDescriptor>,
    {
        Self::open_with(Arc::new(Kernel), descriptors, opts)
    }

    /// Same as [`open`][Self::open], with counters coming from `pmu`.
    pub fn open_with<I>(pmu: Arc<dyn Pmu>, descriptors: I, opts: &Opts) -> Result<Self, Error>
    where
        I: IntoIterator,
        I::Item: Borrow<CounterDescriptor>,
    {
        let descriptors = descriptors
            .into_iter()
            .enumerate()
            .map(|(i, desc)| {
                let desc = desc.borrow();
                desc.validate(i)?;
                Ok(Arc::new(desc.with_mandatory_fields()))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        if descriptors.is_empty() {
            return Err(ConfigError::NoDescriptors.into());
        }
        let mmap_len = opts.mmap_len(*PAGE_SIZE)?;
        let flags = opts.flags | b::PERF_FLAG_FD_CLOEXEC as u64;

        let cpus = pmu
            .online_cpus()
            .map_err(Error::resource("list online cpus", 0))?;

        // Everything opened so far is dropped with these on early return.
        let mut registry = Registry::default();
        let mut groups = Vec::with_capacity(cpus.len());
        for cpu in cpus {
            let group = CounterGroup::open(
                pmu.as_ref(),
                cpu,
                &descriptors,
                flags,
                mmap_len,
                &mut registry,
            )?;
            groups.push(group);
        }

        let epoll = epoll_create1(libc::EPOLL_CLOEXEC).map_err(Error::resource("create epoll", 0))?;
        let cancel = eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK)
            .map_err(Error::resource("create eventfd", 0))?;

        for (i, group) in groups.iter().enumerate() {
            // Records are drained to the last complete frame on every wakeup,
            // nothing is left behind waiting for another edge.
            watch(&epoll, group.leader().file(), i as _)
                .map_err(Error::resource("watch ring buffer", group.cpu()))?;
        }
        watch(&epoll, &cancel, CANCEL_TOKEN).map_err(Error::resource("watch eventfd", 0))?;

        log::info!(
            "monitor ready: {} counters on {} cpus, {} bytes of ring buffer each",
            registry.len(),
            groups.len(),
            mmap_len
        );

        let registry = Arc::new(registry);
        Ok(Self {
            pmu,
            groups,
            parser: Parser::new(Arc::clone(&registry)),
            registry,
            epoll,
            cancel: Arc::new(cancel),
        })
    }

    /// Format id to descriptor mapping of every open counter.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Counter groups in CPU order.
    pub fn groups(&self) -> &[CounterGroup] {
        &self.groups
    }

    /// Returns a handle that makes [`run`][Self::run] return.
    pub fn canceller(&self) -> Canceller {
        Canceller(Arc::clone(&self.cancel))
    }

    fn enable(&self) -> Result<(), Error> {
        self.groups
            .iter()
            .try_for_each(|g| g.enable(self.pmu.as_ref()))
    }

    // Disables every group even if some fail, returning the first failure.
    fn disable(&self) -> Result<(), Error> {
        let mut result = Ok(());
        for group in &self.groups {
            if let Err(e) = group.disable(self.pmu.as_ref()) {
                log::error!("{}", e);
                result = result.and(Err(e));
            }
        }
        result
    }
}

fn watch(epoll: &File, file: &File, token: u64) -> std::io::Result<()> {
    let mut event = libc::epoll_event {
        events: (libc::EPOLLIN | libc::EPOLLET) as _,
        u64: token,
    };
    epoll_ctl(epoll, libc::EPOLL_CTL_ADD, file, &mut event)
}
