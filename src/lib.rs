//! System-wide hardware performance counter telemetry for Linux.
//!
//! A [`Monitor`][monitor::Monitor] opens one group of counters per online CPU
//! with the `perf_event_open` system call, streams their samples out of the
//! per-CPU ring buffers and hands them, decoded, to a handler.
//!
//! ## Example
//!
//! Sample retired instructions on every CPU, reading the cache misses of the
//! same group along with each sample.
//!
//! ```rust,no_run
//! use pmu_telemetry::config::{CounterDescriptor, DescriptorOpts, Opts, SampleOn};
//! use pmu_telemetry::event::hw::Hardware;
//! use pmu_telemetry::monitor::Monitor;
//! use pmu_telemetry::sample::record::{Record, Sample};
//!
//! let mut opts = DescriptorOpts::default();
//! opts.sample_on = SampleOn::Freq(1000); // 1000 samples per second.
//! opts.sample_format.task = true;
//! opts.sample_format.stat = true; // Carry the counter values in samples.
//! opts.stat_format.id = true;
//! opts.stat_format.siblings = true;
//!
//! let instrs = CounterDescriptor::new(Hardware::Instr, &opts).unwrap();
//! let misses = CounterDescriptor::new(Hardware::CacheMiss, DescriptorOpts::default()).unwrap();
//!
//! let mut monitor = Monitor::open([instrs, misses], &Opts::default()).unwrap();
//! let registry = monitor.registry().clone();
//!
//! monitor
//!     .run(|sample: Sample| {
//!         if let Record::Sample(record) = sample.record {
//!             for (value, desc) in record.attribute(&registry) {
//!                 println!("cpu {}: {:?} = {}", sample.cpu, desc, value.value);
//!             }
//!         }
//!     })
//!     .unwrap();
//! ```
//!
//! ## Kernel compatibility
//!
//! Counters are opened with the `PERF_ATTR_SIZE_VER5` layout, any Linux kernel
//! since 4.1 is supported.

#[cfg(not(target_os = "linux"))]
compile_error!("`perf_event_open` is only available on Linux");

pub mod config;
pub mod count;
pub mod error;
pub mod event;
mod ffi;
pub mod monitor;
pub mod pmu;
pub mod sample;
#[cfg(test)]
mod sim;

pub use error::{ConfigError, DecodeError, Error};
