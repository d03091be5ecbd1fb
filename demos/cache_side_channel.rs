//! Flags tasks whose last-level cache reads miss suspiciously often, the
//! footprint of flush+reload style cache side channels.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use pmu_telemetry::config::{CounterDescriptor, DescriptorOpts, Opts, SampleOn};
use pmu_telemetry::event::hw::{Hardware, Op, OpResult, Type};
use pmu_telemetry::monitor::Monitor;
use pmu_telemetry::sample::record::{Record, Sample};

#[derive(Parser)]
#[command(about = "Detect potential cache side channels system-wide")]
struct Args {
    #[arg(long, default_value = "10000", help = "Samples per second on every CPU")]
    freq: u64,

    #[arg(long, default_value = "3", help = "Ring buffer size as a power of two of pages")]
    pages_exp: u8,

    #[arg(long, default_value = "10000", help = "Minimum cache references between two samples")]
    min_refs: u64,

    #[arg(long, default_value = "0.9", help = "Miss rate above which a task is reported")]
    threshold: f64,

    #[arg(long, help = "Stop after this many seconds instead of running forever")]
    duration: Option<u64>,
}

// Counter values of the previous sample, per CPU.
#[derive(Default, Clone, Copy)]
struct Totals {
    instrs: u64,
    refs: u64,
    misses: u64,
}

fn descriptors(freq: u64) -> Result<[CounterDescriptor; 3]> {
    let mut leader = DescriptorOpts::default();
    leader.sample_on = SampleOn::Freq(freq);
    leader.sample_format.task = true;
    leader.sample_format.stat = true;
    leader.stat_format.id = true;
    leader.stat_format.siblings = true;
    leader.pin_on_pmu = true;
    leader.only_group = true;

    let refs = Hardware::Cache(Type::Ll, Op::Read, OpResult::Access);
    let misses = Hardware::Cache(Type::Ll, Op::Read, OpResult::Miss);

    Ok([
        CounterDescriptor::new(Hardware::Instr, &leader)?,
        CounterDescriptor::new(refs, DescriptorOpts::default())?,
        CounterDescriptor::new(misses, DescriptorOpts::default())?,
    ])
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let opts = Opts {
        pages_exp: args.pages_exp,
        ..Default::default()
    };
    let mut monitor = Monitor::open(descriptors(args.freq)?, &opts)
        .context("Failed to open counters, is perf_event_paranoid low enough?")?;
    let registry = monitor.registry().clone();

    if let Some(secs) = args.duration {
        let canceller = monitor.canceller();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            if let Err(e) = canceller.cancel() {
                warn!("Failed to stop monitor: {}", e);
            }
        });
    }

    info!("Watching {} counters", registry.len());

    let mut last: HashMap<u32, Totals> = HashMap::new();
    monitor.run(|sample: Sample| {
        if sample.overflow {
            warn!("Samples lost on cpu {}", sample.cpu);
        }
        let Record::Sample(record) = sample.record else {
            return;
        };

        let mut now = Totals::default();
        for value in record.counters() {
            match registry.entry(value.format_id).map(|e| e.index) {
                Some(0) => now.instrs = value.value,
                Some(1) => now.refs = value.value,
                Some(2) => now.misses = value.value,
                _ => warn!("Value of unknown counter {}", value.format_id),
            }
        }

        let prev = last.insert(sample.cpu, now).unwrap_or_default();
        let instrs = now.instrs.wrapping_sub(prev.instrs);
        let refs = now.refs.wrapping_sub(prev.refs);
        let misses = now.misses.wrapping_sub(prev.misses);

        let access_rate = refs as f64 / instrs as f64;
        let miss_rate = misses as f64 / refs as f64;
        if refs > args.min_refs && miss_rate > args.threshold {
            let (pid, tid) = record.task.map_or((0, 0), |t| (t.pid, t.tid));
            info!(
                "Potential cache side channel by pid {} / tid {} on cpu {} (access rate {:.4}, refs {}, miss rate {:.4})",
                pid, tid, sample.cpu, access_rate, refs, miss_rate
            );
        }
    })?;

    Ok(())
}
