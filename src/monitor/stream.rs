use std::panic;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

use futures::channel::mpsc::{self, Receiver, Sender};
use futures::executor::block_on;
use futures::{SinkExt, Stream, StreamExt};

use super::{Canceller, Handler, Monitor};
use crate::error::Error;
use crate::sample::record::Sample;

impl Monitor {
    /// Runs the monitor on a dedicated thread, yielding its samples as a stream.
    ///
    /// At most `capacity` samples are queued, the dispatch thread waits for
    /// room when the queue is full. Dropping the stream cancels the monitor.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # tokio_test::block_on(async {
    /// use futures::StreamExt;
    /// use pmu_telemetry::config::{CounterDescriptor, DescriptorOpts, SampleOn};
    /// use pmu_telemetry::event::hw::Hardware;
    /// use pmu_telemetry::monitor::Monitor;
    ///
    /// let mut opts = DescriptorOpts::default();
    /// opts.sample_on = SampleOn::Freq(1000);
    ///
    /// let instrs = CounterDescriptor::new(Hardware::Instr, &opts).unwrap();
    /// let monitor = Monitor::open([instrs], &Default::default()).unwrap();
    ///
    /// let mut samples = monitor.spawn(64);
    /// while let Some(sample) = samples.next().await {
    ///     println!("{:?}", sample);
    /// #   break;
    /// }
    /// samples.join().unwrap();
    /// # });
    /// ```
    pub fn spawn(mut self, capacity: usize) -> SampleStream {
        let (tx, rx) = mpsc::channel(capacity);
        let canceller = self.canceller();
        let forward = Forward {
            tx,
            canceller: canceller.clone(),
        };
        let handle = thread::spawn(move || self.run(forward));

        SampleStream {
            rx,
            canceller,
            handle: Some(handle),
        }
    }
}

struct Forward {
    tx: Sender<Sample>,
    canceller: Canceller,
}

impl Handler for Forward {
    fn on_sample(&mut self, sample: Sample) {
        if block_on(self.tx.send(sample)).is_err() {
            // Nobody is listening anymore.
            if let Err(e) = self.canceller.cancel() {
                log::error!("failed to cancel monitor: {}", e);
            }
        }
    }
}

/// Samples of a monitor running on its own thread.
///
/// See [`Monitor::spawn`].
pub struct SampleStream {
    rx: Receiver<Sample>,
    canceller: Canceller,
    handle: Option<JoinHandle<Result<(), Error>>>,
}

impl SampleStream {
    pub fn canceller(&self) -> &Canceller {
        &self.canceller
    }

    /// Cancels the monitor and waits for its thread to finish.
    ///
    /// Samples still queued are dropped.
    pub fn join(mut self) -> Result<(), Error> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), Error> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.canceller.cancel().map_err(Error::Wait)?;
        // The dispatch thread may be waiting for room in the queue.
        self.rx.close();
        while self.rx.try_recv().is_ok() {}

        match handle.join() {
            Ok(result) => result,
            Err(e) => panic::resume_unwind(e),
        }
    }
}

impl Stream for SampleStream {
    type Item = Sample;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Sample>> {
        self.get_mut().rx.poll_next_unpin(cx)
    }
}

impl Drop for SampleStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("monitor stopped with error: {}", e);
        }
    }
}
