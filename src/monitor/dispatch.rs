use std::fs::File;
use std::io::{ErrorKind, Read, Result as IoResult, Write};
use std::mem;
use std::sync::Arc;

use super::{Monitor, CANCEL_TOKEN};
use crate::error::{DecodeError, Error};
use crate::ffi::linux_syscall::epoll_wait;
use crate::sample::record::{Record, Sample};

/// Consumer of the samples of a running [`Monitor`].
///
/// Called on the dispatch thread, a slow handler delays draining of every
/// other CPU.
pub trait Handler {
    fn on_sample(&mut self, sample: Sample);

    /// A frame of `cpu` could not be decoded, dispatch goes on with the next one.
    fn on_error(&mut self, cpu: u32, error: DecodeError) {
        log::warn!("dropped frame on cpu {}: {}", cpu, error);
    }
}

impl<F> Handler for F
where
    F: FnMut(Sample),
{
    fn on_sample(&mut self, sample: Sample) {
        self(sample)
    }
}

/// Makes [`Monitor::run`] return, from any thread.
#[derive(Clone, Debug)]
pub struct Canceller(pub(super) Arc<File>);

impl Canceller {
    /// The monitor finishes the CPUs it was already draining, disables its
    /// counters and returns `Ok(())`.
    ///
    /// Cancelling a monitor that is not running makes its next run return
    /// right after its first wakeup.
    pub fn cancel(&self) -> IoResult<()> {
        (&*self.0).write_all(&1_u64.to_ne_bytes())
    }
}

impl Monitor {
    /// Enables the counters and delivers samples to `handler` until cancelled.
    ///
    /// Records of one CPU are delivered in the order the kernel wrote them.
    /// The counters are disabled again whenever this returns.
    pub fn run<H: Handler>(&mut self, mut handler: H) -> Result<(), Error> {
        let result = self.enable().and_then(|()| self.dispatch(&mut handler));
        let disabled = self.disable();
        log::info!("monitor stopped");
        result.and(disabled)
    }

    fn dispatch(&mut self, handler: &mut impl Handler) -> Result<(), Error> {
        let Self {
            groups,
            parser,
            epoll,
            cancel,
            ..
        } = self;

        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; groups.len() + 1];
        // A lost record was seen on the CPU since its last sample.
        let mut lost = vec![false; groups.len()];

        loop {
            let ready = match epoll_wait(epoll, &mut events, -1) {
                Ok(ready) => ready,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Wait(e)),
            };

            let mut cancelled = false;
            for event in ready {
                let token = event.u64;
                if token == CANCEL_TOKEN {
                    cancelled = true;
                    continue;
                }

                let Some(group) = groups.get_mut(token as usize) else {
                    continue;
                };
                let cpu = group.cpu();
                let lost_before = &mut lost[token as usize];

                let drained = group.ring_buffer_mut().drain(|frame| match parser.parse(frame) {
                    Ok(record) => {
                        let overflow = match record {
                            Record::Sample(_) => mem::take(lost_before),
                            _ => {
                                *lost_before |= record.is_lost();
                                false
                            }
                        };
                        handler.on_sample(Sample {
                            cpu,
                            overflow,
                            record,
                        });
                    }
                    Err(e) => handler.on_error(cpu, e),
                });
                if let Err(e) = drained {
                    handler.on_error(cpu, e);
                }
            }

            if cancelled {
                reset(cancel).map_err(Error::Wait)?;
                return Ok(());
            }
        }
    }
}

fn reset(eventfd: &File) -> IoResult<()> {
    let mut buf = [0; 8];
    match (&*eventfd).read(&mut buf) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e),
    }
}
