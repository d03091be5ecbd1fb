//! Moving records from the kernel to the process.
//!
//! Every CPU has one [`RingBuffer`] the kernel writes records into, the
//! [`record::Parser`] turns the raw frames it yields into [`record::Sample`]s.

mod arena;
pub mod rb;
pub mod record;

pub use arena::Arena;
pub use rb::RingBuffer;
