pub mod hw;
pub mod raw;
pub mod sw;

/// Counter class and selector of a performance event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event(pub(crate) EventConfig);

impl Event {
    /// The `type` field of the event (`PERF_TYPE_*`).
    pub fn ty(&self) -> u32 {
        self.0.ty
    }

    /// The event-specific selector (`config`).
    pub fn config(&self) -> u64 {
        self.0.config
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EventConfig {
    pub ty: u32,
    pub config: u64,
}

macro_rules! try_from {
    ($ty:ty, $value:ident, $impl: expr) => {
        impl TryFrom<&$ty> for crate::event::Event {
            type Error = std::io::Error;

            fn try_from($value: &$ty) -> std::result::Result<Self, Self::Error> {
                $impl
            }
        }

        impl TryFrom<$ty> for crate::event::Event {
            type Error = std::io::Error;

            fn try_from(value: $ty) -> std::result::Result<Self, Self::Error> {
                (&value).try_into()
            }
        }
    };
}
use try_from;
