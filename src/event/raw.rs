use super::EventConfig;
use crate::ffi::bindings as b;

/// A "raw" implementation-specific event.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Raw {
    /// Event config.
    pub config: u64,
}

super::try_from!(Raw, value, {
    let event_config = EventConfig {
        ty: b::PERF_TYPE_RAW,
        config: value.config,
    };
    Ok(Self(event_config))
});
