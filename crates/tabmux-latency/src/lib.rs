//! Latency Probe: periodic and on-demand RTT measurement per registered
//! tab.

pub mod probe;
pub mod record;

pub use probe::LatencyProbe;
pub use record::{LatencyRecord, LatencyStatus};
