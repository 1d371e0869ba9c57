//! `LatencyRecord`: per-tab RTT history and the ring buffer of recent
//! samples used to smooth what the UI displays.

use std::collections::VecDeque;
use tabmux_core::model::constants::LATENCY_RING_BUFFER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyStatus {
    Checking,
    Connected,
    Error,
}

impl LatencyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LatencyStatus::Checking => "checking",
            LatencyStatus::Connected => "connected",
            LatencyStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LatencyRecord {
    pub host: String,
    pub port: u16,
    pub last_sample_ms: Option<f64>,
    pub last_check_at: i64,
    pub check_count: u64,
    pub error_count: u64,
    pub status: LatencyStatus,
    samples: VecDeque<f64>,
}

impl LatencyRecord {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            last_sample_ms: None,
            last_check_at: 0,
            check_count: 0,
            error_count: 0,
            status: LatencyStatus::Checking,
            samples: VecDeque::with_capacity(LATENCY_RING_BUFFER_LEN),
        }
    }

    pub fn record_sample(&mut self, sample_ms: f64, now_unix_ms: i64) {
        if self.samples.len() >= LATENCY_RING_BUFFER_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back(sample_ms);
        self.last_sample_ms = Some(sample_ms);
        self.last_check_at = now_unix_ms;
        self.check_count += 1;
        self.status = LatencyStatus::Connected;
    }

    pub fn record_error(&mut self, now_unix_ms: i64) {
        self.last_check_at = now_unix_ms;
        self.error_count += 1;
        self.status = LatencyStatus::Error;
    }

    pub fn samples(&self) -> &VecDeque<f64> {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_caps_at_configured_length() {
        let mut record = LatencyRecord::new("h".into(), 22);
        for i in 0..(LATENCY_RING_BUFFER_LEN + 5) {
            record.record_sample(i as f64, i as i64);
        }
        assert_eq!(record.samples().len(), LATENCY_RING_BUFFER_LEN);
        assert_eq!(record.check_count, (LATENCY_RING_BUFFER_LEN + 5) as u64);
    }

    #[test]
    fn error_bumps_error_count_and_status() {
        let mut record = LatencyRecord::new("h".into(), 22);
        record.record_sample(10.0, 1);
        record.record_error(2);
        assert_eq!(record.status, LatencyStatus::Error);
        assert_eq!(record.error_count, 1);
        // last good sample is retained even after an error tick.
        assert_eq!(record.last_sample_ms, Some(10.0));
    }
}
