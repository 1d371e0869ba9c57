//! Event Bus: addressed messages per tab, carried on a
//! `tokio::sync::broadcast` channel so every subscriber (a UI bridge, a
//! Tauri command layer, a test harness) observes the same stream without
//! the core caring who is listening. The optional tauri feature in the
//! top-level runtime crate re-forwards each [`CoreEvent`] onto an
//! `AppHandle`.

use serde::Serialize;
use tabmux_core::TabId;
use tokio::sync::broadcast;

/// One addressed event, covering every message shape the request surface
/// needs to notify subscribers about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum CoreEvent {
    #[serde(rename = "terminal.output")]
    TerminalOutput {
        tab_id: TabId,
        #[serde(with = "bytes_as_base64")]
        bytes: Vec<u8>,
    },
    #[serde(rename = "terminal.ready")]
    TerminalReady { tab_id: TabId },
    #[serde(rename = "terminal.closed")]
    TerminalClosed { tab_id: TabId, reason: String },
    #[serde(rename = "transfer.updated")]
    TransferUpdated {
        tab_id: TabId,
        transfer_id: String,
        fields: TransferFields,
    },
    #[serde(rename = "latency.updated")]
    LatencyUpdated {
        tab_id: TabId,
        host: String,
        port: u16,
        latency_ms: Option<f64>,
        last_check_at: i64,
        status: String,
    },
    #[serde(rename = "latency.error")]
    LatencyError { tab_id: TabId, error: String },
    #[serde(rename = "pool.stats")]
    PoolStats {
        ssh: PoolStatsSnapshot,
        telnet: PoolStatsSnapshot,
    },
}

/// Partial-update payload for `transfer.updated`: only the fields that
/// changed are populated.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferFields {
    pub progress: Option<f64>,
    pub transferred_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: Option<f64>,
    pub current_file: Option<String>,
    pub state: Option<String>,
    pub retry_attempt: Option<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStatsSnapshot {
    pub total: usize,
    pub ready: usize,
    pub busy: usize,
}

mod bytes_as_base64 {
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

/// Thin wrapper around a broadcast sender. Cloning an [`EventBus`] is cheap
/// (it clones the underlying `Sender`) and is how every component that
/// needs to publish — the Tab Registry, the Transfer Engine, the Latency
/// Probe — gets its own handle without sharing a lock.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. A send error only means nobody is subscribed right
    /// now — the event is simply dropped. Event delivery is best-effort,
    /// never a cause of operation failure.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(CoreEvent::TerminalReady { tab_id: "T1".into() });

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, CoreEvent::TerminalReady { tab_id } if tab_id == "T1"));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(CoreEvent::TerminalClosed { tab_id: "T1".into(), reason: "eof".into() });
    }

    #[tokio::test]
    async fn multiple_subscribers_each_see_the_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(CoreEvent::TerminalReady { tab_id: "T2".into() });

        assert!(matches!(rx1.recv().await.unwrap(), CoreEvent::TerminalReady { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), CoreEvent::TerminalReady { .. }));
    }
}
