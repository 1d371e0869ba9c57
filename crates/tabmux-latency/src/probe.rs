//! `LatencyProbe`: one Tokio task per registered tab, each owned outright
//! by its `tokio::spawn` handle the same way the SFTP session manager owns
//! one worker task per resource — here running a periodic probe instead of
//! draining a queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tabmux_core::model::{constants, ProxyPolicy};
use tabmux_core::TabId;
use tabmux_events::{CoreEvent, EventBus};
use tabmux_proxy::{open_tunnel, ProxyResolver, ResolvedProxy};
use tabmux_ssh::SshTransport;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::record::LatencyRecord;

struct ProbeTask {
    handle: JoinHandle<()>,
    notify: Arc<Notify>,
}

/// Owns every registered tab's [`LatencyRecord`] and background probe task.
pub struct LatencyProbe {
    records: Arc<StdMutex<HashMap<TabId, LatencyRecord>>>,
    tasks: StdMutex<HashMap<TabId, ProbeTask>>,
    events: EventBus,
    proxy_resolver: Arc<ProxyResolver>,
}

impl LatencyProbe {
    pub fn new(events: EventBus, proxy_resolver: Arc<ProxyResolver>) -> Self {
        Self {
            records: Arc::new(StdMutex::new(HashMap::new())),
            tasks: StdMutex::new(HashMap::new()),
            events,
            proxy_resolver,
        }
    }

    /// Seeds a record and starts the 60s-interval probe task, with an
    /// immediate first tick (`tokio::time::interval`'s default behavior).
    /// Re-registering an already-registered tab replaces the prior task.
    pub fn register(
        &self,
        tab_id: TabId,
        host: String,
        port: u16,
        proxy_policy: ProxyPolicy,
        ssh: Option<Arc<SshTransport>>,
    ) {
        self.unregister(&tab_id);

        self.records.lock().expect("latency records mutex poisoned").insert(tab_id.clone(), LatencyRecord::new(host.clone(), port));

        let resolved = self.proxy_resolver.resolve(&proxy_policy);
        let notify = Arc::new(Notify::new());
        let records = self.records.clone();
        let events = self.events.clone();
        let tab_for_task = tab_id.clone();
        let notify_for_task = notify.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(constants::LATENCY_PROBE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = notify_for_task.notified() => {}
                }
                run_probe(&tab_for_task, &host, port, resolved.clone(), ssh.clone(), &records, &events).await;
            }
        });

        self.tasks.lock().expect("latency tasks mutex poisoned").insert(tab_id, ProbeTask { handle, notify });
    }

    /// Wakes the probe task immediately instead of waiting out the rest of
    /// its current interval.
    pub fn test_now(&self, tab_id: &str) {
        if let Some(task) = self.tasks.lock().expect("latency tasks mutex poisoned").get(tab_id) {
            task.notify.notify_one();
        }
    }

    /// Clears the probe task and recorded state for a tab.
    pub fn unregister(&self, tab_id: &str) {
        if let Some(task) = self.tasks.lock().expect("latency tasks mutex poisoned").remove(tab_id) {
            task.handle.abort();
        }
        self.records.lock().expect("latency records mutex poisoned").remove(tab_id);
    }

    pub fn snapshot(&self, tab_id: &str) -> Option<LatencyRecord> {
        self.records.lock().expect("latency records mutex poisoned").get(tab_id).cloned()
    }

    pub fn registered_count(&self) -> usize {
        self.tasks.lock().expect("latency tasks mutex poisoned").len()
    }
}

async fn run_probe(
    tab_id: &str,
    host: &str,
    port: u16,
    resolved: Option<ResolvedProxy>,
    ssh: Option<Arc<SshTransport>>,
    records: &Arc<StdMutex<HashMap<TabId, LatencyRecord>>>,
    events: &EventBus,
) {
    let now = chrono::Utc::now().timestamp_millis();

    match measure(resolved, host, port, ssh).await {
        Ok(sample_ms) => {
            let status = {
                let mut records = records.lock().expect("latency records mutex poisoned");
                let Some(record) = records.get_mut(tab_id) else { return };
                record.record_sample(sample_ms, now);
                record.status
            };
            events.publish(CoreEvent::LatencyUpdated {
                tab_id: tab_id.to_string(),
                host: host.to_string(),
                port,
                latency_ms: Some(sample_ms),
                last_check_at: now,
                status: status.as_str().to_string(),
            });
        }
        Err(error) => {
            {
                let mut records = records.lock().expect("latency records mutex poisoned");
                if let Some(record) = records.get_mut(tab_id) {
                    record.record_error(now);
                }
            }
            events.publish(CoreEvent::LatencyError { tab_id: tab_id.to_string(), error });
        }
    }
}

/// Preference order: proxy-tunneled or direct TCP banner timing first (a
/// failed tunnel retries direct), falling back to an `echo` round-trip over
/// the tab's existing SSH connection when no TCP path succeeds.
async fn measure(
    resolved_proxy: Option<ResolvedProxy>,
    host: &str,
    port: u16,
    ssh: Option<Arc<SshTransport>>,
) -> Result<f64, String> {
    let tcp_result = match &resolved_proxy {
        Some(proxy) => match measure_tcp_banner(Some(proxy.clone()), host, port).await {
            Ok(ms) => Ok(ms),
            Err(_tunnel_err) => measure_tcp_banner(None, host, port).await,
        },
        None => measure_tcp_banner(None, host, port).await,
    };

    if let Ok(ms) = tcp_result {
        return Ok(ms);
    }

    match ssh {
        Some(transport) => measure_ssh_echo(&transport).await,
        None => tcp_result,
    }
}

/// Times from socket-open to the first inbound byte (normally the SSH/Telnet
/// banner). If nothing arrives within the fallback window, the connect-only
/// time is returned instead of treating it as an error.
async fn measure_tcp_banner(proxy: Option<ResolvedProxy>, host: &str, port: u16) -> Result<f64, String> {
    let overall = constants::LATENCY_OVERALL_TIMEOUT;
    let start = Instant::now();

    let connect_result = tokio::time::timeout(overall, async {
        match &proxy {
            Some(proxy) => open_tunnel(proxy, host, port, overall).await.map_err(|e| e.to_string()),
            None => TcpStream::connect((host, port)).await.map_err(|e| e.to_string()),
        }
    })
    .await;

    let mut stream = match connect_result {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err("connect timed out".to_string()),
    };
    let connect_elapsed = start.elapsed();

    let remaining = overall.saturating_sub(connect_elapsed);
    let banner_window = remaining.min(constants::LATENCY_BANNER_FALLBACK_WINDOW);

    let mut byte = [0u8; 1];
    match tokio::time::timeout(banner_window, stream.read(&mut byte)).await {
        Ok(Ok(n)) if n > 0 => Ok(start.elapsed().as_secs_f64() * 1000.0),
        _ => Ok(connect_elapsed.as_secs_f64() * 1000.0),
    }
}

async fn measure_ssh_echo(transport: &Arc<SshTransport>) -> Result<f64, String> {
    let start = Instant::now();
    let result = transport
        .with_session(|session| -> Result<(), String> {
            let mut channel = session.channel_session().map_err(|e| e.to_string())?;
            channel.exec("echo latency_test").map_err(|e| e.to_string())?;
            let mut byte = [0u8; 1];
            std::io::Read::read(&mut channel, &mut byte).map_err(|e| e.to_string())?;
            Ok(())
        })
        .await;

    match result {
        Ok(Ok(())) => Ok(start.elapsed().as_secs_f64() * 1000.0),
        Ok(Err(e)) => Err(e),
        Err(join_error) => Err(join_error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn banner_arriving_promptly_is_measured_to_first_byte() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            use tokio::io::AsyncWriteExt;
            let _ = socket.write_all(b"SSH-2.0-test\r\n").await;
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let elapsed_ms = measure_tcp_banner(None, "127.0.0.1", addr.port()).await.unwrap();
        assert!(elapsed_ms >= 0.0);
        assert!(elapsed_ms < constants::LATENCY_OVERALL_TIMEOUT.as_millis() as f64);
    }

    #[tokio::test]
    async fn silent_peer_falls_back_to_connect_only_time() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            drop(socket);
        });

        let elapsed_ms = measure_tcp_banner(None, "127.0.0.1", addr.port()).await.unwrap();
        assert!(elapsed_ms < constants::LATENCY_BANNER_FALLBACK_WINDOW.as_millis() as f64 + 50.0);
    }

    #[tokio::test]
    async fn unreachable_port_surfaces_as_error_not_a_panic() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = measure_tcp_banner(None, "127.0.0.1", addr.port()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn register_and_unregister_track_task_count() {
        let probe = LatencyProbe::new(EventBus::default(), Arc::new(ProxyResolver::new()));
        assert_eq!(probe.registered_count(), 0);

        probe.register("T1".into(), "127.0.0.1".into(), 9, ProxyPolicy::None, None);
        assert_eq!(probe.registered_count(), 1);
        assert!(probe.snapshot("T1").is_some());

        probe.unregister("T1");
        assert_eq!(probe.registered_count(), 0);
        assert!(probe.snapshot("T1").is_none());
    }
}
