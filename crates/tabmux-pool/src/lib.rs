//! Generic keyed connection pool, shared by the SSH and Telnet transports.
//! The pool itself knows nothing about SSH or Telnet — it is parameterized
//! over a [`Connector`] that knows how to authenticate a [`ConnectionEntry`]
//! into some opaque [`Transport`]. A `HashMap<String, ...>` of live sessions
//! behind a mutex, generalized into one contract both transports implement
//! instead of each keeping its own copy.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabmux_core::model::{connection_key, ConnectionEntry};
use tabmux_core::{CoreError, TabId};
use tokio::sync::Mutex;

/// An authenticated transport handle. The pool only needs to know whether
/// it is still usable; everything else is owned by the transport-specific
/// crate.
pub trait Transport: Send + Sync + 'static {
    fn is_closed(&self) -> bool;
}

/// Creates and authenticates a transport for a given entry. Implemented by
/// `tabmux-ssh` and `tabmux-telnet`.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    async fn connect(&self, entry: &ConnectionEntry) -> Result<Self::Transport, CoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    Ready,
    Busy,
    Closing,
}

impl ConnectionState {
    fn answers_acquire(self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::Busy)
    }
}

struct Slot<T> {
    transport: Arc<T>,
    created_at: Instant,
    last_used_at: Instant,
    ref_count: i64,
    tab_refs: HashSet<TabId>,
    state: ConnectionState,
    usage_count: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    pub total: usize,
    pub ready: usize,
    pub busy: usize,
}

#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub key: String,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub ref_count: i64,
    pub tab_count: usize,
    pub usage_count: u64,
}

/// A leased transport handle returned by [`Pool::acquire`]. Callers hold on
/// to `key` so they can `release`/`add_tab_reference` later without
/// recomputing `connection_key`.
pub struct Lease<T> {
    pub key: String,
    pub transport: Arc<T>,
}

pub struct Pool<C: Connector> {
    connector: C,
    slots: Mutex<HashMap<String, Slot<C::Transport>>>,
    max_total: usize,
    idle_timeout: Duration,
}

impl<C: Connector> Pool<C> {
    pub fn new(connector: C, max_total: usize, idle_timeout: Duration) -> Self {
        Self {
            connector,
            slots: Mutex::new(HashMap::new()),
            max_total,
            idle_timeout,
        }
    }

    /// Looks up or dials a connection for `entry`, registering `tab_id` as
    /// a referrer when given.
    pub async fn acquire(
        &self,
        entry: &ConnectionEntry,
        tab_id: Option<&str>,
    ) -> Result<Lease<C::Transport>, CoreError> {
        let key = connection_key(entry, tab_id);

        {
            let mut slots = self.slots.lock().await;
            if let Some(slot) = slots.get_mut(&key) {
                if slot.state.answers_acquire() && !slot.transport.is_closed() {
                    slot.ref_count += 1;
                    slot.usage_count += 1;
                    slot.last_used_at = Instant::now();
                    if let Some(tab) = tab_id {
                        slot.tab_refs.insert(tab.to_string());
                    }
                    return Ok(Lease { key, transport: slot.transport.clone() });
                }
            }

            if slots.len() >= self.max_total {
                let victim = slots
                    .iter()
                    .filter(|(_, s)| s.ref_count <= 0 && s.tab_refs.is_empty())
                    .min_by_key(|(_, s)| s.last_used_at)
                    .map(|(k, _)| k.clone());

                match victim {
                    Some(victim_key) => {
                        slots.remove(&victim_key);
                    }
                    None => return Err(CoreError::PoolFull { max_total: self.max_total }),
                }
            }

            // Drop the lock here and authenticate outside it so a slow
            // dial doesn't block every other acquire/release on the pool.
            // Two concurrent
            // `acquire` calls racing on the same brand-new key both dial
            // out; the second insert below simply replaces the first, and
            // the loser's transport is dropped.
        }

        let connect_result = self.connector.connect(entry).await;

        let mut slots = self.slots.lock().await;
        match connect_result {
            Ok(transport) => {
                let transport = Arc::new(transport);
                let mut tab_refs = HashSet::new();
                if let Some(tab) = tab_id {
                    tab_refs.insert(tab.to_string());
                }
                slots.insert(
                    key.clone(),
                    Slot {
                        transport: transport.clone(),
                        created_at: Instant::now(),
                        last_used_at: Instant::now(),
                        ref_count: 1,
                        tab_refs,
                        state: ConnectionState::Ready,
                        usage_count: 1,
                    },
                );
                Ok(Lease { key, transport })
            }
            Err(e) => {
                slots.remove(&key);
                Err(e)
            }
        }
    }

    /// Releases a reference. The connection is left in the pool as idle;
    /// the sweeper closes it once past `idle_timeout`.
    pub async fn release(&self, key: &str, tab_id: Option<&str>) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(key) {
            slot.ref_count -= 1;
            if let Some(tab) = tab_id {
                slot.tab_refs.remove(tab);
            }
            if slot.ref_count <= 0 && slot.tab_refs.is_empty() && slot.state == ConnectionState::Busy {
                slot.state = ConnectionState::Ready;
            }
        }
    }

    /// Adds a tab as a referrer of an existing connection without going
    /// through `acquire`.
    pub async fn add_tab_reference(&self, key: &str, tab_id: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(key) {
            slot.tab_refs.insert(tab_id.to_string());
        }
    }

    pub async fn remove_tab_reference(&self, key: &str, tab_id: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(key) {
            slot.tab_refs.remove(tab_id);
        }
    }

    /// Forces teardown regardless of refcount.
    pub async fn close_connection(&self, key: &str) {
        let mut slots = self.slots.lock().await;
        slots.remove(key);
    }

    /// Closes connections whose transport reports closed, or which are
    /// idle past `idle_timeout` and unreferenced.
    pub async fn perform_health_check(&self) {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        slots.retain(|_, slot| {
            if slot.transport.is_closed() {
                return false;
            }
            let unreferenced = slot.ref_count <= 0 && slot.tab_refs.is_empty();
            if unreferenced && now.duration_since(slot.last_used_at) > self.idle_timeout {
                return false;
            }
            true
        });
    }

    pub async fn get_status(&self) -> PoolStatus {
        let slots = self.slots.lock().await;
        let total = slots.len();
        let busy = slots.values().filter(|s| s.ref_count > 0 || !s.tab_refs.is_empty()).count();
        PoolStatus { total, ready: total - busy, busy }
    }

    pub async fn get_detailed_stats(&self) -> Vec<ConnectionStats> {
        let slots = self.slots.lock().await;
        slots
            .iter()
            .map(|(key, slot)| ConnectionStats {
                key: key.clone(),
                created_at: slot.created_at,
                last_used_at: slot.last_used_at,
                ref_count: slot.ref_count,
                tab_count: slot.tab_refs.len(),
                usage_count: slot.usage_count,
            })
            .collect()
    }

    pub async fn get_top_connections(&self, n: usize) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut pairs: Vec<_> = slots.iter().map(|(k, s)| (k.clone(), s.usage_count)).collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1));
        pairs.into_iter().take(n).map(|(k, _)| k).collect()
    }

    pub async fn get_last_connections(&self, n: usize) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut pairs: Vec<_> = slots.iter().map(|(k, s)| (k.clone(), s.last_used_at)).collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1));
        pairs.into_iter().take(n).map(|(k, _)| k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tabmux_core::model::{ConnectionKind, Credential};

    struct FakeTransport {
        closed: AtomicBool,
    }

    impl Transport for FakeTransport {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct FakeConnector {
        connects: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Transport = FakeTransport;

        async fn connect(&self, _entry: &ConnectionEntry) -> Result<Self::Transport, CoreError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CoreError::Auth {
                    key: Some("x".into()),
                    source: Box::new(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "bad key")),
                })
            } else {
                Ok(FakeTransport { closed: AtomicBool::new(false) })
            }
        }
    }

    fn entry(id: &str) -> ConnectionEntry {
        ConnectionEntry {
            id: id.into(),
            display_name: id.into(),
            kind: ConnectionKind::Ssh,
            host: "10.0.0.1".into(),
            port: 22,
            username: "root".into(),
            credential: Credential::PrivateKey { path: "k".into() },
            passphrase: None,
            proxy_policy: Default::default(),
            parent_group: None,
        }
    }

    #[tokio::test]
    async fn acquire_then_release_keeps_connection_idle_not_closed() {
        let pool = Pool::new(
            FakeConnector { connects: AtomicUsize::new(0), fail: false },
            50,
            Duration::from_secs(600),
        );
        let lease = pool.acquire(&entry("e1"), Some("T1")).await.unwrap();
        pool.release(&lease.key, Some("T1")).await;

        let status = pool.get_status().await;
        assert_eq!(status.total, 1);
    }

    #[tokio::test]
    async fn second_acquire_for_same_tab_reuses_connection() {
        let pool = Pool::new(
            FakeConnector { connects: AtomicUsize::new(0), fail: false },
            50,
            Duration::from_secs(600),
        );
        let e = entry("e1");
        let l1 = pool.acquire(&e, Some("T1")).await.unwrap();
        let l2 = pool.acquire(&e, Some("T1")).await.unwrap();
        assert_eq!(l1.key, l2.key);

        let stats = pool.get_detailed_stats().await;
        assert_eq!(stats[0].ref_count, 2);
    }

    #[tokio::test]
    async fn auth_failure_surfaces_error_and_does_not_leak_a_slot() {
        let pool = Pool::new(
            FakeConnector { connects: AtomicUsize::new(0), fail: true },
            50,
            Duration::from_secs(600),
        );
        let result = pool.acquire(&entry("e1"), None).await;
        assert!(result.is_err());
        assert_eq!(pool.get_status().await.total, 0);
    }

    #[tokio::test]
    async fn health_check_closes_idle_unreferenced_connection() {
        let pool = Pool::new(
            FakeConnector { connects: AtomicUsize::new(0), fail: false },
            50,
            Duration::from_millis(1),
        );
        let lease = pool.acquire(&entry("e1"), Some("T1")).await.unwrap();
        pool.release(&lease.key, Some("T1")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        pool.perform_health_check().await;
        assert_eq!(pool.get_status().await.total, 0);
    }

    #[tokio::test]
    async fn pool_full_without_eviction_victim_fails_fast() {
        let pool = Pool::new(
            FakeConnector { connects: AtomicUsize::new(0), fail: false },
            1,
            Duration::from_secs(600),
        );
        let _lease = pool.acquire(&entry("e1"), Some("T1")).await.unwrap();
        let result = pool.acquire(&entry("e2"), Some("T2")).await;
        assert!(matches!(result, Err(CoreError::PoolFull { .. })));
    }
}
