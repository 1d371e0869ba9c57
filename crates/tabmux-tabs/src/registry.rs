//! Owns the interactive shell channel for each tab, built on top of the
//! SSH/Telnet pools' tab-bound leases. A single `TabRegistry` handles both
//! transports via the per-session-thread shell handle each pool exposes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex as StdMutex};
use std::time::Instant;

use tabmux_core::model::ConnectionEntry;
use tabmux_core::{CoreError, TabId};
use tabmux_events::{CoreEvent, EventBus};
use tabmux_pool::Pool;
use tabmux_ssh::{SshConnector, SshTransport};
use tabmux_telnet::TelnetConnector;
use tokio::sync::Mutex as AsyncMutex;

use crate::extractor::{CommandExtractor, HeuristicExtractor, EXTRACT_RATE_LIMIT, OUTPUT_BUFFER_CAP};
use crate::groups::{GroupRegistry, SyncGroupInfo};

enum TabChannel {
    Ssh(tabmux_ssh::ShellHandle),
    Telnet(tabmux_telnet::ShellHandle),
}

/// Snapshot of a tab's connection details, for display/inspection.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabConnectionInfo {
    pub tab_id: TabId,
    pub connection_key: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub kind: TabKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TabKind {
    Ssh,
    Telnet,
}

struct TabEntry {
    tab_id: TabId,
    connection_key: String,
    host: String,
    port: u16,
    username: String,
    kind: TabKind,
    channel: TabChannel,
    ssh_transport: Option<Arc<SshTransport>>,
    ready: AtomicBool,
    editor_mode: AtomicBool,
    buffer: StdMutex<VecDeque<String>>,
    partial_line: StdMutex<String>,
    last_extracted: StdMutex<Option<String>>,
    last_extract_at: StdMutex<Instant>,
}

impl TabEntry {
    #[allow(clippy::too_many_arguments)]
    fn new(
        tab_id: TabId,
        connection_key: String,
        host: String,
        port: u16,
        username: String,
        kind: TabKind,
        channel: TabChannel,
        ssh_transport: Option<Arc<SshTransport>>,
    ) -> Self {
        let rate_limit_ago = Instant::now().checked_sub(EXTRACT_RATE_LIMIT).unwrap_or_else(Instant::now);
        Self {
            tab_id,
            connection_key,
            host,
            port,
            username,
            kind,
            channel,
            ssh_transport,
            ready: AtomicBool::new(true),
            editor_mode: AtomicBool::new(false),
            buffer: StdMutex::new(VecDeque::with_capacity(OUTPUT_BUFFER_CAP)),
            partial_line: StdMutex::new(String::new()),
            last_extracted: StdMutex::new(None),
            last_extract_at: StdMutex::new(rate_limit_ago),
        }
    }
}

/// Generic over the [`CommandExtractor`] so tests can swap in a
/// deterministic fake; production code always uses [`HeuristicExtractor`]
/// via [`TabRegistry::new`].
pub struct TabRegistry<E: CommandExtractor = HeuristicExtractor> {
    ssh_pool: Arc<Pool<SshConnector>>,
    telnet_pool: Arc<Pool<TelnetConnector>>,
    events: EventBus,
    sessions: AsyncMutex<HashMap<TabId, Arc<TabEntry>>>,
    groups: StdMutex<GroupRegistry>,
    extractor: E,
}

impl TabRegistry<HeuristicExtractor> {
    pub fn new(ssh_pool: Arc<Pool<SshConnector>>, telnet_pool: Arc<Pool<TelnetConnector>>, events: EventBus) -> Self {
        Self::with_extractor(ssh_pool, telnet_pool, events, HeuristicExtractor)
    }
}

impl<E: CommandExtractor + Clone> TabRegistry<E> {
    pub fn with_extractor(
        ssh_pool: Arc<Pool<SshConnector>>,
        telnet_pool: Arc<Pool<TelnetConnector>>,
        events: EventBus,
        extractor: E,
    ) -> Self {
        Self {
            ssh_pool,
            telnet_pool,
            events,
            sessions: AsyncMutex::new(HashMap::new()),
            groups: StdMutex::new(GroupRegistry::new()),
            extractor,
        }
    }

    /// Opens an SSH connection for `tab_id`, returning the tab id on success.
    pub async fn open_ssh(&self, entry: &ConnectionEntry, tab_id: TabId, cols: u32, rows: u32) -> Result<TabId, CoreError> {
        let lease = self.ssh_pool.acquire(entry, Some(tab_id.as_str())).await?;

        let (tx, rx) = std_mpsc::channel::<tabmux_ssh::ShellEvent>();
        let shell = match tabmux_ssh::open_shell(tab_id.clone(), lease.transport.clone(), cols, rows, tx) {
            Ok(shell) => shell,
            Err(e) => {
                // release the lease so a shell open failure doesn't leak a pool slot.
                self.ssh_pool.release(&lease.key, Some(tab_id.as_str())).await;
                return Err(e);
            }
        };

        let tab_entry = Arc::new(TabEntry::new(
            tab_id.clone(),
            lease.key.clone(),
            entry.host.clone(),
            entry.port,
            entry.username.clone(),
            TabKind::Ssh,
            TabChannel::Ssh(shell),
            Some(lease.transport.clone()),
        ));

        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(tab_id.clone(), tab_entry.clone());
        }

        self.spawn_ssh_forwarder(tab_entry, rx);
        self.events.publish(CoreEvent::TerminalReady { tab_id: tab_id.clone() });
        Ok(tab_id)
    }

    /// Opens a Telnet connection for `tab_id`, analogous to [`Self::open_ssh`]
    /// with the Telnet client itself standing in for the SSH channel.
    pub async fn open_telnet(&self, entry: &ConnectionEntry, tab_id: TabId, cols: u16, rows: u16) -> Result<TabId, CoreError> {
        let lease = self.telnet_pool.acquire(entry, Some(tab_id.as_str())).await?;

        let (tx, rx) = std_mpsc::channel::<tabmux_telnet::ShellEvent>();
        let shell = match tabmux_telnet::open_shell(tab_id.clone(), lease.transport.clone(), cols, rows, tx) {
            Ok(shell) => shell,
            Err(e) => {
                self.telnet_pool.release(&lease.key, Some(tab_id.as_str())).await;
                return Err(e);
            }
        };

        let tab_entry = Arc::new(TabEntry::new(
            tab_id.clone(),
            lease.key.clone(),
            entry.host.clone(),
            entry.port,
            entry.username.clone(),
            TabKind::Telnet,
            TabChannel::Telnet(shell),
            None,
        ));

        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(tab_id.clone(), tab_entry.clone());
        }

        self.spawn_telnet_forwarder(tab_entry, rx);
        self.events.publish(CoreEvent::TerminalReady { tab_id: tab_id.clone() });
        Ok(tab_id)
    }

    /// Writes `bytes` to the tab's shell. Silently dropped if the tab is not
    /// ready; writes are not buffered at this layer.
    pub async fn send_input(&self, tab_id: &str, bytes: Vec<u8>) {
        let entry = {
            let sessions = self.sessions.lock().await;
            match sessions.get(tab_id) {
                Some(e) => e.clone(),
                None => return,
            }
        };
        if !entry.ready.load(Ordering::SeqCst) {
            return;
        }

        if entry.editor_mode.load(Ordering::SeqCst) && self.extractor.is_editor_exit(&bytes) {
            entry.editor_mode.store(false, Ordering::SeqCst);
        }

        let result = match &entry.channel {
            TabChannel::Ssh(h) => h.send_input(bytes),
            TabChannel::Telnet(h) => h.send_input(bytes),
        };
        if result.is_err() {
            entry.ready.store(false, Ordering::SeqCst);
        }
    }

    /// Resizes the tab's PTY. SSH only; Telnet tabs ignore this.
    pub async fn resize(&self, tab_id: &str, cols: u32, rows: u32) {
        let entry = {
            let sessions = self.sessions.lock().await;
            match sessions.get(tab_id) {
                Some(e) => e.clone(),
                None => return,
            }
        };
        if let TabChannel::Ssh(h) = &entry.channel {
            let _ = h.resize(cols, rows);
        }
    }

    /// Detaches the tab's stream, releases its pool lease, and removes its
    /// session entry. The underlying pooled connection may survive if other
    /// tabs still hold a reference to it.
    pub async fn kill(&self, tab_id: &str) {
        let entry = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(tab_id)
        };
        let Some(entry) = entry else { return };

        match &entry.channel {
            TabChannel::Ssh(h) => {
                h.close();
                self.ssh_pool.release(&entry.connection_key, Some(tab_id)).await;
            }
            TabChannel::Telnet(h) => {
                h.close();
                self.telnet_pool.release(&entry.connection_key, Some(tab_id)).await;
            }
        }

        self.groups.lock().expect("groups mutex poisoned").remove_member(&tab_id.to_string());
    }

    pub async fn is_ready(&self, tab_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.get(tab_id).map(|e| e.ready.load(Ordering::SeqCst)).unwrap_or(false)
    }

    pub async fn get_connection_info(&self, tab_id: &str) -> Option<TabConnectionInfo> {
        let sessions = self.sessions.lock().await;
        sessions.get(tab_id).map(|e| TabConnectionInfo {
            tab_id: e.tab_id.clone(),
            connection_key: e.connection_key.clone(),
            host: e.host.clone(),
            port: e.port,
            username: e.username.clone(),
            kind: e.kind,
        })
    }

    /// The tab's underlying SSH transport, if any — used by the latency
    /// probe's SSH-echo fallback. `None` for Telnet tabs.
    pub async fn ssh_transport(&self, tab_id: &str) -> Option<Arc<SshTransport>> {
        let sessions = self.sessions.lock().await;
        sessions.get(tab_id).and_then(|e| e.ssh_transport.clone())
    }

    pub async fn last_extracted_command(&self, tab_id: &str) -> Option<String> {
        let sessions = self.sessions.lock().await;
        let entry = sessions.get(tab_id)?;
        entry.last_extracted.lock().expect("last_extracted mutex poisoned").clone()
    }

    pub async fn is_editor_mode(&self, tab_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.get(tab_id).map(|e| e.editor_mode.load(Ordering::SeqCst)).unwrap_or(false)
    }

    // ── Sync groups ──────────────────────────────────────────────────────

    pub fn create_sync_group(&self, color: String) -> u32 {
        self.groups.lock().expect("groups mutex poisoned").create_group(color)
    }

    pub fn join_group(&self, group_id: u32, tab_id: TabId) -> bool {
        self.groups.lock().expect("groups mutex poisoned").add_member(group_id, tab_id)
    }

    pub fn leave_group(&self, tab_id: &str) {
        self.groups.lock().expect("groups mutex poisoned").remove_member(&tab_id.to_string());
    }

    pub fn list_groups(&self) -> Vec<SyncGroupInfo> {
        self.groups.lock().expect("groups mutex poisoned").list()
    }

    /// Fan out `sendInput` to every member of `group_id`.
    pub async fn broadcast_input(&self, group_id: u32, bytes: &[u8]) {
        let members = self.groups.lock().expect("groups mutex poisoned").members(group_id);
        for tab_id in members {
            self.send_input(&tab_id, bytes.to_vec()).await;
        }
    }

    fn spawn_ssh_forwarder(&self, entry: Arc<TabEntry>, rx: std_mpsc::Receiver<tabmux_ssh::ShellEvent>) {
        let events = self.events.clone();
        let extractor = CloneableExtractorRef::new(&self.extractor);
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = rx.recv() {
                match event {
                    tabmux_ssh::ShellEvent::Output { tab_id, bytes } => {
                        events.publish(CoreEvent::TerminalOutput { tab_id: tab_id.clone(), bytes: bytes.clone() });
                        ingest_output(&entry, &bytes, extractor.as_ref());
                    }
                    tabmux_ssh::ShellEvent::Closed { tab_id, reason } => {
                        entry.ready.store(false, Ordering::SeqCst);
                        events.publish(CoreEvent::TerminalClosed { tab_id, reason });
                        break;
                    }
                }
            }
        });
    }

    fn spawn_telnet_forwarder(&self, entry: Arc<TabEntry>, rx: std_mpsc::Receiver<tabmux_telnet::ShellEvent>) {
        let events = self.events.clone();
        let extractor = CloneableExtractorRef::new(&self.extractor);
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = rx.recv() {
                match event {
                    tabmux_telnet::ShellEvent::Output { tab_id, bytes } => {
                        events.publish(CoreEvent::TerminalOutput { tab_id: tab_id.clone(), bytes: bytes.clone() });
                        ingest_output(&entry, &bytes, extractor.as_ref());
                    }
                    tabmux_telnet::ShellEvent::Closed { tab_id, reason } => {
                        entry.ready.store(false, Ordering::SeqCst);
                        events.publish(CoreEvent::TerminalClosed { tab_id, reason });
                        break;
                    }
                }
            }
        });
    }
}

/// A raw pointer-free way to share `&E` with a `'static` blocking task
/// without requiring `E: Clone`: the extractor is stateless policy (regex
/// matching), so an `Arc` clone of the registry's single instance is the
/// simplest sound option. `HeuristicExtractor` is zero-sized, so this is a
/// no-op allocation in the default configuration.
struct CloneableExtractorRef<E>(Arc<E>);

impl<E: CommandExtractor> CloneableExtractorRef<E> {
    fn new(extractor: &E) -> Self
    where
        E: Clone,
    {
        Self(Arc::new(extractor.clone()))
    }

    fn as_ref(&self) -> &E {
        &self.0
    }
}

/// Append newly-arrived bytes to the tab's rolling line buffer and run
/// command extraction / editor-mode detection on any complete lines.
fn ingest_output<E: CommandExtractor>(entry: &TabEntry, bytes: &[u8], extractor: &E) {
    let text = String::from_utf8_lossy(bytes);
    let mut partial = entry.partial_line.lock().expect("partial_line mutex poisoned");
    partial.push_str(&text);

    let mut completed_lines = Vec::new();
    while let Some(pos) = partial.find('\n') {
        let line: String = partial.drain(..=pos).collect();
        completed_lines.push(line.trim_end_matches(['\r', '\n']).to_string());
    }
    drop(partial);

    if completed_lines.is_empty() {
        return;
    }

    let mut buffer = entry.buffer.lock().expect("buffer mutex poisoned");
    for line in completed_lines {
        if buffer.len() >= OUTPUT_BUFFER_CAP {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }
    let candidate = extractor.extract(&buffer);
    drop(buffer);

    let Some(candidate) = candidate else { return };

    let mut last_extracted = entry.last_extracted.lock().expect("last_extracted mutex poisoned");
    if last_extracted.as_deref() == Some(candidate.as_str()) {
        return;
    }
    let mut last_extract_at = entry.last_extract_at.lock().expect("last_extract_at mutex poisoned");
    if last_extract_at.elapsed() < EXTRACT_RATE_LIMIT {
        return;
    }

    if extractor.is_editor_entry(&candidate) {
        entry.editor_mode.store(true, Ordering::SeqCst);
    }

    *last_extracted = Some(candidate);
    *last_extract_at = Instant::now();
}
