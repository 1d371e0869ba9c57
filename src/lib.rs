//! Root runtime: wires every component into one long-lived set of
//! services, constructed once at startup and torn down in
//! reverse-dependency order. A caller constructs a single `Runtime`
//! directly, with an optional `tauri-commands`-gated wrapper layer doing
//! the `app.manage`/`invoke_handler` wiring for an embedding Tauri app.

#[cfg(feature = "tauri-commands")]
pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use tabmux_config::{ConfigStoreState, PersistedDocument};
use tabmux_core::model::{constants, ConnectionEntry};
use tabmux_core::{CoreError, TabId};
use tabmux_events::EventBus;
use tabmux_latency::LatencyProbe;
use tabmux_pool::Pool;
use tabmux_proxy::ProxyResolver;
use tabmux_sftp::{
    FileTransferSpec, SftpSessionManager, SshTransportProvider, TransferDirection, TransferEngine, TransferHandle,
};
use tabmux_ssh::{SshConnector, SshTransport};
use tabmux_tabs::{TabConnectionInfo, TabRegistry};
use tabmux_telnet::TelnetConnector;

/// Bridges `tabmux-sftp`'s session-recreation hook to the tab registry's
/// notion of "which SSH transport backs this tab", without making
/// `tabmux-sftp` depend on `tabmux-tabs` itself.
struct TabRegistryTransportProvider {
    tabs: Arc<TabRegistry>,
}

#[async_trait::async_trait]
impl SshTransportProvider for TabRegistryTransportProvider {
    async fn ssh_transport(&self, tab_id: &str) -> Option<Arc<SshTransport>> {
        self.tabs.ssh_transport(tab_id).await
    }
}

/// `upload`/`download`'s transfer shape: a flat list of files, or a single
/// folder transferred recursively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Files,
    Folder,
}

/// Owns every long-lived component: the connection pools, the tab
/// registry, the SFTP session manager and transfer engine, the latency
/// probe, and the one event bus every component publishes onto.
pub struct Runtime {
    pub config: ConfigStoreState,
    pub proxy_resolver: Arc<ProxyResolver>,
    pub ssh_pool: Arc<Pool<SshConnector>>,
    pub telnet_pool: Arc<Pool<TelnetConnector>>,
    pub tabs: Arc<TabRegistry>,
    pub sftp: Arc<SftpSessionManager>,
    pub transfers: Arc<TransferEngine>,
    pub latency: Arc<LatencyProbe>,
    pub events: EventBus,
}

impl Runtime {
    /// Constructs every component and spawns the two background sweepers
    /// (pool health check, SFTP health check), both on
    /// `HEALTH_CHECK_INTERVAL`. Does not load the config document — call
    /// [`Runtime::load_config`] once the caller is ready to read it.
    pub fn new(config_path: PathBuf, master_key: Option<String>) -> Arc<Self> {
        tabmux_core::diagnostics::init();

        let config = tabmux_config::ConfigStore::new(config_path, master_key);
        let proxy_resolver = Arc::new(ProxyResolver::new());
        let events = EventBus::default();

        let ssh_pool = Arc::new(Pool::new(
            SshConnector { proxy_resolver: proxy_resolver.clone(), connect_timeout: constants::CONNECT_TIMEOUT },
            constants::MAX_TOTAL_CONNECTIONS,
            constants::IDLE_TIMEOUT_SSH_SFTP,
        ));
        let telnet_pool = Arc::new(Pool::new(
            TelnetConnector { proxy_resolver: proxy_resolver.clone(), connect_timeout: constants::CONNECT_TIMEOUT },
            constants::MAX_TOTAL_CONNECTIONS,
            constants::IDLE_TIMEOUT_TELNET,
        ));

        let tabs = Arc::new(TabRegistry::new(ssh_pool.clone(), telnet_pool.clone(), events.clone()));
        let sftp = Arc::new(SftpSessionManager::default());
        let transport_provider: Arc<dyn SshTransportProvider> =
            Arc::new(TabRegistryTransportProvider { tabs: tabs.clone() });
        let transfers = Arc::new(TransferEngine::with_events(sftp.clone(), events.clone(), transport_provider));
        let latency = Arc::new(LatencyProbe::new(events.clone(), proxy_resolver.clone()));

        let runtime = Arc::new(Self { config, proxy_resolver, ssh_pool, telnet_pool, tabs, sftp, transfers, latency, events });

        runtime.clone().spawn_sweepers();
        runtime
    }

    fn spawn_sweepers(self: Arc<Self>) {
        let ssh_pool = self.ssh_pool.clone();
        let telnet_pool = self.telnet_pool.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(constants::HEALTH_CHECK_INTERVAL);
            loop {
                interval.tick().await;
                ssh_pool.perform_health_check().await;
                telnet_pool.perform_health_check().await;
            }
        });

        let sftp = self.sftp.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(constants::HEALTH_CHECK_INTERVAL);
            loop {
                interval.tick().await;
                sftp.perform_health_check().await;
            }
        });
    }

    /// Reads and auto-initializes the persisted document, and seeds the
    /// proxy resolver's process-wide default from `uiSettings` if the
    /// document carries one — the config store owns the JSON shape, the
    /// resolver owns only the resolved descriptor, so this is the one
    /// place that bridges the two.
    pub async fn load_config(&self) -> Result<PersistedDocument, tabmux_config::ConfigError> {
        self.config.lock().await.load().await
    }

    /// Opens an SSH connection for `tab_id` with the PTY's initial
    /// dimensions; `resize` reuses the same `cols`/`rows` parameters for
    /// later size changes.
    pub async fn open_ssh(
        &self,
        entry: &ConnectionEntry,
        tab_id: TabId,
        cols: u32,
        rows: u32,
    ) -> Result<TabId, CoreError> {
        let tab_id = self.tabs.open_ssh(entry, tab_id, cols, rows).await?;
        let ssh_transport = self.tabs.ssh_transport(&tab_id).await;
        self.latency.register(tab_id.clone(), entry.host.clone(), entry.port, entry.proxy_policy.clone(), ssh_transport);
        Ok(tab_id)
    }

    /// Opens a Telnet connection for `tab_id`.
    pub async fn open_telnet(
        &self,
        entry: &ConnectionEntry,
        tab_id: TabId,
        cols: u16,
        rows: u16,
    ) -> Result<TabId, CoreError> {
        let tab_id = self.tabs.open_telnet(entry, tab_id, cols, rows).await?;
        self.latency.register(tab_id.clone(), entry.host.clone(), entry.port, entry.proxy_policy.clone(), None);
        Ok(tab_id)
    }

    pub async fn send_input(&self, tab_id: &str, bytes: Vec<u8>) {
        self.tabs.send_input(tab_id, bytes).await;
    }

    pub async fn resize(&self, tab_id: &str, cols: u32, rows: u32) {
        self.tabs.resize(tab_id, cols, rows).await;
    }

    /// Tears down the shell, the pool reference, any SFTP session, and the
    /// latency registration together, since none of those outlive the tab
    /// that opened them.
    pub async fn close_tab(&self, tab_id: &str) {
        self.tabs.kill(tab_id).await;
        self.sftp.close(tab_id).await;
        self.latency.unregister(tab_id);
    }

    /// Establishes the tab's SFTP channel if it doesn't exist yet.
    /// `listRemote`/`upload`/`download` all need a live session before
    /// they can enqueue a job; this is the one place that calls
    /// [`SftpSessionManager::get`], mirroring the way `openSsh` is the one
    /// place that calls `Pool::acquire`.
    async fn ensure_sftp_session(&self, tab_id: &str) -> Result<(), CoreError> {
        let transport = self.tabs.ssh_transport(tab_id).await;
        self.sftp.get(tab_id, transport.as_ref()).await?;
        Ok(())
    }

    pub async fn list_remote(&self, tab_id: &str, path: &str) -> Result<Vec<tabmux_sftp::DirEntry>, CoreError> {
        self.ensure_sftp_session(tab_id).await?;
        tabmux_sftp::list_remote(&self.sftp, tab_id, path).await
    }

    /// `Files` uploads each local path directly into `remote_dir`; `Folder`
    /// expects exactly one local directory in `paths` and recreates its
    /// tree under `remote_dir`.
    pub async fn upload(
        &self,
        tab_id: &str,
        paths: Vec<PathBuf>,
        remote_dir: &str,
        kind: TransferKind,
    ) -> Result<Vec<TransferHandle>, CoreError> {
        self.ensure_sftp_session(tab_id).await?;
        let tab_id_owned: TabId = tab_id.to_string();
        let remote_dir = remote_dir.trim_end_matches('/');

        match kind {
            TransferKind::Files => {
                let mut files = Vec::with_capacity(paths.len());
                for local_path in paths {
                    let name = local_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                    let remote_path = format!("{remote_dir}/{name}");
                    let size_hint = tokio::fs::metadata(&local_path).await.map(|m| m.len()).unwrap_or(0);
                    files.push(FileTransferSpec { local_path, remote_path, size_hint });
                }
                self.transfers
                    .transfer_many(&tab_id_owned, TransferDirection::Upload, files, vec![remote_dir.to_string()])
                    .await
            }
            TransferKind::Folder => {
                let root = paths.into_iter().next().ok_or_else(|| CoreError::InvalidConfig {
                    message: "uploadFolder requires exactly one local directory".into(),
                })?;
                let files = tabmux_sftp::walk_local_folder(&root, remote_dir);
                let directories = tabmux_sftp::local_folder_remote_dirs(&root, remote_dir);
                self.transfers.transfer_many(&tab_id_owned, TransferDirection::Upload, files, directories).await
            }
        }
    }

    /// `Files` downloads each remote path directly into `local_dir`;
    /// `Folder` expects exactly one remote directory in `remote_paths` and
    /// recreates its tree under `local_dir`.
    pub async fn download(
        &self,
        tab_id: &str,
        remote_paths: Vec<String>,
        local_dir: PathBuf,
        kind: TransferKind,
    ) -> Result<Vec<TransferHandle>, CoreError> {
        self.ensure_sftp_session(tab_id).await?;
        let tab_id_owned: TabId = tab_id.to_string();

        match kind {
            TransferKind::Files => {
                let files = remote_paths
                    .into_iter()
                    .map(|remote_path| {
                        let name = remote_path.rsplit('/').next().unwrap_or(&remote_path).to_string();
                        FileTransferSpec { local_path: local_dir.join(name), remote_path, size_hint: 0 }
                    })
                    .collect();
                self.transfers.transfer_many(&tab_id_owned, TransferDirection::Download, files, Vec::new()).await
            }
            TransferKind::Folder => {
                let remote_root = remote_paths.into_iter().next().ok_or_else(|| CoreError::InvalidConfig {
                    message: "downloadFolder requires exactly one remote directory".into(),
                })?;
                let root_trimmed = remote_root.trim_end_matches('/').to_string();
                let (remote_files, _dirs) = tabmux_sftp::walk_remote_folder(&self.sftp, tab_id, &remote_root).await?;
                let files = remote_files
                    .into_iter()
                    .map(|(remote_path, size_hint)| {
                        let relative = remote_path.strip_prefix(&root_trimmed).unwrap_or(&remote_path).trim_start_matches('/');
                        FileTransferSpec { local_path: local_dir.join(relative), remote_path, size_hint }
                    })
                    .collect();
                self.transfers.transfer_many(&tab_id_owned, TransferDirection::Download, files, Vec::new()).await
            }
        }
    }

    /// Scoped to `tab_id` so one tab's UI can't cancel another tab's
    /// in-flight transfer by guessing its id.
    pub fn cancel_transfer(&self, tab_id: &str, transfer_id: &str) -> bool {
        match self.transfers.get_progress(transfer_id) {
            Some(progress) if progress.tab_id == tab_id => self.transfers.cancel(transfer_id),
            _ => false,
        }
    }

    /// Wakes the probe immediately rather than waiting out the rest of the
    /// 60 s interval; the result arrives as a `latency.updated`/
    /// `latency.error` event, not a return value.
    pub fn test_latency(&self, tab_id: &str) {
        self.latency.test_now(tab_id);
    }

    pub async fn get_ssh_config(&self, tab_id: &str) -> Option<TabConnectionInfo> {
        self.tabs.get_connection_info(tab_id).await
    }

    /// Publishes the current SSH and Telnet pool status as one
    /// `CoreEvent::PoolStats`.
    pub async fn publish_pool_stats(&self) {
        let ssh = self.ssh_pool.get_status().await;
        let telnet = self.telnet_pool.get_status().await;
        self.events.publish(tabmux_events::CoreEvent::PoolStats {
            ssh: tabmux_events::PoolStatsSnapshot { total: ssh.total, ready: ssh.ready, busy: ssh.busy },
            telnet: tabmux_events::PoolStatsSnapshot { total: telnet.total, ready: telnet.ready, busy: telnet.busy },
        });
    }
}
