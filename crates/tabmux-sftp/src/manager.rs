//! SFTP Session Manager: at most one SFTP channel per tab, serialized
//! through a dedicated worker task per tab — only the queue worker ever
//! touches the channel, which is structural here, not a convention,
//! because the `ssh2::Sftp` handle never leaves the worker's stack. One
//! worker task per tab so concurrent tabs don't serialize on each other's
//! file I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tabmux_core::model::constants;
use tabmux_core::{CoreError, TabId};
use tabmux_ssh::SshTransport;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::queue::PriorityQueue;
use crate::types::{DirEntry, Priority, SftpOpResult};

pub type SftpJob = Box<dyn FnOnce(&ssh2::Sftp) -> Result<SftpOpResult, CoreError> + Send>;

/// Looks up the SSH transport backing a tab, independent of however the
/// tab registry chooses to store it. The transfer engine's retry loop
/// uses this to re-dial a session after a dead-session error, without
/// `tabmux-sftp` depending on `tabmux-tabs` itself.
#[async_trait::async_trait]
pub trait SshTransportProvider: Send + Sync {
    async fn ssh_transport(&self, tab_id: &str) -> Option<Arc<SshTransport>>;
}

struct QueueEntry {
    job: SftpJob,
    reply: oneshot::Sender<Result<SftpOpResult, CoreError>>,
}

pub struct SftpSessionHandle {
    pub tab_id: TabId,
    pub created_at: Instant,
    last_used_at: StdMutex<Instant>,
    queue: Arc<PriorityQueue<QueueEntry>>,
    closed: Arc<AtomicBool>,
}

impl SftpSessionHandle {
    fn touch(&self) {
        *self.last_used_at.lock().expect("last_used_at mutex poisoned") = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used_at.lock().expect("last_used_at mutex poisoned").elapsed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct SftpSessionManager {
    sessions: AsyncMutex<HashMap<TabId, Arc<SftpSessionHandle>>>,
    acquisition_locks: StdMutex<HashMap<TabId, Arc<AsyncMutex<()>>>>,
    max_total: usize,
    idle_timeout: Duration,
}

impl Default for SftpSessionManager {
    fn default() -> Self {
        Self::new(constants::MAX_TOTAL_SFTP_SESSIONS, constants::SESSION_IDLE_TIMEOUT)
    }
}

impl SftpSessionManager {
    pub fn new(max_total: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: AsyncMutex::new(HashMap::new()),
            acquisition_locks: StdMutex::new(HashMap::new()),
            max_total,
            idle_timeout,
        }
    }

    fn acquisition_lock_for(&self, tab_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.acquisition_locks.lock().expect("acquisition locks mutex poisoned");
        locks.entry(tab_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Returns (creating if needed) the SFTP session for a tab. `transport`
    /// is `None` when the tab has no SSH connection, surfacing
    /// [`CoreError::NoSshForTab`] rather than attempting to dial one
    /// implicitly.
    pub async fn get(
        &self,
        tab_id: &str,
        transport: Option<&Arc<SshTransport>>,
    ) -> Result<Arc<SftpSessionHandle>, CoreError> {
        {
            let sessions = self.sessions.lock().await;
            if let Some(handle) = sessions.get(tab_id) {
                if !handle.is_closed() {
                    handle.touch();
                    return Ok(handle.clone());
                }
            }
        }

        let transport = transport.ok_or_else(|| CoreError::NoSshForTab { tab_id: tab_id.to_string() })?;

        // The acquisition lock per tab prevents concurrent creation;
        // callers arriving during creation await the single in-flight
        // attempt and then see the session the winner created.
        let acquisition_lock = self.acquisition_lock_for(tab_id);
        let _guard = acquisition_lock.lock().await;

        {
            let sessions = self.sessions.lock().await;
            if let Some(handle) = sessions.get(tab_id) {
                if !handle.is_closed() {
                    handle.touch();
                    return Ok(handle.clone());
                }
            }
        }

        let tab_owned = tab_id.to_string();
        let sftp = transport
            .with_session(|session| session.sftp())
            .await
            .map_err(|e| CoreError::SftpOpen { tab_id: tab_owned.clone(), source: Box::new(e) })?
            .map_err(|e| CoreError::SftpOpen { tab_id: tab_owned.clone(), source: Box::new(e) })?;

        let queue: Arc<PriorityQueue<QueueEntry>> = Arc::new(PriorityQueue::new());
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_worker(sftp, queue.clone(), closed.clone()));

        let handle = Arc::new(SftpSessionHandle {
            tab_id: tab_owned.clone(),
            created_at: Instant::now(),
            last_used_at: StdMutex::new(Instant::now()),
            queue,
            closed,
        });

        let mut sessions = self.sessions.lock().await;
        sessions.insert(tab_owned, handle.clone());

        if sessions.len() > self.max_total {
            evict_oldest(&mut sessions);
        }

        Ok(handle)
    }

    /// Ends the channel and rejects queued operations with `SessionClosed`
    /// (the worker's reply senders are dropped once the queue reports
    /// closed, which surfaces as a recv error the caller maps to
    /// `SessionClosed`).
    pub async fn close(&self, tab_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.remove(tab_id) {
            handle.closed.store(true, Ordering::SeqCst);
            handle.queue.close();
        }
    }

    /// Tears down the existing session (if any) and dials a fresh one.
    /// Used by the transfer engine when a retryable error's message
    /// indicates the channel is dead — re-submitting onto the same
    /// worker would just fail again, so the session is recreated first.
    pub async fn recreate(
        &self,
        tab_id: &str,
        transport: Option<&Arc<SshTransport>>,
    ) -> Result<Arc<SftpSessionHandle>, CoreError> {
        self.close(tab_id).await;
        self.get(tab_id, transport).await
    }

    /// Enqueues an operation against a tab's SFTP channel at the given
    /// priority, waiting up to `timeout` for the worker to run it.
    pub async fn enqueue(
        &self,
        tab_id: &str,
        priority: Priority,
        timeout: Duration,
        job: SftpJob,
    ) -> Result<SftpOpResult, CoreError> {
        let handle = {
            let sessions = self.sessions.lock().await;
            sessions.get(tab_id).cloned().ok_or_else(|| CoreError::SessionClosed { tab_id: tab_id.to_string() })?
        };
        if handle.is_closed() {
            return Err(CoreError::SessionClosed { tab_id: tab_id.to_string() });
        }

        let (tx, rx) = oneshot::channel();
        handle.queue.push(priority, QueueEntry { job, reply: tx });
        handle.touch();

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::SessionClosed { tab_id: tab_id.to_string() }),
            Err(_) => Err(CoreError::OperationTimeout { elapsed_ms: timeout.as_millis() as u64 }),
        }
    }

    /// Every `HEALTH_CHECK_INTERVAL`, race a `readdir("/")` against each
    /// session with a 5 s ceiling; failure or staleness closes the session.
    /// Also enforces `MAX_TOTAL_SFTP_SESSIONS` by closing the oldest.
    pub async fn perform_health_check(&self) {
        let handles: Vec<Arc<SftpSessionHandle>> = {
            let sessions = self.sessions.lock().await;
            sessions.values().cloned().collect()
        };

        for handle in handles {
            if handle.idle_for() > self.idle_timeout {
                self.close(&handle.tab_id).await;
                continue;
            }

            let job: SftpJob = Box::new(|sftp: &ssh2::Sftp| {
                sftp.readdir(std::path::Path::new("/"))
                    .map(|entries| {
                        SftpOpResult::Entries(
                            entries
                                .into_iter()
                                .map(|(path, stat)| DirEntry { name: path.to_string_lossy().to_string(), stat })
                                .collect(),
                        )
                    })
                    .map_err(|e| CoreError::SftpOpen { tab_id: String::new(), source: Box::new(e) })
            });

            let result = self.enqueue(&handle.tab_id, Priority::Low, constants::SFTP_HEALTH_CHECK_RACE, job).await;
            if result.is_err() {
                self.close(&handle.tab_id).await;
            }
        }

        let mut sessions = self.sessions.lock().await;
        while sessions.len() > self.max_total {
            evict_oldest(&mut sessions);
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

fn evict_oldest(sessions: &mut HashMap<TabId, Arc<SftpSessionHandle>>) {
    if let Some(oldest_tab) = sessions.iter().min_by_key(|(_, h)| h.created_at).map(|(k, _)| k.clone()) {
        if let Some(handle) = sessions.remove(&oldest_tab) {
            handle.closed.store(true, Ordering::SeqCst);
            handle.queue.close();
        }
    }
}

async fn run_worker(initial_sftp: ssh2::Sftp, queue: Arc<PriorityQueue<QueueEntry>>, closed: Arc<AtomicBool>) {
    let mut sftp = initial_sftp;
    while let Some(entry) = queue.pop_or_wait().await {
        let job = entry.job;
        match tokio::task::spawn_blocking(move || {
            let result = job(&sftp);
            (result, sftp)
        })
        .await
        {
            Ok((result, returned_sftp)) => {
                sftp = returned_sftp;
                let _ = entry.reply.send(result);
            }
            Err(_join_error) => {
                closed.store(true, Ordering::SeqCst);
                let _ = entry.reply.send(Err(CoreError::SftpOpen {
                    tab_id: String::new(),
                    source: Box::new(std::io::Error::new(std::io::ErrorKind::Other, "sftp worker thread panicked")),
                }));
                break;
            }
        }
    }
}
