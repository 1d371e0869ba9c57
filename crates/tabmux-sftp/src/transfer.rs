//! Transfer Engine: chunked upload/download, folder recursion, dynamic
//! concurrency, progress/speed smoothing, no-progress watchdog, and
//! retry/backoff. Each file transfer is one job submitted to the owning
//! tab's SFTP queue rather than a method directly holding the session, so
//! chunk boundaries double as cancellation/watchdog checkpoints.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tabmux_core::model::constants;
use tabmux_core::{CoreError, TabId};
use tabmux_events::{CoreEvent, EventBus, TransferFields};
use uuid::Uuid;

use crate::manager::{SftpJob, SftpSessionManager, SshTransportProvider};
use crate::types::{FileTransferSpec, Priority, SftpOpResult, TransferDirection, TransferProgress, TransferStatus};

pub fn choose_chunk_size(total_bytes: u64) -> usize {
    if total_bytes <= constants::CHUNK_SMALL_THRESHOLD_BYTES {
        constants::CHUNK_SMALL
    } else if total_bytes <= constants::CHUNK_MEDIUM_THRESHOLD_BYTES {
        constants::CHUNK_MEDIUM
    } else {
        constants::CHUNK_LARGE
    }
}

pub fn choose_concurrency(file_count: usize, total_bytes: u64) -> usize {
    if file_count == 0 {
        return 1;
    }
    let average = total_bytes / file_count as u64;
    let concurrency = if file_count >= 8 && average <= constants::CHUNK_SMALL_THRESHOLD_BYTES {
        constants::CONCURRENCY_MANY_SMALL
    } else if average > constants::CHUNK_MEDIUM_THRESHOLD_BYTES {
        constants::CONCURRENCY_LARGE
    } else if average > constants::CHUNK_SMALL_THRESHOLD_BYTES {
        constants::CONCURRENCY_MEDIUM
    } else {
        constants::CONCURRENCY_DEFAULT
    };
    concurrency.min(file_count)
}

pub fn choose_no_progress_timeout(total_bytes: u64) -> Duration {
    if total_bytes > constants::NO_PROGRESS_SIZE_THRESHOLD_BYTES {
        constants::NO_PROGRESS_TIMEOUT_LARGE
    } else {
        constants::NO_PROGRESS_TIMEOUT_SMALL
    }
}

/// `max(baseTimeout, estimatedTransferMs × 3)` assuming 1 MiB/s, capped by
/// the 24 h ceiling — since the ceiling equals the base timeout, this
/// degenerates to a constant 24 h for every file size, which is the
/// observable behavior the formula actually produces.
pub fn choose_operation_timeout(total_bytes: u64) -> Duration {
    let _ = total_bytes;
    constants::BASE_OPERATION_TIMEOUT
}

/// `(retryable, dead_session)` for a job error. `NoProgressTimeout` is
/// classified by variant since the watchdog constructs it directly rather
/// than surfacing it as a backend message; everything else falls back to
/// the shared substring lists because `ssh2`/raw I/O errors only ever hand
/// back a string.
fn classify_transfer_error(error: &CoreError) -> (bool, bool) {
    if matches!(error, CoreError::NoProgressTimeout { .. }) {
        return (true, true);
    }
    let message = error.to_string();
    (CoreError::message_is_retryable(&message), CoreError::message_indicates_dead_session(&message))
}

struct TransferControl {
    cancel: Arc<AtomicBool>,
    watchdog_fired: Arc<AtomicBool>,
    last_progress_instant: Arc<StdMutex<Instant>>,
    transferred: Arc<AtomicU64>,
}

pub struct TransferHandle {
    pub transfer_id: String,
    cancel: Arc<AtomicBool>,
}

impl TransferHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

pub struct TransferEngine {
    manager: Arc<SftpSessionManager>,
    progress: Arc<StdMutex<std::collections::HashMap<String, TransferProgress>>>,
    cancel_flags: Arc<StdMutex<std::collections::HashMap<String, Arc<AtomicBool>>>>,
    events: Option<EventBus>,
    transport_provider: Option<Arc<dyn SshTransportProvider>>,
}

impl TransferEngine {
    pub fn new(manager: Arc<SftpSessionManager>) -> Self {
        Self {
            manager,
            progress: Arc::new(StdMutex::new(std::collections::HashMap::new())),
            cancel_flags: Arc::new(StdMutex::new(std::collections::HashMap::new())),
            events: None,
            transport_provider: None,
        }
    }

    /// Same as [`TransferEngine::new`], but every progress/status change is
    /// also published as a `transfer.updated` event, and a dead-session
    /// error mid-retry can re-dial through `transport_provider` before the
    /// next attempt — the root runtime always constructs its engine this
    /// way; `new` stays event-free and recreation-free for callers
    /// (chiefly tests) that only care about polling `get_progress`.
    pub fn with_events(
        manager: Arc<SftpSessionManager>,
        events: EventBus,
        transport_provider: Arc<dyn SshTransportProvider>,
    ) -> Self {
        Self {
            manager,
            progress: Arc::new(StdMutex::new(std::collections::HashMap::new())),
            cancel_flags: Arc::new(StdMutex::new(std::collections::HashMap::new())),
            events: Some(events),
            transport_provider: Some(transport_provider),
        }
    }

    /// Flips the task's cancellation token; the next chunk boundary
    /// observes it and the task settles into `cancelled`. Returns `false`
    /// if no such transfer is currently tracked (already finished, or
    /// never existed).
    pub fn cancel(&self, transfer_id: &str) -> bool {
        match self.cancel_flags.lock().expect("cancel flags mutex poisoned").get(transfer_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn get_progress(&self, transfer_id: &str) -> Option<TransferProgress> {
        self.progress.lock().expect("progress mutex poisoned").get(transfer_id).cloned()
    }

    pub fn list_active(&self) -> Vec<TransferProgress> {
        self.progress
            .lock()
            .expect("progress mutex poisoned")
            .values()
            .filter(|p| matches!(p.status, TransferStatus::Queued | TransferStatus::Running))
            .cloned()
            .collect()
    }

    pub fn clear_finished(&self) -> usize {
        let mut progress = self.progress.lock().expect("progress mutex poisoned");
        let before = progress.len();
        progress.retain(|_, p| matches!(p.status, TransferStatus::Queued | TransferStatus::Running));
        before - progress.len()
    }

    /// A single-file upload: one job on the tab's SFTP queue, with the
    /// per-task retry loop wrapped around it.
    pub async fn upload_file(
        &self,
        tab_id: &TabId,
        local_path: PathBuf,
        remote_path: String,
    ) -> Result<TransferHandle, CoreError> {
        let metadata = tokio::fs::metadata(&local_path)
            .await
            .map_err(|e| CoreError::InvalidConfig { message: format!("cannot read local file: {e}") })?;
        let total_bytes = metadata.len();
        self.run_single_file(tab_id.clone(), TransferDirection::Upload, local_path, remote_path, total_bytes).await
    }

    /// `downloadFile(tabId, remotePath, localPath)`.
    pub async fn download_file(
        &self,
        tab_id: &TabId,
        remote_path: String,
        local_path: PathBuf,
    ) -> Result<TransferHandle, CoreError> {
        let stat_job: SftpJob = {
            let remote_path = remote_path.clone();
            Box::new(move |sftp: &ssh2::Sftp| {
                sftp.stat(Path::new(&remote_path))
                    .map(SftpOpResult::Stat)
                    .map_err(|e| CoreError::SftpOpen { tab_id: String::new(), source: Box::new(e) })
            })
        };
        let stat_result =
            self.manager.enqueue(tab_id, Priority::Normal, constants::BASE_OPERATION_TIMEOUT, stat_job).await?;
        let total_bytes = match stat_result {
            SftpOpResult::Stat(stat) => stat.size.unwrap_or(0),
            _ => 0,
        };
        self.run_single_file(tab_id.clone(), TransferDirection::Download, local_path, remote_path, total_bytes).await
    }

    /// `uploadMulti`/`uploadFolder`/`downloadFolder` share this fan-out:
    /// directories are created before their children are dispatched, then
    /// files run with the concurrency policy's semaphore.
    pub async fn transfer_many(
        &self,
        tab_id: &TabId,
        direction: TransferDirection,
        files: Vec<FileTransferSpec>,
        directories: Vec<String>,
    ) -> Result<Vec<TransferHandle>, CoreError> {
        if direction == TransferDirection::Upload {
            for dir in &directories {
                let job: SftpJob = {
                    let dir = dir.clone();
                    Box::new(move |sftp: &ssh2::Sftp| match sftp.mkdir(Path::new(&dir), 0o755) {
                        Ok(()) => Ok(SftpOpResult::Unit),
                        Err(e) if e.to_string().to_lowercase().contains("exist") => Ok(SftpOpResult::Unit),
                        Err(e) => Err(CoreError::SftpOpen { tab_id: String::new(), source: Box::new(e) }),
                    })
                };
                self.manager.enqueue(tab_id, Priority::High, Duration::from_secs(30), job).await?;
            }
        }

        let total_bytes: u64 = files.iter().map(|f| f.size_hint).sum();
        let concurrency = choose_concurrency(files.len(), total_bytes.max(1));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));

        let mut handles = Vec::with_capacity(files.len());
        let mut join_set = tokio::task::JoinSet::new();

        for file in files {
            let permit = semaphore.clone();
            let tab_id = tab_id.clone();
            let engine_manager = self.manager.clone();
            let engine_progress = self.progress.clone();
            let engine_events = self.events.clone();
            let engine_transport_provider = self.transport_provider.clone();
            let direction = direction;

            let transfer_id = Uuid::new_v4().to_string();
            let cancel = Arc::new(AtomicBool::new(false));
            handles.push(TransferHandle { transfer_id: transfer_id.clone(), cancel: cancel.clone() });
            self.cancel_flags.lock().expect("cancel flags mutex poisoned").insert(transfer_id.clone(), cancel.clone());
            let cancel_flags = self.cancel_flags.clone();

            join_set.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                run_transfer(
                    engine_manager,
                    engine_progress,
                    cancel_flags,
                    engine_events,
                    engine_transport_provider,
                    transfer_id,
                    tab_id,
                    direction,
                    file.local_path,
                    file.remote_path,
                    file.size_hint,
                    cancel,
                )
                .await;
            });
        }

        while join_set.join_next().await.is_some() {}

        Ok(handles)
    }

    async fn run_single_file(
        &self,
        tab_id: TabId,
        direction: TransferDirection,
        local_path: PathBuf,
        remote_path: String,
        total_bytes: u64,
    ) -> Result<TransferHandle, CoreError> {
        let transfer_id = Uuid::new_v4().to_string();
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = TransferHandle { transfer_id: transfer_id.clone(), cancel: cancel.clone() };
        self.cancel_flags.lock().expect("cancel flags mutex poisoned").insert(transfer_id.clone(), cancel.clone());

        let manager = self.manager.clone();
        let progress = self.progress.clone();
        let cancel_flags = self.cancel_flags.clone();
        let events = self.events.clone();
        let transport_provider = self.transport_provider.clone();
        tokio::spawn(run_transfer(
            manager,
            progress,
            cancel_flags,
            events,
            transport_provider,
            transfer_id,
            tab_id,
            direction,
            local_path,
            remote_path,
            total_bytes,
            cancel,
        ));

        Ok(handle)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_transfer(
    manager: Arc<SftpSessionManager>,
    progress_map: Arc<StdMutex<std::collections::HashMap<String, TransferProgress>>>,
    cancel_flags: Arc<StdMutex<std::collections::HashMap<String, Arc<AtomicBool>>>>,
    events: Option<EventBus>,
    transport_provider: Option<Arc<dyn SshTransportProvider>>,
    transfer_id: String,
    tab_id: TabId,
    direction: TransferDirection,
    local_path: PathBuf,
    remote_path: String,
    total_bytes: u64,
    cancel: Arc<AtomicBool>,
) {
    let mut progress = TransferProgress::new(
        transfer_id.clone(),
        tab_id.clone(),
        direction,
        local_path.clone(),
        remote_path.clone(),
        total_bytes,
    );
    progress.status = TransferStatus::Running;
    progress_map.lock().expect("progress mutex poisoned").insert(transfer_id.clone(), progress.clone());
    publish_progress(&events, &progress);

    let chunk_size = choose_chunk_size(total_bytes);
    let no_progress_timeout = choose_no_progress_timeout(total_bytes);
    let op_timeout = choose_operation_timeout(total_bytes);

    let mut last_error: Option<CoreError> = None;
    let mut attempts_made: u32 = 0;

    for attempt in 0..constants::MAX_OPERATION_ATTEMPTS {
        if attempt > 0 {
            let backoff_ms = constants::RETRY_BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            if let Some(p) = progress_map.lock().expect("progress mutex poisoned").get_mut(&transfer_id) {
                p.retry_attempt = attempt;
            }
        }
        if cancel.load(Ordering::SeqCst) {
            mark(&progress_map, &cancel_flags, &events, &transfer_id, TransferStatus::Cancelled, None);
            return;
        }
        attempts_made = attempt + 1;

        let control = TransferControl {
            cancel: cancel.clone(),
            watchdog_fired: Arc::new(AtomicBool::new(false)),
            last_progress_instant: Arc::new(StdMutex::new(Instant::now())),
            transferred: Arc::new(AtomicU64::new(0)),
        };
        let watchdog_instant = control.last_progress_instant.clone();
        let watchdog_fired = control.watchdog_fired.clone();
        let watchdog_user_cancel = cancel.clone();
        let watchdog = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(constants::PROGRESS_INTERVAL_MS)).await;
                if watchdog_user_cancel.load(Ordering::SeqCst) {
                    return;
                }
                let stalled = watchdog_instant.lock().expect("watchdog mutex poisoned").elapsed();
                if stalled > no_progress_timeout {
                    watchdog_fired.store(true, Ordering::SeqCst);
                    return;
                }
            }
        });

        let job = build_transfer_job(
            direction,
            local_path.clone(),
            remote_path.clone(),
            chunk_size,
            total_bytes,
            control,
            transfer_id.clone(),
            progress_map.clone(),
            events.clone(),
        );

        let result = manager.enqueue(&tab_id, Priority::Normal, op_timeout, job).await;
        watchdog.abort();

        match result {
            Ok(_) => {
                mark(&progress_map, &cancel_flags, &events, &transfer_id, TransferStatus::Completed, None);
                return;
            }
            Err(CoreError::Cancelled) => {
                mark(&progress_map, &cancel_flags, &events, &transfer_id, TransferStatus::Cancelled, None);
                return;
            }
            Err(e) => {
                let (retryable, dead_session) = classify_transfer_error(&e);
                last_error = Some(e);
                if !retryable {
                    break;
                }
                if dead_session && attempt + 1 < constants::MAX_OPERATION_ATTEMPTS {
                    let transport = match &transport_provider {
                        Some(provider) => provider.ssh_transport(&tab_id).await,
                        None => None,
                    };
                    let _ = manager.recreate(&tab_id, transport.as_ref()).await;
                }
            }
        }
    }

    let final_error = match last_error {
        Some(cause) => CoreError::RetryExhausted { attempts: attempts_made, source: Box::new(cause) },
        None => CoreError::RetryExhausted {
            attempts: attempts_made,
            source: Box::new(std::io::Error::new(std::io::ErrorKind::Other, "transfer failed")),
        },
    };
    mark(&progress_map, &cancel_flags, &events, &transfer_id, TransferStatus::Failed, Some(final_error.to_string()));
}

/// Records the terminal status and drops the transfer's cancellation
/// flag — `cancel()` only needs to reach transfers still in flight.
fn mark(
    progress_map: &StdMutex<std::collections::HashMap<String, TransferProgress>>,
    cancel_flags: &StdMutex<std::collections::HashMap<String, Arc<AtomicBool>>>,
    events: &Option<EventBus>,
    transfer_id: &str,
    status: TransferStatus,
    error: Option<String>,
) {
    let updated = {
        let mut progress_map = progress_map.lock().expect("progress mutex poisoned");
        let Some(p) = progress_map.get_mut(transfer_id) else { return };
        p.status = status;
        p.error = error;
        p.clone()
    };
    cancel_flags.lock().expect("cancel flags mutex poisoned").remove(transfer_id);
    publish_progress(events, &updated);
}

fn status_str(status: TransferStatus) -> &'static str {
    match status {
        TransferStatus::Queued => "queued",
        TransferStatus::Running => "running",
        TransferStatus::Completed => "completed",
        TransferStatus::Cancelled => "cancelled",
        TransferStatus::Failed => "failed",
    }
}

/// Publish the current snapshot as `transfer.updated` — best-effort, same
/// as every other `EventBus` call site.
fn publish_progress(events: &Option<EventBus>, progress: &TransferProgress) {
    let Some(events) = events else { return };
    events.publish(CoreEvent::TransferUpdated {
        tab_id: progress.tab_id.clone(),
        transfer_id: progress.transfer_id.clone(),
        fields: TransferFields {
            progress: Some(progress.percent),
            transferred_bytes: Some(progress.transferred_bytes),
            total_bytes: Some(progress.total_bytes),
            speed_bytes_per_sec: Some(progress.speed_bytes_per_sec),
            current_file: Some(progress.remote_path.clone()),
            state: Some(status_str(progress.status).to_string()),
            retry_attempt: Some(progress.retry_attempt),
            error: progress.error.clone(),
        },
    });
}

#[allow(clippy::too_many_arguments)]
fn build_transfer_job(
    direction: TransferDirection,
    local_path: PathBuf,
    remote_path: String,
    chunk_size: usize,
    total_bytes: u64,
    control: TransferControl,
    transfer_id: String,
    progress_map: Arc<StdMutex<std::collections::HashMap<String, TransferProgress>>>,
    events: Option<EventBus>,
) -> SftpJob {
    Box::new(move |sftp: &ssh2::Sftp| -> Result<SftpOpResult, CoreError> {
        let started = Instant::now();
        let last_published = StdMutex::new(Instant::now());
        let report = |transferred: u64| {
            control.transferred.store(transferred, Ordering::SeqCst);
            *control.last_progress_instant.lock().expect("watchdog mutex poisoned") = Instant::now();
            let elapsed = started.elapsed().as_secs_f64();
            let instant_speed = if elapsed > 0.0 { transferred as f64 / elapsed } else { 0.0 };
            let snapshot = {
                let mut progress_map = progress_map.lock().expect("progress mutex poisoned");
                let Some(p) = progress_map.get_mut(&transfer_id) else { return };
                let previous_speed = p.speed_bytes_per_sec;
                p.transferred_bytes = transferred;
                p.percent = if total_bytes > 0 { (transferred as f64 / total_bytes as f64) * 100.0 } else { 100.0 };
                p.speed_bytes_per_sec =
                    constants::SPEED_SMOOTHING_FACTOR * instant_speed + (1.0 - constants::SPEED_SMOOTHING_FACTOR) * previous_speed;
                p.clone()
            };

            // Progress events are throttled to PROGRESS_INTERVAL_MS; the
            // terminal-state `mark()` calls always publish regardless.
            let mut last = last_published.lock().expect("last_published mutex poisoned");
            if last.elapsed() >= Duration::from_millis(constants::PROGRESS_INTERVAL_MS) {
                *last = Instant::now();
                publish_progress(&events, &snapshot);
            }
        };

        // Checked at every chunk boundary: user cancellation takes
        // priority (it's an intentional stop), a stalled watchdog means
        // the channel is presumed dead and the transfer fails so the
        // retry loop can recreate the session.
        let check_aborted = || -> Result<(), CoreError> {
            if control.cancel.load(Ordering::SeqCst) {
                return Err(CoreError::Cancelled);
            }
            if control.watchdog_fired.load(Ordering::SeqCst) {
                let stalled_ms =
                    control.last_progress_instant.lock().expect("watchdog mutex poisoned").elapsed().as_millis() as u64;
                return Err(CoreError::NoProgressTimeout { transfer_id: transfer_id.clone(), stalled_ms });
            }
            Ok(())
        };

        match direction {
            TransferDirection::Upload => {
                let mut local_file = std::fs::File::open(&local_path)
                    .map_err(|e| CoreError::InvalidConfig { message: format!("open local file failed: {e}") })?;
                let mut remote_file = sftp
                    .open_mode(
                        Path::new(&remote_path),
                        ssh2::OpenFlags::WRITE | ssh2::OpenFlags::CREATE | ssh2::OpenFlags::TRUNCATE,
                        0o644,
                        ssh2::OpenType::File,
                    )
                    .map_err(|e| CoreError::SftpOpen { tab_id: String::new(), source: Box::new(e) })?;

                let mut transferred: u64 = 0;
                let mut buf = vec![0u8; chunk_size];
                loop {
                    check_aborted()?;
                    let n = local_file
                        .read(&mut buf)
                        .map_err(|e| CoreError::InvalidConfig { message: format!("read error: {e}") })?;
                    if n == 0 {
                        break;
                    }
                    remote_file
                        .write_all(&buf[..n])
                        .map_err(|e| CoreError::SftpOpen { tab_id: String::new(), source: Box::new(e) })?;
                    transferred += n as u64;
                    report(transferred);
                }

                if let Ok(local_metadata) = std::fs::metadata(&local_path) {
                    if let Ok(modified) = local_metadata.modified() {
                        if let Ok(mut stat) = sftp.stat(Path::new(&remote_path)) {
                            let mtime =
                                modified.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
                            stat.mtime = Some(mtime);
                            let _ = sftp.setstat(Path::new(&remote_path), stat);
                        }
                    }
                }

                Ok(SftpOpResult::BytesTransferred(transferred))
            }
            TransferDirection::Download => {
                let mut remote_file = sftp
                    .open(Path::new(&remote_path))
                    .map_err(|e| CoreError::SftpOpen { tab_id: String::new(), source: Box::new(e) })?;
                if let Some(parent) = local_path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                let mut local_file = std::fs::File::create(&local_path)
                    .map_err(|e| CoreError::InvalidConfig { message: format!("create local file failed: {e}") })?;

                let mut transferred: u64 = 0;
                let mut buf = vec![0u8; chunk_size];
                loop {
                    check_aborted()?;
                    let n = remote_file
                        .read(&mut buf)
                        .map_err(|e| CoreError::SftpOpen { tab_id: String::new(), source: Box::new(e) })?;
                    if n == 0 {
                        break;
                    }
                    local_file
                        .write_all(&buf[..n])
                        .map_err(|e| CoreError::InvalidConfig { message: format!("write error: {e}") })?;
                    transferred += n as u64;
                    report(transferred);
                }
                let _ = local_file.flush();
                let _ = remote_file.seek(SeekFrom::Start(0));

                if let Ok(stat) = sftp.stat(Path::new(&remote_path)) {
                    if let Some(mtime) = stat.mtime {
                        let ft = filetime::FileTime::from_unix_time(mtime as i64, 0);
                        let _ = filetime::set_file_mtime(&local_path, ft);
                    }
                }

                Ok(SftpOpResult::BytesTransferred(transferred))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_follows_size_bands() {
        assert_eq!(choose_chunk_size(1024), constants::CHUNK_SMALL);
        assert_eq!(choose_chunk_size(50 * 1024 * 1024), constants::CHUNK_MEDIUM);
        assert_eq!(choose_chunk_size(500 * 1024 * 1024), constants::CHUNK_LARGE);
    }

    #[test]
    fn concurrency_many_small_files() {
        let c = choose_concurrency(20, 20 * 1024 * 1024);
        assert_eq!(c, constants::CONCURRENCY_MANY_SMALL);
    }

    #[test]
    fn concurrency_never_exceeds_file_count() {
        let c = choose_concurrency(2, 2 * 1024 * 1024);
        assert!(c <= 2);
    }

    #[test]
    fn concurrency_large_average_caps_low() {
        let c = choose_concurrency(3, 3 * 200 * 1024 * 1024);
        assert_eq!(c, constants::CONCURRENCY_LARGE);
    }

    #[test]
    fn no_progress_timeout_switches_at_threshold() {
        assert_eq!(choose_no_progress_timeout(1024), constants::NO_PROGRESS_TIMEOUT_SMALL);
        assert_eq!(choose_no_progress_timeout(200 * 1024 * 1024), constants::NO_PROGRESS_TIMEOUT_LARGE);
    }

    #[test]
    fn stall_is_retryable_and_marks_dead_session() {
        let stall = CoreError::NoProgressTimeout { transfer_id: "t1".into(), stalled_ms: 30_000 };
        assert_eq!(classify_transfer_error(&stall), (true, true));
    }

    #[test]
    fn connection_reset_message_is_retryable_dead_session() {
        let e = CoreError::SftpOpen {
            tab_id: "t1".into(),
            source: Box::new(std::io::Error::new(std::io::ErrorKind::Other, "Connection reset by peer")),
        };
        assert_eq!(classify_transfer_error(&e), (true, true));
    }

    #[test]
    fn permission_denied_is_not_retryable() {
        let e = CoreError::SftpOpen {
            tab_id: "t1".into(),
            source: Box::new(std::io::Error::new(std::io::ErrorKind::Other, "permission denied")),
        };
        let (retryable, dead_session) = classify_transfer_error(&e);
        assert!(!retryable);
        assert!(!dead_session);
    }

    #[test]
    fn retry_exhausted_wraps_last_cause() {
        let stall = CoreError::NoProgressTimeout { transfer_id: "t1".into(), stalled_ms: 30_000 };
        let wrapped = CoreError::RetryExhausted { attempts: 3, source: Box::new(stall) };
        let message = wrapped.to_string();
        assert!(message.contains("retry budget exhausted after 3 attempt"));
        assert!(message.contains("no progress"));
    }
}
