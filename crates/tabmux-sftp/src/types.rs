//! Shared SFTP session / transfer types: just the fields the manager and
//! engine need. UI-facing fields like color tags or display labels belong
//! to the config store, not this crate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tabmux_core::TabId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// The result shape of one executed SFTP job — directory listings, stat
/// results, and path-resolution strings are the operations the Tab
/// Registry and file-browser surface need; `Unit`/`BytesTransferred` are
/// used by the transfer engine's single-job-per-file model.
#[derive(Debug, Clone)]
pub enum SftpOpResult {
    Entries(Vec<DirEntry>),
    Stat(ssh2::FileStat),
    Path(String),
    Unit,
    BytesTransferred(u64),
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub stat: ssh2::FileStat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgress {
    pub transfer_id: String,
    pub tab_id: TabId,
    pub direction: TransferDirection,
    pub local_path: String,
    pub remote_path: String,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub percent: f64,
    pub speed_bytes_per_sec: f64,
    pub status: TransferStatus,
    pub retry_attempt: u32,
    pub error: Option<String>,
}

impl TransferProgress {
    pub fn new(
        transfer_id: String,
        tab_id: TabId,
        direction: TransferDirection,
        local_path: PathBuf,
        remote_path: String,
        total_bytes: u64,
    ) -> Self {
        Self {
            transfer_id,
            tab_id,
            direction,
            local_path: local_path.to_string_lossy().to_string(),
            remote_path,
            total_bytes,
            transferred_bytes: 0,
            percent: 0.0,
            speed_bytes_per_sec: 0.0,
            status: TransferStatus::Queued,
            retry_attempt: 0,
            error: None,
        }
    }
}

/// One queued/in-flight file within a folder transfer or a multi-file
/// upload — `uploadMulti`/`uploadFolder`/`downloadFolder` each expand into
/// a list of these before dispatch.
#[derive(Debug, Clone)]
pub struct FileTransferSpec {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub size_hint: u64,
}
