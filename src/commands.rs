//! Thin Tauri command wrappers over [`Runtime`]: one
//! `#[tauri::command] async fn` per request, errors mapped to `String`
//! since that's what `invoke_handler` can serialize back to the frontend.
//! Every [`Runtime`] method already takes `&self` — its components carry
//! their own interior locking — so the managed state here is a bare
//! `Arc<Runtime>`, no outer mutex.

use std::path::PathBuf;

use serde::Serialize;
use tabmux_core::model::ConnectionEntry;
use tabmux_sftp::{DirEntry, TransferHandle};
use tabmux_tabs::TabConnectionInfo;

use crate::{Runtime, TransferKind};

pub type RuntimeState = std::sync::Arc<Runtime>;

/// The frontend-facing shape of a remote directory entry — `DirEntry`
/// itself carries an `ssh2::FileStat`, which has no `Serialize` impl and
/// belongs to an external crate, so this is the one conversion point
/// between the core's wire-agnostic type and what `invoke` can return.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    pub size: Option<u64>,
    pub perm: Option<u32>,
    pub mtime: Option<u64>,
    pub is_dir: bool,
}

impl From<DirEntry> for RemoteEntry {
    fn from(entry: DirEntry) -> Self {
        let is_dir = entry.stat.perm.map(|perm| perm & 0o170000 == 0o040000).unwrap_or(false);
        Self { name: entry.name, size: entry.stat.size, perm: entry.stat.perm, mtime: entry.stat.mtime, is_dir }
    }
}

#[tauri::command]
pub async fn open_ssh(
    state: tauri::State<'_, RuntimeState>,
    entry: ConnectionEntry,
    tab_id: String,
    cols: u32,
    rows: u32,
) -> Result<String, String> {
    state.open_ssh(&entry, tab_id, cols, rows).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn open_telnet(
    state: tauri::State<'_, RuntimeState>,
    entry: ConnectionEntry,
    tab_id: String,
    cols: u16,
    rows: u16,
) -> Result<String, String> {
    state.open_telnet(&entry, tab_id, cols, rows).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn send_input(state: tauri::State<'_, RuntimeState>, tab_id: String, bytes: Vec<u8>) -> Result<(), String> {
    state.send_input(&tab_id, bytes).await;
    Ok(())
}

#[tauri::command]
pub async fn resize(state: tauri::State<'_, RuntimeState>, tab_id: String, cols: u32, rows: u32) -> Result<(), String> {
    state.resize(&tab_id, cols, rows).await;
    Ok(())
}

#[tauri::command]
pub async fn close_tab(state: tauri::State<'_, RuntimeState>, tab_id: String) -> Result<(), String> {
    state.close_tab(&tab_id).await;
    Ok(())
}

#[tauri::command]
pub async fn list_remote(
    state: tauri::State<'_, RuntimeState>,
    tab_id: String,
    path: String,
) -> Result<Vec<RemoteEntry>, String> {
    let entries = state.list_remote(&tab_id, &path).await.map_err(|e| e.to_string())?;
    Ok(entries.into_iter().map(RemoteEntry::from).collect())
}

#[tauri::command]
pub async fn upload(
    state: tauri::State<'_, RuntimeState>,
    tab_id: String,
    paths: Vec<PathBuf>,
    remote_dir: String,
    kind: TransferKind,
) -> Result<Vec<String>, String> {
    let handles = state.upload(&tab_id, paths, &remote_dir, kind).await.map_err(|e| e.to_string())?;
    Ok(handles.into_iter().map(|h: TransferHandle| h.transfer_id).collect())
}

#[tauri::command]
pub async fn download(
    state: tauri::State<'_, RuntimeState>,
    tab_id: String,
    remote_paths: Vec<String>,
    local_dir: PathBuf,
    kind: TransferKind,
) -> Result<Vec<String>, String> {
    let handles = state.download(&tab_id, remote_paths, local_dir, kind).await.map_err(|e| e.to_string())?;
    Ok(handles.into_iter().map(|h: TransferHandle| h.transfer_id).collect())
}

#[tauri::command]
pub async fn cancel_transfer(state: tauri::State<'_, RuntimeState>, tab_id: String, transfer_id: String) -> Result<bool, String> {
    Ok(state.cancel_transfer(&tab_id, &transfer_id))
}

#[tauri::command]
pub async fn test_latency(state: tauri::State<'_, RuntimeState>, tab_id: String) -> Result<(), String> {
    state.test_latency(&tab_id);
    Ok(())
}

#[tauri::command]
pub async fn get_ssh_config(
    state: tauri::State<'_, RuntimeState>,
    tab_id: String,
) -> Result<Option<TabConnectionInfo>, String> {
    Ok(state.get_ssh_config(&tab_id).await)
}
