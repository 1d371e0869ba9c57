//! Remote directory listing and folder-transfer planning: flat listing for
//! the file browser, recursive walks for folder upload/download. No
//! glob/sort/hidden-file filtering — that belongs to the UI layer, not
//! this core.

use std::path::Path;

use tabmux_core::model::constants;
use tabmux_core::CoreError;

use crate::manager::{SftpJob, SftpSessionManager};
use crate::types::{DirEntry, FileTransferSpec, Priority, SftpOpResult};

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

fn is_dir_mode(perm: u32) -> bool {
    perm & S_IFMT == S_IFDIR
}

/// One flat `readdir` against `path`, with "." and ".." dropped.
pub async fn list_remote(manager: &SftpSessionManager, tab_id: &str, path: &str) -> Result<Vec<DirEntry>, CoreError> {
    let path_owned = path.to_string();
    let job: SftpJob = Box::new(move |sftp: &ssh2::Sftp| {
        sftp.readdir(Path::new(&path_owned))
            .map(|raw| {
                SftpOpResult::Entries(
                    raw.into_iter()
                        .filter_map(|(entry_path, stat)| {
                            let name = entry_path.file_name()?.to_string_lossy().to_string();
                            if name == "." || name == ".." {
                                return None;
                            }
                            Some(DirEntry { name, stat })
                        })
                        .collect(),
                )
            })
            .map_err(|e| CoreError::SftpOpen { tab_id: String::new(), source: Box::new(e) })
    });

    match manager.enqueue(tab_id, Priority::Normal, constants::DIRECTORY_LISTING_TIMEOUT, job).await? {
        SftpOpResult::Entries(entries) => Ok(entries),
        _ => Ok(Vec::new()),
    }
}

/// Depth-first remote walk feeding folder download: every plain file under
/// `remote_root` paired with its size, plus every directory (including the
/// root) in an order parents-before-children. Symlinks resolve to their
/// target's stat and are queued as regular files rather than links.
pub async fn walk_remote_folder(
    manager: &SftpSessionManager,
    tab_id: &str,
    remote_root: &str,
) -> Result<(Vec<(String, u64)>, Vec<String>), CoreError> {
    let root = remote_root.trim_end_matches('/').to_string();
    let mut files = Vec::new();
    let mut dirs = vec![root.clone()];
    let mut stack = vec![root];

    while let Some(dir) = stack.pop() {
        for entry in list_remote(manager, tab_id, &dir).await? {
            let remote_path = format!("{dir}/{}", entry.name);
            let perm = entry.stat.perm.unwrap_or(0);
            if is_dir_mode(perm) {
                dirs.push(remote_path.clone());
                stack.push(remote_path);
            } else {
                files.push((remote_path, entry.stat.size.unwrap_or(0)));
            }
        }
    }

    Ok((files, dirs))
}

/// Local walk feeding folder upload: every plain file under `local_root`
/// paired with the remote path it maps to under `remote_root`, plus every
/// remote directory that needs creating first.
pub fn walk_local_folder(local_root: &std::path::Path, remote_root: &str) -> Vec<FileTransferSpec> {
    let remote_root = remote_root.trim_end_matches('/');
    let mut specs = Vec::new();

    for entry in walkdir::WalkDir::new(local_root).follow_links(false) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(local_root) else { continue };
        let relative = relative.to_string_lossy().replace('\\', "/");
        let remote_path = format!("{remote_root}/{relative}");
        let size_hint = entry.metadata().map(|m| m.len()).unwrap_or(0);
        specs.push(FileTransferSpec { local_path: entry.path().to_path_buf(), remote_path, size_hint });
    }

    specs
}

/// Remote directories a local folder walk needs created on the
/// destination before its files land — every directory `walkdir` visits,
/// mapped the same way [`walk_local_folder`] maps files.
pub fn local_folder_remote_dirs(local_root: &std::path::Path, remote_root: &str) -> Vec<String> {
    let remote_root = remote_root.trim_end_matches('/');
    let mut dirs = vec![remote_root.to_string()];

    for entry in walkdir::WalkDir::new(local_root).follow_links(false) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_dir() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(local_root) else { continue };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let relative = relative.to_string_lossy().replace('\\', "/");
        dirs.push(format!("{remote_root}/{relative}"));
    }

    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn local_walk_maps_nested_files_to_remote_paths() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"world!").unwrap();

        let mut specs = walk_local_folder(dir.path(), "/remote/target");
        specs.sort_by(|a, b| a.remote_path.cmp(&b.remote_path));

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].remote_path, "/remote/target/a.txt");
        assert_eq!(specs[0].size_hint, 5);
        assert_eq!(specs[1].remote_path, "/remote/target/sub/b.txt");
    }

    #[test]
    fn local_walk_remote_dirs_includes_root_and_subdirs() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/nested")).unwrap();

        let dirs = local_folder_remote_dirs(dir.path(), "/remote/target/");
        assert!(dirs.contains(&"/remote/target".to_string()));
        assert!(dirs.contains(&"/remote/target/sub".to_string()));
        assert!(dirs.contains(&"/remote/target/sub/nested".to_string()));
    }

    #[test]
    fn is_dir_mode_recognizes_directory_bit() {
        assert!(is_dir_mode(0o040755));
        assert!(!is_dir_mode(0o100644));
    }
}
