//! SFTP Session Manager and Transfer Engine.

pub mod browse;
pub mod manager;
pub mod queue;
pub mod transfer;
pub mod types;

pub use browse::{list_remote, local_folder_remote_dirs, walk_local_folder, walk_remote_folder};
pub use manager::{SftpJob, SftpSessionHandle, SftpSessionManager, SshTransportProvider};
pub use transfer::{TransferEngine, TransferHandle};
pub use types::{
    DirEntry, FileTransferSpec, Priority, SftpOpResult, TransferDirection, TransferProgress, TransferStatus,
};
