//! SSH transport: pool connector plus interactive shell channel.

pub mod shell;
pub mod transport;

pub use shell::{open_shell, ShellCommand, ShellEvent, ShellHandle};
pub use transport::{SshConnector, SshTransport};
