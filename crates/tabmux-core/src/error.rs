//! Typed error taxonomy shared across the core.
//!
//! A variant enum rather than string-typed errors. A substring classifier
//! is kept alongside it because backend libraries (`ssh2`, raw
//! `std::io::Error`s off a socket) only ever hand us a message — the
//! classifier is a compatibility shim for those, not the primary dispatch
//! mechanism.

use std::fmt;

/// Thirteen error kinds, each carrying its original cause and, where
/// applicable, the connection key and tab id that were in play.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("authentication failed{}: {source}", key_suffix(.key))]
    Auth {
        key: Option<String>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("network error{}: {source}", key_suffix(.key))]
    Network {
        key: Option<String>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("connection pool is full (max {max_total} reached) and no idle victim was found")]
    PoolFull { max_total: usize },

    #[error("tab {tab_id} has no SSH connection")]
    NoSshForTab { tab_id: String },

    #[error("failed to open SFTP subsystem for tab {tab_id}: {source}")]
    SftpOpen {
        tab_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("session closed for tab {tab_id}")]
    SessionClosed { tab_id: String },

    #[error("operation timed out after {elapsed_ms}ms")]
    OperationTimeout { elapsed_ms: u64 },

    #[error("no progress for {stalled_ms}ms, aborting transfer {transfer_id}")]
    NoProgressTimeout { transfer_id: String, stalled_ms: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("retry budget exhausted after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("proxy handshake failed: {message}")]
    ProxyHandshake { message: String },

    #[error("failed to decrypt stored secret: {message}")]
    DecryptFailed { message: String },
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(k) => format!(" (key={k})"),
        None => String::new(),
    }
}

impl CoreError {
    pub fn tab_id(&self) -> Option<&str> {
        match self {
            CoreError::NoSshForTab { tab_id }
            | CoreError::SftpOpen { tab_id, .. }
            | CoreError::SessionClosed { tab_id } => Some(tab_id),
            CoreError::NoProgressTimeout { transfer_id: _, .. } => None,
            _ => None,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            CoreError::Auth { key, .. } | CoreError::Network { key, .. } => key.as_deref(),
            _ => None,
        }
    }

    /// String-literal classification, shared by the SFTP session manager's
    /// session-recovery check and the transfer engine's retry classifier
    /// (see DESIGN.md for why these two call sites share one pattern list
    /// instead of each keeping their own).
    pub fn message_indicates_dead_session(message: &str) -> bool {
        const PATTERNS: &[&str] = &[
            "connection reset",
            "econnreset",
            "eof",
            "channel closed",
            "sftp stream closed",
            "not connected",
            "no response from server",
            "connection timed out",
            "disconnected",
            "connection lost",
            "reset",
            "timeout",
            "timed out",
            "socket hang up",
            "epipe",
            "operation has been aborted",
            "no_progress_timeout",
        ];
        let lowered = message.to_lowercase();
        PATTERNS.iter().any(|p| lowered.contains(p))
    }

    /// True if the classified error is worth retrying. Distinct from
    /// [`Self::message_indicates_dead_session`] only in name — both consult
    /// the same merged pattern list, but are kept as separate call sites so
    /// each component's intent reads clearly at the call site.
    pub fn message_is_retryable(message: &str) -> bool {
        Self::message_indicates_dead_session(message)
    }
}

/// Lightweight display helper used by several `Display`/`log` call sites
/// that need "tab=<id> key=<key>" style context without constructing a full
/// [`CoreError`].
pub struct ErrorContext<'a> {
    pub tab_id: Option<&'a str>,
    pub key: Option<&'a str>,
}

impl fmt::Display for ErrorContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.tab_id, self.key) {
            (Some(t), Some(k)) => write!(f, "tab={t} key={k}"),
            (Some(t), None) => write!(f, "tab={t}"),
            (None, Some(k)) => write!(f, "key={k}"),
            (None, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_patterns_cover_common_failures() {
        for p in [
            "timeout", "timed out", "disconnected", "reset", "ECONNRESET", "EOF",
            "socket hang up", "EPIPE", "no_progress_timeout", "channel closed",
            "sftp stream closed", "connection lost", "operation has been aborted",
        ] {
            assert!(
                CoreError::message_is_retryable(p),
                "expected '{p}' to be retryable"
            );
        }
    }

    #[test]
    fn unrelated_message_is_not_retryable() {
        assert!(!CoreError::message_is_retryable("permission denied"));
    }
}
