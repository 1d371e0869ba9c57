//! Data model shared by every component — connection entries, derived
//! keys, and the tuning constants used throughout the pool, registry,
//! transfer engine, and latency probe.

use serde::{Deserialize, Serialize};

pub type TabId = String;

/// One persisted connection record. Groups are represented by
/// [`ConnectionKind::Group`] with children addressed via `parent_group`
/// back-references held by the config store, not nested inline — this
/// keeps the type flat and directly serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub id: String,
    pub display_name: String,
    pub kind: ConnectionKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    #[serde(default)]
    pub passphrase: Option<EncryptedSecret>,
    #[serde(default)]
    pub proxy_policy: ProxyPolicy,
    #[serde(default)]
    pub parent_group: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Ssh,
    Telnet,
    Group,
}

/// Secret fields are encrypted at rest by the config store's own cipher;
/// the core always holds plaintext once loaded, so these two variants
/// model the two serialized-at-rest shapes the JSON document can contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Credential {
    Password { secret: EncryptedSecret },
    PrivateKey { path: String },
}

/// An encrypted-at-rest value as it appears in the JSON document; opaque to
/// every component except `tabmux-config`'s crypto module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSecret(pub String);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProxyPolicy {
    #[default]
    None,
    UseDefault,
    Explicit {
        kind: ProxyKind,
        host: String,
        port: u16,
        #[serde(default)]
        auth: Option<ProxyAuth>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks5,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Derives a `ConnectionKey`: tab-bound keys embed the tab id
/// because interactive shells cannot be safely multiplexed onto one
/// transport by every server; username-bound keys are used for pooled
/// SFTP-only or transfer-only access.
pub fn connection_key(entry: &ConnectionEntry, tab_id: Option<&str>) -> String {
    let proto = match entry.kind {
        ConnectionKind::Ssh => "ssh",
        ConnectionKind::Telnet => "telnet",
        ConnectionKind::Group => "group",
    };
    match tab_id {
        Some(tab) => format!("{proto}:{}:{}:{}", entry.host, entry.port, tab),
        None => format!("{proto}:{}:{}:{}", entry.host, entry.port, entry.username),
    }
}

/// Runtime tuning constants, collected in one place so every component
/// references the same numbers rather than re-declaring magic literals.
pub mod constants {
    use std::time::Duration;

    pub const MAX_TOTAL_CONNECTIONS: usize = 50;
    pub const IDLE_TIMEOUT_TELNET: Duration = Duration::from_secs(30 * 60);
    pub const IDLE_TIMEOUT_SSH_SFTP: Duration = Duration::from_secs(10 * 60);
    pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(90);

    /// Dial + handshake ceiling for `acquire()` — see DESIGN.md's Open
    /// Question resolution on the source's 48 h `SESSION_CREATION_TIMEOUT`.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    pub const MAX_TOTAL_SFTP_SESSIONS: usize = 50;
    pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
    pub const SFTP_HEALTH_CHECK_RACE: Duration = Duration::from_secs(5);
    pub const DIRECTORY_LISTING_TIMEOUT: Duration = Duration::from_secs(30);

    pub const BASE_OPERATION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
    pub const MAX_OPERATION_ATTEMPTS: u32 = 3;
    pub const PROGRESS_INTERVAL_MS: u64 = 100;
    pub const SPEED_SMOOTHING_FACTOR: f64 = 0.3;
    pub const NO_PROGRESS_TIMEOUT_SMALL: Duration = Duration::from_secs(30);
    pub const NO_PROGRESS_TIMEOUT_LARGE: Duration = Duration::from_secs(60);
    pub const NO_PROGRESS_SIZE_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

    pub const CHUNK_SMALL: usize = 256 * 1024;
    pub const CHUNK_MEDIUM: usize = 1024 * 1024;
    pub const CHUNK_LARGE: usize = 2 * 1024 * 1024;
    pub const CHUNK_SMALL_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;
    pub const CHUNK_MEDIUM_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

    pub const CONCURRENCY_MANY_SMALL: usize = 12;
    pub const CONCURRENCY_MEDIUM: usize = 4;
    pub const CONCURRENCY_LARGE: usize = 2;
    pub const CONCURRENCY_DEFAULT: usize = 4;

    pub const LATENCY_PROBE_INTERVAL: Duration = Duration::from_secs(60);
    pub const LATENCY_OVERALL_TIMEOUT: Duration = Duration::from_secs(5);
    pub const LATENCY_BANNER_FALLBACK_WINDOW: Duration = Duration::from_millis(300);
    pub const LATENCY_RING_BUFFER_LEN: usize = 10;

    pub const RETRY_BACKOFF_BASE_MS: u64 = 1000;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: ConnectionKind) -> ConnectionEntry {
        ConnectionEntry {
            id: "e1".into(),
            display_name: "box".into(),
            kind,
            host: "10.0.0.5".into(),
            port: 22,
            username: "alice".into(),
            credential: Credential::PrivateKey { path: "~/.ssh/id_ed25519".into() },
            passphrase: None,
            proxy_policy: ProxyPolicy::None,
            parent_group: None,
        }
    }

    #[test]
    fn tab_bound_key_includes_tab_id() {
        let e = entry(ConnectionKind::Ssh);
        let k1 = connection_key(&e, Some("T1"));
        let k2 = connection_key(&e, Some("T2"));
        assert_ne!(k1, k2);
        assert_eq!(k1, "ssh:10.0.0.5:22:T1");
    }

    #[test]
    fn untagged_key_uses_username() {
        let e = entry(ConnectionKind::Telnet);
        assert_eq!(connection_key(&e, None), "telnet:10.0.0.5:22:alice");
    }
}
