//! `commandHistory` section: either a plain JSON array, or a
//! `{compressed: true, data, originalSize, compressedSize, timestamp}`
//! envelope where `data` is base64 gzip of the JSON array. The loader
//! accepts both; the store migrates plain arrays to the compressed form on
//! the next save.

use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("invalid command history shape: {0}")]
    InvalidShape(String),
    #[error("gzip error: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedHistory {
    pub compressed: bool,
    pub data: String,
    pub original_size: usize,
    pub compressed_size: usize,
    pub timestamp: i64,
}

/// Parse either representation into the plain in-memory vector of command
/// strings.
pub fn load(value: &serde_json::Value) -> Result<Vec<String>, HistoryError> {
    if value.is_array() {
        return Ok(serde_json::from_value(value.clone())?);
    }

    if value.is_object() {
        let envelope: CompressedHistory = serde_json::from_value(value.clone())?;
        if !envelope.compressed {
            return Err(HistoryError::InvalidShape(
                "object form must have compressed=true".into(),
            ));
        }
        let gz_bytes = base64::engine::general_purpose::STANDARD.decode(&envelope.data)?;
        let mut decoder = GzDecoder::new(gz_bytes.as_slice());
        let mut json_bytes = Vec::new();
        decoder.read_to_end(&mut json_bytes)?;
        let commands: Vec<String> = serde_json::from_slice(&json_bytes)?;
        return Ok(commands);
    }

    Err(HistoryError::InvalidShape(
        "expected a JSON array or a compressed-history object".into(),
    ))
}

/// Always save in the compressed envelope form, migrating any plain-array
/// history forward to the compressed shape on write.
pub fn save(commands: &[String], timestamp: i64) -> Result<serde_json::Value, HistoryError> {
    let json_bytes = serde_json::to_vec(commands)?;
    let original_size = json_bytes.len();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json_bytes)?;
    let gz_bytes = encoder.finish()?;
    let compressed_size = gz_bytes.len();

    let envelope = CompressedHistory {
        compressed: true,
        data: base64::engine::general_purpose::STANDARD.encode(gz_bytes),
        original_size,
        compressed_size,
        timestamp,
    };
    Ok(serde_json::to_value(envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_array_loads_directly() {
        let v = serde_json::json!(["ls -la", "cd /tmp"]);
        let loaded = load(&v).unwrap();
        assert_eq!(loaded, vec!["ls -la".to_string(), "cd /tmp".to_string()]);
    }

    #[test]
    fn compressed_round_trips_and_migrates() {
        let commands = vec!["uptime".to_string(), "whoami".to_string()];
        let saved = save(&commands, 1_700_000_000).unwrap();
        assert_eq!(saved["compressed"], serde_json::json!(true));

        let loaded = load(&saved).unwrap();
        assert_eq!(loaded, commands);
    }

    #[test]
    fn plain_array_loads_identically_after_migration_round_trip() {
        let plain = serde_json::json!(["a", "b", "c"]);
        let loaded_plain = load(&plain).unwrap();

        let migrated = save(&loaded_plain, 0).unwrap();
        let loaded_migrated = load(&migrated).unwrap();

        assert_eq!(loaded_plain, loaded_migrated);
    }

    #[test]
    fn malformed_object_is_rejected() {
        let bad = serde_json::json!({"compressed": false, "data": "", "originalSize": 0, "compressedSize": 0, "timestamp": 0});
        assert!(load(&bad).is_err());
    }
}
