//! Process-wide logging/diagnostics bootstrap.
//!
//! A single `init()` call wires a `tracing-subscriber` fmt layer gated by
//! `RUST_LOG`/`TABMUX_LOG`, and `log` macros used throughout the rest of
//! the workspace route through it via the `log` crate's global logger.

use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber. Safe to call multiple times
/// (e.g. once per test binary) — only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("TABMUX_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .ok();
    });
}

/// A small struct for components to report health at a glance, surfaced by
/// `pool.stats` and similar diagnostics-style events.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
