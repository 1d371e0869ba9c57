//! Shared types, error taxonomy, and diagnostics infrastructure for the
//! remote session and file-transfer core.

pub mod diagnostics;
pub mod error;
pub mod model;

pub use error::CoreError;
pub use model::{connection_key, ConnectionEntry, ConnectionKind, TabId};
