//! Connection/settings store: at-rest credential encryption, command
//! history compression, and the persisted JSON document.

pub mod crypto;
pub mod history;
pub mod store;

pub use crypto::{CryptoError};
pub use history::HistoryError;
pub use store::{ConfigError, ConfigStore, ConfigStoreState, PersistedDocument, UiSettings, UsageTracker};
