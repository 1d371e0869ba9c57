//! Process/Tab Registry: owns every live interactive shell channel, the
//! editor-mode/command-extraction heuristics that ride along its output,
//! and sync groups for broadcast input.

pub mod extractor;
pub mod groups;
pub mod registry;

pub use extractor::{CommandExtractor, HeuristicExtractor};
pub use groups::{GroupRegistry, SyncGroupInfo};
pub use registry::{TabConnectionInfo, TabKind, TabRegistry};
