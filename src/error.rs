//! Error types for faults that are not ordinary user-facing outcomes.
//!
//! Load results, "nothing to pause" and out-of-range removals are plain
//! return values; only these go through `Result`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JukeboxError {
    /// Joining or leaving a voice channel failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// A chat message could not be turned into a command
    #[error("Command error: {0}")]
    Command(String),

    /// Settings failed validation
    #[error("Configuration error: {0}")]
    Config(String),
}
