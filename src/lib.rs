//! pranimitra - Live voice assistant for farmers
//!
//! Streams a call to a hosted conversational model, plays the spoken answer
//! back gaplessly, records both sides into one file, and reconciles the
//! streamed transcription into an ordered transcript.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod call;
pub mod chat;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod questions;
pub mod recording;
pub mod summary;
pub mod transport;

// Core traits (source → stream → play)
pub use audio::AudioDevices;
pub use audio::output::AudioOutput;
pub use audio::source::AudioSource;
pub use questions::QuestionSink;
pub use transport::{LiveSession, Transport};

// Call
pub use call::{CallController, CallHandle, CallOutcome, CallStatus, Transcript};

// Error handling
pub use error::{PraniError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(
                ver.contains('+'),
                "With GIT_HASH set, version should contain '+', got: {}",
                ver
            );
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
