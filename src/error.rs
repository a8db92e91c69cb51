//! Error types for pranimitra.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PraniError {
    // Call lifecycle errors
    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Session close failed: {message}")]
    SessionClose { message: String },

    #[error("Live protocol error: {message}")]
    Protocol { message: String },

    // Audio errors
    #[error("Malformed audio: {len} bytes is not a multiple of the {stride}-byte frame stride")]
    MalformedAudio { len: usize, stride: usize },

    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    #[error("Recording failed: {message}")]
    Recording { message: String },

    // Collaborator errors
    #[error("Question log error: {message}")]
    QuestionLog { message: String },

    #[error("Summary request failed: {message}")]
    Summary { message: String },

    #[error("Chat request failed: {message}")]
    Chat { message: String },

    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl PraniError {
    /// Connection-class failures are the only ones the retry policy absorbs.
    pub fn is_connection(&self) -> bool {
        matches!(self, PraniError::Connection { .. })
    }
}

pub type Result<T> = std::result::Result<T, PraniError>;
