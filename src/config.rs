use crate::call::CallOptions;
use crate::call::instruction::Service;
use crate::call::state::RetryPolicy;
use crate::defaults;
use crate::error::{PraniError, Result};
use crate::transport::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub session: SessionSettings,
    pub retry: RetryConfig,
    pub recording: RecordingConfig,
    pub questions: QuestionsConfig,
    pub summary: SummaryConfig,
    pub chat: ChatConfig,
}

/// Audio capture and playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_samples: usize,
    pub queue_frames: usize,
}

/// Live session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub language: String,
    pub service: Service,
    pub api_key: Option<String>,
    pub knowledge_base: Option<PathBuf>,
    pub closing_message: String,
}

/// Automatic reconnect configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub budget: u32,
    pub backoff_ms: u64,
    /// Handshake and setup deadline; expiry is retried like any connect error.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RecordingConfig {
    /// Where the call recording is saved. Defaults to the current directory.
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuestionsConfig {
    pub enabled: bool,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
}

/// Typed chat mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            frame_samples: defaults::CAPTURE_FRAME_SAMPLES,
            queue_frames: defaults::CAPTURE_QUEUE_FRAMES,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            endpoint: defaults::LIVE_ENDPOINT.to_string(),
            model: defaults::LIVE_MODEL.to_string(),
            voice: defaults::VOICE_NAME.to_string(),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            service: Service::default(),
            api_key: None,
            knowledge_base: None,
            closing_message: defaults::CLOSING_MESSAGE.to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: defaults::RETRY_BUDGET,
            backoff_ms: defaults::RETRY_BACKOFF_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
        }
    }
}

impl Default for QuestionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: None,
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: defaults::SUMMARY_BASE_URL.to_string(),
            model: defaults::SUMMARY_MODEL.to_string(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::SUMMARY_BASE_URL.to_string(),
            model: defaults::CHAT_MODEL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    ///
    /// # Errors
    /// Returns `ConfigFileNotFound` for a missing file and `ConfigParse` for
    /// invalid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PraniError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                PraniError::Io(e)
            }
        })?;
        toml::from_str(&contents).map_err(|e| PraniError::ConfigParse {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// # Errors
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(PraniError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PRANI_API_KEY → session.api_key
    /// - PRANI_LANGUAGE → session.language
    /// - PRANI_SERVICE → session.service (ignored if unknown)
    /// - PRANI_MODEL → session.model
    /// - PRANI_AUDIO_DEVICE → audio.device
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = non_empty_env(defaults::API_KEY_ENV) {
            self.session.api_key = Some(key);
        }

        if let Some(language) = non_empty_env("PRANI_LANGUAGE") {
            self.session.language = language;
        }

        if let Some(service) = non_empty_env("PRANI_SERVICE") {
            match service.parse() {
                Ok(service) => self.session.service = service,
                Err(e) => tracing::warn!(error = %e, "Ignoring PRANI_SERVICE"),
            }
        }

        if let Some(model) = non_empty_env("PRANI_MODEL") {
            self.session.model = model;
        }

        if let Some(device) = non_empty_env("PRANI_AUDIO_DEVICE") {
            self.audio.device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/pranimitra/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pranimitra").join("config.toml"))
    }

    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    /// Returns `ConfigInvalidValue` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("audio.input_sample_rate", self.audio.input_sample_rate as usize),
            ("audio.output_sample_rate", self.audio.output_sample_rate as usize),
            ("audio.frame_samples", self.audio.frame_samples),
            ("audio.queue_frames", self.audio.queue_frames),
            ("retry.connect_timeout_ms", self.retry.connect_timeout_ms as usize),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(invalid(key, "must be greater than zero"));
            }
        }
        if self.session.model.trim().is_empty() {
            return Err(invalid("session.model", "must not be empty"));
        }
        if self.session.endpoint.trim().is_empty() {
            return Err(invalid("session.endpoint", "must not be empty"));
        }
        if self.session.language.trim().is_empty() {
            return Err(invalid("session.language", "must not be empty"));
        }
        Ok(())
    }

    /// API key from the config, or `ConfigInvalidValue` if none is set.
    pub fn api_key(&self) -> Result<&str> {
        self.session
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                invalid(
                    "session.api_key",
                    &format!("not set; export {} or add it to the config", defaults::API_KEY_ENV),
                )
            })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            budget: self.retry.budget,
            backoff: Duration::from_millis(self.retry.backoff_ms),
        }
    }

    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            frame_samples: self.audio.frame_samples,
            queue_frames: self.audio.queue_frames,
            output_rate: self.audio.output_sample_rate,
            retry: self.retry_policy(),
            ..CallOptions::default()
        }
    }

    /// Live session parameters with `system_instruction` filled in.
    pub fn session_config(&self, api_key: &str, system_instruction: String) -> SessionConfig {
        SessionConfig {
            endpoint: self.session.endpoint.clone(),
            model: self.session.model.clone(),
            voice: self.session.voice.clone(),
            api_key: api_key.to_string(),
            system_instruction,
            connect_timeout: Duration::from_millis(self.retry.connect_timeout_ms),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn invalid(key: &str, message: &str) -> PraniError {
    PraniError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
