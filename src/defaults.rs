//! Default configuration constants for pranimitra.
//!
//! Shared by the config types, the audio pipeline and the transport so the
//! wire format and the audio contexts always agree.

/// Microphone capture sample rate in Hz.
///
/// The live model expects 16kHz mono PCM on the uplink.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of the audio the live model streams back, in Hz.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Channel count of the streamed response audio.
pub const OUTPUT_CHANNELS: u16 = 1;

/// Samples per capture tick (~256ms at 16kHz).
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// Capacity of the ordered queue between capture and transport, in frames.
///
/// 32 frames is roughly 8 seconds of audio before the capture thread blocks.
pub const CAPTURE_QUEUE_FRAMES: usize = 32;

/// MIME descriptor attached to every outbound PCM chunk.
pub const UPLINK_MIME: &str = "audio/pcm;rate=16000";

/// Number of automatic reconnect attempts before the call fails.
pub const RETRY_BUDGET: u32 = 1;

/// Fixed backoff before an automatic reconnect, in milliseconds.
pub const RETRY_BACKOFF_MS: u64 = 1000;

/// Deadline for the WebSocket handshake and for the server's setup
/// acknowledgement, in milliseconds. Expiry counts as a connection error.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Live session endpoint.
pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used for live calls.
pub const LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice for assistant speech.
pub const VOICE_NAME: &str = "Zephyr";

/// Language the assistant answers in when none is configured.
pub const DEFAULT_LANGUAGE: &str = "English";

/// Phrase the assistant must say when the caller says goodbye.
pub const CLOSING_MESSAGE: &str = "Thank you for calling Prani Mitra";

/// Base URL of the request/response model API.
pub const SUMMARY_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Text model used for call summaries.
pub const SUMMARY_MODEL: &str = "gemini-2.5-flash";

/// File name offered for the recording download.
/// Text model for the typed chat mode.
pub const CHAT_MODEL: &str = "gemini-2.5-flash";

pub const RECORDING_FILE_NAME: &str = "prani-mitra-recording.wav";

/// How far behind the output clock the recorder may collect mixed audio.
///
/// Microphone frames arrive one tick after they were spoken, so regions
/// younger than this are still open for writes.
pub const RECORDER_FLUSH_LAG_SECS: f64 = 1.0;

/// Interval of the controller housekeeping tick (ended buffers, recorder flush).
pub const HOUSEKEEPING_INTERVAL_MS: u64 = 50;

/// Environment variable holding the model API key.
pub const API_KEY_ENV: &str = "PRANI_API_KEY";
