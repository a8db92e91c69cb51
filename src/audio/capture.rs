//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::source::AudioSource;
use crate::defaults;
use crate::error::{PraniError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL tries every backend it knows and ALSA/JACK complain loudly about
/// the ones that are missing.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet the JACK/ALSA/PipeWire chatter triggered by backend probing.
///
/// # Safety
/// Modifies environment variables. Must be called at startup before the
/// runtime spawns any threads.
pub fn suppress_audio_warnings() {
    // SAFETY: called from main before the tokio runtime is built
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for a voice call.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

pub(crate) fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

pub(crate) fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Map a device-open failure to the error the call state machine understands.
///
/// Access refusals become `PermissionDenied` so the call ends in the
/// permission-denied state instead of failing generically.
pub(crate) fn classify_open_error(message: String) -> PraniError {
    let lower = message.to_lowercase();
    if lower.contains("permission")
        || lower.contains("denied")
        || lower.contains("not allowed")
        || lower.contains("eacces")
    {
        PraniError::PermissionDenied { message }
    } else {
        PraniError::AudioCapture { message }
    }
}

/// List usable input devices, marking preferred ones with "\[recommended\]".
///
/// # Errors
/// Returns `PraniError::AudioCapture` if device enumeration fails.
pub fn list_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices());
    let devices = devices.map_err(|e| PraniError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                device_names.push(format!("{} [recommended]", name));
            } else {
                device_names.push(name);
            }
        }
    }

    Ok(device_names)
}

/// Best default input device, preferring PipeWire and then PulseAudio.
fn get_best_default_device() -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| PraniError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the Mutex in the owning
/// struct and never from the audio callback.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone source delivering 16kHz mono float samples.
///
/// Tries f32/16kHz/mono first, then falls back to the device's native config
/// with software channel mixing and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Open an input device by exact name, or the best default when `None`.
    ///
    /// # Errors
    /// Returns `PraniError::AudioDeviceNotFound` if the named device does not exist.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = with_suppressed_stderr(|| {
            let host = cpal::default_host();

            if let Some(name) = device_name {
                let devices = host
                    .input_devices()
                    .map_err(|e| PraniError::AudioCapture {
                        message: format!("Failed to enumerate devices: {}", e),
                    })?;

                let mut found_device = None;
                for dev in devices {
                    if let Ok(dev_name) = dev.name()
                        && dev_name == name
                    {
                        found_device = Some(dev);
                        break;
                    }
                }

                found_device.ok_or_else(|| PraniError::AudioDeviceNotFound {
                    device: name.to_string(),
                })
            } else {
                get_best_default_device()
            }
        })?;

        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate: defaults::INPUT_SAMPLE_RATE,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        match self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| tracing::warn!(error = %err, "Audio input stream error"),
            None,
        ) {
            Ok(stream) => Ok(stream),
            Err(cpal::BuildStreamError::DeviceNotAvailable) => Err(PraniError::PermissionDenied {
                message: "input device not available".to_string(),
            }),
            Err(e) => {
                tracing::debug!(error = %e, "Preferred input config rejected, trying native");
                self.build_stream_native()
            }
        }
    }

    /// Build a stream at the device's native config with software
    /// conversion to 16kHz mono.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config = self
            .device
            .default_input_config()
            .map_err(|e| classify_open_error(format!("Failed to query input config: {}", e)))?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "Using native input format, converting in software"
        );

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        let err_callback = |err| tracing::warn!(error = %err, "Audio input stream error");

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let converted = to_mono_at_rate(data, native_channels, native_rate, target_rate);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                },
                err_callback,
                None,
            ),
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let floats: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                    let converted =
                        to_mono_at_rate(&floats, native_channels, native_rate, target_rate);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(PraniError::AudioCapture {
                    message: format!(
                        "Unsupported native sample format: {:?}. \
                         Try specifying a device with --device.",
                        fmt
                    ),
                });
            }
        };

        stream.map_err(|e| classify_open_error(format!("Failed to build input stream: {}", e)))
    }
}

/// Mix interleaved audio to mono and resample to `target_rate`.
pub(crate) fn to_mono_at_rate(
    samples: &[f32],
    channels: usize,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let mono: Vec<f32> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    crate::audio::wav::resample(&mono, source_rate, target_rate)
}

impl AudioSource for CpalAudioSource {
    fn request_permission(&mut self) -> Result<()> {
        // Desktop hosts have no prompt. Opening the config is the earliest
        // point where an access refusal surfaces.
        self.device
            .default_input_config()
            .map(|_| ())
            .map_err(|e| classify_open_error(format!("Microphone unavailable: {}", e)))
    }

    fn start(&mut self) -> Result<()> {
        {
            let stream_guard = self.stream.lock().map_err(|e| PraniError::AudioCapture {
                message: format!("Failed to lock stream: {}", e),
            })?;
            if stream_guard.is_some() {
                return Ok(());
            }
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| PraniError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never fire the callback.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            tracing::debug!("No input callbacks after 200ms, rebuilding with native config");

            let native_stream = self.build_stream_native()?;
            native_stream.play().map_err(|e| PraniError::AudioCapture {
                message: format!("Failed to start native audio stream: {}", e),
            })?;
            native_stream
        } else {
            stream
        };

        let mut stream_guard = self.stream.lock().map_err(|e| PraniError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;
        *stream_guard = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut stream_guard = self.stream.lock().map_err(|e| PraniError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;

        if let Some(sendable_stream) = stream_guard.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| PraniError::AudioCapture {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        let mut buffer = self.buffer.lock().map_err(|e| PraniError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;

        Ok(std::mem::take(&mut *buffer))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
