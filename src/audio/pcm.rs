//! PCM codec for the live session wire format.
//!
//! The uplink carries 16-bit little-endian PCM, base64-encoded inside JSON
//! messages. The downlink carries the same encoding at the output rate.

use crate::error::{PraniError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

/// Scale factor between float samples and 16-bit PCM.
const PCM16_SCALE: f32 = 32768.0;

/// Converts float samples to 16-bit little-endian PCM bytes.
///
/// Each sample is multiplied by 32768 and truncated toward zero, then
/// narrowed to 16 bits by two's-complement truncation. There is no
/// clamping: `1.0` becomes `-32768`. Non-finite samples become silence.
pub fn floats_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&float_to_i16_wrapping(sample).to_le_bytes());
    }
    bytes
}

fn float_to_i16_wrapping(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    // f32 -> i64 truncates toward zero; i64 -> i16 keeps the low 16 bits.
    (sample * PCM16_SCALE) as i64 as i16
}

/// Converts 16-bit little-endian PCM to per-channel float samples.
///
/// Interleaved samples are split across channels by index modulo the channel
/// count. A trailing partial frame is ignored.
pub fn pcm16_to_floats(bytes: &[u8], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }

    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let frame_count = samples.len() / channels;

    let mut out = vec![Vec::with_capacity(frame_count); channels];
    for (index, &sample) in samples.iter().take(frame_count * channels).enumerate() {
        out[index % channels].push(f32::from(sample) / PCM16_SCALE);
    }
    out
}

/// Encodes raw bytes as text-safe base64 for embedding in a JSON message.
pub fn encode_transport(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Decodes base64 transport text back into raw bytes.
///
/// # Errors
/// Returns `PraniError::Protocol` if the text is not valid base64.
pub fn decode_transport(text: &str) -> Result<Vec<u8>> {
    B64.decode(text).map_err(|e| PraniError::Protocol {
        message: format!("invalid base64 audio payload: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floats_to_pcm16_scales_and_truncates() {
        let bytes = floats_to_pcm16(&[0.0, 0.5, -0.5, 0.25]);
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(samples, vec![0, 16384, -16384, 8192]);
    }

    #[test]
    fn test_floats_to_pcm16_truncates_toward_zero() {
        // 0.00005 * 32768 = 1.6384 -> 1, and the negative side -> -1
        let bytes = floats_to_pcm16(&[0.00005, -0.00005]);
        assert_eq!(bytes, vec![1, 0, 0xFF, 0xFF]);
    }

    #[test]
    fn test_floats_to_pcm16_wraps_at_positive_full_scale() {
        // 1.0 * 32768 = 32768 does not fit in i16 and wraps to -32768
        let bytes = floats_to_pcm16(&[1.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MIN);
    }

    #[test]
    fn test_floats_to_pcm16_negative_full_scale_is_exact() {
        let bytes = floats_to_pcm16(&[-1.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MIN);
    }

    #[test]
    fn test_floats_to_pcm16_non_finite_is_silence() {
        let bytes = floats_to_pcm16(&[f32::NAN, f32::INFINITY]);
        assert_eq!(bytes, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_floats_to_pcm16_is_little_endian() {
        // 0x0102 = 258 -> 258 / 32768
        let bytes = floats_to_pcm16(&[258.0 / 32768.0]);
        assert_eq!(bytes, vec![0x02, 0x01]);
    }

    #[test]
    fn test_pcm16_to_floats_mono() {
        let bytes = [0x00, 0x40, 0x00, 0xC0]; // 16384, -16384
        let channels = pcm16_to_floats(&bytes, 1);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0], vec![0.5, -0.5]);
    }

    #[test]
    fn test_pcm16_to_floats_splits_interleaved_stereo() {
        let samples: [i16; 4] = [100, -100, 200, -200];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let channels = pcm16_to_floats(&bytes, 2);

        assert_eq!(channels[0], vec![100.0 / 32768.0, 200.0 / 32768.0]);
        assert_eq!(channels[1], vec![-100.0 / 32768.0, -200.0 / 32768.0]);
    }

    #[test]
    fn test_pcm16_to_floats_zero_channels_is_empty() {
        assert!(pcm16_to_floats(&[0, 0], 0).is_empty());
    }

    #[test]
    fn test_pcm_roundtrip_within_one_quantization_unit() {
        let original: Vec<i16> = vec![i16::MIN, -12345, -1, 0, 1, 12345, i16::MAX];
        let bytes: Vec<u8> = original.iter().flat_map(|s| s.to_le_bytes()).collect();

        let floats = pcm16_to_floats(&bytes, 1);
        let back = floats_to_pcm16(&floats[0]);

        for (a, b) in bytes.chunks_exact(2).zip(back.chunks_exact(2)) {
            let a = i16::from_le_bytes([a[0], a[1]]) as i32;
            let b = i16::from_le_bytes([b[0], b[1]]) as i32;
            assert!((a - b).abs() <= 1, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_transport_roundtrip_for_lengths_not_divisible_by_three() {
        for len in 0..10usize {
            let bytes: Vec<u8> = (0..len).map(|i| (i * 37 % 256) as u8).collect();
            let text = encode_transport(&bytes);
            assert_eq!(decode_transport(&text).unwrap(), bytes, "len {}", len);
        }
    }

    #[test]
    fn test_transport_roundtrip_all_byte_values() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        let text = encode_transport(&bytes);
        assert!(text.is_ascii());
        assert_eq!(decode_transport(&text).unwrap(), bytes);
    }

    #[test]
    fn test_encode_transport_empty_is_empty_string() {
        assert_eq!(encode_transport(&[]), "");
        assert!(decode_transport("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_transport_rejects_invalid_text() {
        match decode_transport("not base64!!") {
            Err(PraniError::Protocol { message }) => {
                assert!(message.contains("invalid base64"));
            }
            other => panic!("Expected Protocol error, got {:?}", other),
        }
    }
}
