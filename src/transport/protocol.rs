//! JSON messages of the live streaming protocol.

use crate::audio::pcm::{decode_transport, encode_transport};
use crate::error::{PraniError, Result};
use crate::pipeline::types::PcmChunk;
use crate::transport::{SessionConfig, SessionEvent};
use serde::{Deserialize, Serialize};

// -- Client messages --

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub input_audio_transcription: Empty,
    pub output_audio_transcription: Empty,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Serializes as `{}` to switch a feature on.
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

// -- Shared --

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

// -- Server messages --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

/// Build the opening `setup` message for a session.
pub fn setup_message(config: &SessionConfig) -> SetupMessage {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    SetupMessage {
        setup: Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(config.system_instruction.clone()),
                    inline_data: None,
                }],
            },
            input_audio_transcription: Empty {},
            output_audio_transcription: Empty {},
        },
    }
}

/// Wrap one PCM chunk as a `realtimeInput` message.
pub fn realtime_input(chunk: &PcmChunk) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: chunk.mime.clone(),
                data: encode_transport(&chunk.data),
            }],
        },
    }
}

/// Parse one server frame into session events.
///
/// Within a message transcription fragments come first, then the turn
/// boundary, then audio. Audio parts with invalid base64 are dropped.
///
/// # Errors
/// Returns `PraniError::Protocol` if the frame is not a server message.
pub fn parse_server_message(text: &str) -> Result<Vec<SessionEvent>> {
    let message: ServerMessage = serde_json::from_str(text).map_err(|e| PraniError::Protocol {
        message: format!("unreadable server message: {}", e),
    })?;

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(SessionEvent::Opened);
    }

    if message.go_away.is_some() {
        tracing::info!("Server announced session shutdown");
    }

    if let Some(content) = message.server_content {
        if let Some(text) = content.input_transcription.and_then(|t| t.text)
            && !text.is_empty()
        {
            events.push(SessionEvent::PartialUser(text));
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text)
            && !text.is_empty()
        {
            events.push(SessionEvent::PartialAssistant(text));
        }
        if content.interrupted {
            tracing::debug!("Assistant turn interrupted by caller");
        }
        if content.turn_complete {
            events.push(SessionEvent::TurnComplete);
        }

        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for blob in parts.into_iter().filter_map(|part| part.inline_data) {
            match decode_transport(&blob.data) {
                Ok(bytes) => events.push(SessionEvent::AudioChunk(bytes)),
                Err(e) => tracing::warn!(error = %e, "Dropping undecodable audio part"),
            }
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> SessionConfig {
        SessionConfig::new("key", "Be helpful.")
    }

    #[test]
    fn test_setup_message_shape() {
        let value = serde_json::to_value(setup_message(&config())).unwrap();

        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-2.5-flash-native-audio-preview-09-2025",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Zephyr"}}
                        }
                    },
                    "systemInstruction": {"parts": [{"text": "Be helpful."}]},
                    "inputAudioTranscription": {},
                    "outputAudioTranscription": {}
                }
            })
        );
    }

    #[test]
    fn test_setup_message_keeps_prefixed_model() {
        let mut config = config();
        config.model = "models/custom".to_string();
        assert_eq!(setup_message(&config).setup.model, "models/custom");
    }

    #[test]
    fn test_realtime_input_shape() {
        let chunk = PcmChunk {
            data: vec![0, 1, 2],
            mime: "audio/pcm;rate=16000".to_string(),
            sequence: 3,
        };
        let value = serde_json::to_value(realtime_input(&chunk)).unwrap();

        assert_eq!(
            value,
            json!({
                "realtimeInput": {
                    "mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAEC"}]
                }
            })
        );
    }

    #[test]
    fn test_parse_setup_complete() {
        let events = parse_server_message(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(events, vec![SessionEvent::Opened]);
    }

    #[test]
    fn test_parse_transcriptions_and_turn_complete() {
        let text = json!({
            "serverContent": {
                "inputTranscription": {"text": "how do I"},
                "outputTranscription": {"text": "You can"},
                "turnComplete": true
            }
        })
        .to_string();

        assert_eq!(
            parse_server_message(&text).unwrap(),
            vec![
                SessionEvent::PartialUser("how do I".to_string()),
                SessionEvent::PartialAssistant("You can".to_string()),
                SessionEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_parse_every_inline_audio_part() {
        let text = json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAE="}},
                    {"text": "ignored"},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AgM="}}
                ]}
            }
        })
        .to_string();

        assert_eq!(
            parse_server_message(&text).unwrap(),
            vec![
                SessionEvent::AudioChunk(vec![0, 1]),
                SessionEvent::AudioChunk(vec![2, 3]),
            ]
        );
    }

    #[test]
    fn test_parse_drops_invalid_audio_part() {
        let text = json!({
            "serverContent": {"modelTurn": {"parts": [{"inlineData": {"data": "@@@"}}]}}
        })
        .to_string();
        assert!(parse_server_message(&text).unwrap().is_empty());
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let events = parse_server_message(r#"{"usageMetadata":{"totalTokenCount":5}}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_server_message("not json"),
            Err(PraniError::Protocol { .. })
        ));
    }

    #[test]
    fn test_parse_empty_transcription_is_skipped() {
        let text = r#"{"serverContent":{"inputTranscription":{}}}"#;
        let events = parse_server_message(text).unwrap();
        assert!(events.is_empty());
    }
}
