//! SMS-style call summary produced by a text model after the call.

use crate::call::turn::{Speaker, Transcript};
use serde::{Deserialize, Serialize};

pub const EMPTY_TRANSCRIPT_SUMMARY: &str = "No conversation was recorded.";
pub const FALLBACK_SUMMARY: &str = "Could not generate a summary at this time.";

/// Render the transcript as `Farmer:` / `Assistant:` lines.
pub fn format_conversation(transcript: &Transcript) -> String {
    transcript
        .entries()
        .iter()
        .map(|entry| {
            let label = match entry.speaker {
                Speaker::User => "Farmer",
                Speaker::Assistant => "Assistant",
            };
            format!("{}: {}", label, entry.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt asking for a short summary in the caller's language.
pub fn build_summary_prompt(transcript: &Transcript, language: &str) -> String {
    format!(
        "Based on the following conversation with a farmer, please provide a concise summary \
         of the key points and advice given. The summary must be written in {language}. Format \
         it as a simple, easy-to-read text message that could be sent via SMS.\n\n\
         Conversation:\n{conversation}\n\nSummary:",
        language = language,
        conversation = format_conversation(transcript),
    )
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Text of the first candidate, if the body carries one.
pub fn extract_text(body: &str) -> Option<String> {
    let response: GenerateResponse = serde_json::from_str(body).ok()?;
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(feature = "summary")]
pub use client::SummaryClient;

#[cfg(feature = "summary")]
mod client {
    use super::*;
    use crate::defaults;
    use crate::error::{PraniError, Result};

    /// `generateContent` client for post-call summaries.
    #[derive(Debug, Clone)]
    pub struct SummaryClient {
        http: reqwest::Client,
        base_url: String,
        model: String,
        api_key: String,
    }

    impl SummaryClient {
        pub fn new(api_key: impl Into<String>) -> Self {
            Self {
                http: reqwest::Client::new(),
                base_url: defaults::SUMMARY_BASE_URL.to_string(),
                model: defaults::SUMMARY_MODEL.to_string(),
                api_key: api_key.into(),
            }
        }

        pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
            self.base_url = base_url.into();
            self
        }

        pub fn with_model(mut self, model: impl Into<String>) -> Self {
            self.model = model.into();
            self
        }

        fn url(&self) -> String {
            format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url.trim_end_matches('/'),
                self.model,
                self.api_key
            )
        }

        /// Summarize `transcript` in `language`.
        ///
        /// An empty transcript short-circuits without a request. A response
        /// without text yields the fallback summary.
        ///
        /// # Errors
        /// Returns `PraniError::Summary` on network failure or a non-success
        /// status.
        pub async fn summarize(&self, transcript: &Transcript, language: &str) -> Result<String> {
            if transcript.is_empty() {
                return Ok(EMPTY_TRANSCRIPT_SUMMARY.to_string());
            }

            let prompt = build_summary_prompt(transcript, language);
            let request = GenerateRequest {
                contents: vec![RequestContent {
                    parts: vec![RequestPart { text: &prompt }],
                }],
            };

            tracing::debug!(model = %self.model, entries = transcript.len(), "Requesting summary");
            let response = self
                .http
                .post(self.url())
                .json(&request)
                .send()
                .await
                .map_err(|e| PraniError::Summary {
                    message: format!("request failed: {e}"),
                })?;

            if !response.status().is_success() {
                return Err(PraniError::Summary {
                    message: format!("API returned status {}", response.status()),
                });
            }

            let body = response.text().await.map_err(|e| PraniError::Summary {
                message: format!("failed to read response: {e}"),
            })?;

            Ok(extract_text(&body).unwrap_or_else(|| {
                tracing::warn!("Summary response carried no text");
                FALLBACK_SUMMARY.to_string()
            }))
        }
    }

}
