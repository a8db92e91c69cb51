//! Typed chat with the text model, sharing the call's instruction and
//! question log.

use crate::call::instruction::{Service, greeting};
use crate::error::{PraniError, Result};
use crate::questions::QuestionSink;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Shown in place of an answer when the model request fails.
pub const ERROR_REPLY: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            text: text.into(),
        }
    }
}

/// Opening line in the chosen language; unknown languages get English.
pub fn welcome_message(language: &str, service: Service) -> String {
    let name = service.display_name();
    match language {
        "Hindi" => format!(
            "नमस्ते! मैं {name} के लिए आपका प्राणी मित्र सहायक हूँ। आज मैं आपकी कैसे मदद कर सकता हूँ?"
        ),
        "Telugu" => format!(
            "నమస్కారం! నేను {name} కోసం మీ ప్రాణి మిత్ర సహాయకుడిని. ఈ రోజు నేను మీకు ఎలా సహాయపడగలను?"
        ),
        _ => greeting(service),
    }
}

/// `generateContent` body: the whole history plus the system instruction.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest<'a> {
    pub contents: Vec<ChatContent<'a>>,
    pub system_instruction: SystemInstruction<'a>,
}

#[derive(Debug, Serialize)]
pub struct ChatContent<'a> {
    pub role: ChatRole,
    pub parts: Vec<ChatPart<'a>>,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction<'a> {
    pub parts: Vec<ChatPart<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ChatPart<'a> {
    pub text: &'a str,
}

pub fn build_request<'a>(system_instruction: &'a str, history: &'a [ChatMessage]) -> ChatRequest<'a> {
    ChatRequest {
        contents: history
            .iter()
            .map(|message| ChatContent {
                role: message.role,
                parts: vec![ChatPart {
                    text: &message.text,
                }],
            })
            .collect(),
        system_instruction: SystemInstruction {
            parts: vec![ChatPart {
                text: system_instruction,
            }],
        },
    }
}

/// Text model answering one request built from the running history.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// # Errors
    /// Returns `PraniError::Chat` when no answer could be obtained.
    async fn reply(&self, request: &ChatRequest<'_>) -> Result<String>;
}

/// One chat conversation.
///
/// `history` holds only the exchanges the model has answered; the welcome
/// line and error replies are shown but never sent back.
pub struct ChatSession {
    system_instruction: String,
    welcome: String,
    history: Vec<ChatMessage>,
    questions: Option<Box<dyn QuestionSink>>,
}

impl ChatSession {
    pub fn new(system_instruction: impl Into<String>, welcome: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            welcome: welcome.into(),
            history: Vec::new(),
            questions: None,
        }
    }

    /// Log every question sent to `sink`.
    pub fn with_question_sink(mut self, sink: Box<dyn QuestionSink>) -> Self {
        self.questions = Some(sink);
        self
    }

    pub fn welcome(&self) -> &str {
        &self.welcome
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Send one question and return the reply to show.
    ///
    /// Blank input is ignored and returns `None`. A failed request returns
    /// [`ERROR_REPLY`] and leaves the history as it was.
    pub async fn send(&mut self, model: &dyn ChatModel, input: &str) -> Option<String> {
        if input.trim().is_empty() {
            return None;
        }

        if let Some(sink) = self.questions.as_mut()
            && let Err(e) = sink.log(input)
        {
            tracing::warn!(error = %e, "Failed to log question");
        }

        self.history.push(ChatMessage::user(input));
        let result = {
            let request = build_request(&self.system_instruction, &self.history);
            model.reply(&request).await
        };

        match result {
            Ok(text) => {
                self.history.push(ChatMessage::model(text.clone()));
                Some(text)
            }
            Err(e) => {
                tracing::error!(error = %e, turns = self.history.len(), "Chat request failed");
                self.history.pop();
                Some(ERROR_REPLY.to_string())
            }
        }
    }
}

/// Scripted [`ChatModel`] recording the contents of every request.
#[derive(Debug, Clone, Default)]
pub struct MockChatModel {
    replies: Arc<Mutex<Vec<Result<String>>>>,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: &str) -> Self {
        self.push(Ok(text.to_string()));
        self
    }

    pub fn with_failure(self, message: &str) -> Self {
        self.push(Err(PraniError::Chat {
            message: message.to_string(),
        }));
        self
    }

    fn push(&self, reply: Result<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.insert(0, reply);
        }
    }

    /// History sent with each request, in order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn reply(&self, request: &ChatRequest<'_>) -> Result<String> {
        let sent: Vec<ChatMessage> = request
            .contents
            .iter()
            .map(|content| ChatMessage {
                role: content.role,
                text: content.parts.iter().map(|p| p.text).collect(),
            })
            .collect();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(sent);
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop())
            .unwrap_or_else(|| {
                Err(PraniError::Chat {
                    message: "no scripted reply".to_string(),
                })
            })
    }
}

#[cfg(feature = "summary")]
pub use client::GeminiChatModel;

#[cfg(feature = "summary")]
mod client {
    use super::*;
    use crate::defaults;
    use crate::summary::extract_text;

    /// `generateContent` client for the chat mode.
    #[derive(Debug, Clone)]
    pub struct GeminiChatModel {
        http: reqwest::Client,
        base_url: String,
        model: String,
        api_key: String,
    }

    impl GeminiChatModel {
        pub fn new(api_key: impl Into<String>) -> Self {
            Self {
                http: reqwest::Client::new(),
                base_url: defaults::SUMMARY_BASE_URL.to_string(),
                model: defaults::CHAT_MODEL.to_string(),
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
    }

    #[async_trait]
    impl ChatModel for GeminiChatModel {
        async fn reply(&self, request: &ChatRequest<'_>) -> Result<String> {
            tracing::debug!(model = %self.model, turns = request.contents.len(), "Requesting chat reply");
            let response = self
                .http
                .post(self.url())
                .json(request)
                .send()
                .await
                .map_err(|e| PraniError::Chat {
                    message: format!("request failed: {e}"),
                })?;

            if !response.status().is_success() {
                return Err(PraniError::Chat {
                    message: format!("API returned status {}", response.status()),
                });
            }

            let body = response.text().await.map_err(|e| PraniError::Chat {
                message: format!("failed to read response: {e}"),
            })?;

            extract_text(&body).ok_or_else(|| PraniError::Chat {
                message: "response carried no text".to_string(),
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_url_uses_chat_model() {
            let client = GeminiChatModel::new("k").with_base_url("https://example.test/v1beta");
            assert_eq!(
                client.url(),
                "https://example.test/v1beta/models/gemini-2.5-flash:generateContent?key=k"
            );
        }

        #[tokio::test]
        async fn test_unreachable_endpoint_is_a_chat_error() {
            let client = GeminiChatModel::new("k").with_base_url("http://127.0.0.1:1");
            let history = [ChatMessage::user("hello")];
            let result = client.reply(&build_request("sys", &history)).await;
            assert!(matches!(result, Err(PraniError::Chat { .. })));
        }
    }
}
