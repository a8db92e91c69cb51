//! Reconciles streamed transcription fragments into an ordered transcript.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
        }
    }
}

/// Append-only ordered sequence of committed entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }
}

/// Text received so far for the current turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTurn {
    pub user_text: String,
    pub assistant_text: String,
}

/// What one `on_turn_complete` committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommittedTurn {
    pub user: Option<TranscriptEntry>,
    pub assistant: Option<TranscriptEntry>,
}

#[derive(Debug, Default)]
pub struct TurnReconciler {
    pending: PendingTurn,
    transcript: Transcript,
}

impl TurnReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_partial_user(&mut self, text: &str) {
        self.pending.user_text.push_str(text);
    }

    pub fn on_partial_assistant(&mut self, text: &str) {
        self.pending.assistant_text.push_str(text);
    }

    /// Commit the pending turn, user entry first, and reset it.
    pub fn on_turn_complete(&mut self) -> CommittedTurn {
        let pending = std::mem::take(&mut self.pending);
        let mut committed = CommittedTurn::default();

        let user = pending.user_text.trim();
        if !user.is_empty() {
            let entry = TranscriptEntry::user(user);
            self.transcript.push(entry.clone());
            committed.user = Some(entry);
        }

        let assistant = pending.assistant_text.trim();
        if !assistant.is_empty() {
            let entry = TranscriptEntry::assistant(assistant);
            self.transcript.push(entry.clone());
            committed.assistant = Some(entry);
        }

        committed
    }

    pub fn pending(&self) -> &PendingTurn {
        &self.pending
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn into_transcript(self) -> Transcript {
        self.transcript
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_committed_before_assistant_regardless_of_arrival() {
        let mut turns = TurnReconciler::new();
        turns.on_partial_assistant("Use neem ");
        turns.on_partial_user("What about ");
        turns.on_partial_assistant("oil.");
        turns.on_partial_user("pests?");

        let committed = turns.on_turn_complete();

        assert_eq!(committed.user, Some(TranscriptEntry::user("What about pests?")));
        assert_eq!(
            turns.transcript().entries(),
            &[
                TranscriptEntry::user("What about pests?"),
                TranscriptEntry::assistant("Use neem oil."),
            ]
        );
    }

    #[test]
    fn test_blank_user_text_commits_only_assistant() {
        let mut turns = TurnReconciler::new();
        turns.on_partial_user("   ");
        turns.on_partial_assistant(" Hello farmer ");

        let committed = turns.on_turn_complete();

        assert!(committed.user.is_none());
        assert_eq!(
            turns.transcript().entries(),
            &[TranscriptEntry::assistant("Hello farmer")]
        );
    }

    #[test]
    fn test_turn_complete_resets_pending() {
        let mut turns = TurnReconciler::new();
        turns.on_partial_user("one");
        turns.on_turn_complete();

        assert_eq!(turns.pending(), &PendingTurn::default());
        turns.on_partial_user("two");
        turns.on_turn_complete();
        assert_eq!(turns.transcript().len(), 2);
        assert_eq!(turns.transcript().entries()[1].text, "two");
    }

    #[test]
    fn test_empty_turn_commits_nothing() {
        let mut turns = TurnReconciler::new();
        assert_eq!(turns.on_turn_complete(), CommittedTurn::default());
        assert!(turns.transcript().is_empty());
    }

    #[test]
    fn test_transcript_serializes_as_speaker_text_list() {
        let mut turns = TurnReconciler::new();
        turns.on_partial_user("hi");
        turns.on_partial_assistant("hello");
        turns.on_turn_complete();

        let json = serde_json::to_value(turns.into_transcript()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"speaker": "user", "text": "hi"},
                {"speaker": "assistant", "text": "hello"}
            ])
        );
    }
}
