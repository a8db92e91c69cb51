//! Local log of the questions callers asked.

use crate::error::{PraniError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Receives every committed user question.
pub trait QuestionSink: Send + Sync {
    fn log(&mut self, question: &str) -> Result<()>;
}

/// File-backed question log, one `[timestamp] question` line per entry.
#[derive(Debug, Clone)]
pub struct QuestionLog {
    path: PathBuf,
}

/// Format one log line, or `None` for blank questions.
pub fn format_entry(question: &str, at: SystemTime) -> Option<String> {
    let question = question.trim();
    if question.is_empty() {
        return None;
    }
    // Keep the text as spoken; only line breaks would split the entry
    let single_line = question.replace("\r\n", " ").replace(['\n', '\r'], " ");
    Some(format!(
        "[{}] {}",
        humantime::format_rfc3339_millis(at),
        single_line
    ))
}

/// Download name for an export made at `at`.
pub fn export_file_name(at: SystemTime) -> String {
    let stamp = humantime::format_rfc3339_seconds(at).to_string();
    let date = stamp.get(..10).unwrap_or(&stamp);
    format!("user_questions_log_{}.txt", date)
}

impl QuestionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$XDG_DATA_HOME/pranimitra/questions.log` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("pranimitra").join("questions.log"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_at(&self, question: &str, at: SystemTime) -> Result<()> {
        let Some(line) = format_entry(question, at) else {
            return Ok(());
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.error("create directory", e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.error("open", e))?;
        writeln!(file, "{}", line).map_err(|e| self.error("append to", e))?;

        tracing::debug!(path = %self.path.display(), "Logged caller question");
        Ok(())
    }

    /// All entries, oldest first. A missing file is an empty log.
    pub fn entries(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.error("read", e)),
        }
    }

    /// Write every entry into `dir` under today's export name.
    pub fn export(&self, dir: &Path) -> Result<PathBuf> {
        self.export_at(dir, SystemTime::now())
    }

    pub fn export_at(&self, dir: &Path, at: SystemTime) -> Result<PathBuf> {
        let entries = self.entries()?;
        if entries.is_empty() {
            return Err(PraniError::QuestionLog {
                message: "No questions recorded yet.".to_string(),
            });
        }

        std::fs::create_dir_all(dir).map_err(|e| self.error("create export directory for", e))?;
        let path = dir.join(export_file_name(at));
        std::fs::write(&path, entries.join("\n")).map_err(|e| PraniError::QuestionLog {
            message: format!("Failed to write {}: {}", path.display(), e),
        })?;
        Ok(path)
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.error("remove", e)),
        }
    }

    fn error(&self, action: &str, e: std::io::Error) -> PraniError {
        PraniError::QuestionLog {
            message: format!("Failed to {} {}: {}", action, self.path.display(), e),
        }
    }
}

impl QuestionSink for QuestionLog {
    fn log(&mut self, question: &str) -> Result<()> {
        self.log_at(question, SystemTime::now())
    }
}

/// In-memory sink for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuestionSink {
    questions: Arc<Mutex<Vec<String>>>,
}

impl MemoryQuestionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

impl QuestionSink for MemoryQuestionSink {
    fn log(&mut self, question: &str) -> Result<()> {
        if let Ok(mut questions) = self.questions.lock() {
            questions.push(question.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn at() -> SystemTime {
        // 2024-03-05T06:07:08.009Z
        UNIX_EPOCH + Duration::from_millis(1_709_618_828_009)
    }

    #[test]
    fn test_format_entry_uses_iso_timestamp() {
        assert_eq!(
            format_entry("  How much urea?  ", at()).unwrap(),
            "[2024-03-05T06:07:08.009Z] How much urea?"
        );
    }

    #[test]
    fn test_format_entry_ignores_blank() {
        assert!(format_entry("   ", at()).is_none());
        assert!(format_entry("", at()).is_none());
    }

    #[test]
    fn test_format_entry_collapses_newlines() {
        assert_eq!(
            format_entry("first\nsecond", at()).unwrap(),
            "[2024-03-05T06:07:08.009Z] first second"
        );
    }

    #[test]
    fn test_format_entry_keeps_inner_spacing() {
        assert_eq!(
            format_entry(" urea  or\tDAP?\r\nwhich first ", at()).unwrap(),
            "[2024-03-05T06:07:08.009Z] urea  or\tDAP? which first"
        );
    }

    #[test]
    fn test_export_file_name_is_dated() {
        assert_eq!(export_file_name(at()), "user_questions_log_2024-03-05.txt");
    }

    #[test]
    fn test_log_entries_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let log = QuestionLog::new(dir.path().join("nested").join("questions.log"));

        log.log_at("first", at()).unwrap();
        log.log_at("   ", at()).unwrap();
        log.log_at("second", at()).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("] first"));
        assert!(entries[1].ends_with("] second"));

        log.clear().unwrap();
        assert!(log.entries().unwrap().is_empty());
        log.clear().unwrap();
    }

    #[test]
    fn test_export_writes_joined_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = QuestionLog::new(dir.path().join("questions.log"));
        log.log_at("a", at()).unwrap();
        log.log_at("b", at()).unwrap();

        let out = dir.path().join("out");
        let path = log.export_at(&out, at()).unwrap();

        assert_eq!(path, out.join("user_questions_log_2024-03-05.txt"));
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "[2024-03-05T06:07:08.009Z] a\n[2024-03-05T06:07:08.009Z] b"
        );
    }

    #[test]
    fn test_export_empty_log_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log = QuestionLog::new(dir.path().join("questions.log"));
        match log.export(dir.path()) {
            Err(PraniError::QuestionLog { message }) => {
                assert_eq!(message, "No questions recorded yet.");
            }
            other => panic!("Expected QuestionLog error, got {:?}", other),
        }
    }

    #[test]
    fn test_question_sink_trait_on_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink: Box<dyn QuestionSink> =
            Box::new(QuestionLog::new(dir.path().join("q.log")));
        sink.log("Is it going to rain?").unwrap();

        let log = QuestionLog::new(dir.path().join("q.log"));
        assert_eq!(log.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_sink_records() {
        let mut sink = MemoryQuestionSink::new();
        sink.log("q").unwrap();
        assert_eq!(sink.questions(), vec!["q".to_string()]);
    }
}
