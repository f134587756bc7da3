//! Transcript Store
//!
//! Ordered log of the exchanges in the current interactive session. Entries
//! are only appended or cleared wholesale; both take the same lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::messages::{EntryId, MessageRole};

/// One transcript entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Entry id
    pub id: EntryId,
    /// Author
    pub role: MessageRole,
    /// Text as shown to the user
    pub content: String,
    /// When the entry was appended
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Create an entry stamped now
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Shared, append-only transcript
#[derive(Clone, Debug, Default)]
pub struct TranscriptStore {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
}

impl TranscriptStore {
    /// Create an empty transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn append(&self, entry: TranscriptEntry) {
        let mut entries = self.entries.lock();
        tracing::debug!(
            entry_id = %entry.id.0,
            role = entry.role.label(),
            position = entries.len(),
            "Transcript entry appended"
        );
        entries.push(entry);
    }

    /// Append user input and return the stored entry
    pub fn append_user(&self, content: impl Into<String>) -> TranscriptEntry {
        let entry = TranscriptEntry::new(MessageRole::User, content);
        self.append(entry.clone());
        entry
    }

    /// Append agent output and return the stored entry
    pub fn append_assistant(&self, content: impl Into<String>) -> TranscriptEntry {
        let entry = TranscriptEntry::new(MessageRole::Assistant, content);
        self.append(entry.clone());
        entry
    }

    /// Every entry, oldest first
    #[must_use]
    pub fn all(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().clone()
    }

    /// The last `n` entries, oldest first
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<TranscriptEntry> {
        let entries = self.entries.lock();
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the transcript is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove every entry; returns how many were removed
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        tracing::info!(removed, "Transcript cleared");
        removed
    }

    /// Render the last `max_messages` entries as conversation context
    #[must_use]
    pub fn build_context(&self, max_messages: usize) -> String {
        self.recent(max_messages)
            .iter()
            .map(|entry| format!("{}: {}\n\n", entry.role.label(), entry.content))
            .collect()
    }

    /// Serialize the transcript as pretty JSON
    ///
    /// # Errors
    ///
    /// Fails only if an entry cannot be serialized.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.entries.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_append_keeps_order() {
        let store = TranscriptStore::new();
        store.append_user("What is osmosis?");
        store.append_assistant("Movement of water across a membrane.");

        let all = store.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].role, MessageRole::User);
        assert_eq!(all[1].role, MessageRole::Assistant);
        assert!(all[0].timestamp <= all[1].timestamp);
        assert_ne!(all[0].id, all[1].id);
    }

    #[test]
    fn test_recent_and_context() {
        let store = TranscriptStore::new();
        store.append_user("one");
        store.append_assistant("two");
        store.append_user("three");

        let recent: Vec<_> = store.recent(2).into_iter().map(|e| e.content).collect();
        assert_eq!(recent, vec!["two", "three"]);
        assert_eq!(store.recent(10).len(), 3);
        assert_eq!(store.build_context(2), "Assistant: two\n\nUser: three\n\n");
        assert_eq!(store.build_context(0), "");
    }

    #[test]
    fn test_clear() {
        let store = TranscriptStore::new();
        store.append_user("a");
        store.append_user("b");
        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
        assert_eq!(store.clear(), 0);
    }

    #[test]
    fn test_clones_share_entries() {
        let store = TranscriptStore::new();
        let other = store.clone();
        other.append_user("shared");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_export_json() {
        let store = TranscriptStore::new();
        store.append_user("hi");
        let json = store.export_json().unwrap();
        let parsed: Vec<TranscriptEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, store.all());
        assert!(json.contains("\"role\": \"user\""));
    }
}
