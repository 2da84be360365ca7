//! Transcript data model for the turn engine.
//!
//! The transcript is the ordered, mostly-append-only log of entries that
//! represents the visible conversation. It is exclusively mutated by the
//! turn engine; observers receive cloned snapshots.
//!
//! Invariant: at most one entry has `streaming == true` at any instant.
//! The currently streaming entry is tracked by an explicit index rather
//! than a scan-and-predicate search over the entry list.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// What a transcript entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    User,
    Assistant,
    /// Placeholder for a dispatched tool call, awaiting its result.
    ToolCall,
    /// A tool call whose result has arrived; transitioned in place.
    ToolResult,
}

/// A requested side-effecting action, correlated to its result by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    /// Unique within one turn.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Outcome of one tool call. `output` carries the error text when
/// `is_error` is set, matching the wire shape tools report in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub id: String,
    pub output: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: error.into(),
            is_error: true,
        }
    }
}

/// One entry in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub kind: EntryKind,
    /// Mutable while streaming, append-only.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Call list attached to an assistant entry by a tool_calls event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// The single call a ToolCall/ToolResult entry refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_outcome: Option<ToolOutcome>,
    pub streaming: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TranscriptEntry {
    fn new(kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            reasoning: None,
            tool_calls: None,
            tool_call: None,
            tool_outcome: None,
            streaming: false,
            created_at: Utc::now(),
            duration_ms: None,
        }
    }
}

/// Content used for tool-call placeholder entries until their result lands.
pub const EXECUTING_PLACEHOLDER: &str = "Executing...";

/// The ordered conversation log plus the index of the active streaming
/// entry, if any.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    active: Option<usize>,
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

    /// Whether any entry is currently streaming.
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Cloned snapshot for observers and for retry rollback.
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.clone()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.entries
            .push(TranscriptEntry::new(EntryKind::User, content));
    }

    /// Append a finalized assistant entry (used for error surfacing).
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.entries
            .push(TranscriptEntry::new(EntryKind::Assistant, content));
    }

    fn begin_streaming(&mut self, content: &str, reasoning: Option<&str>) {
        debug_assert!(self.active.is_none());
        let mut entry = TranscriptEntry::new(EntryKind::Assistant, content);
        entry.reasoning = reasoning.map(str::to_string);
        entry.streaming = true;
        self.entries.push(entry);
        self.active = Some(self.entries.len() - 1);
    }

    /// Apply a reasoning chunk. Creates a streaming entry with empty
    /// content if none is active; never finalizes.
    pub fn append_reasoning(&mut self, text: &str) {
        match self.active {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                match entry.reasoning.as_mut() {
                    Some(reasoning) => reasoning.push_str(text),
                    None => entry.reasoning = Some(text.to_string()),
                }
            }
            None => self.begin_streaming("", Some(text)),
        }
    }

    /// Apply a content chunk. An empty or whitespace-only chunk arriving
    /// while no entry is active is dropped, preventing empty assistant
    /// bubbles before real content arrives. Returns whether the chunk was
    /// applied.
    pub fn append_content(&mut self, chunk: &str) -> bool {
        match self.active {
            Some(idx) => {
                self.entries[idx].content.push_str(chunk);
                true
            }
            None if chunk.trim().is_empty() => false,
            None => {
                self.begin_streaming(chunk, None);
                true
            }
        }
    }

    /// Finalize the active streaming entry, keeping its partial content.
    /// No-op when nothing is streaming.
    pub fn finalize_active(&mut self) {
        if let Some(idx) = self.active.take() {
            self.entries[idx].streaming = false;
        }
    }

    /// Finalize the active entry and record the turn duration on it.
    pub fn finish_streaming(&mut self, duration_ms: u64) {
        if let Some(idx) = self.active.take() {
            let entry = &mut self.entries[idx];
            entry.streaming = false;
            entry.duration_ms = Some(duration_ms);
        }
    }

    /// Apply a tool_calls event: finalize whatever entry is active, attach
    /// the call list to it, and append one placeholder entry per call.
    /// When nothing is active, a finalized assistant entry is created to
    /// carry the list.
    pub fn attach_tool_calls(&mut self, calls: Vec<ToolCall>) {
        match self.active.take() {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                entry.streaming = false;
                entry.tool_calls = Some(calls.clone());
            }
            None => {
                let mut entry = TranscriptEntry::new(EntryKind::Assistant, "");
                entry.tool_calls = Some(calls.clone());
                self.entries.push(entry);
            }
        }

        for call in calls {
            let mut placeholder =
                TranscriptEntry::new(EntryKind::ToolCall, EXECUTING_PLACEHOLDER);
            placeholder.tool_call = Some(call);
            self.entries.push(placeholder);
        }
    }

    /// Transition the placeholder whose call id matches the outcome into a
    /// ToolResult entry, in place. Returns false when no placeholder
    /// matches; the transcript is left untouched in that case.
    pub fn resolve_tool_result(&mut self, outcome: ToolOutcome) -> bool {
        let Some(entry) = self.entries.iter_mut().rev().find(|e| {
            e.kind == EntryKind::ToolCall
                && e.tool_call.as_ref().is_some_and(|c| c.id == outcome.id)
        }) else {
            return false;
        };

        entry.kind = EntryKind::ToolResult;
        entry.content = outcome.output.clone();
        let elapsed = Utc::now().signed_duration_since(entry.created_at);
        entry.duration_ms = Some(elapsed.num_milliseconds().max(0) as u64);
        entry.tool_outcome = Some(outcome);
        true
    }

    /// Index of the most recent user entry.
    pub fn rightmost_user(&self) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|e| e.kind == EntryKind::User)
    }

    pub fn entry(&self, idx: usize) -> Option<&TranscriptEntry> {
        self.entries.get(idx)
    }

    /// Drop `idx` and everything after it (`/retry` truncation).
    pub fn truncate_from(&mut self, idx: usize) {
        self.entries.truncate(idx);
        if self.active.is_some_and(|a| a >= idx) {
            self.active = None;
        }
    }

    /// Restore a previously taken snapshot verbatim (retry rollback).
    pub fn restore(&mut self, snapshot: Vec<TranscriptEntry>) {
        self.active = snapshot.iter().position(|e| e.streaming);
        self.entries = snapshot;
    }

    /// Remove every entry. External collaborators own when this happens.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.active = None;
    }

    #[cfg(test)]
    pub(crate) fn streaming_count(&self) -> usize {
        self.entries.iter().filter(|e| e.streaming).count()
    }
}
