//! Session memory (typed record shared by all workers)
//!
//! One logical writer per field: the STT worker owns the cumulative
//! transcript and cursor, the commit router owns the segment lists and
//! dedup hash, the translation worker owns the target list, the summary
//! worker owns `summary_context`. Readers tolerate eventually-consistent
//! views; the `RwLock` critical sections stay short.

use std::time::Instant;

use crate::llm::prompts::Lang;

/// Client device class, set at `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientClass {
    #[default]
    Generic,
    /// Low-bandwidth embedded device (paced binary TTS streaming)
    Embedded,
}

impl ClientClass {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "esp32" | "embedded" => ClientClass::Embedded,
            _ => ClientClass::Generic,
        }
    }
}

#[derive(Debug)]
pub struct SessionMemory {
    // identity
    pub title_id: String,
    pub title_name: String,
    pub client_class: ClientClass,

    // languages (closed set, src != tgt)
    pub stt_lang: Lang,
    pub translate_src: Lang,
    pub translate_tgt: Lang,

    // persisted context, loaded at init
    pub committed_source: String,
    pub committed_target: String,
    pub title_context_tail: String,

    // STT runtime buffers. The cumulative transcript is stored verbatim —
    // never whitespace-stripped — because the commit cursor is a raw byte
    // offset into it.
    pub stt_cumulative: String,
    pub stt_committed_len: usize,
    pub last_stt_update: Instant,

    // committed segments this session
    pub session_src_segments: Vec<String>,
    pub session_tgt_segments: Vec<String>,

    // rolling summary, replaced wholesale every tick
    pub summary_context: String,

    // anti-duplication
    pub last_commit_hash: u64,
}

impl SessionMemory {
    pub fn new(
        title_id: String,
        title_name: String,
        stt_lang: Lang,
        translate_src: Lang,
        translate_tgt: Lang,
    ) -> Self {
        Self {
            title_id,
            title_name,
            client_class: ClientClass::Generic,
            stt_lang,
            translate_src,
            translate_tgt,
            committed_source: String::new(),
            committed_target: String::new(),
            title_context_tail: String::new(),
            stt_cumulative: String::new(),
            stt_committed_len: 0,
            last_stt_update: Instant::now(),
            session_src_segments: Vec::new(),
            session_tgt_segments: Vec::new(),
            summary_context: String::new(),
            last_commit_hash: 0,
        }
    }

    /// Current draft: everything past the commit cursor
    pub fn draft(&self) -> &str {
        &self.stt_cumulative[self.stt_committed_len.min(self.stt_cumulative.len())..]
    }

    /// Clamp the cursor into range and retreat it off the interior of an
    /// alphanumeric token so a draft never starts mid-word.
    pub fn normalize_cursor(&mut self) {
        self.stt_committed_len = safe_cursor(&self.stt_cumulative, self.stt_committed_len);
    }

    /// Everything committed for this title: persisted text then this
    /// session's segments, newline-joined.
    pub fn full_committed_source(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.committed_source.trim().is_empty() {
            parts.push(self.committed_source.trim_end_matches('\n'));
        }
        for seg in &self.session_src_segments {
            parts.push(seg);
        }
        parts.join("\n")
    }

    /// Deterministic copy of the fields the finalizer needs
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            title_id: self.title_id.clone(),
            title_name: self.title_name.clone(),
            translate_src: self.translate_src,
            translate_tgt: self.translate_tgt,
            title_context_tail: self.title_context_tail.clone(),
            full_source: self.full_committed_source(),
            summary_context: self.summary_context.clone(),
        }
    }
}

/// Finalizer's view of the session
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    pub title_id: String,
    pub title_name: String,
    pub translate_src: Lang,
    pub translate_tgt: Lang,
    pub title_context_tail: String,
    pub full_source: String,
    pub summary_context: String,
}

/// Clamp `cursor` to `[0, len]`, align it to a char boundary, and retreat
/// while the characters on both sides are alphanumeric.
pub fn safe_cursor(text: &str, cursor: usize) -> usize {
    let mut c = cursor.min(text.len());
    while c > 0 && !text.is_char_boundary(c) {
        c -= 1;
    }
    while c > 0 && c < text.len() {
        let prev = match text[..c].chars().next_back() {
            Some(ch) => ch,
            None => break,
        };
        let cur = match text[c..].chars().next() {
            Some(ch) => ch,
            None => break,
        };
        if prev.is_alphanumeric() && cur.is_alphanumeric() {
            c -= prev.len_utf8();
        } else {
            break;
        }
    }
    c
}
