//! Per-session conversation state.
//!
//! A [`SessionStore`] is owned by the connection handler serving one browser
//! page. It is lazily seeded on first access: the transcript receives the
//! persona system message and a fresh session identifier is generated.

use crate::models::chat::{ ChatMessage, Role };
use crate::models::websocket::TranscriptEntry;
use crate::rag::summary::Summary;
use log::debug;
use uuid::Uuid;

/// Marker appended to a reply while it is still streaming.
pub const CURSOR: &str = "▌";

/// Ordered, append-only conversation history. The first entry is always the
/// system persona.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn seeded(persona: &str) -> Self {
        Self {
            messages: vec![ChatMessage::system(persona)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }
}

struct SessionState {
    id: String,
    transcript: Transcript,
}

impl SessionState {
    fn seeded(persona: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        debug!("Initialized session {}", id);
        Self {
            id,
            transcript: Transcript::seeded(persona),
        }
    }
}

pub struct SessionStore {
    persona: String,
    state: Option<SessionState>,
    summary: Option<Summary>,
}

impl SessionStore {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            state: None,
            summary: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn state(&mut self) -> &mut SessionState {
        let persona = &self.persona;
        self.state.get_or_insert_with(|| SessionState::seeded(persona))
    }

    pub fn transcript(&mut self) -> &Transcript {
        &self.state().transcript
    }

    pub fn session_id(&mut self) -> &str {
        &self.state().id
    }

    pub fn append_message(&mut self, message: ChatMessage) {
        self.state().transcript.push(message);
    }

    pub fn last_summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    pub fn set_summary(&mut self, summary: Summary) {
        self.summary = Some(summary);
    }

    pub fn clear_summary(&mut self) {
        self.summary = None;
    }
}

/// Projects the transcript for display, leaving out system messages.
pub fn render(transcript: &Transcript) -> impl Iterator<Item = TranscriptEntry> + '_ {
    transcript
        .messages()
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| TranscriptEntry {
            role: m.role,
            content: m.content.clone(),
        })
}

pub fn render_partial(accumulated: &str) -> String {
    format!("{}{}", accumulated, CURSOR)
}
