use serde::{ Serialize, Deserialize };

use super::chat::Role;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
    },
    #[serde(rename = "save")]
    Save,
    #[serde(rename = "summary")]
    Summary,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "transcript")] Transcript {
        messages: Vec<TranscriptEntry>,
    },
    #[serde(rename = "typing")]
    Typing,
    #[serde(rename = "partial")] Partial {
        content: String,
    },
    #[serde(rename = "done")] Done {
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "saved")] Saved {
        rows: usize,
    },
    #[serde(rename = "summary")] Summary {
        content: String,
        source_rows: usize,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}
