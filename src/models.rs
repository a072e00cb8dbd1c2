use serde::{Deserialize, Serialize};

/// A reference from generated text back into the book.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub marker: String,
    pub number: String,
    pub chapter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_info: Option<String>,
    #[serde(default)]
    pub is_highlight: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

/// One spine item as laid out by the renderer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ContentSection {
    pub href: String,
    pub length: u64,
}

/// Where a citation click should take the reader.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NavigationTarget {
    /// Exact location (CFI or fragment) supplied by the backend.
    Anchor { anchor: String },
    /// Start of the section holding the cited position.
    Section { index: usize, href: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub text: String,
    pub sender_type: SenderType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender_type: SenderType::User,
            citations: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender_type: SenderType::Assistant,
            citations: Vec::new(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.sender_type == SenderType::Assistant
    }
}

/// Chat record as returned by the metadata endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ChatMeta {
    #[serde(default)]
    pub title: Option<String>,
}

/// A passage the reader selected and asked about.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextQuote {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
}

/// Who is asking, about which book.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendContext {
    pub sender_id: String,
    pub book_id: String,
}

/// Body of the send-message call.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    pub chat_id: String,
    pub sender_id: String,
    pub book_id: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
