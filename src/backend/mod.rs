pub mod http;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BackendError;
use crate::models::{ChatMeta, Citation, SendMessageRequest};

pub use http::{HttpBackend, HttpConfig};

/// Reply body, delivered as raw UTF-8 chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, BackendError>>;

/// Response to a send-message call.
pub struct ChatResponse {
    pub status: u16,
    pub ok: bool,
    pub body: Option<ByteStream>,
}

impl ChatResponse {
    pub fn streaming(body: ByteStream) -> Self {
        Self {
            status: 200,
            ok: true,
            body: Some(body),
        }
    }

    pub fn rejected(status: u16) -> Self {
        Self {
            status,
            ok: false,
            body: None,
        }
    }
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatResponse")
            .field("status", &self.status)
            .field("ok", &self.ok)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

/// The remote chat service the session talks to.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_message(&self, request: &SendMessageRequest) -> Result<ChatResponse, BackendError>;

    /// May fail with a "not found" class error while a just-created chat is
    /// still being committed.
    async fn get_chat_by_id(&self, chat_id: &str) -> Result<ChatMeta, BackendError>;

    async fn get_citations_for_message(
        &self,
        chat_id: &str,
        message_index: usize,
    ) -> Result<Vec<Citation>, BackendError>;
}
