use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::{ChatBackend, ChatResponse};
use crate::error::BackendError;
use crate::models::{ChatMeta, Citation, SendMessageRequest};

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub api_key: String,
    pub base_url: String,
}

/// REST implementation of [`ChatBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: HttpConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CitationsBody {
    List(Vec<Citation>),
    Wrapped { citations: Vec<Citation> },
}

impl HttpBackend {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Base URL extended by `segments`, each percent-encoded as a single
    /// path segment.
    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url =
            Url::parse(&self.config.base_url).map_err(|e| BackendError::Parse(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Parse(format!("not a base URL: {}", self.config.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        if self.config.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.config.api_key))
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> Result<T, BackendError> {
        let url = self.url(segments)?;
        let path = url.path().to_string();
        let resp = self
            .authorize(self.client.get(url))
            .header("Accept", "application/json")
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(path));
        }

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status,
                message: text,
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| BackendError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send_message(&self, request: &SendMessageRequest) -> Result<ChatResponse, BackendError> {
        let resp = self
            .authorize(self.client.post(self.url(&["chat", "messages"])?))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        debug!(chat_id = %request.chat_id, status = status.as_u16(), "send_message response");

        if !status.is_success() {
            return Ok(ChatResponse::rejected(status.as_u16()));
        }

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(BackendError::from))
            .boxed();

        Ok(ChatResponse {
            status: status.as_u16(),
            ok: true,
            body: Some(body),
        })
    }

    async fn get_chat_by_id(&self, chat_id: &str) -> Result<ChatMeta, BackendError> {
        self.get_json(&["chats", chat_id]).await
    }

    async fn get_citations_for_message(
        &self,
        chat_id: &str,
        message_index: usize,
    ) -> Result<Vec<Citation>, BackendError> {
        let index = message_index.to_string();
        let body: CitationsBody = self
            .get_json(&["chats", chat_id, "messages", index.as_str(), "citations"])
            .await?;

        Ok(match body {
            CitationsBody::List(citations) | CitationsBody::Wrapped { citations } => citations,
        })
    }
}
