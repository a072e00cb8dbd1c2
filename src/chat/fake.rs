use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use crate::backend::{ChatBackend, ChatResponse};
use crate::error::BackendError;
use crate::models::{ChatMeta, Citation, SendMessageRequest};

pub(crate) enum Reply {
    Chunks(Vec<Result<&'static str, &'static str>>),
    Pending(Vec<&'static str>),
    Rejected(u16),
    NoBody,
    Unreachable,
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    replies: Mutex<VecDeque<Reply>>,
    titles: Mutex<VecDeque<Result<ChatMeta, BackendError>>>,
    citations: Mutex<Option<Result<Vec<Citation>, BackendError>>>,
    pub sent: Mutex<Vec<SendMessageRequest>>,
    pub title_calls: AtomicUsize,
    pub citation_calls: Mutex<Vec<(String, usize)>>,
}

impl FakeBackend {
    pub fn reply(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn title(self, result: Result<ChatMeta, BackendError>) -> Self {
        self.titles.lock().unwrap().push_back(result);
        self
    }

    pub fn citations(self, result: Result<Vec<Citation>, BackendError>) -> Self {
        *self.citations.lock().unwrap() = Some(result);
        self
    }

    pub fn title_calls(&self) -> usize {
        self.title_calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn titled(title: &str) -> Result<ChatMeta, BackendError> {
    Ok(ChatMeta {
        title: Some(title.to_string()),
    })
}

pub(crate) fn not_found() -> Result<ChatMeta, BackendError> {
    Err(BackendError::NotFound("chat".into()))
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn send_message(&self, request: &SendMessageRequest) -> Result<ChatResponse, BackendError> {
        self.sent.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Chunks(vec![]));

        match reply {
            Reply::Chunks(items) => {
                let items: Vec<Result<Vec<u8>, BackendError>> = items
                    .into_iter()
                    .map(|item| match item {
                        Ok(text) => Ok(text.as_bytes().to_vec()),
                        Err(message) => Err(BackendError::Parse(message.to_string())),
                    })
                    .collect();
                Ok(ChatResponse::streaming(futures::stream::iter(items).boxed()))
            }
            Reply::Pending(items) => {
                let items: Vec<Result<Vec<u8>, BackendError>> =
                    items.into_iter().map(|t| Ok(t.as_bytes().to_vec())).collect();
                let body = futures::stream::iter(items).chain(futures::stream::pending());
                Ok(ChatResponse::streaming(body.boxed()))
            }
            Reply::Rejected(status) => Ok(ChatResponse::rejected(status)),
            Reply::NoBody => Ok(ChatResponse {
                status: 200,
                ok: true,
                body: None,
            }),
            Reply::Unreachable => Err(BackendError::Api {
                status: 502,
                message: "bad gateway".into(),
            }),
        }
    }

    async fn get_chat_by_id(&self, _chat_id: &str) -> Result<ChatMeta, BackendError> {
        self.title_calls.fetch_add(1, Ordering::SeqCst);
        self.titles
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(not_found)
    }

    async fn get_citations_for_message(
        &self,
        chat_id: &str,
        message_index: usize,
    ) -> Result<Vec<Citation>, BackendError> {
        self.citation_calls
            .lock()
            .unwrap()
            .push((chat_id.to_string(), message_index));
        self.citations.lock().unwrap().take().unwrap_or(Ok(vec![]))
    }
}
