//! One reader's conversation with the assistant about a book.

#[cfg(test)]
mod fake;
pub mod title;

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;
use crate::citation::CitationIndex;
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::models::{Message, SendContext, SendMessageRequest, TextQuote};
use crate::stream::{StreamAggregator, StreamOutcome};

pub use title::{TitleLookup, TitleOutcome};

#[derive(Debug)]
pub enum SendOutcome {
    /// Blank input, nothing was sent.
    Skipped,
    Completed,
    Cancelled,
    /// The assistant bubble holds either the partial reply or the
    /// configured error text.
    Failed(ChatError),
}

#[derive(Default)]
struct ActiveState {
    next_id: u64,
    current: Option<(u64, CancellationToken)>,
}

type ActiveSlot = Arc<Mutex<ActiveState>>;

fn lock(slot: &ActiveSlot) -> MutexGuard<'_, ActiveState> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registration of the reply currently streaming. Dropping it, including
/// when the `send` future itself is dropped, releases the slot unless a
/// newer reply has taken it over.
struct ActiveStream {
    slot: ActiveSlot,
    id: u64,
    token: CancellationToken,
}

impl ActiveStream {
    fn register(slot: &ActiveSlot) -> Self {
        let token = CancellationToken::new();
        let mut state = lock(slot);
        let id = state.next_id;
        state.next_id += 1;
        if let Some((_, previous)) = state.current.replace((id, token.clone())) {
            debug!("superseding a stream that was still registered");
            previous.cancel();
        }
        drop(state);

        Self {
            slot: slot.clone(),
            id,
            token,
        }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.token.cancel();
        let mut state = lock(&self.slot);
        if state.current.as_ref().is_some_and(|(id, _)| *id == self.id) {
            state.current = None;
        }
    }
}

/// Stops the reply currently streaming into a [`ChatSession`], from
/// anywhere. Does nothing when no reply is streaming.
#[derive(Clone)]
pub struct StopHandle {
    active: ActiveSlot,
}

impl StopHandle {
    pub fn stop(&self) {
        if let Some((_, token)) = lock(&self.active).current.as_ref() {
            token.cancel();
        }
    }
}

/// Replace the text of the trailing assistant message. Any other trailing
/// message is left alone.
fn update_last_assistant(messages: &mut [Message], text: &str) -> bool {
    match messages.last_mut() {
        Some(last) if last.is_assistant() => {
            last.text.clear();
            last.text.push_str(text);
            true
        }
        _ => false,
    }
}

/// Drives user turns against a [`ChatBackend`] and keeps the message list.
///
/// Only one reply streams at a time. Callers disable input while
/// [`ChatSession::is_streaming`] holds; the session does not queue sends.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    config: ChatConfig,
    context: SendContext,
    chat_id: Option<String>,
    title: Option<String>,
    messages: Vec<Message>,
    active: ActiveSlot,
    title_guard: CancellationToken,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, config: ChatConfig, context: SendContext) -> Self {
        Self {
            backend,
            config,
            context,
            chat_id: None,
            title: None,
            messages: Vec::new(),
            active: ActiveSlot::default(),
            title_guard: CancellationToken::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn set_context(&mut self, context: SendContext) {
        self.context = context;
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.active).current.is_some()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            active: self.active.clone(),
        }
    }

    /// Citation lookup for the message at `index`.
    pub fn citation_index(&self, index: usize) -> CitationIndex {
        self.messages
            .get(index)
            .map(|m| CitationIndex::build(&m.citations))
            .unwrap_or_default()
    }

    /// Switch to an existing chat and its history.
    pub fn open_chat(&mut self, chat_id: impl Into<String>, history: Vec<Message>) {
        self.reset_identity(Some(chat_id.into()));
        self.messages = history;
    }

    /// Start over with a chat id assigned on the next send.
    pub fn new_chat(&mut self) {
        self.reset_identity(None);
        self.messages.clear();
    }

    fn reset_identity(&mut self, chat_id: Option<String>) {
        self.stop_handle().stop();
        self.title_guard.cancel();
        self.title_guard = CancellationToken::new();
        self.title = None;
        self.chat_id = chat_id;
    }

    pub async fn send<F>(&mut self, text: &str, on_update: F) -> SendOutcome
    where
        F: FnMut(&str),
    {
        self.send_inner(text, None, on_update).await
    }

    /// Ask about a passage the reader selected. The quote travels to the
    /// backend as request metadata.
    pub async fn send_with_quote<F>(&mut self, text: &str, quote: TextQuote, on_update: F) -> SendOutcome
    where
        F: FnMut(&str),
    {
        self.send_inner(text, Some(quote), on_update).await
    }

    async fn send_inner<F>(&mut self, text: &str, quote: Option<TextQuote>, mut on_update: F) -> SendOutcome
    where
        F: FnMut(&str),
    {
        let content = text.trim();
        if content.is_empty() {
            return SendOutcome::Skipped;
        }

        let active = ActiveStream::register(&self.active);

        let chat_id = self
            .chat_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();

        self.messages.push(Message::user(content));
        self.messages.push(Message::assistant(""));
        let reply_index = self.messages.len() - 1;

        let metadata = match &quote {
            Some(quote) => json!({ "quote": quote }),
            None => json!({}),
        };
        let request = SendMessageRequest {
            content: content.to_string(),
            chat_id: chat_id.clone(),
            sender_id: self.context.sender_id.clone(),
            book_id: self.context.book_id.clone(),
            metadata,
        };

        let result = self
            .stream_reply(&request, active.token.clone(), &mut on_update)
            .await;
        drop(active);

        match result {
            Ok(StreamOutcome::Completed(text)) => {
                update_last_assistant(&mut self.messages, &text);
                self.attach_citations(&chat_id, reply_index).await;
                SendOutcome::Completed
            }
            Ok(StreamOutcome::Cancelled(text)) => {
                info!(chat_id = %chat_id, chars = text.len(), "reply stopped by user");
                if text.is_empty() {
                    update_last_assistant(&mut self.messages, &self.config.stopped_text);
                }
                SendOutcome::Cancelled
            }
            Err(ChatError::Stream(err)) => {
                warn!(chat_id = %chat_id, error = %err, "reply stream failed");
                if err.partial().is_empty() {
                    update_last_assistant(&mut self.messages, &self.config.error_text);
                }
                SendOutcome::Failed(ChatError::Stream(err))
            }
            Err(err) => {
                warn!(chat_id = %chat_id, error = %err, "could not open reply stream");
                update_last_assistant(&mut self.messages, &self.config.error_text);
                SendOutcome::Failed(err)
            }
        }
    }

    async fn stream_reply<F>(
        &mut self,
        request: &SendMessageRequest,
        cancel: CancellationToken,
        on_update: &mut F,
    ) -> Result<StreamOutcome, ChatError>
    where
        F: FnMut(&str),
    {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled(String::new())),
            response = self.backend.send_message(request) => response?,
        };

        if !response.ok {
            return Err(ChatError::Rejected {
                status: response.status,
            });
        }
        let Some(body) = response.body else {
            return Err(ChatError::MissingBody);
        };

        debug!(chat_id = %request.chat_id, "reply stream opened");
        let mut aggregator = StreamAggregator::with_cancel(cancel);
        let messages = &mut self.messages;
        let outcome = aggregator
            .run(body, |text| {
                if update_last_assistant(messages, text) {
                    on_update(text);
                }
            })
            .await?;

        Ok(outcome)
    }

    async fn attach_citations(&mut self, chat_id: &str, index: usize) {
        match self.backend.get_citations_for_message(chat_id, index).await {
            Ok(citations) => {
                if let Some(message) = self.messages.get_mut(index) {
                    message.citations = citations;
                }
            }
            Err(err) => {
                warn!(chat_id = %chat_id, index, error = %err, "citation fetch failed");
            }
        }
    }

    /// A title fetch for the current chat, if one is due: there are
    /// messages, nothing is streaming and no title is known yet.
    pub fn title_lookup(&self) -> Option<TitleLookup> {
        if self.messages.is_empty() || self.is_streaming() || self.title.is_some() {
            return None;
        }
        let chat_id = self.chat_id.as_ref()?;
        Some(TitleLookup::new(
            self.backend.clone(),
            chat_id.clone(),
            self.config.title_retry,
            self.title_guard.clone(),
        ))
    }

    /// Store a resolved title. Returns false for anything that is not a
    /// title for the current, still untitled chat.
    pub fn apply_title(&mut self, outcome: &TitleOutcome) -> bool {
        let TitleOutcome::Resolved { chat_id, title } = outcome else {
            return false;
        };
        if self.title.is_some() || self.chat_id.as_deref() != Some(chat_id.as_str()) {
            return false;
        }
        self.title = Some(title.clone());
        true
    }

    pub async fn resolve_title(&mut self) -> Option<TitleOutcome> {
        let lookup = self.title_lookup()?;
        let outcome = lookup.run().await;
        self.apply_title(&outcome);
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::fake::{not_found, titled, FakeBackend, Reply};
    use crate::models::{Citation, SenderType};
    use std::time::Duration;

    fn session(backend: FakeBackend) -> (ChatSession, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let session = ChatSession::new(
            backend.clone(),
            ChatConfig::default(),
            SendContext {
                sender_id: "reader-7".into(),
                book_id: "book-42".into(),
            },
        );
        (session, backend)
    }

    fn citation(marker: &str) -> Citation {
        Citation {
            marker: marker.into(),
            number: "1".into(),
            chapter: "Chapter 1".into(),
            position_percent: Some(12.0),
            location_info: None,
            is_highlight: false,
            anchor: None,
        }
    }

    #[tokio::test]
    async fn streams_reply_into_assistant_message() {
        let (mut session, backend) = session(
            FakeBackend::default()
                .reply(Reply::Chunks(vec![Ok("The book"), Ok(" is about"), Ok(" testing.")]))
                .citations(Ok(vec![citation("¹")])),
        );

        let mut updates = Vec::new();
        let outcome = session
            .send("What is this book about?", |text| updates.push(text.to_string()))
            .await;

        assert!(matches!(outcome, SendOutcome::Completed));
        assert_eq!(
            updates,
            vec!["The book", "The book is about", "The book is about testing."]
        );

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender_type, SenderType::User);
        assert_eq!(messages[0].text, "What is this book about?");
        assert_eq!(messages[1].text, "The book is about testing.");
        assert_eq!(messages[1].citations.len(), 1);
        assert!(session.citation_index(1).get("¹").is_some());

        let chat_id = session.chat_id().expect("chat id assigned").to_string();
        let sent = backend.sent.lock().unwrap();
        assert_eq!(sent[0].chat_id, chat_id);
        assert_eq!(sent[0].sender_id, "reader-7");
        assert_eq!(sent[0].book_id, "book-42");
        assert_eq!(
            backend.citation_calls.lock().unwrap().as_slice(),
            &[(chat_id, 1)]
        );
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn blank_input_is_skipped() {
        let (mut session, backend) = session(FakeBackend::default());
        let outcome = session.send("   \n", |_| {}).await;

        assert!(matches!(outcome, SendOutcome::Skipped));
        assert!(session.messages().is_empty());
        assert!(session.chat_id().is_none());
        assert!(backend.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_response_shows_error_text_without_streaming() {
        let (mut session, _backend) = session(FakeBackend::default().reply(Reply::Rejected(500)));
        let mut updates = 0;

        let outcome = session.send("Hello?", |_| updates += 1).await;

        assert!(matches!(
            outcome,
            SendOutcome::Failed(ChatError::Rejected { status: 500 })
        ));
        assert_eq!(updates, 0);
        assert_eq!(session.messages()[1].text, session.config().error_text);
    }

    #[tokio::test]
    async fn missing_body_and_transport_errors_are_absorbed() {
        let (mut session, _backend) = session(
            FakeBackend::default()
                .reply(Reply::NoBody)
                .reply(Reply::Unreachable),
        );

        let first = session.send("one", |_| {}).await;
        let second = session.send("two", |_| {}).await;

        assert!(matches!(first, SendOutcome::Failed(ChatError::MissingBody)));
        assert!(matches!(second, SendOutcome::Failed(ChatError::Transport(_))));
        let error_text = session.config().error_text.clone();
        assert_eq!(session.messages()[1].text, error_text);
        assert_eq!(session.messages()[3].text, error_text);
    }

    #[tokio::test]
    async fn stream_failure_keeps_partial_reply() {
        let (mut session, backend) = session(
            FakeBackend::default()
                .reply(Reply::Chunks(vec![Ok("Half an"), Err("connection reset")]))
                .reply(Reply::Chunks(vec![Err("connection reset")])),
        );

        let outcome = session.send("first", |_| {}).await;
        assert!(matches!(outcome, SendOutcome::Failed(ChatError::Stream(_))));
        assert_eq!(session.messages()[1].text, "Half an");

        session.send("second", |_| {}).await;
        assert_eq!(session.messages()[3].text, session.config().error_text);

        assert!(backend.citation_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_handle_cancels_a_streaming_reply() {
        let (mut session, _backend) =
            session(FakeBackend::default().reply(Reply::Pending(vec!["Partial"])));
        let stop = session.stop_handle();

        let mut updates = Vec::new();
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            session.send("Tell me more", |text| {
                updates.push(text.to_string());
                stop.stop();
            }),
        )
        .await
        .expect("stop should end the send");

        assert!(matches!(outcome, SendOutcome::Cancelled));
        assert_eq!(updates, vec!["Partial"]);
        assert_eq!(session.messages()[1].text, "Partial");
        assert!(!session.is_streaming());

        session.stop_handle().stop();
    }

    #[tokio::test]
    async fn stopping_before_any_text_shows_stopped_text() {
        let (mut session, _backend) =
            session(FakeBackend::default().reply(Reply::Pending(vec![])));
        let stop = session.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop.stop();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(2), session.send("Hello", |_| {}))
            .await
            .expect("stop should end the send");

        assert!(matches!(outcome, SendOutcome::Cancelled));
        assert_eq!(session.messages()[1].text, session.config().stopped_text);
    }

    #[tokio::test]
    async fn dropped_send_releases_the_stream_slot() {
        let (mut session, _backend) =
            session(FakeBackend::default().reply(Reply::Pending(vec!["Partial"])));

        let result =
            tokio::time::timeout(Duration::from_millis(50), session.send("q", |_| {})).await;

        assert!(result.is_err());
        assert!(!session.is_streaming());
        assert!(session.title_lookup().is_some());
        assert_eq!(session.messages()[1].text, "Partial");
    }

    #[test]
    fn stale_registration_leaves_newer_stream_registered() {
        let slot = ActiveSlot::default();
        let first = ActiveStream::register(&slot);
        let second = ActiveStream::register(&slot);
        assert!(first.token.is_cancelled());

        drop(first);
        assert!(lock(&slot).current.is_some());
        assert!(!second.token.is_cancelled());

        drop(second);
        assert!(lock(&slot).current.is_none());
    }

    #[tokio::test]
    async fn follow_up_sends_reuse_chat_id() {
        let (mut session, backend) = session(
            FakeBackend::default()
                .reply(Reply::Chunks(vec![Ok("a")]))
                .reply(Reply::Chunks(vec![Ok("b")])),
        );

        session.send("first", |_| {}).await;
        session.send("second", |_| {}).await;

        let sent = backend.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].chat_id, sent[1].chat_id);
        assert_eq!(session.messages().len(), 4);
    }

    #[tokio::test]
    async fn quote_is_sent_as_metadata() {
        let (mut session, backend) = session(FakeBackend::default());
        let quote = TextQuote {
            text: "It was the best of times".into(),
            anchor: Some("epubcfi(/6/2!/4/1:0)".into()),
            chapter: Some("Book the First".into()),
        };

        session.send_with_quote("Why?", quote, |_| {}).await;

        let sent = backend.sent.lock().unwrap();
        assert_eq!(sent[0].metadata["quote"]["text"], "It was the best of times");
        assert_eq!(sent[0].metadata["quote"]["anchor"], "epubcfi(/6/2!/4/1:0)");
    }

    #[test]
    fn only_a_trailing_assistant_message_is_updated() {
        let mut messages = vec![Message::assistant("old"), Message::user("question")];
        assert!(!update_last_assistant(&mut messages, "new"));
        assert_eq!(messages[0].text, "old");
        assert_eq!(messages[1].text, "question");
    }

    #[tokio::test(start_paused = true)]
    async fn title_is_resolved_once_after_retries() {
        let (mut session, backend) = session(
            FakeBackend::default()
                .reply(Reply::Chunks(vec![Ok("Answer")]))
                .title(not_found())
                .title(not_found())
                .title(not_found())
                .title(titled("Intro Chapter")),
        );

        assert!(session.title_lookup().is_none());
        session.send("Question", |_| {}).await;

        let outcome = session.resolve_title().await;
        assert!(matches!(outcome, Some(TitleOutcome::Resolved { .. })));
        assert_eq!(session.title(), Some("Intro Chapter"));
        assert_eq!(backend.title_calls(), 4);

        assert!(session.resolve_title().await.is_none());
        assert_eq!(backend.title_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_chats_discards_in_flight_title() {
        let (mut session, _backend) = session(
            FakeBackend::default()
                .reply(Reply::Chunks(vec![Ok("Answer")]))
                .title(not_found())
                .title(titled("Old chat")),
        );

        session.send("Question", |_| {}).await;
        let lookup = session.title_lookup().expect("lookup due");
        let old_chat = lookup.chat_id().to_string();
        let task = tokio::spawn(lookup.run());

        session.open_chat("other-chat", vec![Message::user("hi")]);
        let outcome = task.await.unwrap();

        assert_eq!(outcome, TitleOutcome::Superseded);
        assert!(!session.apply_title(&outcome));
        assert!(!session.apply_title(&TitleOutcome::Resolved {
            chat_id: old_chat,
            title: "Old chat".into()
        }));
        assert_eq!(session.title(), None);
        assert_eq!(session.chat_id(), Some("other-chat"));
    }

    #[tokio::test]
    async fn new_chat_clears_state() {
        let (mut session, _backend) =
            session(FakeBackend::default().reply(Reply::Chunks(vec![Ok("x")])));
        session.send("q", |_| {}).await;
        let chat_id = session.chat_id().unwrap().to_string();
        assert!(session.apply_title(&TitleOutcome::Resolved {
            chat_id,
            title: "T".into()
        }));

        session.new_chat();

        assert!(session.messages().is_empty());
        assert!(session.chat_id().is_none());
        assert!(session.title().is_none());
    }
}
