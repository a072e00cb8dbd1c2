//! Streaming chat replies and book citations for an EPUB reader.
//!
//! A [`ChatSession`] sends the reader's question, folds the streamed reply
//! into its message list and fetches the citations attached to it.
//! [`CitationIndex`] locates markers in reply text and [`anchor::resolve`]
//! turns a citation into a place in the book.

pub mod anchor;
pub mod backend;
pub mod chat;
pub mod citation;
pub mod config;
pub mod error;
pub mod models;
pub mod stream;

pub use backend::{ChatBackend, ChatResponse, HttpBackend};
pub use chat::{ChatSession, SendOutcome, StopHandle, TitleLookup, TitleOutcome};
pub use citation::CitationIndex;
pub use config::{ChatConfig, RetryPolicy};
pub use error::{BackendError, ChatError, StreamError};
pub use stream::{StreamAggregator, StreamOutcome, StreamState};
