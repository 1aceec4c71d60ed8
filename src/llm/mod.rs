//! Streaming completion backends.

pub mod ndjson;
pub mod ollama_chat;

use std::pin::Pin;

use futures::Stream;

use crate::domain::errors::RelayResult;
use crate::domain::turn::Turn;

pub use ollama_chat::OllamaChatClient;

/// One incremental element of a streamed reply.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PartialReply {
    /// Content fragment, possibly empty.
    pub content: String,
    /// Whether the backend marked this as the final element.
    pub done: bool,
}

/// Lazy, finite, non-restartable sequence of reply fragments.
///
/// Dropping the stream cancels the underlying backend call.
pub type ReplyStream = Pin<Box<dyn Stream<Item = RelayResult<PartialReply>> + Send + 'static>>;

/// A chat-completion service that streams its reply.
pub trait CompletionBackend: Send + Sync {
    /// Send the full transcript and stream back the reply.
    ///
    /// Nothing is sent until the returned stream is first polled.
    fn send(&self, transcript: &[Turn]) -> ReplyStream;
}
