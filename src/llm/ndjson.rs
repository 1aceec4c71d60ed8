//! Incremental NDJSON decoding of Ollama chat streams.
//!
//! Each line of the response body is one JSON object shaped
//! `{"message": {"role", "content"}, "done": bool}`. Lines are decoded as soon
//! as their terminating newline arrives; the body is never buffered whole.

use std::fmt;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::domain::errors::{RelayError, RelayResult};
use crate::llm::{PartialReply, ReplyStream};

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Decode one line. Blank lines yield `None`.
///
/// # Errors
/// Returns `BackendProtocol` if the line is not a valid chunk or carries an
/// `error` field.
pub fn decode_line(line: &[u8]) -> RelayResult<Option<PartialReply>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }

    let chunk: StreamChunk = serde_json::from_slice(line)
        .map_err(|err| RelayError::BackendProtocol(format!("malformed stream element: {err}")))?;

    if let Some(error) = chunk.error {
        return Err(RelayError::BackendProtocol(format!("backend reported: {error}")));
    }

    Ok(Some(PartialReply {
        content: chunk.message.map(|m| m.content).unwrap_or_default(),
        done: chunk.done,
    }))
}

/// Turn a body byte stream into a stream of partial replies.
///
/// The stream ends at end-of-body or right after an element with
/// `done = true`. A read failure before anything was delivered counts as the
/// backend being unavailable; later it is a protocol error. A line longer than
/// `max_line_bytes` is a protocol error, whether or not it is terminated.
pub fn decode_ndjson<S, B, E>(body: S, idle_timeout: Duration, max_line_bytes: usize) -> ReplyStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();
        // Bytes of `buffer` already searched for a newline.
        let mut scanned = 0_usize;
        let mut delivered = 0_usize;
        let mut finished = false;

        while !finished {
            let next = tokio::time::timeout(idle_timeout, body.next())
                .await
                .map_err(|_| RelayError::BackendTimeout(idle_timeout.as_secs()))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|err| {
                if delivered == 0 {
                    RelayError::BackendUnavailable(format!("response body read: {err}"))
                } else {
                    RelayError::BackendProtocol(format!("stream interrupted: {err}"))
                }
            })?;
            buffer.extend_from_slice(chunk.as_ref());

            let mut start = 0_usize;
            while let Some(offset) = buffer[scanned..].iter().position(|b| *b == b'\n') {
                let end = scanned + offset;
                check_line_len(end - start, max_line_bytes)?;
                let decoded = decode_line(&buffer[start..end])?;
                start = end + 1;
                scanned = start;
                if let Some(reply) = decoded {
                    delivered += 1;
                    finished = reply.done;
                    yield reply;
                    if finished {
                        break;
                    }
                }
            }
            buffer.drain(..start);
            scanned = buffer.len();
            check_line_len(buffer.len(), max_line_bytes)?;
        }

        // Final element without a trailing newline.
        if !finished {
            if let Some(reply) = decode_line(&buffer)? {
                yield reply;
            }
        }
    })
}

fn check_line_len(len: usize, max_line_bytes: usize) -> RelayResult<()> {
    if len > max_line_bytes {
        return Err(RelayError::BackendProtocol(format!(
            "stream element exceeds {max_line_bytes} bytes"
        )));
    }
    Ok(())
}
