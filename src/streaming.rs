//! Turns a resolved generation into an ordered, index-stamped event stream.
//!
//! Two sources feed the same framing:
//! - live: tokens proxied from the backend at its own pace, then a terminal
//!   event carrying usage;
//! - replay: a complete text re-chunked word by word with a fixed pause,
//!   usage riding on the last word.
//!
//! Every stream ends with [`Frame::Done`]. Dropping a stream (the client went
//! away) drops the upstream response with it, which releases the connection.

use std::{sync::Arc, time::Duration};

use async_stream::stream;
use axum::response::{
    IntoResponse,
    sse::{Event, Sse},
};
use futures_util::{Stream, StreamExt};
use tokio::time::sleep;
use tracing::warn;

use crate::{
    types::{GenerationParams, GenerationResult, Provenance, StreamEvent, Usage},
    upstream::{TokenStream, UpstreamBackend},
};

/// Pause between replayed words.
pub const REPLAY_DELAY: Duration = Duration::from_millis(50);

pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    Done,
}

impl Frame {
    pub fn into_sse(self) -> Result<Event, axum::Error> {
        match self {
            Frame::Event(event) => Event::default().json_data(event),
            Frame::Done => Ok(Event::default().data(DONE_MARKER)),
        }
    }
}

/// Streams live from upstream when the text came from there, otherwise
/// replays the resolved text. A fallback resolution never retries the
/// backend, so the streamed text always matches the logged provenance. A
/// live stream that cannot be opened also degrades to replay.
pub fn frame_result(
    upstream: Option<Arc<dyn UpstreamBackend>>,
    params: GenerationParams,
    result: GenerationResult,
) -> impl Stream<Item = Frame> + Send + 'static {
    stream! {
        let live_tokens = match (&upstream, result.provenance) {
            (Some(upstream), Provenance::Upstream) => match upstream.generate_stream(&params).await {
                Ok(tokens) => Some(tokens),
                Err(err) => {
                    warn!(error = %err, "could not open upstream stream, replaying resolved text");
                    None
                }
            },
            _ => None,
        };

        let mut frames = match live_tokens {
            Some(tokens) => live(tokens, result.text, result.usage).boxed(),
            None => replay(result.text, result.usage).boxed(),
        };
        while let Some(frame) = frames.next().await {
            yield frame;
        }
    }
}

/// Proxies backend tokens, closing with a terminal event that carries the
/// usage of the resolved text (the same usage that gets logged). If the
/// backend fails mid-flight, `resolved_text` is replayed with indices
/// continuing after the last token sent; tokens already delivered stay
/// delivered.
pub fn live(
    mut tokens: TokenStream,
    resolved_text: String,
    usage: Usage,
) -> impl Stream<Item = Frame> + Send + 'static {
    stream! {
        let mut index = 0;

        while let Some(item) = tokens.next().await {
            match item {
                Ok(token) => {
                    yield Frame::Event(StreamEvent { token, index, usage: None });
                    index += 1;
                }
                Err(err) => {
                    warn!(error = %err, emitted = index, "upstream stream failed, replaying resolved text");
                    for (i, event) in replay_events(&resolved_text, usage, index).into_iter().enumerate() {
                        if i > 0 {
                            sleep(REPLAY_DELAY).await;
                        }
                        yield Frame::Event(event);
                    }
                    yield Frame::Done;
                    return;
                }
            }
        }

        yield Frame::Event(StreamEvent {
            token: String::new(),
            index,
            usage: Some(usage),
        });
        yield Frame::Done;
    }
}

/// Re-chunks `text` word by word with [`REPLAY_DELAY`] between words.
pub fn replay(text: String, usage: Usage) -> impl Stream<Item = Frame> + Send + 'static {
    stream! {
        for (i, event) in replay_events(&text, usage, 0).into_iter().enumerate() {
            if i > 0 {
                sleep(REPLAY_DELAY).await;
            }
            yield Frame::Event(event);
        }
        yield Frame::Done;
    }
}

/// Word events for `text`, numbered from `first_index`. Every word but the
/// first gets its leading space back, and only the last carries `usage`.
/// Text without words yields a single empty terminal event so usage is
/// still delivered.
pub fn replay_events(text: &str, usage: Usage, first_index: usize) -> Vec<StreamEvent> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return vec![StreamEvent {
            token: String::new(),
            index: first_index,
            usage: Some(usage),
        }];
    }

    let last = words.len() - 1;
    words
        .into_iter()
        .enumerate()
        .map(|(i, word)| StreamEvent {
            token: if i == 0 {
                word.to_string()
            } else {
                format!(" {word}")
            },
            index: first_index + i,
            usage: (i == last).then_some(usage),
        })
        .collect()
}

/// Server-sent-events response for a frame stream.
pub fn sse_response(frames: impl Stream<Item = Frame> + Send + 'static) -> impl IntoResponse {
    (
        [("x-accel-buffering", "no")],
        Sse::new(frames.map(Frame::into_sse)),
    )
}
