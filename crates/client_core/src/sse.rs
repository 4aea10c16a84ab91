//! `text/event-stream` framing over a raw body stream.
//!
//! Only the `data` payload of each event is forwarded. Events without data (comments,
//! keep-alives, bare `event`/`id`/`retry` fields) produce nothing.

use std::fmt::Display;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::{stream, Stream, StreamExt};
use tracing::debug;

use crate::{connector::FrameStream, error::TransportError};

/// Adapts a raw body stream (e.g. `reqwest::Response::bytes_stream`) into one item per
/// event payload. The first error is yielded once as [`TransportError::Read`] and ends
/// the stream.
pub fn sse_frames<S, B, E>(body: S) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let events = body.eventsource().filter_map(|item| async move {
        match item {
            Ok(event) if event.data.is_empty() => None,
            Ok(event) => Some(Ok(event.data)),
            Err(EventStreamError::Transport(err)) => {
                Some(Err(TransportError::Read(err.to_string())))
            }
            Err(err) => {
                debug!(%err, "malformed event stream");
                Some(Err(TransportError::Read(err.to_string())))
            }
        }
    });

    let frames = stream::unfold((Box::pin(events), false), |(mut events, failed)| async move {
        if failed {
            return None;
        }
        let item = events.next().await?;
        let failed = item.is_err();
        Some((item, (events, failed)))
    });
    Box::pin(frames)
}

#[cfg(test)]
#[path = "tests/sse_tests.rs"]
mod tests;
