//! Decoding of a run's server-sent event stream.
//!
//! The backend emits three event names: `data` (a JSON array holding the
//! current transcript of the run), `metadata` (`{"run_id": ...}`) and `error`.
//! Anything else, including the trailing `end` event, is ignored.

use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::prelude::*;
use studio_protocol::Message;
use studio_protocol::RunMetadata;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;
use tracing::trace;

use crate::error::Result;
use crate::error::StudioErr;

#[derive(Debug)]
pub(crate) enum RunEvent {
    Data(Vec<Message>),
    Metadata(RunMetadata),
    /// Explicit `error` event.
    Error(StudioErr),
    /// The server closed the stream normally.
    Closed,
    /// Connection or decoding failure, or the idle timeout elapsed.
    Failed(StudioErr),
}

impl RunEvent {
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Closed | RunEvent::Failed(_))
    }
}

pub(crate) async fn process_sse<S>(
    stream: S,
    tx_event: mpsc::Sender<RunEvent>,
    idle_timeout: Option<Duration>,
) where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut stream = stream.eventsource();

    loop {
        let next = match idle_timeout {
            Some(limit) => match timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let _ = tx_event
                        .send(RunEvent::Failed(StudioErr::Transport(
                            "idle timeout waiting for SSE".into(),
                        )))
                        .await;
                    return;
                }
            },
            None => stream.next().await,
        };

        let sse = match next {
            Some(Ok(sse)) => sse,
            Some(Err(e)) => {
                debug!("SSE Error: {e:#}");
                let _ = tx_event
                    .send(RunEvent::Failed(StudioErr::Transport(e.to_string())))
                    .await;
                return;
            }
            None => {
                let _ = tx_event.send(RunEvent::Closed).await;
                return;
            }
        };

        trace!("SSE event {}: {}", sse.event, sse.data);

        let event = match sse.event.as_str() {
            "data" => match serde_json::from_str::<Vec<Message>>(&sse.data) {
                Ok(messages) => RunEvent::Data(messages),
                Err(e) => {
                    debug!("Failed to parse data event: {e}, data: {}", excerpt(&sse.data));
                    continue;
                }
            },
            "metadata" => match serde_json::from_str::<RunMetadata>(&sse.data) {
                Ok(metadata) => RunEvent::Metadata(metadata),
                Err(e) => {
                    debug!("Failed to parse metadata event: {e}, data: {}", excerpt(&sse.data));
                    continue;
                }
            },
            "error" => RunEvent::Error(StudioErr::Stream(sse.data)),
            _ => continue,
        };

        if tx_event.send(event).await.is_err() {
            // Receiver dropped: the session was stopped.
            return;
        }
    }
}

fn excerpt(data: &str) -> &str {
    const MAX: usize = 600;
    if data.len() <= MAX {
        return data;
    }
    let mut end = MAX;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    &data[..end]
}
