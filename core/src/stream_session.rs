//! One streaming run per thread, published through a `watch` channel.
//!
//! Every update is a function of the immediately prior published value and
//! is applied only while the generation that produced it is still current.
//! Stopping or restarting a session bumps the generation, so events from an
//! abandoned connection that are already queued are dropped.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use studio_protocol::Message;
use studio_protocol::RunRequest;
use studio_protocol::StreamState;
use studio_protocol::StreamStatus;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::client::ApiClient;
use crate::config::Config;
use crate::config::DataEventPolicy;
use crate::error::StudioErr;
use crate::sse::RunEvent;
use crate::sse::process_sse;

pub const STREAM_EVENT_ERROR_MESSAGE: &str = "Error received while streaming output.";
pub const TRANSPORT_ERROR_MESSAGE: &str = "Error in stream.";

/// Lifecycle of the session's connection. `Inflight` carries the generation
/// token of the run that owns the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Inflight(u64),
    Done,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub phase: Phase,
    pub stream: Option<StreamState>,
    /// Human readable failure shown to the user; cleared by `start`, `stop`
    /// and checkpoint navigation.
    pub error_message: Option<String>,
}

impl SessionState {
    pub fn is_inflight(&self) -> bool {
        matches!(self.phase, Phase::Inflight(_))
    }

    pub fn status(&self) -> Option<StreamStatus> {
        self.stream.as_ref().map(|s| s.status)
    }
}

pub(crate) fn started(input: Option<&[Message]>) -> StreamState {
    StreamState {
        status: StreamStatus::Inflight,
        messages: Some(input.map(<[Message]>::to_vec).unwrap_or_default()),
        run_id: None,
        merge: true,
    }
}

pub(crate) fn on_data(
    prev: Option<&StreamState>,
    messages: Vec<Message>,
    policy: DataEventPolicy,
) -> StreamState {
    let merge = match policy {
        DataEventPolicy::Replace => false,
        DataEventPolicy::Merge => prev.is_some_and(|s| s.merge),
    };
    StreamState {
        status: StreamStatus::Inflight,
        messages: Some(messages),
        run_id: prev.and_then(|s| s.run_id.clone()),
        merge,
    }
}

pub(crate) fn on_metadata(prev: Option<&StreamState>, run_id: String) -> StreamState {
    match prev {
        Some(prev) => StreamState {
            run_id: Some(run_id),
            ..prev.clone()
        },
        None => StreamState {
            status: StreamStatus::Inflight,
            messages: None,
            run_id: Some(run_id),
            merge: false,
        },
    }
}

pub(crate) fn on_failure(prev: Option<&StreamState>) -> StreamState {
    StreamState {
        status: StreamStatus::Error,
        messages: prev.and_then(|s| s.messages.clone()),
        run_id: prev.and_then(|s| s.run_id.clone()),
        merge: prev.is_some_and(|s| s.merge),
    }
}

pub(crate) fn on_closed(prev: Option<&StreamState>) -> StreamState {
    match prev {
        Some(prev) if prev.status == StreamStatus::Error => prev.clone(),
        Some(prev) => StreamState {
            status: StreamStatus::Done,
            ..prev.clone()
        },
        None => StreamState {
            status: StreamStatus::Done,
            messages: None,
            run_id: None,
            merge: false,
        },
    }
}

pub(crate) fn stopped(prev: Option<&StreamState>, clear: bool) -> StreamState {
    let run_id = prev.and_then(|s| s.run_id.clone());
    if clear {
        StreamState {
            status: StreamStatus::Done,
            messages: None,
            run_id,
            merge: false,
        }
    } else {
        StreamState {
            status: StreamStatus::Done,
            messages: prev.and_then(|s| s.messages.clone()),
            run_id,
            merge: false,
        }
    }
}

/// Applies `event` on behalf of generation `token`. Returns whether anything
/// was published.
fn apply_event(
    tx: &watch::Sender<SessionState>,
    token: u64,
    event: RunEvent,
    policy: DataEventPolicy,
) -> bool {
    tx.send_if_modified(|state| {
        if state.phase != Phase::Inflight(token) {
            trace!("dropping event from stale run {token}");
            return false;
        }
        let prev = state.stream.as_ref();
        let next = match event {
            RunEvent::Data(messages) => {
                let next = on_data(prev, messages, policy);
                if prev == Some(&next) {
                    return false;
                }
                next
            }
            RunEvent::Metadata(metadata) => on_metadata(prev, metadata.run_id),
            RunEvent::Error(err) => {
                warn!("run stream reported an error: {err}");
                state.phase = Phase::Error;
                state.error_message = Some(STREAM_EVENT_ERROR_MESSAGE.to_string());
                on_failure(prev)
            }
            RunEvent::Failed(err) => {
                warn!("run stream failed: {err}");
                state.phase = Phase::Error;
                state.error_message = Some(TRANSPORT_ERROR_MESSAGE.to_string());
                on_failure(prev)
            }
            RunEvent::Closed => {
                state.phase = Phase::Done;
                on_closed(prev)
            }
        };
        state.stream = Some(next);
        true
    })
}

pub struct StreamSession {
    thread_id: String,
    state_tx: Arc<watch::Sender<SessionState>>,
    generation: u64,
    cancel: Option<CancellationToken>,
    policy: DataEventPolicy,
    idle_timeout: Option<Duration>,
}

impl StreamSession {
    pub fn new(thread_id: impl Into<String>, config: &Config) -> Self {
        let (state_tx, _) = watch::channel(SessionState::default());
        Self {
            thread_id: thread_id.into(),
            state_tx: Arc::new(state_tx),
            generation: 0,
            cancel: None,
            policy: config.data_event_policy,
            idle_timeout: config.stream_idle_timeout(),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub fn is_inflight(&self) -> bool {
        self.state_tx.borrow().is_inflight()
    }

    /// Starts a run. The optimistic echo of `request.input` is published
    /// before this returns; the request and the event loop run on a spawned
    /// task. Any run already in flight is abandoned first.
    pub fn start(&mut self, client: &ApiClient, request: RunRequest) -> u64 {
        let token = self.begin(request.input.as_deref());
        self.spawn_run(client, token, request);
        token
    }

    /// Starts a run whose input is an arbitrary graph state rather than a
    /// message list. Nothing is echoed; the transcript keeps showing the
    /// thread state until the stream sends data.
    pub fn start_with_state(
        &mut self,
        client: &ApiClient,
        request: RunRequest<Option<Value>>,
    ) -> u64 {
        let token = self.begin(None);
        self.spawn_run(client, token, request);
        token
    }

    fn spawn_run<I>(&mut self, client: &ApiClient, token: u64, request: RunRequest<I>)
    where
        I: Serialize + Send + Sync + 'static,
    {
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let tx = Arc::clone(&self.state_tx);
        let client = client.clone();
        let policy = self.policy;
        let idle_timeout = self.idle_timeout;
        debug!("starting run {token} on thread {}", self.thread_id);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => trace!("run {token} cancelled"),
                _ = run_stream(&client, &request, &tx, token, policy, idle_timeout) => {}
            }
        });
    }

    /// Publishes the optimistic echo for a new generation and returns its
    /// token.
    pub(crate) fn begin(&mut self, input: Option<&[Message]>) -> u64 {
        self.cancel_connection();
        self.generation += 1;
        let token = self.generation;
        self.state_tx.send_modify(|state| {
            state.phase = Phase::Inflight(token);
            state.stream = Some(started(input));
            state.error_message = None;
        });
        token
    }

    pub(crate) fn apply(&self, token: u64, event: RunEvent) -> bool {
        apply_event(&self.state_tx, token, event, self.policy)
    }

    /// Cancels the connection. With `clear` the streamed messages are
    /// discarded (only `run_id` survives); otherwise they are frozen as done.
    pub fn stop(&mut self, clear: bool) {
        self.settle(clear, true);
    }

    /// Like `stop(true)` but keeps any error message visible. Used once the
    /// refreshed server state has superseded the streamed transcript.
    pub fn release(&mut self) {
        self.settle(true, false);
    }

    fn settle(&mut self, clear: bool, clear_error: bool) {
        self.cancel_connection();
        self.generation += 1;
        self.state_tx.send_if_modified(|state| {
            let next = stopped(state.stream.as_ref(), clear);
            let changed = state.stream.as_ref() != Some(&next)
                || state.phase != Phase::Idle
                || (clear_error && state.error_message.is_some());
            state.phase = Phase::Idle;
            state.stream = Some(next);
            if clear_error {
                state.error_message = None;
            }
            changed
        });
    }

    pub fn set_error_message(&self, message: Option<String>) {
        self.state_tx.send_if_modified(|state| {
            if state.error_message == message {
                return false;
            }
            state.error_message = message;
            true
        });
    }

    fn cancel_connection(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel_connection();
    }
}

async fn run_stream<I: Serialize>(
    client: &ApiClient,
    request: &RunRequest<I>,
    tx: &watch::Sender<SessionState>,
    token: u64,
    policy: DataEventPolicy,
    idle_timeout: Option<Duration>,
) {
    let response = match client.open_run_stream(request).await {
        Ok(response) => response,
        Err(err) => {
            apply_event(tx, token, RunEvent::Failed(err), policy);
            return;
        }
    };

    let (tx_event, mut rx_event) = mpsc::channel::<RunEvent>(64);
    let stream = response.bytes_stream().map_err(StudioErr::Reqwest);
    let pump = process_sse(stream, tx_event, idle_timeout);
    let publish = async {
        while let Some(event) = rx_event.recv().await {
            let terminal = event.is_terminal();
            apply_event(tx, token, event, policy);
            if terminal {
                break;
            }
        }
    };
    tokio::join!(pump, publish);
}
