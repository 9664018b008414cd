//! Thread selection and the per-thread session registry.

use std::collections::HashMap;

use serde_json::Map;
use serde_json::Value;
use studio_protocol::HistorySnapshot;
use studio_protocol::Message;
use studio_protocol::StreamStatus;
use studio_protocol::Thread;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::client::ApiClient;
use crate::client::IngestFile;
use crate::config::Config;
use crate::error::Result;
use crate::message_edit::MessageEditor;
use crate::reconcile::ThreadView;
use crate::stream_session::SessionState;
use crate::stream_session::StreamSession;

/// Shown when a stream failed without a more specific message.
pub const GENERIC_ERROR_MESSAGE: &str = "An error has occurred. Please try again.";

/// Stream sessions keyed by thread id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, StreamSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread_id: &str) -> Option<&StreamSession> {
        self.sessions.get(thread_id)
    }

    pub fn get_mut(&mut self, thread_id: &str) -> Option<&mut StreamSession> {
        self.sessions.get_mut(thread_id)
    }

    pub fn get_or_create(&mut self, thread_id: &str, config: &Config) -> &mut StreamSession {
        self.sessions
            .entry(thread_id.to_string())
            .or_insert_with(|| StreamSession::new(thread_id, config))
    }

    /// Stops and clears every streaming session except the one for
    /// `thread_id`.
    pub fn stop_others(&mut self, thread_id: &str) {
        for (id, session) in &mut self.sessions {
            if id != thread_id && session.is_inflight() {
                debug!("stopping run on thread {id}");
                session.stop(true);
            }
        }
    }

    pub fn inflight_threads(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_inflight())
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn remove(&mut self, thread_id: &str) -> Option<StreamSession> {
        self.sessions.remove(thread_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Read-only picture of the active thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub thread_id: String,
    pub transcript: Vec<Message>,
    pub editing: Vec<bool>,
    pub timeline: Vec<HistorySnapshot>,
    pub active_index: usize,
    pub status: Option<StreamStatus>,
    pub run_id: Option<String>,
    pub resumeable: bool,
    pub error_message: Option<String>,
    pub can_rerun: bool,
    pub can_permit: bool,
}

struct ActiveThread {
    view: ThreadView,
    updates: watch::Receiver<SessionState>,
}

pub struct SessionController {
    config: Config,
    client: ApiClient,
    sessions: SessionRegistry,
    /// Default run configuration per assistant id.
    assistants: HashMap<String, Map<String, Value>>,
    active: Option<ActiveThread>,
}

impl SessionController {
    pub fn new(config: Config) -> Self {
        let client = ApiClient::new(&config);
        Self {
            config,
            client,
            sessions: SessionRegistry::new(),
            assistants: HashMap::new(),
            active: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn register_assistant(&mut self, assistant_id: impl Into<String>, config: Map<String, Value>) {
        self.assistants.insert(assistant_id.into(), config);
    }

    pub fn active_thread(&self) -> Option<&Thread> {
        self.active.as_ref().map(|a| a.view.thread())
    }

    /// Leaves the current thread (discarding its streamed output) and loads
    /// `thread`. With `None` the controller is left without a thread.
    pub async fn switch_thread(&mut self, thread: Option<Thread>) -> Result<()> {
        if let Some(prev) = self.active.take()
            && let Some(mut session) = self.sessions.remove(prev.view.thread_id())
        {
            session.stop(true);
            debug!("released session for thread {}", prev.view.thread_id());
        }
        let Some(thread) = thread else {
            return Ok(());
        };

        info!("switching to thread {}", thread.thread_id);
        let session = self.sessions.get_or_create(&thread.thread_id, &self.config);
        session.set_error_message(None);
        let mut updates = session.subscribe();
        let mut view = ThreadView::new(thread);
        let loaded = view.load(&self.client).await;
        if let Err(err) = &loaded {
            warn!("failed to load thread {}: {err}", view.thread_id());
            session.set_error_message(Some(err.to_string()));
        }
        let state = updates.borrow_and_update().clone();
        view.observe(&state);
        self.active = Some(ActiveThread { view, updates });
        loaded
    }

    /// Starts a turn on the active thread: uploads `files`, then streams a
    /// run whose input is the local transcript plus the new human message.
    /// Returns false (and does nothing) without an active thread, without a
    /// registered configuration for its assistant, or while a message is
    /// being edited.
    pub async fn send_message(&mut self, text: Option<&str>, files: &[IngestFile]) -> Result<bool> {
        let Some(active) = self.active.as_mut() else {
            debug!("send_message ignored: no active thread");
            return Ok(false);
        };
        let thread = active.view.thread().clone();
        if !self.assistants.contains_key(&thread.assistant_id) {
            debug!("send_message ignored: no configuration for assistant {}", thread.assistant_id);
            return Ok(false);
        }
        if active.view.is_editing() {
            debug!("send_message ignored: a message is being edited");
            return Ok(false);
        }

        let session = self.sessions.get_or_create(&thread.thread_id, &self.config);
        if !files.is_empty()
            && let Err(err) = self.client.ingest_files(&thread.thread_id, files).await
        {
            session.set_error_message(Some(err.to_string()));
            return Err(err);
        }

        let mut input = active.view.transcript().to_vec();
        if let Some(text) = text {
            input.push(Message::human(text));
        }
        let input = (!input.is_empty()).then_some(input);
        let config = active
            .view
            .active_snapshot()
            .map(|s| s.config.clone())
            .unwrap_or_default();

        self.sessions.stop_others(&thread.thread_id);
        let session = self.sessions.get_or_create(&thread.thread_id, &self.config);
        active.view.start_run(&self.client, session, input, Some(config));
        Ok(true)
    }

    pub async fn rerun(&mut self) -> Result<bool> {
        let Some(active) = self.active.as_mut() else {
            return Ok(false);
        };
        let thread_id = active.view.thread_id().to_string();
        self.sessions.stop_others(&thread_id);
        let session = self.sessions.get_or_create(&thread_id, &self.config);
        active.view.rerun(&self.client, session).await
    }

    pub async fn permit_tool_execution(&mut self) -> Result<bool> {
        let Some(active) = self.active.as_mut() else {
            return Ok(false);
        };
        let thread_id = active.view.thread_id().to_string();
        self.sessions.stop_others(&thread_id);
        let session = self.sessions.get_or_create(&thread_id, &self.config);
        active.view.permit_tool_execution(&self.client, session).await
    }

    /// Runs the active thread's graph from the selected checkpoint with a
    /// raw state input. Returns false without an active thread.
    pub fn run_state(&mut self, state: Option<Value>) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let thread_id = active.view.thread_id().to_string();
        self.sessions.stop_others(&thread_id);
        let session = self.sessions.get_or_create(&thread_id, &self.config);
        active.view.start_state_run(&self.client, session, state);
        true
    }

    pub async fn resume_with_values(&mut self, values: Value) -> Result<bool> {
        let Some(active) = self.active.as_mut() else {
            return Ok(false);
        };
        let thread_id = active.view.thread_id().to_string();
        self.sessions.stop_others(&thread_id);
        let session = self.sessions.get_or_create(&thread_id, &self.config);
        active.view.resume_with_values(&self.client, session, values).await
    }

    pub async fn run_eager(&mut self, input: Value) -> Result<Option<Value>> {
        let Some(active) = self.active.as_ref() else {
            return Ok(None);
        };
        let config = self.assistants.get(&active.view.thread().assistant_id).cloned();
        let session = self.sessions.get_or_create(active.view.thread_id(), &self.config);
        active
            .view
            .run_eager(&self.client, session, input, config)
            .await
            .map(Some)
    }

    pub fn update_message(&mut self, message: Message) -> bool {
        self.active
            .as_mut()
            .is_some_and(|active| active.view.update_message(message))
    }

    pub fn begin_edit(&mut self, index: usize) -> Option<MessageEditor> {
        self.active.as_mut()?.view.begin_edit(index)
    }

    pub fn commit_edit(&mut self, editor: MessageEditor) -> bool {
        self.active
            .as_mut()
            .is_some_and(|active| active.view.commit_edit(editor))
    }

    pub fn cancel_edit(&mut self, index: usize) {
        if let Some(active) = self.active.as_mut() {
            active.view.cancel_edit(index);
        }
    }

    pub fn select_checkpoint(&mut self, index: usize) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let session = self.sessions.get_or_create(active.view.thread_id(), &self.config);
        active.view.select_checkpoint(index, session)
    }

    /// Stops the active thread's run. With `clear` the streamed output is
    /// discarded; otherwise it stays visible as a finished run.
    pub fn stop(&mut self, clear: bool) {
        if let Some(active) = self.active.as_ref()
            && let Some(session) = self.sessions.get_mut(active.view.thread_id())
        {
            session.stop(clear);
        }
    }

    pub fn is_inflight(&self) -> bool {
        self.active
            .as_ref()
            .and_then(|active| self.sessions.get(active.view.thread_id()))
            .is_some_and(StreamSession::is_inflight)
    }

    /// Waits for the active session to publish and folds the new state into
    /// the view. Returns false when there is nothing to wait on.
    pub async fn sync(&mut self) -> Result<bool> {
        let Some(active) = self.active.as_mut() else {
            return Ok(false);
        };
        if active.updates.changed().await.is_err() {
            return Ok(false);
        }
        let state = active.updates.borrow_and_update().clone();
        self.reconcile(&state).await;
        Ok(true)
    }

    /// Syncs until the active run is no longer streaming.
    pub async fn run_until_settled(&mut self) -> Result<()> {
        loop {
            let unsettled = self
                .active
                .as_ref()
                .is_some_and(|active| active.view.awaiting_settle());
            if !self.is_inflight() && !unsettled {
                return Ok(());
            }
            if !self.sync().await? {
                return Ok(());
            }
        }
    }

    async fn reconcile(&mut self, state: &SessionState) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let observed = active.view.observe(state);
        if observed.transcript_changed
            && let Err(err) = active.view.refresh_history(&self.client).await
        {
            warn!("failed to refresh history: {err}");
        }
        if !observed.settled {
            return;
        }

        let session = self.sessions.get_or_create(active.view.thread_id(), &self.config);
        if let Err(err) = active.view.settle(&self.client, session).await {
            warn!("failed to refresh thread state: {err}");
            session.set_error_message(Some(err.to_string()));
        }
        if let Err(err) = active.view.refresh_history(&self.client).await {
            warn!("failed to refresh history: {err}");
        }
        active.updates.borrow_and_update();
    }

    pub fn view(&self) -> Option<ViewSnapshot> {
        let active = self.active.as_ref()?;
        let view = &active.view;
        let state = self
            .sessions
            .get(view.thread_id())
            .map(StreamSession::state)
            .unwrap_or_default();
        let status = state.status();
        let error_message = state.error_message.clone().or_else(|| {
            (status == Some(StreamStatus::Error)).then(|| GENERIC_ERROR_MESSAGE.to_string())
        });
        Some(ViewSnapshot {
            thread_id: view.thread_id().to_string(),
            transcript: view.transcript().to_vec(),
            editing: view.editing().to_vec(),
            timeline: view.timeline().into_iter().cloned().collect(),
            active_index: view.active_index(),
            status,
            run_id: state.stream.as_ref().and_then(|s| s.run_id.clone()),
            resumeable: view.resumeable(),
            error_message,
            can_rerun: view.can_rerun(),
            can_permit: view.can_permit(&state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_stops_other_threads_only() {
        let config = Config::default();
        let mut registry = SessionRegistry::new();
        registry.get_or_create("t1", &config).begin(None);
        registry.get_or_create("t2", &config).begin(None);
        assert_eq!(registry.inflight_threads(), vec!["t1", "t2"]);

        registry.stop_others("t2");
        assert_eq!(registry.inflight_threads(), vec!["t2"]);
        let stopped = registry.get("t1").map(StreamSession::state).unwrap_or_default();
        assert_eq!(stopped.stream.and_then(|s| s.messages), None);
    }

    #[tokio::test]
    async fn send_message_without_thread_or_assistant_is_a_no_op() {
        let mut controller = SessionController::new(Config {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Config::default()
        });
        assert!(!controller.send_message(Some("hi"), &[]).await.unwrap_or(true));
        assert!(controller.view().is_none());
        assert!(!controller.sync().await.unwrap_or(true));
        assert!(!controller.run_state(None));
        assert!(
            !controller
                .resume_with_values(Value::Null)
                .await
                .unwrap_or(true)
        );
    }
}
