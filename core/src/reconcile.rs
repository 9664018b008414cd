//! Reconciles a thread's server state, its checkpoint timeline, the live
//! stream and the user's local edits into the transcript the caller sees.

use serde_json::Map;
use serde_json::Value;
use studio_protocol::EagerRunRequest;
use studio_protocol::HistorySnapshot;
use studio_protocol::Message;
use studio_protocol::RunRequest;
use studio_protocol::StateUpdate;
use studio_protocol::StreamState;
use studio_protocol::Thread;
use tracing::debug;
use tracing::warn;

use crate::client::ApiClient;
use crate::error::Result;
use crate::history::HistoryStore;
use crate::message_edit::MessageEditor;
use crate::stream_session::SessionState;
use crate::stream_session::StreamSession;

/// Transcript implied by the thread state and the stream.
pub fn merge_transcript(baseline: &[Message], stream: Option<&StreamState>) -> Vec<Message> {
    match stream.and_then(|s| s.messages.as_ref().map(|m| (s.merge, m))) {
        Some((true, messages)) => baseline.iter().chain(messages).cloned().collect(),
        Some((false, messages)) => messages.clone(),
        None => baseline.to_vec(),
    }
}

/// What changed as a result of observing a new session state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Observed {
    pub transcript_changed: bool,
    /// The stream just left `inflight`.
    pub settled: bool,
}

#[derive(Debug)]
pub struct ThreadView {
    thread: Thread,
    /// Values of the last fetched thread state.
    baseline: Vec<Message>,
    resumeable: bool,
    history: HistoryStore,
    /// Last transcript computed from `baseline` and the stream.
    server_transcript: Vec<Message>,
    /// Editable copy shown to the user.
    local: Vec<Message>,
    editing: Vec<bool>,
    active_index: usize,
    navigated: bool,
    was_inflight: bool,
}

impl ThreadView {
    pub fn new(thread: Thread) -> Self {
        Self {
            thread,
            baseline: Vec::new(),
            resumeable: false,
            history: HistoryStore::new(),
            server_transcript: Vec::new(),
            local: Vec::new(),
            editing: Vec::new(),
            active_index: 0,
            navigated: false,
            was_inflight: false,
        }
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn thread_id(&self) -> &str {
        &self.thread.thread_id
    }

    pub fn baseline(&self) -> &[Message] {
        &self.baseline
    }

    /// The local transcript, including unsaved edits.
    pub fn transcript(&self) -> &[Message] {
        &self.local
    }

    pub fn editing(&self) -> &[bool] {
        &self.editing
    }

    pub fn is_editing(&self) -> bool {
        self.editing.iter().any(|&e| e)
    }

    pub fn resumeable(&self) -> bool {
        self.resumeable
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn timeline(&self) -> Vec<&HistorySnapshot> {
        self.history.timeline()
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active_snapshot(&self) -> Option<&HistorySnapshot> {
        self.history.snapshot_at(self.active_index)
    }

    pub fn is_latest(&self) -> bool {
        self.active_index + 1 >= self.history.timeline_len()
    }

    /// A run was observed streaming and its end has not been seen yet.
    pub fn awaiting_settle(&self) -> bool {
        self.was_inflight
    }

    pub fn can_rerun(&self) -> bool {
        !self.is_editing() && self.active_index + 1 < self.history.timeline_len()
    }

    pub fn can_permit(&self, state: &SessionState) -> bool {
        self.resumeable && self.is_latest() && !state.is_inflight()
    }

    /// Fetches thread state and history and resets local edits and
    /// navigation.
    pub async fn load(&mut self, client: &ApiClient) -> Result<()> {
        let thread_id = self.thread.thread_id.clone();
        let (state, log) = tokio::try_join!(
            client.get_thread_state(&thread_id),
            client.get_history(&thread_id)
        )?;
        self.resumeable = state.resumeable;
        self.baseline = state.values;
        self.server_transcript = self.baseline.clone();
        self.set_local(self.baseline.clone());
        self.history.replace(&thread_id, log);
        self.navigated = false;
        self.snap_to_latest();
        Ok(())
    }

    pub async fn refresh_history(&mut self, client: &ApiClient) -> Result<()> {
        let before = self.history.timeline_len();
        self.history.load(client, &self.thread.thread_id).await?;
        if self.history.timeline_len() != before {
            self.navigated = false;
        }
        if !self.navigated {
            self.snap_to_latest();
        }
        Ok(())
    }

    fn snap_to_latest(&mut self) {
        self.active_index = self.history.timeline_len().saturating_sub(1);
    }

    fn set_local(&mut self, messages: Vec<Message>) {
        self.editing = vec![false; messages.len()];
        self.local = messages;
    }

    /// Folds a newly published session state into the view.
    pub fn observe(&mut self, state: &SessionState) -> Observed {
        let transcript = merge_transcript(&self.baseline, state.stream.as_ref());
        let transcript_changed = transcript != self.server_transcript;
        if transcript_changed {
            self.server_transcript = transcript.clone();
            self.set_local(transcript);
        }
        let inflight = state.is_inflight();
        let settled = self.was_inflight && !inflight;
        self.was_inflight = inflight;
        Observed {
            transcript_changed,
            settled,
        }
    }

    /// Called once the stream has left `inflight`: the refreshed server state
    /// replaces the streamed transcript.
    pub async fn settle(&mut self, client: &ApiClient, session: &mut StreamSession) -> Result<()> {
        self.resumeable = false;
        let state = client.get_thread_state(&self.thread.thread_id).await?;
        self.baseline = state.values;
        self.resumeable = state.resumeable;
        session.release();
        self.observe(&session.state());
        Ok(())
    }

    /// Replaces the local message with the same id. Returns false when no
    /// message matches.
    pub fn update_message(&mut self, message: Message) -> bool {
        let Some(id) = message.id.as_deref() else {
            return false;
        };
        let Some(pos) = self.local.iter().position(|m| m.id.as_deref() == Some(id)) else {
            debug!("no local message with id {id}");
            return false;
        };
        let mut next = self.local.clone();
        next[pos] = message;
        self.set_local(next);
        true
    }

    pub fn begin_edit(&mut self, index: usize) -> Option<MessageEditor> {
        let message = self.local.get(index)?;
        let editor = MessageEditor::new(index, message);
        self.editing[index] = true;
        Some(editor)
    }

    pub fn commit_edit(&mut self, editor: MessageEditor) -> bool {
        let index = editor.index();
        let updated = self.update_message(editor.finish());
        if !updated && let Some(flag) = self.editing.get_mut(index) {
            *flag = false;
        }
        updated
    }

    pub fn cancel_edit(&mut self, index: usize) {
        if let Some(flag) = self.editing.get_mut(index) {
            *flag = false;
        }
    }

    /// Shows the checkpoint at timeline `index`. Not allowed while a run is
    /// streaming.
    pub fn select_checkpoint(&mut self, index: usize, session: &StreamSession) -> bool {
        if session.is_inflight() {
            return false;
        }
        let Some(values) = self.history.snapshot_at(index).map(|s| s.values.clone()) else {
            return false;
        };
        self.set_local(values);
        self.active_index = index;
        self.navigated = !self.is_latest();
        session.set_error_message(None);
        true
    }

    /// Starts a run on `session`. A non-empty input already carries the
    /// prior transcript, so the baseline is dropped until the next refresh.
    pub(crate) fn start_run(
        &mut self,
        client: &ApiClient,
        session: &mut StreamSession,
        input: Option<Vec<Message>>,
        config: Option<Map<String, Value>>,
    ) -> u64 {
        if input.is_some() {
            self.baseline.clear();
        }
        let token = session.start(
            client,
            RunRequest {
                input,
                assistant_id: self.thread.assistant_id.clone(),
                thread_id: self.thread.thread_id.clone(),
                config,
            },
        );
        self.observe(&session.state());
        token
    }

    /// Continues from the selected checkpoint with the (possibly edited)
    /// local transcript. Returns false when a rerun is not possible.
    pub async fn rerun(&mut self, client: &ApiClient, session: &mut StreamSession) -> Result<bool> {
        if !self.can_rerun() {
            debug!("rerun refused: editing or already at the latest checkpoint");
            return Ok(false);
        }
        let config = self.active_config();
        let input = (!self.local.is_empty()).then(|| self.local.clone());
        self.history.truncate_after(self.active_index);
        self.navigated = false;
        self.snap_to_latest();
        self.start_run(client, session, input, Some(config));
        if let Err(err) = self.refresh_history(client).await {
            warn!("failed to reload history after rerun: {err}");
            session.set_error_message(Some(err.to_string()));
        }
        Ok(true)
    }

    /// Saves the local transcript as the thread state and resumes the paused
    /// run. On rejection the server's explanation becomes the error message
    /// and nothing else changes.
    pub async fn permit_tool_execution(
        &mut self,
        client: &ApiClient,
        session: &mut StreamSession,
    ) -> Result<bool> {
        if !self.can_permit(&session.state()) {
            debug!("permit refused: not resumeable, not latest, or a run is in flight");
            return Ok(false);
        }
        let update = StateUpdate::Messages {
            messages: self.local.clone(),
        };
        if let Err(err) = client.update_thread_state(&self.thread.thread_id, &update).await {
            session.set_error_message(Some(err.to_string()));
            return Err(err);
        }
        self.start_run(client, session, None, None);
        Ok(true)
    }

    fn active_config(&self) -> Map<String, Value> {
        self.active_snapshot()
            .map(|s| s.config.clone())
            .unwrap_or_default()
    }

    /// Starts a run with a raw graph state as input, from the selected
    /// checkpoint's config. `None` continues the thread in place.
    pub fn start_state_run(
        &mut self,
        client: &ApiClient,
        session: &mut StreamSession,
        state: Option<Value>,
    ) -> u64 {
        let token = session.start_with_state(
            client,
            RunRequest {
                input: state,
                assistant_id: self.thread.assistant_id.clone(),
                thread_id: self.thread.thread_id.clone(),
                config: Some(self.active_config()),
            },
        );
        self.observe(&session.state());
        token
    }

    /// Overwrites the graph state at the selected checkpoint with `values`
    /// and resumes from the checkpoint config the server returns. Only
    /// offered on a past checkpoint while nothing is streaming.
    pub async fn resume_with_values(
        &mut self,
        client: &ApiClient,
        session: &mut StreamSession,
        values: Value,
    ) -> Result<bool> {
        if session.is_inflight() || self.is_latest() {
            debug!("resume refused: a run is in flight or the latest checkpoint is selected");
            return Ok(false);
        }
        let update = StateUpdate::Values {
            values,
            config: self.active_config(),
        };
        let config = match client.update_thread_state(&self.thread.thread_id, &update).await {
            Ok(Value::Object(config)) => Some(config),
            Ok(_) => None,
            Err(err) => {
                session.set_error_message(Some(err.to_string()));
                return Err(err);
            }
        };
        session.start_with_state(
            client,
            RunRequest {
                input: None,
                assistant_id: self.thread.assistant_id.clone(),
                thread_id: self.thread.thread_id.clone(),
                config,
            },
        );
        self.observe(&session.state());
        Ok(true)
    }

    /// Runs to completion without streaming. Failures become the error
    /// message; the transcript is left alone either way.
    pub async fn run_eager(
        &self,
        client: &ApiClient,
        session: &StreamSession,
        input: Value,
        config: Option<Map<String, Value>>,
    ) -> Result<Value> {
        let request = EagerRunRequest {
            input,
            assistant_id: self.thread.assistant_id.clone(),
            thread_id: self.thread.thread_id.clone(),
            config,
        };
        match client.invoke_eager(&request).await {
            Ok(output) => {
                session.set_error_message(None);
                Ok(output)
            }
            Err(err) => {
                session.set_error_message(Some(err.to_string()));
                Err(err)
            }
        }
    }
}
