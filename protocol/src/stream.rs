use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StreamStatus {
    Inflight,
    Error,
    Done,
}

/// Published state of one streaming run.
///
/// When `merge` is set the displayed transcript is the prior transcript
/// followed by `messages`; otherwise `messages` is the whole transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub status: StreamStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub merge: bool,
}

impl StreamState {
    pub fn is_inflight(&self) -> bool {
        self.status == StreamStatus::Inflight
    }
}

/// Payload of the `metadata` server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
}
