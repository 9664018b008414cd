use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::message::Message;

/// One entry of a thread's append-only checkpoint log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    #[serde(default)]
    pub values: Vec<Message>,
    /// The backend is paused here and can be continued.
    #[serde(default)]
    pub resumeable: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Response of `GET /threads/{id}/state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    #[serde(default)]
    pub values: Vec<Message>,
    #[serde(default)]
    pub resumeable: bool,
}

/// Identity and default execution configuration of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub assistant_id: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Thread {
    pub fn new(thread_id: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            assistant_id: assistant_id.into(),
            config: Map::new(),
        }
    }
}
