use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::message::Message;

/// Body of `POST /runs/stream` and `POST /runs/eager`.
///
/// A `None` stream input asks the backend to resume the thread in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRequest<I = Option<Vec<Message>>> {
    pub input: I,
    pub assistant_id: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
}

pub type EagerRunRequest = RunRequest<Value>;

/// Body of `POST /threads/{id}/state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateUpdate {
    Messages {
        messages: Vec<Message>,
    },
    Values {
        values: Value,
        config: Map<String, Value>,
    },
}

/// Error body returned by the state endpoints on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub detail: Option<String>,
}
