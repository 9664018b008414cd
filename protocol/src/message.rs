//! One conversational turn as exchanged with the agent backend.
//!
//! Messages follow the LangChain serialization used by the backend: a `type`
//! discriminator, free-text or document content, and `additional_kwargs`
//! carrying OpenAI-style function and tool calls. Fields this crate does not
//! model are kept in `extra` so that an edited transcript can be posted back
//! without dropping server data.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use strum_macros::Display;
use uuid::Uuid;

use crate::arguments::ArgumentEntries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageType {
    #[serde(alias = "HumanMessageChunk")]
    Human,
    #[serde(alias = "AIMessageChunk")]
    Ai,
    #[serde(alias = "FunctionMessageChunk")]
    Function,
    #[serde(alias = "ToolMessageChunk")]
    Tool,
    #[serde(alias = "SystemMessageChunk")]
    System,
}

/// A retrieval result returned by function/tool messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Documents(Vec<Document>),
    /// Any other list payload (e.g. multimodal content parts); kept opaque.
    Parts(Vec<Value>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded object.
    #[serde(default)]
    pub arguments: String,
}

impl FunctionCall {
    pub fn argument_entries(&self) -> ArgumentEntries {
        ArgumentEntries::parse(&self.arguments)
    }

    /// Returns a copy carrying `entries` re-serialized as the arguments.
    pub fn with_arguments(&self, entries: &ArgumentEntries) -> Self {
        Self {
            name: self.name.clone(),
            arguments: entries.to_arguments_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCall>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalKwargs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Equality is deep and order-sensitive, including nested tool calls and any
/// preserved unknown fields. Two messages with the same `id` but different
/// content are *not* equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub additional_kwargs: AdditionalKwargs,
    #[serde(default)]
    pub example: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(kind: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            content: MessageContent::Text(content.into()),
            name: None,
            additional_kwargs: AdditionalKwargs::default(),
            example: false,
            extra: Map::new(),
        }
    }

    /// A locally authored human turn. It gets a fresh id so it can be edited
    /// before the server has assigned one.
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            ..Self::new(MessageType::Human, content)
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageType::Ai, content)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            MessageContent::Documents(_) | MessageContent::Parts(_) => None,
        }
    }

    /// Function/tool results whose content is a list of retrieved documents.
    pub fn has_document_content(&self) -> bool {
        matches!(self.kind, MessageType::Function | MessageType::Tool)
            && matches!(self.content, MessageContent::Documents(_))
    }

    pub fn has_calls(&self) -> bool {
        self.additional_kwargs.function_call.is_some()
            || self.additional_kwargs.tool_calls.is_some()
    }
}
