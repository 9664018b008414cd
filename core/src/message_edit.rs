//! Edit buffer for a single message of the local transcript.

use serde_json::Value;
use studio_protocol::ArgumentEntries;
use studio_protocol::FunctionCall;
use studio_protocol::Message;
use studio_protocol::MessageContent;

use crate::error::Result;
use crate::error::StudioErr;

/// Working copy of one message while it is being edited.
///
/// Function and tool call arguments are exposed as ordered entries rather
/// than raw JSON; `finish` serializes them back, dropping entries whose key
/// was left empty.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEditor {
    index: usize,
    message: Message,
    function_arguments: Option<ArgumentEntries>,
    tool_call_arguments: Vec<Option<ArgumentEntries>>,
}

impl MessageEditor {
    pub fn new(index: usize, message: &Message) -> Self {
        let kwargs = &message.additional_kwargs;
        Self {
            index,
            message: message.clone(),
            function_arguments: kwargs
                .function_call
                .as_ref()
                .map(FunctionCall::argument_entries),
            tool_call_arguments: kwargs
                .tool_calls
                .iter()
                .flatten()
                .map(|call| call.function.as_ref().map(FunctionCall::argument_entries))
                .collect(),
        }
    }

    /// Position of the message in the local transcript.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.message.content = MessageContent::Text(text.into());
    }

    pub fn set_function_name(&mut self, name: impl Into<String>) -> Result<()> {
        let call = self
            .message
            .additional_kwargs
            .function_call
            .as_mut()
            .ok_or_else(|| StudioErr::UserInput("message has no function call".to_string()))?;
        call.name = name.into();
        Ok(())
    }

    pub fn set_tool_call_name(&mut self, call: usize, name: impl Into<String>) -> Result<()> {
        let function = self
            .message
            .additional_kwargs
            .tool_calls
            .as_mut()
            .and_then(|calls| calls.get_mut(call))
            .and_then(|c| c.function.as_mut())
            .ok_or_else(|| StudioErr::UserInput(format!("no tool call at index {call}")))?;
        function.name = name.into();
        Ok(())
    }

    pub fn function_arguments(&self) -> Option<&ArgumentEntries> {
        self.function_arguments.as_ref()
    }

    pub fn function_arguments_mut(&mut self) -> Option<&mut ArgumentEntries> {
        self.function_arguments.as_mut()
    }

    pub fn tool_call_arguments(&self, call: usize) -> Option<&ArgumentEntries> {
        self.tool_call_arguments.get(call).and_then(Option::as_ref)
    }

    pub fn tool_call_arguments_mut(&mut self, call: usize) -> Option<&mut ArgumentEntries> {
        self.tool_call_arguments.get_mut(call).and_then(Option::as_mut)
    }

    /// Convenience for the common single-field edit.
    pub fn set_function_argument(&mut self, key: &str, value: Value) -> Result<()> {
        let entries = self
            .function_arguments
            .as_mut()
            .ok_or_else(|| StudioErr::UserInput("message has no function call".to_string()))?;
        match entries.entries().iter().position(|(k, _)| k == key) {
            Some(pos) => entries.set_value(pos, value)?,
            None => entries.insert(key, value)?,
        }
        Ok(())
    }

    /// The edited message with arguments re-serialized.
    pub fn finish(self) -> Message {
        let mut message = self.message;
        let kwargs = &mut message.additional_kwargs;
        if let (Some(call), Some(entries)) = (kwargs.function_call.as_mut(), &self.function_arguments) {
            *call = call.with_arguments(entries);
        }
        if let Some(calls) = kwargs.tool_calls.as_mut() {
            for (call, entries) in calls.iter_mut().zip(&self.tool_call_arguments) {
                if let (Some(function), Some(entries)) = (call.function.as_mut(), entries) {
                    *function = function.with_arguments(entries);
                }
            }
        }
        message
    }
}
