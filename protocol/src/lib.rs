//! Value types shared by the agent studio client: messages, checkpoints,
//! stream state and request bodies.

pub mod arguments;
pub mod checkpoint;
pub mod message;
pub mod run;
pub mod stream;

pub use arguments::ArgumentEntries;
pub use arguments::ArgumentsError;
pub use checkpoint::HistorySnapshot;
pub use checkpoint::Thread;
pub use checkpoint::ThreadState;
pub use message::AdditionalKwargs;
pub use message::Document;
pub use message::FunctionCall;
pub use message::Message;
pub use message::MessageContent;
pub use message::MessageType;
pub use message::ToolCall;
pub use run::EagerRunRequest;
pub use run::ErrorDetail;
pub use run::RunRequest;
pub use run::StateUpdate;
pub use stream::RunMetadata;
pub use stream::StreamState;
pub use stream::StreamStatus;
