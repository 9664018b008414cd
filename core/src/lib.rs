//! Client engine for streaming agent runs and reconciling them with a
//! thread's checkpoint history.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the caller.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod client;
pub mod config;
pub mod controller;
pub mod default_client;
pub mod error;
mod flags;
pub mod history;
pub mod message_edit;
pub mod reconcile;
mod sse;
pub mod stream_session;
mod util;

pub use client::ApiClient;
pub use client::IngestFile;
pub use config::Config;
pub use config::ConfigOverrides;
pub use config::DataEventPolicy;
pub use controller::SessionController;
pub use controller::SessionRegistry;
pub use controller::ViewSnapshot;
pub use error::Result;
pub use error::StudioErr;
pub use history::HistoryStore;
pub use message_edit::MessageEditor;
pub use reconcile::ThreadView;
pub use stream_session::Phase;
pub use stream_session::SessionState;
pub use stream_session::StreamSession;

pub use studio_protocol as protocol;
