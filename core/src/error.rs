use reqwest::StatusCode;
use studio_protocol::ArgumentsError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StudioErr>;

#[derive(Error, Debug)]
pub enum StudioErr {
    /// The connection failed or the response body could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// The server emitted an explicit `error` event on a run stream.
    #[error("stream error: {0}")]
    Stream(String),

    /// Non-2xx response. `detail` is the server supplied explanation (or the
    /// raw body when the endpoint does not wrap errors).
    #[error("{detail}")]
    Request { status: StatusCode, detail: String },

    /// The caller asked for something the current state does not allow.
    #[error("{0}")]
    UserInput(String),

    #[error(transparent)]
    Arguments(#[from] ArgumentsError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Config(String),
}

impl StudioErr {
    /// Connection level failures, as opposed to a server that answered.
    pub fn is_transport(&self) -> bool {
        match self {
            StudioErr::Transport(_) => true,
            StudioErr::Reqwest(err) => err.is_connect() || err.is_timeout() || err.is_body(),
            _ => false,
        }
    }

    /// Worth retrying for an idempotent request.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            StudioErr::Request { status, .. } => status.is_server_error(),
            other => other.is_transport(),
        }
    }
}
