use std::path::PathBuf;

use clap::Parser;
use clap::ValueEnum;

/// Talk to an agent backend: stream runs, browse checkpoints, resume or
/// rerun from any of them.
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Cli {
    /// Root URL of the agent backend (overrides ~/.studio/config.toml).
    #[arg(long = "base-url", value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Append streamed messages to the thread state instead of treating
    /// each update as the whole transcript.
    #[arg(long, default_value_t = false, global = true)]
    pub merge: bool,

    /// Give up on a run stream that stays silent this long.
    #[arg(long = "idle-timeout-ms", value_name = "MS", global = true)]
    pub idle_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Args)]
pub struct ThreadArgs {
    /// Thread to operate on.
    #[arg(long = "thread", short = 't')]
    pub thread_id: String,

    /// Assistant that owns the thread.
    #[arg(long = "assistant", short = 'a')]
    pub assistant_id: String,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Send a message and stream the reply.
    Chat {
        #[clap(flatten)]
        thread: ThreadArgs,

        /// Files to ingest before the turn starts.
        #[arg(long = "file", short = 'f', value_name = "PATH")]
        files: Vec<PathBuf>,

        /// Message text. Without it the thread continues from its current
        /// transcript.
        message: Option<String>,
    },

    /// Show the thread's checkpoint timeline.
    History {
        #[clap(flatten)]
        thread: ThreadArgs,
    },

    /// Permit the paused tool call and resume the run.
    Resume {
        #[clap(flatten)]
        thread: ThreadArgs,
    },

    /// Rerun the thread from a timeline checkpoint.
    Rerun {
        #[clap(flatten)]
        thread: ThreadArgs,

        /// Timeline index, as printed by `history`.
        #[arg(long)]
        checkpoint: usize,
    },

    /// Run the graph with a raw JSON state, from the latest checkpoint or
    /// the one given.
    StateRun {
        #[clap(flatten)]
        thread: ThreadArgs,

        /// Timeline index to start from.
        #[arg(long)]
        checkpoint: Option<usize>,

        /// JSON state; omit to continue the thread in place.
        state: Option<String>,
    },

    /// Overwrite a past checkpoint's state and resume from it.
    ResumeState {
        #[clap(flatten)]
        thread: ThreadArgs,

        #[arg(long)]
        checkpoint: usize,

        /// JSON values to store at the checkpoint.
        values: String,
    },

    /// Run once without streaming and print the output.
    Eager {
        #[clap(flatten)]
        thread: ThreadArgs,

        /// JSON input for the run.
        input: String,
    },

    /// Print one of the backend's JSON schemas.
    Schema {
        #[arg(value_enum)]
        kind: SchemaKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchemaKind {
    Config,
    Input,
    Output,
}
