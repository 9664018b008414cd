mod cli;

use anyhow::Context;
use anyhow::bail;
use serde_json::Map;
use serde_json::Value;
use studio_core::Config;
use studio_core::ConfigOverrides;
use studio_core::DataEventPolicy;
use studio_core::IngestFile;
use studio_core::SessionController;
use studio_core::ViewSnapshot;
use studio_protocol::Message;
use studio_protocol::MessageContent;
use studio_protocol::Thread;
use tracing_subscriber::EnvFilter;

pub use cli::Cli;
pub use cli::Command;
pub use cli::SchemaKind;
pub use cli::ThreadArgs;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let overrides = ConfigOverrides {
        base_url: cli.base_url,
        data_event_policy: cli.merge.then_some(DataEventPolicy::Merge),
        stream_idle_timeout_ms: cli.idle_timeout_ms,
    };
    let config = Config::load_with_overrides(overrides).context("failed to load configuration")?;
    let mut controller = SessionController::new(config);

    match cli.command {
        Command::Chat {
            thread,
            files,
            message,
        } => {
            open_thread(&mut controller, &thread).await?;
            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                let file = IngestFile::from_path(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                uploads.push(file);
            }
            if !controller.send_message(message.as_deref(), &uploads).await? {
                bail!("the thread cannot take a new message right now");
            }
            controller.run_until_settled().await?;
            print_view(&controller);
        }
        Command::History { thread } => {
            open_thread(&mut controller, &thread).await?;
            if let Some(view) = controller.view() {
                for line in format_timeline(&view) {
                    println!("{line}");
                }
            }
        }
        Command::Resume { thread } => {
            open_thread(&mut controller, &thread).await?;
            if !controller.permit_tool_execution().await? {
                bail!("thread {} is not waiting for permission", thread.thread_id);
            }
            controller.run_until_settled().await?;
            print_view(&controller);
        }
        Command::Rerun { thread, checkpoint } => {
            open_thread(&mut controller, &thread).await?;
            if !controller.select_checkpoint(checkpoint) {
                bail!("no checkpoint {checkpoint} on thread {}", thread.thread_id);
            }
            if !controller.rerun().await? {
                bail!("checkpoint {checkpoint} is already the latest");
            }
            controller.run_until_settled().await?;
            print_view(&controller);
        }
        Command::StateRun {
            thread,
            checkpoint,
            state,
        } => {
            open_thread(&mut controller, &thread).await?;
            if let Some(checkpoint) = checkpoint
                && !controller.select_checkpoint(checkpoint)
            {
                bail!("no checkpoint {checkpoint} on thread {}", thread.thread_id);
            }
            let state = state
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("state is not valid JSON")?;
            controller.run_state(state);
            controller.run_until_settled().await?;
            print_view(&controller);
        }
        Command::ResumeState {
            thread,
            checkpoint,
            values,
        } => {
            open_thread(&mut controller, &thread).await?;
            if !controller.select_checkpoint(checkpoint) {
                bail!("no checkpoint {checkpoint} on thread {}", thread.thread_id);
            }
            let values: Value = serde_json::from_str(&values).context("values are not valid JSON")?;
            if !controller.resume_with_values(values).await? {
                bail!("checkpoint {checkpoint} is already the latest");
            }
            controller.run_until_settled().await?;
            print_view(&controller);
        }
        Command::Eager { thread, input } => {
            open_thread(&mut controller, &thread).await?;
            let input: Value = serde_json::from_str(&input).context("input is not valid JSON")?;
            if let Some(output) = controller.run_eager(input).await? {
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Command::Schema { kind } => {
            let client = controller.client();
            let schema = match kind {
                SchemaKind::Config => client.config_schema().await?,
                SchemaKind::Input => client.input_schema().await?,
                SchemaKind::Output => client.output_schema().await?,
            };
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }
    Ok(())
}

async fn open_thread(controller: &mut SessionController, args: &ThreadArgs) -> anyhow::Result<()> {
    controller.register_assistant(&args.assistant_id, Map::new());
    controller
        .switch_thread(Some(Thread::new(&args.thread_id, &args.assistant_id)))
        .await
        .with_context(|| format!("failed to load thread {}", args.thread_id))
}

fn print_view(controller: &SessionController) {
    let Some(view) = controller.view() else {
        return;
    };
    for message in &view.transcript {
        println!("{}", format_message(message));
    }
    if let Some(error) = &view.error_message {
        eprintln!("error: {error}");
    }
    if view.can_permit {
        eprintln!("paused: run `studio resume` to permit the pending tool call");
    }
}

pub fn format_message(message: &Message) -> String {
    let mut out = format!("[{}]", message.kind);
    if let Some(name) = &message.name {
        out.push_str(&format!(" {name}:"));
    }
    match &message.content {
        MessageContent::Text(text) if !text.is_empty() => out.push_str(&format!(" {text}")),
        MessageContent::Text(_) => {}
        MessageContent::Documents(docs) => out.push_str(&format!(" {} document(s)", docs.len())),
        MessageContent::Parts(parts) => out.push_str(&format!(" {} part(s)", parts.len())),
    }
    let kwargs = &message.additional_kwargs;
    if let Some(call) = &kwargs.function_call {
        out.push_str(&format!(" -> {}({})", call.name, call.arguments));
    }
    for call in kwargs.tool_calls.iter().flatten() {
        if let Some(function) = &call.function {
            out.push_str(&format!(" -> {}({})", function.name, function.arguments));
        }
    }
    out
}

pub fn format_timeline(view: &ViewSnapshot) -> Vec<String> {
    view.timeline
        .iter()
        .enumerate()
        .map(|(i, snapshot)| {
            let marker = if i == view.active_index { '*' } else { ' ' };
            let last = snapshot
                .values
                .last()
                .map(format_message)
                .unwrap_or_else(|| "(empty)".to_string());
            format!("{marker} {i}: {} message(s), last {last}", snapshot.values.len())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use studio_protocol::HistorySnapshot;

    #[test]
    fn formats_text_and_tool_calls() {
        assert_eq!(format_message(&Message::human("hello")), "[human] hello");

        let call: Message = serde_json::from_value(json!({
            "type": "ai",
            "content": "",
            "additional_kwargs": {"tool_calls": [{
                "function": {"name": "search", "arguments": "{\"q\":\"rust\"}"}
            }]}
        }))
        .expect("message");
        assert_eq!(format_message(&call), r#"[ai] -> search({"q":"rust"})"#);
    }

    #[test]
    fn marks_the_active_checkpoint() {
        let view = ViewSnapshot {
            thread_id: "t1".to_string(),
            transcript: vec![],
            editing: vec![],
            timeline: vec![
                HistorySnapshot {
                    values: vec![Message::human("a")],
                    resumeable: true,
                    config: Map::new(),
                },
                HistorySnapshot {
                    values: vec![],
                    resumeable: true,
                    config: Map::new(),
                },
            ],
            active_index: 1,
            status: None,
            run_id: None,
            resumeable: false,
            error_message: None,
            can_rerun: false,
            can_permit: false,
        };
        assert_eq!(
            format_timeline(&view),
            vec![
                "  0: 1 message(s), last [human] a".to_string(),
                "* 1: 0 message(s), last (empty)".to_string(),
            ]
        );
    }
}
