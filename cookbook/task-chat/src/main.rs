//! Interactive task assistant over stdin.
//!
//! Usage: `task-chat [config.toml]`. Without a provider key every message is
//! handled by the rule-based interpreter.

use taskmate_engine::{init_tracing, AppConfig, CallerId, InMemoryTaskStore, Message, TaskAgent};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("task-chat: {err}");
        std::process::exit(1);
    }
}

async fn run() -> taskmate_engine::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::from_env_or_file(path)?,
        None => AppConfig::from_env(),
    };
    init_tracing(&config.logging);

    let agent = TaskAgent::from_config(&config);
    let store = InMemoryTaskStore::new();
    let caller = CallerId::new_v4();
    let mut history: Vec<Message> = Vec::new();

    tracing::info!(%caller, model = agent.has_model(), "task chat ready");

    let mut stdout = io::stdout();
    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        let response = agent.process_message(input, &history, caller, &store).await;
        for call in &response.tool_calls {
            let status = if call.result.is_success() { "ok" } else { "failed" };
            stdout
                .write_all(format!("  [{} {}]\n", call.tool, status).as_bytes())
                .await?;
        }
        stdout
            .write_all(format!("{}\n", response.content).as_bytes())
            .await?;

        history.push(Message::user(input));
        history.push(Message::assistant(response.content));
    }
    Ok(())
}
