use anyhow::Context;
use std::io::Write;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sse_chat::{ChatMessage, ChatStreamClient, SessionEnd, SessionOutcome};

mod config;
mod render;

use config::Config;
use render::ReplyPrinter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;

    init_logging(&config);

    tracing::info!(endpoint = %config.client.endpoint, model = %config.client.model, "Starting sse-chat-cli");

    let mut client = ChatStreamClient::new(config.client.clone())
        .context("Failed to create chat client")?
        .with_options(config.chat.clone());

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let interactive_mode = prompt.trim().is_empty();
    let outcome = if interactive_mode {
        interactive(&mut client).await?
    } else {
        stream_reply(&mut client, &[ChatMessage::user(prompt)]).await?
    };

    if !interactive_mode {
        report_failure(outcome.as_ref());
    }

    match outcome.map(|outcome| outcome.end) {
        Some(SessionEnd::Failed(_)) => Ok(ExitCode::FAILURE),
        _ => Ok(ExitCode::SUCCESS),
    }
}

fn report_failure(outcome: Option<&SessionOutcome>) {
    if let Some(SessionOutcome { end: SessionEnd::Failed(reason), .. }) = outcome {
        eprintln!("error: {}", reason);
    }
}

/// Read prompts from stdin until EOF or `exit`, keeping the conversation.
/// Returns the outcome of the last reply.
async fn interactive(client: &mut ChatStreamClient) -> anyhow::Result<Option<SessionOutcome>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut last = None;

    eprintln!("Type a message and press Enter. Ctrl-C stops a reply, 'exit' quits.");

    loop {
        eprint!("> ");
        std::io::stderr().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            break;
        }

        history.push(ChatMessage::user(input));
        let outcome = stream_reply(client, &history).await?;

        record_turn(&mut history, outcome.as_ref());
        report_failure(outcome.as_ref());
        last = outcome;
    }

    Ok(last)
}

/// Keep the pending user turn only if it got a completed, non-empty reply
fn record_turn(history: &mut Vec<ChatMessage>, outcome: Option<&SessionOutcome>) {
    match outcome {
        Some(SessionOutcome {
            end: SessionEnd::Completed,
            text,
            ..
        }) if !text.is_empty() => {
            history.push(ChatMessage::assistant(text.clone()));
        }
        _ => {
            history.pop();
        }
    }
}

/// Stream the reply to `history` onto stdout. Ctrl-C stops the session.
async fn stream_reply(
    client: &mut ChatStreamClient,
    history: &[ChatMessage],
) -> anyhow::Result<Option<SessionOutcome>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut printer = ReplyPrinter::new();

    let session = client
        .send(
            history,
            move |_chunk, text| {
                let piece = printer.next_piece(text);
                if !piece.is_empty() {
                    let _ = tx.send(piece.to_string());
                }
            },
            |outcome| {
                tracing::debug!(id = %outcome.id, end = ?outcome.end, "Reply finished");
            },
        )
        .context("Invalid conversation")?;

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            Some(piece) = rx.recv() => {
                stdout.write_all(piece.as_bytes())?;
                stdout.flush()?;
            }
            _ = tokio::signal::ctrl_c() => {
                session.stop();
            }
            _ = session.wait() => break,
        }
    }

    // Chunks delivered before the session ended are already queued
    while let Ok(piece) = rx.try_recv() {
        stdout.write_all(piece.as_bytes())?;
    }
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(session.outcome())
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Logs go to stderr so they never mix with the reply on stdout
    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}
