//! Terminal front end for the DracoBot fitness chat.

mod render;

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dracofit_chat::Availability;
use dracofit_chat::observability::init_observability;
use dracofit_chat::prelude::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader, Lines};
use tokio::sync::watch;
use tracing::warn;

use crate::render::{StreamPrinter, history_lines, status_line};

#[derive(Parser)]
#[command(name = "dracofit", about = "Chat with DracoBot, the DracoFit fitness assistant")]
struct Cli {
    /// Chatbot service URL (default: $DRACOFIT_CHATBOT_URL or http://localhost:5000).
    #[arg(long, global = true)]
    chat_url: Option<String>,
    /// REST API URL (default: $DRACOFIT_API_URL or http://localhost:3000/api).
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// API bearer token (default: $DRACOFIT_API_TOKEN). Enables saving and history.
    #[arg(long, global = true)]
    token: Option<String>,
    /// Do not save answers to chat history.
    #[arg(long, global = true)]
    no_save: bool,
    /// Send messages even when the health check does not report the model online.
    #[arg(long, global = true)]
    skip_health_gate: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat session.
    Chat {
        /// Seconds between health checks.
        #[arg(long, default_value_t = HealthMonitor::DEFAULT_INTERVAL.as_secs())]
        health_interval: u64,
    },
    /// Ask a single question and print the streamed answer.
    Ask {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Check whether the chatbot model is online.
    Health,
    /// Print saved chat history.
    History,
}

impl Cli {
    fn chat_client(&self) -> Result<ChatClient, ChatError> {
        let mut config = ChatClientConfig::from_env()?;
        if let Some(url) = self.chat_url.as_deref() {
            config = config.base_url(url);
        }
        ChatClient::new(config)
    }

    fn interaction_client(&self) -> Result<Option<InteractionClient>, ChatError> {
        let mut config = InteractionClientConfig::from_env();
        if let Some(url) = self.api_url.as_deref() {
            config = config.base_url(url);
        }
        if let Some(token) = self.token.as_deref() {
            config = config.auth_token(token);
        }
        if !config.is_authenticated() {
            return Ok(None);
        }
        InteractionClient::new(config).map(Some)
    }

    fn session(&self, client: ChatClient) -> Result<ChatSession, ChatError> {
        let mut session = ChatSession::new(client).require_online(!self.skip_health_gate);
        if !self.no_save
            && let Some(store) = self.interaction_client()?
        {
            session = session.with_store(Arc::new(store));
        }
        Ok(session)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_observability("warn");

    let cli = Cli::parse();
    let client = cli.chat_client()?;

    match &cli.command {
        Command::Health => {
            let status = ModelStatus::from_probe(client.check_health().await);
            println!("{}", status_line(&status));
            if let Some(details) = status.details.as_ref() {
                println!(
                    "{}",
                    serde_json::to_string_pretty(details).unwrap_or_default()
                );
            }
            Ok(if status.is_online() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::History => {
            let Some(store) = cli.interaction_client()? else {
                eprintln!("history requires an API token (--token or DRACOFIT_API_TOKEN)");
                return Ok(ExitCode::FAILURE);
            };
            for line in history_lines(&store.chat_history().await?) {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Ask { message } => {
            let text = message.join(" ");
            let status = ModelStatus::from_probe(client.check_health().await);
            let (_tx, rx) = watch::channel(status);
            let session = cli.session(client)?.with_status(rx);
            let outcome = run_turn(&session, &text).await?;
            Ok(if outcome.is_error {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Chat { health_interval } => {
            let monitor = HealthMonitor::spawn(
                Arc::new(client.clone()),
                Duration::from_secs(*health_interval),
            )?;
            let mut status_rx = monitor.subscribe();
            let session = cli.session(client)?.with_status(monitor.subscribe());
            chat_loop(&session, &mut status_rx).await?;
            monitor.stop();
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn chat_loop(
    session: &ChatSession,
    status_rx: &mut watch::Receiver<ModelStatus>,
) -> Result<(), Box<dyn std::error::Error>> {
    let _ = tokio::time::timeout(
        Duration::from_secs(15),
        status_rx.wait_for(|s| s.availability != Availability::Unknown),
    )
    .await;
    println!("{}", status_line(&session.model_status()));

    match session.load_history().await {
        Ok(0) => {}
        Ok(_) => {
            for message in session.messages() {
                let who = match message.sender {
                    Sender::User => "you",
                    Sender::Bot => "bot",
                };
                println!("{who}: {}", message.text);
            }
        }
        Err(err) => warn!(error = %err, "failed to load chat history"),
    }
    println!("Type a message, /status, or /quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = next_input(&mut lines, tokio::signal::ctrl_c()).await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/status" => {
                println!("{}", status_line(&session.model_status()));
                continue;
            }
            _ => {}
        }
        match run_turn(session, line).await {
            Ok(_) => {}
            Err(ChatError::ModelUnavailable { status }) => {
                println!("DracoBot is {status}; try again once it is online.");
            }
            Err(err) => println!("{err}"),
        }
        if let Some(api_error) = session.last_api_error() {
            println!("(!) {api_error}");
        }
    }
    Ok(())
}

/// Reads the next prompt line. Returns `None` on end of input or when
/// `interrupt` resolves first, so Ctrl-C at the prompt ends the session.
async fn next_input<R, I>(lines: &mut Lines<R>, interrupt: I) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    I: Future,
{
    tokio::select! {
        biased;
        _ = interrupt => {
            println!();
            Ok(None)
        }
        line = lines.next_line() => line,
    }
}

/// Streams one turn to stdout. Ctrl-C aborts the turn.
async fn run_turn(session: &ChatSession, text: &str) -> Result<TurnOutcome, ChatError> {
    let abort = AbortHandle::new();
    let watcher = {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                abort.abort();
            }
        })
    };

    let mut printer = StreamPrinter::new(std::io::stdout());
    let result = session
        .send_with_abort(
            text,
            |message| {
                if let Err(err) = printer.show(message) {
                    warn!(error = %err, "failed to write answer");
                }
            },
            &abort,
        )
        .await;
    watcher.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_interval_defaults_to_monitor_interval() {
        let cli = Cli::try_parse_from(["dracofit", "chat"]).expect("parse");
        match cli.command {
            Command::Chat { health_interval } => {
                assert_eq!(health_interval, HealthMonitor::DEFAULT_INTERVAL.as_secs());
            }
            _ => panic!("expected chat"),
        }
    }

    #[tokio::test]
    async fn prompt_returns_typed_lines_then_end_of_input() {
        let mut lines = BufReader::new(&b"hello\n"[..]).lines();
        let first = next_input(&mut lines, std::future::pending::<()>()).await.expect("read");
        assert_eq!(first.as_deref(), Some("hello"));
        let second = next_input(&mut lines, std::future::pending::<()>()).await.expect("read");
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn interrupt_at_idle_prompt_ends_session() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();
        let line = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            next_input(&mut lines, std::future::ready(())),
        )
        .await
        .expect("interrupt is not swallowed")
        .expect("read");
        assert_eq!(line, None);
    }
}
