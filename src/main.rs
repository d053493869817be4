use std::io::Write as _;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing::Level;

use parley_core::events::{Phase, SessionEvent};
use parley_core::timeline::Role;
use parley_core::transport::QueryTransport;
use parley_session::{RetryController, SessionConfig, SessionController};
use parley_telemetry::TelemetryConfig;
use parley_transport::HttpTransport;

/// Interactive client for a multi-agent orchestrator backend.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Base URL of the orchestrator backend.
    #[arg(long, default_value = "http://localhost:5003")]
    backend: String,

    /// Request execution traces from the backend.
    #[arg(long)]
    verbose: bool,

    /// Default log level (overridden by RUST_LOG).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.parse::<Level>().unwrap_or(Level::INFO);
    parley_telemetry::init_telemetry(TelemetryConfig {
        log_level,
        ..TelemetryConfig::default()
    });

    let transport = Arc::new(HttpTransport::new(&cli.backend));
    tracing::info!(backend = %transport.base_url(), "Starting parley");

    print_agent_directory(transport.as_ref()).await;

    let controller = Arc::new(SessionController::new(
        transport,
        SessionConfig {
            verbose: cli.verbose,
        },
    ));
    let retry = RetryController::new(controller.clone());

    let printer = tokio::spawn(print_events(controller.clone()));

    println!("Type a question, /stop to cancel, /retry to resend the last message, /quit to exit.");
    prompt();

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                if !controller.stop() {
                    break;
                }
                continue;
            }
        };
        let Some(line) = line else { break };
        let input = line.trim();

        match input {
            "" => prompt(),
            "/quit" | "/exit" => break,
            "/stop" => {
                if !controller.stop() {
                    println!("No request in flight.");
                    prompt();
                }
            }
            "/retry" => {
                let last_user = controller
                    .snapshot()
                    .messages()
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.id.clone());
                match last_user {
                    Some(id) => {
                        if let Err(e) = retry.retry_from(&id).await {
                            println!("Retry failed: {e}");
                            prompt();
                        }
                    }
                    None => {
                        println!("Nothing to retry yet.");
                        prompt();
                    }
                }
            }
            query => {
                if let Err(e) = controller.send(query).await {
                    println!("{e}");
                    prompt();
                }
            }
        }
    }

    printer.abort();
    tracing::info!("Shutting down");
    Ok(())
}

/// Fetch and print the agent directory. The backend may not be up yet; a
/// failure here is not fatal.
async fn print_agent_directory(transport: &HttpTransport) {
    match transport.agents().await {
        Ok(agents) if agents.is_empty() => println!("No agents registered."),
        Ok(agents) => {
            println!("Available agents:");
            for agent in &agents {
                println!("  {} - {}", agent.name, agent.description);
                if let Some(starters) = &agent.conversation_starters {
                    for starter in starters {
                        println!("    e.g. {starter}");
                    }
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not fetch agent directory"),
    }
}

/// Render broadcast session events to stdout. Deltas print inline; the final
/// answer reconciles whatever was already streamed.
async fn print_events(controller: Arc<SessionController>) {
    let mut rx = controller.subscribe();
    let mut printed = String::new();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        match event {
            SessionEvent::AssistantDelta { delta, .. } => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
                printed.push_str(&delta);
            }
            SessionEvent::AssistantFinal { content, .. } => {
                if printed.is_empty() {
                    println!("{content}");
                } else if content == printed {
                    println!();
                } else {
                    println!("\n{content}");
                }
                printed.clear();
            }
            SessionEvent::AgentCalled {
                agent_id, query, ..
            } => {
                println!("[{agent_id}] <- {query}");
            }
            SessionEvent::AgentResponded {
                agent_id, response, ..
            } => {
                println!("[{agent_id}] -> {response}");
            }
            SessionEvent::SystemNotice { text, .. } => {
                if !printed.is_empty() {
                    println!();
                    printed.clear();
                }
                println!("! {text}");
            }
            SessionEvent::PhaseChanged { phase, .. } => match phase {
                Phase::Failed => {
                    if controller.last_error().is_some_and(|e| e.is_retryable()) {
                        println!("(transient failure, /retry may succeed)");
                    }
                }
                Phase::Idle => prompt(),
                _ => {}
            },
            SessionEvent::UserMessage { .. } => {}
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
