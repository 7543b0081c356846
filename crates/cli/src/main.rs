use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tmpa_agents::{load_router_config, SupportAgent, TurnRequest, DEFAULT_STATE_TTL_HOURS};
use tmpa_core::{OutboundMessage, RouteDecision};
use tmpa_observability::{init_tracing, AppMetrics};
use tmpa_storage::Store;

#[derive(Debug, Parser)]
#[command(name = "tmpa")]
#[command(about = "Supplier portal support router CLI")]
struct Cli {
    /// SQLite slot store; conversations stay in memory when unset.
    #[arg(long, env = "TMPA_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive conversation against the router.
    Chat {
        #[arg(long)]
        conversation: Option<String>,
        /// Client language sent with every turn (EN or FR).
        #[arg(long)]
        lang: Option<String>,
    },
    /// Print the routing decision for one utterance without touching state.
    Route {
        text: String,
        #[arg(long)]
        intent: Option<String>,
    },
    /// Print the flow catalog.
    Flows,
    /// Drop stored conversations idle for longer than the given hours.
    Purge {
        #[arg(long, env = "TMPA_STATE_TTL_HOURS", default_value_t = DEFAULT_STATE_TTL_HOURS)]
        idle_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("tmpa_cli");
    let cli = Cli::parse();

    let agent = build_agent(cli.database_url.as_deref()).await?;

    match cli.command {
        Command::Chat { conversation, lang } => run_chat(agent, conversation, lang).await?,
        Command::Route { text, intent } => {
            let found = agent.preview_route(&text, intent.as_deref());
            let payload = match found {
                Some(found) => serde_json::json!({
                    "rule": found.rule,
                    "decision": found.decision,
                }),
                None => serde_json::json!({
                    "rule": "fallback",
                    "decision": RouteDecision::Unrecognized,
                }),
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Command::Flows => {
            println!("{}", serde_json::to_string_pretty(agent.flows())?);
        }
        Command::Purge { idle_hours } => {
            let removed = agent
                .purge_idle(chrono::Duration::hours(idle_hours.max(0)))
                .await?;
            println!("purged {removed} conversation(s)");
        }
    }

    Ok(())
}

async fn run_chat(
    agent: SupportAgent<Store>,
    conversation: Option<String>,
    lang: Option<String>,
) -> Result<()> {
    let mut conversation_id = conversation;

    println!("Supplier support chat. Commands: next, back, reset. Type 'exit' to quit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        if message.is_empty() {
            continue;
        }

        let reply = agent
            .handle_turn(TurnRequest {
                conversation_id: conversation_id.clone(),
                text: message.to_string(),
                intent: None,
                lang: lang.clone(),
            })
            .await?;
        conversation_id = Some(reply.conversation_id.clone());

        println!();
        for outbound in &reply.messages {
            match outbound {
                OutboundMessage::Template { key } => println!("[{key}]"),
                OutboundMessage::Text { text } => println!("{text}"),
                OutboundMessage::Metadata(metadata) => {
                    if metadata.completed == Some(true) {
                        println!("(flow complete: {} steps)", metadata.total_steps);
                    } else {
                        println!(
                            "(step {}/{})",
                            metadata.step_index + 1,
                            metadata.total_steps
                        );
                    }
                }
            }
        }
        println!();
    }

    Ok(())
}

async fn build_agent(database_url: Option<&str>) -> Result<SupportAgent<Store>> {
    let metrics = AppMetrics::shared();
    let config = load_router_config()?;

    let store = match database_url {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };

    Ok(SupportAgent::new(config, Arc::new(store), metrics))
}
