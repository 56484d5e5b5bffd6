//! agoractl - ask agorad about political events and policy debates

use agora_shared::rpc::EvalRequest;
use agoractl::cli::{Cli, Commands};
use agoractl::client::AgoraClient;
use agoractl::display;
use anyhow::Result;
use clap::Parser;
use console::Term;
use owo_colors::OwoColorize;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = AgoraClient::new(&cli.url)?;

    match cli.command {
        None => chat(&client, None, false).await,
        Some(Commands::Chat { session, trace }) => chat(&client, session, trace).await,
        Some(Commands::Ask {
            question,
            session,
            trace,
            json,
        }) => {
            let session = session.unwrap_or_else(new_session_id);
            let reply = client.turn(&session, &question.join(" ")).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                display::print_reply(&reply.turn, trace);
                eprintln!("{}", format!("session {}", reply.session_id).dimmed());
            }
            Ok(())
        }
        Some(Commands::Show { session, json }) => {
            let view = client.session(&session).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                display::print_session(&view);
            }
            Ok(())
        }
        Some(Commands::End { session }) => {
            client.end(&session).await?;
            println!("Session {} ended", session);
            Ok(())
        }
        Some(Commands::Eval {
            scenarios,
            offline,
            json,
        }) => {
            let response = client
                .eval(&EvalRequest {
                    offline,
                    scenarios,
                    cases: Vec::new(),
                })
                .await?;
            let failed = if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                response.total_failed()
            } else {
                display::print_eval(&response.reports)
            };
            if failed > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::Status { json }) => {
            let health = client.health().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                display::print_status(&health, client.base());
            }
            Ok(())
        }
    }
}

fn new_session_id() -> String {
    format!("cli-{}", Uuid::new_v4())
}

/// Line-by-line conversation; the session is ended on exit
async fn chat(client: &AgoraClient, session: Option<String>, trace: bool) -> Result<()> {
    let session = session.unwrap_or_else(new_session_id);
    let term = Term::stdout();
    let mut spoke = false;
    println!(
        "{}",
        "Ask about political events, policy debates or elections. Type 'exit' to leave.".dimmed()
    );

    loop {
        term.write_str(&format!("{} ", "you>".cyan().bold()))?;
        let line = match term.read_line() {
            Ok(line) => line,
            Err(_) => break,
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit" | "/exit" | "/quit") {
            break;
        }
        match client.turn(&session, text).await {
            Ok(reply) => {
                spoke = true;
                display::print_reply(&reply.turn, trace);
            }
            Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
        }
    }

    if !spoke {
        return Ok(());
    }
    if let Err(e) = client.end(&session).await {
        eprintln!("{} {}", "warning:".yellow(), e);
    }
    Ok(())
}
