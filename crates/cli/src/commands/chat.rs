//! `ragstream chat`: interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use ragstream_config::ClientConfig;
use ragstream_core::{JsonFileStore, Message, MessageStatus};
use ragstream_session::{CancelHandle, ChatSession, TurnUpdate};
use ragstream_transport::HttpTransport;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    message: Option<String>,
    model: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let model = model.unwrap_or_else(|| config.chat.model.clone());

    let transport = Arc::new(HttpTransport::from_config(&config.transport)?);
    let store = Arc::new(JsonFileStore::open(config.store_path()));
    let mut session = ChatSession::new(transport, store, model.clone())?;

    watch_ctrl_c(session.cancel_handle());

    if let Some(msg) = message {
        // Single message mode
        run_turn(&mut session, &msg, json).await?;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  ragstream - interactive chat");
    println!();
    println!("  Server:        {}", config.transport.base_url);
    println!("  Model:         {model}");
    println!("  Conversation:  {}", session.conversation_id());
    println!();
    println!("  Ctrl+C stops the current answer. /clear starts over, /exit quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" | "exit" | "quit" => break,
            "/clear" => {
                session.clear()?;
                println!("  New conversation {}", session.conversation_id());
                println!();
                continue;
            }
            _ => {}
        }

        run_turn(&mut session, line, json).await?;
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// First Ctrl+C stops the running answer; with nothing running it exits.
fn watch_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.cancel() {
                tracing::debug!("Cancellation requested from Ctrl+C");
            } else {
                println!();
                std::process::exit(130);
            }
        }
    });
}

async fn run_turn(
    session: &mut ChatSession,
    text: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        session
            .submit_with(text, |update| {
                if let Ok(line) = serde_json::to_string(update) {
                    println!("{line}");
                }
            })
            .await?;
        return Ok(());
    }

    println!();
    print!("  Assistant > ");
    std::io::stdout().flush()?;

    let answer = session
        .submit_with(text, |update| {
            if let TurnUpdate::Delta { content } = update {
                print!("{content}");
                let _ = std::io::stdout().flush();
            }
        })
        .await?;
    println!();

    print_outcome(&answer);
    Ok(())
}

fn print_outcome(answer: &Message) {
    match answer.status {
        MessageStatus::Aborted => println!("  [stopped]"),
        MessageStatus::Error => {
            eprintln!("  [Error] {}", answer.error.as_deref().unwrap_or("unknown"))
        }
        _ => {}
    }

    if !answer.sources.is_empty() {
        println!();
        println!("  Sources:");
        for (i, source) in answer.sources.iter().enumerate() {
            println!(
                "    [{}] {} - {}",
                source.effective_ref(i),
                source.label(),
                source.url
            );
        }
    }

    if let Some(id) = &answer.completion_id {
        println!("  ({id})");
    }
    println!();
}
