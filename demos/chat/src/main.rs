//! Terminal chat over Parley.
//!
//! ```text
//! chat server [addr]                 # default 127.0.0.1:8080
//! chat client <url> <room> <author>  # e.g. ws://127.0.0.1:8080 lobby alice
//! ```
//!
//! In client mode every stdin line is sent to the room. `/join <room>`
//! switches rooms, `/leave` leaves, `/quit` exits.

use std::time::{SystemTime, UNIX_EPOCH};

use parley::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const USAGE: &str = "usage: chat server [addr] | chat client <url> <room> <author>";

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Say(&'a str),
    Join(&'a str),
    Leave,
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    match line.split_once(' ') {
        Some(("/join", room)) if !room.trim().is_empty() => {
            Command::Join(room.trim())
        }
        _ => match line {
            "" => Command::Empty,
            "/leave" => Command::Leave,
            "/quit" => Command::Quit,
            text => Command::Say(text),
        },
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

async fn run_server(addr: &str) -> Result<(), BoxError> {
    let server = ParleyServer::builder().bind(addr).build().await?;
    eprintln!("parley server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn run_client(url: &str, room: &str, author: &str) -> Result<(), BoxError> {
    let client = ChatClient::connect(url, ClientConfig::default()).await?;
    client.on_message(|msg| {
        let marker = if msg.is_editing == Some(true) { " (edited)" } else { "" };
        println!("[{}] {}{}", msg.author, msg.text, marker);
    });
    client.join_room(room).await?;
    eprintln!("joined {room} as {author}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let result = match parse_command(&line) {
            Command::Say(text) => {
                client.send_message(ChatMessage::new(text, author, now_millis()))
            }
            Command::Join(room) => client.join_room(room).await,
            Command::Leave => client.leave_room().await,
            Command::Quit => break,
            Command::Empty => Ok(()),
        };
        if let Err(e) = result {
            eprintln!("error: {e}");
        }
    }

    client.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,parley=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["server"] => run_server("127.0.0.1:8080").await,
        ["server", addr] => run_server(addr).await,
        ["client", url, room, author] => run_client(url, room, author).await,
        _ => Err(USAGE.into()),
    }
}
