//! Operator console: each line typed on the server is either a command or
//! text broadcast to every connected client.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info, warn};

use crate::websocket::ServerHandle;
use crate::{AppState, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Quit,
    Save,
    Broadcast(String),
    Empty,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed {
            "" => ConsoleCommand::Empty,
            "q" | "quit" => ConsoleCommand::Quit,
            "/save" => ConsoleCommand::Save,
            _ => ConsoleCommand::Broadcast(trimmed.to_string()),
        }
    }
}

/// Reads operator lines until `quit` or end of input. Stopping the server
/// is left to the caller.
pub async fn run<R>(state: &AppState, server: &ServerHandle, reader: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let Some(line) = lines.next_line().await? else {
            info!("Console input closed");
            break;
        };

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Quit => break,
            ConsoleCommand::Save => match state.save_snapshot().await {
                Ok(Some(path)) => info!("Model saved to {}", path.display()),
                Ok(None) => warn!("Snapshots are disabled; nothing saved"),
                Err(e) => error!("Failed to save model: {}", e),
            },
            ConsoleCommand::Broadcast(text) => match server.broadcast(&text).await {
                Ok(count) => info!("Successfully messaged {} client(s)", count),
                Err(e) => warn!("Broadcast not sent: {}", e),
            },
        }
    }
    Ok(())
}
