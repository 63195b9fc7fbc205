use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};

use super::{Arity, Capability, Command};
use crate::error::AppError;
use crate::websocket::{handshake, ChatServer};
use crate::{console, AppState, Result, Settings};

// Reference pair from RFC 6455, section 1.3.
const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

/// The chat server as a shell capability.
pub struct ChatCapability {
    settings: Settings,
}

impl ChatCapability {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Optional first argument overrides the configured port.
    fn settings_for(&self, args: &[String]) -> Result<Settings> {
        let mut settings = self.settings.clone();
        if let Some(port) = args.first() {
            settings.server.port = port
                .parse()
                .map_err(|_| AppError::ConfigError(format!("Invalid port: {}", port)))?;
        }
        Ok(settings)
    }
}

#[async_trait]
impl Capability for ChatCapability {
    fn name(&self) -> &'static str {
        "server"
    }

    async fn launch(&self, args: Vec<String>) -> Result<()> {
        let state = AppState::new(self.settings_for(&args)?).await?;
        let server = Arc::new(ChatServer::new(&state));
        let handle = server.start().await?;
        info!("Type a message to broadcast it, /save to store the model, q to quit");

        let console_result = console::run(&state, &handle, BufReader::new(tokio::io::stdin())).await;
        if let Err(e) = &console_result {
            error!("Console failed: {}", e);
        }

        let report = handle.stop().await?;
        info!(
            "Closed {} connections and joined {} sessions",
            report.connections_closed, report.sessions_joined
        );
        console_result
    }

    async fn test(&self, args: Vec<String>) -> Result<bool> {
        let accept = handshake::compute_accept_key(SAMPLE_KEY);
        if accept != SAMPLE_ACCEPT {
            error!("Handshake self-check failed: got {}", accept);
            return Ok(false);
        }

        match AppState::new(self.settings_for(&args)?).await {
            Ok(state) => {
                let stats = state.engine.stats().await;
                info!(
                    "Model ready with {} keys and {} responses",
                    stats.keys, stats.responses
                );
                Ok(true)
            }
            Err(e) => {
                error!("Model is not usable: {}", e);
                Ok(false)
            }
        }
    }

    fn commands(self: Arc<Self>) -> Vec<Command> {
        vec![Command {
            name: "start_server",
            arity: Arity::Fixed(0),
            description: "Starts the chat server and its console.",
            handler: Arc::new(move |args: Vec<String>| {
                let capability = self.clone();
                async move { capability.launch(args).await }.boxed()
            }),
        }]
    }
}
