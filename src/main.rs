use alan_server::shell::{CapabilityRegistry, ChatCapability, Dispatched};
use alan_server::Settings;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully ({})", config.environment);

    let mut shell = CapabilityRegistry::new();
    shell.register(Arc::new(ChatCapability::new(config)));

    let mut argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.is_empty() {
        argv.push("start_server".to_string());
    }

    match shell.dispatch(&argv).await? {
        Dispatched::Help(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        Dispatched::Tested(true) => info!("Self-check passed"),
        Dispatched::Tested(false) => {
            error!("Self-check failed");
            std::process::exit(1);
        }
        Dispatched::Done => {}
    }

    Ok(())
}
