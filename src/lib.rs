pub mod config;
pub mod console;
pub mod error;
pub mod model;
pub mod shell;
pub mod websocket;

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

use model::{AssociationTable, KeywordParser, Parser, ResponseEngine, Snapshot, Trainer};

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub engine: Arc<ResponseEngine>,
}

impl AppState {
    /// Restores the model from its snapshot when one exists, otherwise
    /// trains it from the configured corpora. Either way the engine must
    /// end up with fallback responses.
    pub async fn new(config: Settings) -> Result<Self> {
        let parser: Arc<dyn Parser> = Arc::new(KeywordParser::new());

        let restored = match config.snapshot_path() {
            Some(path) => Snapshot::load(path).await?,
            None => None,
        };

        let engine = match restored {
            Some(snapshot) => {
                let table = snapshot.into_table()?;
                let stats = table.stats();
                info!(
                    "Restored model with {} keys and {} responses",
                    stats.keys, stats.responses
                );
                let engine = ResponseEngine::with_table(parser, table);
                if !engine.has_fallback().await {
                    Trainer::new(&engine)
                        .seed_fallback(&config.engine.fallback_responses)
                        .await;
                }
                engine
            }
            None => {
                let engine = ResponseEngine::with_table(parser, AssociationTable::new());
                let trainer = Trainer::new(&engine);
                trainer
                    .train_corpora(&config.engine.corpora)
                    .await
                    .map_err(|e| AppError::ConfigError(format!("Failed to read corpus: {}", e)))?;
                trainer.seed_fallback(&config.engine.fallback_responses).await;
                engine
            }
        };

        engine.ensure_ready().await?;

        Ok(Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
        })
    }

    /// Writes the current model to the configured snapshot path. Returns
    /// `None` when persistence is disabled.
    pub async fn save_snapshot(&self) -> Result<Option<PathBuf>> {
        let Some(path) = self.config.snapshot_path() else {
            return Ok(None);
        };
        let table = self.engine.table().await;
        Snapshot::capture(&table)?.save(path).await?;
        Ok(Some(PathBuf::from(path)))
    }
}
