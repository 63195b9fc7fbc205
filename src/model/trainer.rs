use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::model::engine::ResponseEngine;
use crate::websocket::frame::MAX_SHORT_PAYLOAD;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainStats {
    pub pairs: usize,
    pub skipped: usize,
}

impl std::ops::AddAssign for TrainStats {
    fn add_assign(&mut self, other: Self) {
        self.pairs += other.pairs;
        self.skipped += other.skipped;
    }
}

/// Feeds line-delimited corpora into a [`ResponseEngine`].
///
/// Consecutive non-blank lines form (prompt, response) pairs; a blank line
/// ends the conversation so no pair spans it. Lines too long for a frame
/// are never trained as responses. Only the previous line is
/// kept in memory.
pub struct Trainer<'a> {
    engine: &'a ResponseEngine,
}

impl<'a> Trainer<'a> {
    pub fn new(engine: &'a ResponseEngine) -> Self {
        Self { engine }
    }

    pub async fn train_reader<R>(&self, reader: R) -> std::io::Result<TrainStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut previous: Option<String> = None;
        let mut stats = TrainStats::default();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                previous = None;
                continue;
            }
            // Only responses have to fit in one frame; a long line still
            // works as the next prompt.
            if line.len() > MAX_SHORT_PAYLOAD {
                stats.skipped += 1;
            } else if let Some(prompt) = previous.as_deref() {
                self.engine.train(Some(prompt), line).await;
                stats.pairs += 1;
            }
            previous = Some(line.to_string());
        }

        Ok(stats)
    }

    pub async fn train_file(&self, path: impl AsRef<Path>) -> std::io::Result<TrainStats> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let stats = self.train_reader(BufReader::new(file)).await?;
        debug!(
            "Trained {} pairs from {} ({} lines skipped)",
            stats.pairs,
            path.display(),
            stats.skipped
        );
        Ok(stats)
    }

    pub async fn train_corpora<P: AsRef<Path>>(&self, paths: &[P]) -> std::io::Result<TrainStats> {
        let mut total = TrainStats::default();
        for path in paths {
            total += self.train_file(path).await?;
        }
        info!("Trained {} pairs from {} corpora", total.pairs, paths.len());
        Ok(total)
    }

    /// Prompt-less utterances used when nothing better matches.
    pub async fn seed_fallback<S: AsRef<str>>(&self, responses: &[S]) -> usize {
        let usable: Vec<&str> = responses
            .iter()
            .map(|r| r.as_ref().trim())
            .filter(|r| !r.is_empty() && r.len() <= MAX_SHORT_PAYLOAD)
            .collect();
        self.engine.seed_fallback(&usable).await;
        usable.len()
    }
}
