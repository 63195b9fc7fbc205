use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::EngineError;
use crate::model::parser::{Key, Parser};

/// One candidate response and how often it followed the key's prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub keys: usize,
    pub responses: usize,
    pub total_weight: u64,
}

/// Key → weighted candidates, in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct AssociationTable {
    entries: HashMap<Key, Vec<Candidate>>,
}

impl AssociationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `text` once more under `key`.
    pub fn record(&mut self, key: Key, text: &str) {
        let candidates = self.entries.entry(key).or_default();
        match candidates.iter_mut().find(|c| c.text == text) {
            Some(existing) => existing.count = existing.count.saturating_add(1),
            None => candidates.push(Candidate {
                text: text.to_string(),
                count: 1,
            }),
        }
    }

    /// Inserts a full candidate list, merging with anything already there.
    pub(crate) fn extend(&mut self, key: Key, candidates: Vec<Candidate>) {
        let existing = self.entries.entry(key).or_default();
        for candidate in candidates.into_iter().filter(|c| c.count > 0) {
            match existing.iter_mut().find(|c| c.text == candidate.text) {
                Some(c) => c.count = c.count.saturating_add(candidate.count),
                None => existing.push(candidate),
            }
        }
    }

    pub fn candidates(&self, key: &Key) -> Option<&[Candidate]> {
        self.entries
            .get(key)
            .map(Vec::as_slice)
            .filter(|c| !c.is_empty())
    }

    pub fn has_fallback(&self) -> bool {
        self.candidates(&Key::Unknown).is_some()
    }

    /// Weighted pick for `key`, falling back to the unknown bucket on a miss.
    pub fn sample<R: Rng + ?Sized>(&self, key: &Key, rng: &mut R) -> Result<&str, EngineError> {
        let candidates = match self.candidates(key) {
            Some(c) => c,
            None => self
                .candidates(&Key::Unknown)
                .ok_or(EngineError::NoFallback)?,
        };
        pick_weighted(candidates, rng).ok_or(EngineError::NoFallback)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &[Candidate])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn stats(&self) -> TableStats {
        let mut stats = TableStats {
            keys: self.entries.len(),
            ..TableStats::default()
        };
        for candidates in self.entries.values() {
            stats.responses += candidates.len();
            stats.total_weight += candidates.iter().map(|c| u64::from(c.count)).sum::<u64>();
        }
        stats
    }
}

/// Draws `d` uniformly from `1..=total` and returns the first candidate whose
/// running count reaches `d`.
fn pick_weighted<'a, R: Rng + ?Sized>(candidates: &'a [Candidate], rng: &mut R) -> Option<&'a str> {
    let total: u64 = candidates.iter().map(|c| u64::from(c.count)).sum();
    if total == 0 {
        return None;
    }
    let draw = rng.gen_range(1..=total);
    let mut running = 0u64;
    for candidate in candidates {
        running += u64::from(candidate.count);
        if running >= draw {
            return Some(&candidate.text);
        }
    }
    None
}

/// The trained table plus the parser that produces its keys.
///
/// Every read-sample and read-update sequence runs under a single guard, so
/// concurrent sessions never sample from a half-updated candidate list.
pub struct ResponseEngine {
    parser: Arc<dyn Parser>,
    table: RwLock<AssociationTable>,
}

impl ResponseEngine {
    pub fn new(parser: Arc<dyn Parser>) -> Self {
        Self::with_table(parser, AssociationTable::new())
    }

    pub fn with_table(parser: Arc<dyn Parser>, table: AssociationTable) -> Self {
        Self {
            parser,
            table: RwLock::new(table),
        }
    }

    pub fn parse(&self, text: &str) -> Key {
        self.parser.parse(text)
    }

    pub async fn respond(&self, key: &Key) -> Result<String, EngineError> {
        let table = self.table.read().await;
        let mut rng = rand::thread_rng();
        table.sample(key, &mut rng).map(str::to_string)
    }

    pub async fn respond_with<R: Rng + ?Sized>(
        &self,
        key: &Key,
        rng: &mut R,
    ) -> Result<String, EngineError> {
        let table = self.table.read().await;
        table.sample(key, rng).map(str::to_string)
    }

    /// Parses `utterance` and answers it.
    pub async fn reply(&self, utterance: &str) -> Result<String, EngineError> {
        let key = self.parse(utterance);
        debug!("Responding to key {}", key);
        self.respond(&key).await
    }

    /// Records that `response` followed `prompt`; prompt-less responses feed
    /// the fallback bucket.
    pub async fn train(&self, prompt: Option<&str>, response: &str) {
        let key = prompt.map_or(Key::Unknown, |p| self.parse(p));
        self.table.write().await.record(key, response);
    }

    pub async fn seed_fallback<I, S>(&self, responses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = self.table.write().await;
        for response in responses {
            let response = response.as_ref().trim();
            if !response.is_empty() {
                table.record(Key::Unknown, response);
            }
        }
    }

    pub async fn has_fallback(&self) -> bool {
        self.table.read().await.has_fallback()
    }

    /// Refuses service until at least one fallback response exists.
    pub async fn ensure_ready(&self) -> Result<(), EngineError> {
        if self.has_fallback().await {
            Ok(())
        } else {
            Err(EngineError::NoFallback)
        }
    }

    pub async fn weights(&self, key: &Key) -> Vec<(String, u32)> {
        self.table
            .read()
            .await
            .candidates(key)
            .map(|c| c.iter().map(|c| (c.text.clone(), c.count)).collect())
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> TableStats {
        self.table.read().await.stats()
    }

    /// Copy of the current table, for persistence.
    pub async fn table(&self) -> AssociationTable {
        self.table.read().await.clone()
    }
}
