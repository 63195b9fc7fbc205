//! Response model for the chat server
//!
//! A keyword parser maps utterances to keys, the association table maps
//! keys to weighted candidate responses, and the trainer builds that table
//! from conversation corpora.

mod engine;
mod parser;
mod snapshot;
mod trainer;

pub use engine::{AssociationTable, Candidate, ResponseEngine, TableStats};
pub use parser::{Key, KeywordParser, Parser};
pub use snapshot::{Snapshot, SnapshotEntry};
pub use trainer::{TrainStats, Trainer};
