use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::SnapshotError;
use crate::model::engine::{AssociationTable, Candidate};
use crate::model::parser::Key;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: Key,
    pub responses: Vec<Candidate>,
}

/// Serialized form of a trained [`AssociationTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub checksum: String,
    pub entries: Vec<SnapshotEntry>,
}

fn checksum(entries: &[SnapshotEntry]) -> Result<String, SnapshotError> {
    let bytes = serde_json::to_vec(entries)?;
    let digest = Sha256::digest(&bytes);
    Ok(base64::engine::general_purpose::STANDARD.encode(digest))
}

impl Snapshot {
    pub fn capture(table: &AssociationTable) -> Result<Self, SnapshotError> {
        let mut entries: Vec<SnapshotEntry> = table
            .iter()
            .map(|(key, responses)| SnapshotEntry {
                key: key.clone(),
                responses: responses.to_vec(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            checksum: checksum(&entries)?,
            entries,
        })
    }

    /// Rebuilds the table, rejecting anything that breaks its invariants.
    pub fn into_table(self) -> Result<AssociationTable, SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version(self.version));
        }
        if checksum(&self.entries)? != self.checksum {
            return Err(SnapshotError::Checksum);
        }

        let mut table = AssociationTable::new();
        let mut keys = HashSet::new();
        for entry in self.entries {
            if !keys.insert(entry.key.clone()) {
                return Err(SnapshotError::Invalid(format!("duplicate key {}", entry.key)));
            }
            if entry.responses.is_empty() {
                return Err(SnapshotError::Invalid(format!("key {} has no responses", entry.key)));
            }
            let mut texts = HashSet::new();
            for candidate in &entry.responses {
                if candidate.count == 0 {
                    return Err(SnapshotError::Invalid(format!(
                        "zero count for {:?} under {}",
                        candidate.text, entry.key
                    )));
                }
                if !texts.insert(candidate.text.as_str()) {
                    return Err(SnapshotError::Invalid(format!(
                        "duplicate response {:?} under {}",
                        candidate.text, entry.key
                    )));
                }
            }
            table.extend(entry.key, entry.responses);
        }
        Ok(table)
    }

    /// Writes next to `path` first and renames, so readers never see a
    /// partial file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let mut tmp = PathBuf::from(path);
        tmp.set_extension("tmp");

        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!("Saved model snapshot with {} keys to {}", self.entries.len(), path.display());
        Ok(())
    }

    /// `Ok(None)` when no snapshot has been written yet.
    pub async fn load(path: impl AsRef<Path>) -> Result<Option<Self>, SnapshotError> {
        let path = path.as_ref();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}
