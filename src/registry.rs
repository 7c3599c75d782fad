//! Completed-run registry.
//!
//! A single JSON file mapping stable hashes to completed-run entries. The
//! orchestrator consults it before any stage executes; a hit means the whole
//! invocation is a no-op unless the caller forces a re-run. The registry is
//! passed into the orchestrator as a constructed dependency; there are no
//! process-wide singletons.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::util::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedRunEntry {
    pub stable_hash: String,
    pub full_id: String,
    pub completed_at: DateTime<Utc>,
    pub feature_name: String,
    pub target: String,
}

pub struct CompletedRunRegistry {
    registry_file: PathBuf,
}

impl CompletedRunRegistry {
    pub fn new(registry_file: PathBuf) -> Self {
        Self { registry_file }
    }

    pub fn is_complete(&self, stable_hash: &str) -> Result<bool> {
        Ok(self.load()?.contains_key(stable_hash))
    }

    pub fn get(&self, stable_hash: &str) -> Result<Option<CompletedRunEntry>> {
        Ok(self.load()?.remove(stable_hash))
    }

    /// Record a completed run. Idempotent: writing the same hash twice is a
    /// no-op, never an error, so racing processes cannot corrupt state.
    pub fn mark_complete(&self, entry: CompletedRunEntry) -> Result<()> {
        let mut entries = self.load()?;
        if entries.contains_key(&entry.stable_hash) {
            return Ok(());
        }
        entries.insert(entry.stable_hash.clone(), entry);
        self.save(&entries)
    }

    /// Force-override support: drop an entry so the caller can re-run. Only
    /// invoked at the caller's explicit request (`--force`), never by the
    /// pipeline itself.
    pub fn remove(&self, stable_hash: &str) -> Result<()> {
        let mut entries = self.load()?;
        if entries.remove(stable_hash).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }

    fn load(&self) -> Result<BTreeMap<String, CompletedRunEntry>> {
        if !self.registry_file.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.registry_file)
            .with_context(|| format!("Failed to read registry: {}", self.registry_file.display()))?;
        serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse registry: {}",
                self.registry_file.display()
            )
        })
    }

    fn save(&self, entries: &BTreeMap<String, CompletedRunEntry>) -> Result<()> {
        let json =
            serde_json::to_string_pretty(entries).context("Failed to serialize registry")?;
        write_atomic(&self.registry_file, &json)
    }
}
