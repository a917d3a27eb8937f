//! In-memory `EventStore`, used for dry runs and as the test double.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::collaborators::EventStore;
use crate::error::PersistenceError;
use crate::staging::{DimensionTable, FactRow};

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// table -> event id -> row
    pub facts: BTreeMap<String, BTreeMap<String, FactRow>>,
    /// table -> natural key -> value
    pub dimensions: BTreeMap<String, BTreeMap<String, String>>,
    /// Fail the next fact staging with this message.
    pub fail_with: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fact_count(&self) -> usize {
        self.facts.values().map(BTreeMap::len).sum()
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn stage_dimension_rows(
        &mut self,
        table: DimensionTable,
    ) -> Result<u64, PersistenceError> {
        let target = self.dimensions.entry(table.table.to_string()).or_default();
        let count = table.rows.len() as u64;
        for row in table.rows {
            target.insert(row.key, row.value);
        }
        Ok(count)
    }

    async fn stage_fact_rows(
        &mut self,
        table: &str,
        rows: Vec<FactRow>,
        _key: &str,
    ) -> Result<u64, PersistenceError> {
        if let Some(reason) = self.fail_with.take() {
            return Err(PersistenceError::Stage {
                table: table.to_string(),
                reason,
            });
        }
        let target = self.facts.entry(table.to_string()).or_default();
        let count = rows.len() as u64;
        for row in rows {
            target.insert(row.event_id.clone(), row);
        }
        Ok(count)
    }
}
