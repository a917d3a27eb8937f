//! Seams to the outside world: retrieval, extraction and persistence.
//!
//! The run function takes these as parameters, so production wiring
//! (HTTP, zip, PostGIS) and test fakes are interchangeable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{ExtractionError, PersistenceError, RetrievalError};
use crate::staging::{DimensionTable, FactRow, StagedLoad};

/// Discovers and downloads the latest export archive.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// URL of the latest export archive, read from the discovery endpoint.
    async fn latest_export_url(&self) -> Result<String, RetrievalError>;

    /// Raw bytes of the archive at `url`.
    async fn fetch_export(&self, url: &str) -> Result<Vec<u8>, RetrievalError>;
}

/// Supplies the polygon boundary dataset.
#[async_trait]
pub trait BoundarySource: Send + Sync {
    async fn fetch_boundaries(&self) -> Result<Vec<u8>, RetrievalError>;
}

/// Decompresses an export archive into `dest`, returning the feed file path.
///
/// Implementations must not block the async runtime while decompressing.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<PathBuf, ExtractionError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageReceipt {
    pub fact_rows: u64,
    pub dimension_rows: u64,
}

/// Persistence collaborator.
///
/// Fact rows are replaced or upserted by `key` (the run's unique event ids);
/// dimension rows are upserted by their natural key. Connections,
/// transactions and DDL belong to the implementation.
#[async_trait]
pub trait EventStore: Send {
    async fn stage_dimension_rows(&mut self, table: DimensionTable)
        -> Result<u64, PersistenceError>;

    async fn stage_fact_rows(
        &mut self,
        table: &str,
        rows: Vec<FactRow>,
        key: &str,
    ) -> Result<u64, PersistenceError>;

    /// Take ownership of one run's output: dimensions first, then facts.
    ///
    /// Implementations that can should override this to make the whole
    /// handoff a single transaction.
    async fn stage(&mut self, load: StagedLoad) -> Result<StageReceipt, PersistenceError> {
        let mut receipt = StageReceipt::default();
        for table in load.dimensions {
            receipt.dimension_rows += self.stage_dimension_rows(table).await?;
        }
        receipt.fact_rows = self
            .stage_fact_rows(load.fact_table, load.facts, load.fact_key)
            .await?;
        Ok(receipt)
    }
}
