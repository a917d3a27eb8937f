//! One ingestion run, end to end.
//!
//! `process` is the pure core (feed text + boundary bytes -> mapped records).
//! `run` wraps it with the injected collaborators and owns the run's
//! temporary working directory, which is removed on every exit path.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::boundary::{load_boundaries, BoundaryOptions};
use crate::codes::{CodeMapper, CodeTables};
use crate::collaborators::{ArchiveExtractor, BoundarySource, EventStore, FeedSource};
use crate::error::{IngestError, Result};
use crate::normalize::normalize_feed;
use crate::record::EventRecord;
use crate::spatial::SpatialFilter;
use crate::staging::stage_load;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Parent of the per-run temporary directory.
    pub work_dir: PathBuf,
    pub boundary: BoundaryOptions,
    /// Evaluate the spatial filter on the rayon pool.
    pub parallel: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            boundary: BoundaryOptions::default(),
            parallel: false,
        }
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub lines_read: usize,
    pub malformed_lines: usize,
    pub duplicates_removed: usize,
    pub conflicting_ids: usize,
    pub normalized: usize,
    pub invalid_coordinates: usize,
    pub outside_boundaries: usize,
    pub retained: usize,
    pub mapping_incomplete: usize,
    pub regions: usize,
    pub fact_rows_staged: u64,
    pub dimension_rows_staged: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: retrieved={} malformed={} duplicates={} conflicting_ids={} normalized={} \
             invalid_coordinates={} outside={} filtered={} mapping_incomplete={} \
             staged_facts={} staged_dimensions={}",
            self.run_id,
            self.lines_read,
            self.malformed_lines,
            self.duplicates_removed,
            self.conflicting_ids,
            self.normalized,
            self.invalid_coordinates,
            self.outside_boundaries,
            self.retained,
            self.mapping_incomplete,
            self.fact_rows_staged,
            self.dimension_rows_staged,
        )
    }
}

#[derive(Debug)]
pub struct Processed {
    pub records: Vec<EventRecord>,
    pub summary: RunSummary,
}

/// Normalize, filter and map one raw feed against one boundary dataset.
pub fn process(
    run_id: Uuid,
    feed: &[u8],
    boundary: &[u8],
    tables: &CodeTables,
    options: &RunOptions,
) -> Result<Processed> {
    let boundaries = load_boundaries(boundary, &options.boundary)?;
    let normalized = normalize_feed(feed)?;

    let filter = SpatialFilter::new(boundaries);
    let filtered = filter.filter(normalized.records, options.parallel);
    let mapped = CodeMapper::new(tables).map(filtered.records);

    let n = normalized.stats;
    let summary = RunSummary {
        run_id,
        lines_read: n.lines_read,
        malformed_lines: n.malformed_lines,
        duplicates_removed: n.duplicates_removed,
        conflicting_ids: n.conflicting_ids,
        normalized: filtered.stats.evaluated,
        invalid_coordinates: filtered.stats.invalid_coordinates,
        outside_boundaries: filtered.stats.outside_boundaries,
        retained: filtered.stats.retained,
        mapping_incomplete: mapped.stats.incomplete,
        regions: filter.boundaries().len(),
        ..RunSummary::default()
    };

    if summary.retained == 0 {
        warn!("no record intersects the boundary dataset");
    }

    Ok(Processed {
        records: mapped.records,
        summary,
    })
}

/// Execute one full run with the given collaborators.
pub async fn run<F, B, X, S>(
    feed: &F,
    boundaries: &B,
    extractor: &X,
    store: &mut S,
    tables: &CodeTables,
    options: &RunOptions,
) -> Result<RunSummary>
where
    F: FeedSource,
    B: BoundarySource + ?Sized,
    X: ArchiveExtractor,
    S: EventStore,
{
    let run_id = Uuid::new_v4();
    info!(%run_id, work_dir = %options.work_dir.display(), "Run started");

    tokio::fs::create_dir_all(&options.work_dir)
        .await
        .map_err(IngestError::Workspace)?;
    let workspace = tempfile::Builder::new()
        .prefix("ingest-run-")
        .tempdir_in(&options.work_dir)
        .map_err(IngestError::Workspace)?;

    let result = async {
        let (feed_bytes, boundary_bytes) = tokio::try_join!(
            retrieve_feed(feed, extractor, workspace.path()),
            async { boundaries.fetch_boundaries().await.map_err(IngestError::from) },
        )?;

        let processed = process(run_id, &feed_bytes, &boundary_bytes, tables, options)?;
        let mut summary = processed.summary;

        let load = stage_load(run_id, processed.records, tables);
        let receipt = store.stage(load).await?;
        summary.fact_rows_staged = receipt.fact_rows;
        summary.dimension_rows_staged = receipt.dimension_rows;
        Ok::<RunSummary, IngestError>(summary)
    }
    .await;

    let workspace_path = workspace.path().display().to_string();
    match workspace.close() {
        Ok(()) => info!(path = %workspace_path, "Working directory removed"),
        Err(e) => warn!(path = %workspace_path, "failed to remove working directory: {}", e),
    }

    let summary = result?;
    info!("{}", summary);
    Ok(summary)
}

/// Discover, download and extract the latest export, returning its raw bytes.
async fn retrieve_feed<F, X>(feed: &F, extractor: &X, workspace: &Path) -> Result<Vec<u8>>
where
    F: FeedSource,
    X: ArchiveExtractor,
{
    let url = feed.latest_export_url().await?;
    info!(url = %url, "Latest export discovered");

    let bytes = feed.fetch_export(&url).await?;
    let archive_path = workspace.join(archive_file_name(&url));
    tokio::fs::write(&archive_path, &bytes)
        .await
        .map_err(IngestError::Workspace)?;

    let extract_dir = workspace.join("extracted");
    let feed_path = extractor.extract(&archive_path, &extract_dir).await?;
    info!(path = %feed_path.display(), "Export extracted");

    let raw = tokio::fs::read(&feed_path)
        .await
        .map_err(|e| IngestError::Extraction(e.into()))?;
    Ok(raw)
}

/// Last path segment of the URL, if it is a plain file name.
fn archive_file_name(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|name| {
            !name.is_empty() && Path::new(name).file_name() == Some(std::ffi::OsStr::new(name))
        })
        .unwrap_or("export.zip")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::test_support::square_collection;
    use crate::codes::test_support::sample_tables;
    use crate::error::{ExtractionError, RetrievalError};
    use crate::normalize::test_support::feed_line;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    // -------------------------------------------------------------------------
    // FAKE COLLABORATORS
    // -------------------------------------------------------------------------

    /// Serves the feed bytes themselves as the "archive".
    struct FakeFeed {
        bytes: Vec<u8>,
        fail: bool,
    }

    #[async_trait]
    impl FeedSource for FakeFeed {
        async fn latest_export_url(&self) -> Result<String, RetrievalError> {
            if self.fail {
                return Err(RetrievalError::Request {
                    url: "http://feed.test/lastupdate.txt".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok("http://feed.test/20240115123000.export.CSV.zip".to_string())
        }

        async fn fetch_export(&self, _url: &str) -> Result<Vec<u8>, RetrievalError> {
            Ok(self.bytes.clone())
        }
    }

    struct FakeBoundaries(String);

    #[async_trait]
    impl BoundarySource for FakeBoundaries {
        async fn fetch_boundaries(&self) -> Result<Vec<u8>, RetrievalError> {
            Ok(self.0.clone().into_bytes())
        }
    }

    /// Copies the "archive" through unchanged and remembers where it wrote.
    #[derive(Default)]
    struct CopyExtractor {
        seen: std::sync::Mutex<Option<PathBuf>>,
    }

    #[async_trait]
    impl ArchiveExtractor for CopyExtractor {
        async fn extract(&self, archive: &Path, dest: &Path) -> Result<PathBuf, ExtractionError> {
            std::fs::create_dir_all(dest)?;
            let out = dest.join("20240115123000.export.CSV");
            std::fs::copy(archive, &out)?;
            *self.seen.lock().unwrap() = Some(out.clone());
            Ok(out)
        }
    }

    /// Ten records: 2 exact duplicates, 1 with longitude 400, 6 inside exactly
    /// one of three regions and 1 inside none.
    fn scenario_feed() -> String {
        [
            feed_line("1", "01", "US", "0.5", "0.5"),
            feed_line("2", "04", "US", "0.5", "2.5"),
            feed_line("3", "01", "US", "0.5", "4.5"),
            feed_line("1", "01", "US", "0.5", "0.5"),
            feed_line("4", "01", "US", "0.2", "0.2"),
            feed_line("5", "99", "US", "0.8", "2.8"),
            feed_line("6", "01", "US", "0.1", "4.9"),
            feed_line("2", "04", "US", "0.5", "2.5"),
            feed_line("7", "01", "US", "10.0", "400"),
            feed_line("8", "01", "US", "-30.0", "-30.0"),
        ]
        .join("\n")
    }

    fn scenario_boundaries() -> String {
        square_collection(&[
            ("A", 0.0, 0.0, 1.0, 1.0),
            ("B", 2.0, 0.0, 3.0, 1.0),
            ("C", 4.0, 0.0, 5.0, 1.0),
        ])
    }

    fn options(dir: &Path) -> RunOptions {
        RunOptions {
            work_dir: dir.to_path_buf(),
            ..RunOptions::default()
        }
    }

    // -------------------------------------------------------------------------
    // END-TO-END
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let feed = FakeFeed {
            bytes: scenario_feed().into_bytes(),
            fail: false,
        };
        let extractor = CopyExtractor::default();
        let mut store = MemoryStore::new();
        let tables = sample_tables();

        let summary = run(
            &feed,
            &FakeBoundaries(scenario_boundaries()),
            &extractor,
            &mut store,
            &tables,
            &options(dir.path()),
        )
        .await
        .unwrap();

        assert_eq!(summary.lines_read, 10);
        assert_eq!(summary.duplicates_removed, 2);
        assert_eq!(summary.normalized, 8);
        assert_eq!(summary.invalid_coordinates, 1);
        assert_eq!(summary.outside_boundaries, 1);
        assert_eq!(summary.retained, 6);
        assert_eq!(summary.mapping_incomplete, 1);
        assert_eq!(summary.fact_rows_staged, 6);
        assert_eq!(summary.dimension_rows_staged, 9);

        let facts = &store.facts["events"];
        assert_eq!(facts.len(), 6);
        let region = |id: &str| facts[id].region_id.clone();
        assert_eq!(region("1"), "A");
        assert_eq!(region("4"), "A");
        assert_eq!(region("2"), "B");
        assert_eq!(region("5"), "B");
        assert_eq!(region("3"), "C");
        assert_eq!(region("6"), "C");
        assert!(facts["5"].mapping_incomplete);
        assert!(!facts["1"].mapping_incomplete);

        // The extracted file and the whole per-run directory are gone.
        let extracted = extractor.seen.lock().unwrap().clone().unwrap();
        assert!(!extracted.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_line_with_invalid_utf8_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(feed_line("1", "01", "US", "0.5", "0.5").as_bytes());
        bytes.push(b'\n');
        // Latin-1 0xE9 in place of "e" in the location name.
        let latin1 = feed_line("2", "01", "US", "0.5", "2.5").replace("Place", "Plac\u{1}");
        bytes.extend(latin1.bytes().map(|b| if b == 0x01 { 0xE9 } else { b }));
        bytes.push(b'\n');
        bytes.extend_from_slice(feed_line("3", "01", "US", "0.5", "4.5").as_bytes());

        let feed = FakeFeed { bytes, fail: false };
        let mut store = MemoryStore::new();
        let summary = run(
            &feed,
            &FakeBoundaries(scenario_boundaries()),
            &CopyExtractor::default(),
            &mut store,
            &sample_tables(),
            &options(dir.path()),
        )
        .await
        .unwrap();

        assert_eq!(summary.lines_read, 3);
        assert_eq!(summary.malformed_lines, 1);
        assert_eq!(summary.retained, 2);
        let facts = &store.facts["events"];
        assert!(facts.contains_key("1"));
        assert!(!facts.contains_key("2"));
        assert!(facts.contains_key("3"));
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_fatal_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let feed = FakeFeed {
            bytes: Vec::new(),
            fail: true,
        };
        let mut store = MemoryStore::new();

        let err = run(
            &feed,
            &FakeBoundaries(scenario_boundaries()),
            &CopyExtractor::default(),
            &mut store,
            &sample_tables(),
            &options(dir.path()),
        )
        .await
        .unwrap_err();

        assert_eq!(err.category(), "retrieval");
        assert_eq!(store.fact_count(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_bad_boundaries_abort_before_staging() {
        let dir = tempfile::tempdir().unwrap();
        let feed = FakeFeed {
            bytes: scenario_feed().into_bytes(),
            fail: false,
        };
        let mut store = MemoryStore::new();

        let err = run(
            &feed,
            &FakeBoundaries("{\"type\":\"FeatureCollection\",\"features\":[]}".to_string()),
            &CopyExtractor::default(),
            &mut store,
            &sample_tables(),
            &options(dir.path()),
        )
        .await
        .unwrap_err();

        assert_eq!(err.category(), "boundary-parse");
        assert_eq!(store.dimension_count(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let feed = FakeFeed {
            bytes: scenario_feed().into_bytes(),
            fail: false,
        };
        let mut store = MemoryStore {
            fail_with: Some("connection reset".to_string()),
            ..MemoryStore::default()
        };

        let err = run(
            &feed,
            &FakeBoundaries(scenario_boundaries()),
            &CopyExtractor::default(),
            &mut store,
            &sample_tables(),
            &options(dir.path()),
        )
        .await
        .unwrap_err();

        assert_eq!(err.category(), "persistence");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    // -------------------------------------------------------------------------
    // PURE CORE
    // -------------------------------------------------------------------------

    #[test]
    fn test_process_without_matches_is_not_an_error() {
        let feed = feed_line("1", "01", "US", "-30", "-30");
        let processed = process(
            Uuid::nil(),
            feed.as_bytes(),
            scenario_boundaries().as_bytes(),
            &sample_tables(),
            &RunOptions::default(),
        )
        .unwrap();

        assert!(processed.records.is_empty());
        assert_eq!(processed.summary.outside_boundaries, 1);
    }

    #[test]
    fn test_process_parallel_matches_sequential() {
        let sequential = process(
            Uuid::nil(),
            scenario_feed().as_bytes(),
            scenario_boundaries().as_bytes(),
            &sample_tables(),
            &RunOptions::default(),
        )
        .unwrap();
        let parallel = process(
            Uuid::nil(),
            scenario_feed().as_bytes(),
            scenario_boundaries().as_bytes(),
            &sample_tables(),
            &RunOptions {
                parallel: true,
                ..RunOptions::default()
            },
        )
        .unwrap();

        assert_eq!(sequential.records, parallel.records);
        assert_eq!(sequential.summary, parallel.summary);
    }

    #[test]
    fn test_summary_line() {
        let summary = RunSummary {
            run_id: Uuid::nil(),
            lines_read: 10,
            duplicates_removed: 2,
            retained: 6,
            ..RunSummary::default()
        };
        let line = summary.to_string();
        assert!(line.starts_with("run 00000000-0000-0000-0000-000000000000:"));
        assert!(line.contains("retrieved=10"));
        assert!(line.contains("duplicates=2"));
        assert!(line.contains("filtered=6"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(
            archive_file_name("http://data.test/gdeltv2/20240115123000.export.CSV.zip"),
            "20240115123000.export.CSV.zip"
        );
        assert_eq!(archive_file_name("http://data.test/"), "export.zip");
        assert_eq!(archive_file_name("http://data.test/.."), "export.zip");
    }
}
