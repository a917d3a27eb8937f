//! Error taxonomy for an ingestion run.
//!
//! Fatal categories abort the remainder of the run (the working directory is
//! still removed). Per-record categories never propagate: they are counted and
//! reported in the run summary.

use thiserror::Error;

/// Network or endpoint failure while retrieving the feed or the boundary dataset.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("discovery listing at {url} has no export entry")]
    NoExportEntry { url: String },

    #[error("size mismatch for {url}: advertised {expected} bytes, received {actual}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error("failed to read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Corrupt or unusable export archive.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("corrupt archive {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("archive {path} contains no feed file")]
    NoFeedEntry { path: String },

    #[error("archive {path} contains {count} feed files, expected exactly one")]
    AmbiguousEntries { path: String, count: usize },

    #[error("archive entry '{name}' escapes the extraction directory")]
    UnsafeEntry { name: String },

    #[error("I/O error during extraction: {0}")]
    Io(#[from] std::io::Error),
}

/// Whole-file structural failure of the feed.
///
/// Single malformed lines are not errors; they are skipped and counted.
#[derive(Debug, Error)]
pub enum MalformedFeedError {
    #[error("feed is empty")]
    Empty,

    #[error("no usable line in feed: every line was malformed ({malformed} lines, expected {expected} fields)")]
    NoValidLines { expected: usize, malformed: usize },

    #[error("feed cannot be tokenized at line {line}: {reason}")]
    Tokenize { line: u64, reason: String },
}

/// Per-record coordinate failure. The record is excluded, never zeroed or clamped.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InvalidCoordinateError {
    #[error("latitude is missing or non-numeric")]
    MissingLatitude,

    #[error("longitude is missing or non-numeric")]
    MissingLongitude,

    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

/// Malformed boundary dataset. Without boundaries the filter cannot run.
#[derive(Debug, Error)]
pub enum BoundaryParseError {
    #[error("boundary dataset is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a FeatureCollection, found '{0}'")]
    NotFeatureCollection(String),

    #[error("feature {index} has no region identifier")]
    MissingRegionId { index: usize },

    #[error("feature {index} ({region_id}) has unsupported geometry type '{kind}'")]
    UnsupportedGeometry {
        index: usize,
        region_id: String,
        kind: String,
    },

    #[error("feature {index} ({region_id}) has malformed coordinates: {reason}")]
    MalformedCoordinates {
        index: usize,
        region_id: String,
        reason: String,
    },

    #[error("unsupported reference system '{0}'")]
    UnsupportedCrs(String),

    #[error("boundary dataset contains no polygons")]
    Empty,
}

/// Failure reported by the persistence collaborator.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("staging into {table} failed: {reason}")]
    Stage { table: String, reason: String },
}

/// Fatal failure of a whole run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    MalformedFeed(#[from] MalformedFeedError),

    #[error(transparent)]
    BoundaryParse(#[from] BoundaryParseError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("working directory unavailable: {0}")]
    Workspace(#[source] std::io::Error),
}

impl IngestError {
    /// Stable category name used in logs and the one-line failure cause.
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::Retrieval(_) => "retrieval",
            IngestError::Extraction(_) => "extraction",
            IngestError::MalformedFeed(_) => "malformed-feed",
            IngestError::BoundaryParse(_) => "boundary-parse",
            IngestError::Persistence(_) => "persistence",
            IngestError::Workspace(_) => "workspace",
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
