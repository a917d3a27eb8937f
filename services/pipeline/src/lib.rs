//! Pipeline - Geospatial event ingestion core
//!
//! Turns one raw export feed plus one polygon boundary dataset into a
//! deduplicated, spatially filtered, code-mapped set of event records ready
//! for persistence.
//!
//! Stages:
//! - `normalize`: tokenize the tab-delimited export, project columns, deduplicate
//! - `geometry`: coordinates -> validated points in the working CRS
//! - `boundary`: GeoJSON feature collection -> region polygons
//! - `spatial`: point-in-polygon attribution through an R-tree
//! - `codes`: flag records whose codes are missing from the lookup tables
//! - `staging`: fact and dimension rows for the store
//!
//! Retrieval, extraction and persistence are behind the traits in
//! `collaborators`; `run::run` wires one run together.

pub mod boundary;
pub mod codes;
pub mod collaborators;
pub mod error;
pub mod geometry;
pub mod normalize;
pub mod record;
pub mod run;
pub mod spatial;
pub mod staging;
pub mod store;

pub use boundary::{load_boundaries, BoundaryOptions, BoundarySet, RegionPolygon};
pub use codes::{CodeMapper, CodeTables};
pub use collaborators::{ArchiveExtractor, BoundarySource, EventStore, FeedSource, StageReceipt};
pub use error::{
    BoundaryParseError, ExtractionError, IngestError, InvalidCoordinateError,
    MalformedFeedError, PersistenceError, RetrievalError,
};
pub use geometry::{build_point, Crs};
pub use normalize::{normalize_feed, NormalizedFeed};
pub use record::EventRecord;
pub use run::{process, run, RunOptions, RunSummary};
pub use spatial::SpatialFilter;
pub use staging::{stage_load, DimensionRow, DimensionTable, FactRow, StagedLoad};
pub use store::MemoryStore;
