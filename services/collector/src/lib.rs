//! Collector - fetches the raw inputs of an ingestion run
//!
//! Responsibilities:
//! - Discover the latest export archive from the feed's listing endpoint
//! - Download it, checking the advertised size and hashing the payload
//! - Fetch the boundary dataset over HTTP or read it from disk
//! - Unpack the export archive into the run's working directory

pub mod archive;
pub mod http;

pub use archive::ZipExtractor;
pub use http::{
    http_client, parse_last_update, FileBoundarySource, HttpBoundarySource, HttpFeedSource,
    ListingEntry,
};

pub const DEFAULT_DISCOVERY_URL: &str = "http://data.gdeltproject.org/gdeltv2/lastupdate.txt";
pub const DEFAULT_BOUNDARY_URL: &str =
    "https://raw.githubusercontent.com/plotly/datasets/master/geojson-counties-fips.json";
pub const USER_AGENT: &str = concat!("event-ingest/", env!("CARGO_PKG_VERSION"));
