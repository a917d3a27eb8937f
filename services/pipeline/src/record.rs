//! The normalized event record and the positional layout of the raw feed.

use chrono::{NaiveDate, NaiveDateTime};
use geo::Point;

/// Number of tab-separated fields in one export line.
pub const FEED_FIELD_COUNT: usize = 61;

/// Field delimiter of the export feed.
pub const FEED_DELIMITER: u8 = b'\t';

/// Positions (0-based) of the projected fields in a raw export line.
pub mod columns {
    pub const GLOBAL_EVENT_ID: usize = 0;
    pub const SQL_DATE: usize = 1;
    pub const EVENT_CODE: usize = 26;
    pub const EVENT_BASE_CODE: usize = 27;
    pub const EVENT_ROOT_CODE: usize = 28;
    pub const ACTION_GEO_FULL_NAME: usize = 52;
    pub const ACTION_GEO_COUNTRY_CODE: usize = 53;
    pub const ACTION_GEO_LAT: usize = 56;
    pub const ACTION_GEO_LONG: usize = 57;
    pub const DATE_ADDED: usize = 59;
    pub const SOURCE_URL: usize = 60;
}

/// Format of `SQLDATE`.
pub const EVENT_DATE_FORMAT: &str = "%Y%m%d";

/// Format of `DATEADDED`.
pub const DATE_ADDED_FORMAT: &str = "%Y%m%d%H%M%S";

/// One normalized event.
///
/// Created by the normalizer; `geometry` and `region_id` are filled by the
/// spatial filter, `country_iso2` and `mapping_incomplete` by the code mapper.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event_id: String,
    pub event_date: NaiveDate,
    pub event_code: String,
    pub event_base_code: String,
    pub event_root_code: String,
    pub location_name: String,
    /// FIPS 10-4 country code as published by the source, not ISO.
    pub country_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub date_added: NaiveDateTime,
    pub source_url: String,

    pub geometry: Option<Point<f64>>,
    pub region_id: Option<String>,
    pub country_iso2: Option<String>,
    pub mapping_incomplete: bool,
}

impl EventRecord {
    /// Drop everything the later stages attached.
    pub fn clear_enrichment(&mut self) {
        self.geometry = None;
        self.region_id = None;
        self.country_iso2 = None;
        self.mapping_incomplete = false;
    }
}
