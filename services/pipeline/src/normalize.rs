//! Schema Normalizer - raw export lines to `EventRecord`s
//!
//! Responsibilities:
//! - Tokenize the tab-delimited feed (no header, no quoting)
//! - Skip and count lines with the wrong field count, invalid UTF-8 or
//!   unparseable dates
//! - Drop exact duplicates of valid lines, keeping the first occurrence
//! - Keep `event_id` unique: later rows reusing an id are dropped and counted
//! - Project the fixed positional subset onto named fields
//!
//! DETERMINISTIC: same feed text = same records in the same order.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::error::MalformedFeedError;
use crate::record::{
    columns, EventRecord, DATE_ADDED_FORMAT, EVENT_DATE_FORMAT, FEED_DELIMITER, FEED_FIELD_COUNT,
};

/// Per-line warnings printed before the rest are summarised.
const MAX_LINE_WARNINGS: usize = 5;

/// Counters produced by one normalization pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeStats {
    pub lines_read: usize,
    pub malformed_lines: usize,
    pub duplicates_removed: usize,
    pub conflicting_ids: usize,
}

#[derive(Debug)]
pub struct NormalizedFeed {
    pub records: Vec<EventRecord>,
    pub stats: NormalizeStats,
}

/// Normalize the raw bytes of an extracted export file.
///
/// Lines are decoded one at a time; a line that is not valid UTF-8 is
/// malformed like any other and does not fail the feed.
pub fn normalize_feed(content: impl AsRef<[u8]>) -> Result<NormalizedFeed, MalformedFeedError> {
    let content = content.as_ref();
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
    if content.iter().all(u8::is_ascii_whitespace) {
        return Err(MalformedFeedError::Empty);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(FEED_DELIMITER)
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(content);

    let mut stats = NormalizeStats::default();
    let mut records = Vec::new();
    let mut seen_rows: HashSet<String> = HashSet::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut line_warnings: Vec<String> = Vec::new();

    let mut raw = csv::ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut raw) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                return Err(MalformedFeedError::Tokenize {
                    line: e.position().map(|p| p.line()).unwrap_or(0),
                    reason: e.to_string(),
                })
            }
        }

        stats.lines_read += 1;
        let line = raw.position().map(|p| p.line()).unwrap_or(0);

        if raw.len() != FEED_FIELD_COUNT {
            stats.malformed_lines += 1;
            line_warnings.push(format!(
                "Line {}: expected {} fields, found {}",
                line,
                FEED_FIELD_COUNT,
                raw.len()
            ));
            continue;
        }

        let row = match csv::StringRecord::from_byte_record(raw.clone()) {
            Ok(row) => row,
            Err(e) => {
                stats.malformed_lines += 1;
                line_warnings.push(format!(
                    "Line {}: not valid UTF-8 ({})",
                    line,
                    e.utf8_error()
                ));
                continue;
            }
        };

        let record = match project(&row) {
            Ok(r) => r,
            Err(reason) => {
                stats.malformed_lines += 1;
                line_warnings.push(format!("Line {}: {}", line, reason));
                continue;
            }
        };

        // The delimiter cannot occur inside a field, so joining is lossless.
        let row_key = row.iter().collect::<Vec<_>>().join("\t");
        if !seen_rows.insert(row_key) {
            stats.duplicates_removed += 1;
            continue;
        }

        if !seen_ids.insert(record.event_id.clone()) {
            stats.conflicting_ids += 1;
            warn!(
                line,
                event_id = %record.event_id,
                "event id already seen with different content, keeping first"
            );
            continue;
        }

        records.push(record);
    }

    if !line_warnings.is_empty() {
        warn!("Skipped {} malformed line(s)", line_warnings.len());
        for (i, w) in line_warnings.iter().take(MAX_LINE_WARNINGS).enumerate() {
            warn!("  [{}] {}", i + 1, w);
        }
        if line_warnings.len() > MAX_LINE_WARNINGS {
            warn!("  ... and {} more", line_warnings.len() - MAX_LINE_WARNINGS);
        }
    }

    if records.is_empty() && stats.malformed_lines > 0 {
        return Err(MalformedFeedError::NoValidLines {
            expected: FEED_FIELD_COUNT,
            malformed: stats.malformed_lines,
        });
    }

    info!(
        lines = stats.lines_read,
        records = records.len(),
        malformed = stats.malformed_lines,
        duplicates = stats.duplicates_removed,
        conflicting_ids = stats.conflicting_ids,
        "Feed normalized"
    );

    Ok(NormalizedFeed { records, stats })
}

/// Map one 61-field row onto an `EventRecord`.
fn project(row: &csv::StringRecord) -> Result<EventRecord, String> {
    let field = |idx: usize| row.get(idx).unwrap_or("");
    let parsed = |idx: usize| field(idx).trim();

    let event_id = parsed(columns::GLOBAL_EVENT_ID);
    if event_id.is_empty() {
        return Err("empty GLOBALEVENTID".to_string());
    }

    let event_date = NaiveDate::parse_from_str(parsed(columns::SQL_DATE), EVENT_DATE_FORMAT)
        .map_err(|e| format!("invalid SQLDATE '{}': {}", parsed(columns::SQL_DATE), e))?;

    let date_added = NaiveDateTime::parse_from_str(parsed(columns::DATE_ADDED), DATE_ADDED_FORMAT)
        .map_err(|e| format!("invalid DATEADDED '{}': {}", parsed(columns::DATE_ADDED), e))?;

    Ok(EventRecord {
        event_id: event_id.to_string(),
        event_date,
        event_code: field(columns::EVENT_CODE).to_string(),
        event_base_code: field(columns::EVENT_BASE_CODE).to_string(),
        event_root_code: field(columns::EVENT_ROOT_CODE).to_string(),
        location_name: field(columns::ACTION_GEO_FULL_NAME).to_string(),
        country_code: field(columns::ACTION_GEO_COUNTRY_CODE).to_string(),
        latitude: parse_coordinate(parsed(columns::ACTION_GEO_LAT)),
        longitude: parse_coordinate(parsed(columns::ACTION_GEO_LONG)),
        date_added,
        source_url: field(columns::SOURCE_URL).to_string(),
        geometry: None,
        region_id: None,
        country_iso2: None,
        mapping_incomplete: false,
    })
}

/// Empty, non-numeric and non-finite text all become `None`; the geometry
/// builder rejects them later.
fn parse_coordinate(text: &str) -> Option<f64> {
    if text.is_empty() {
        return None;
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            debug!(value = text, "non-numeric coordinate");
            None
        }
    }
}
