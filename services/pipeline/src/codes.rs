//! Code Mapper - validate categorical codes against the lookup tables
//!
//! Records with a code missing from its table are kept and flagged
//! (`mapping_incomplete = true`); stale tables must not stop ingestion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::record::EventRecord;

/// The four static lookup tables, loaded from versioned configuration data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeTables {
    pub version: String,
    pub event_root_codes: BTreeMap<String, String>,
    pub event_base_codes: BTreeMap<String, String>,
    pub event_codes: BTreeMap<String, String>,
    /// FIPS 10-4 country code -> ISO 3166-1 alpha-2.
    pub country_fips_to_iso2: BTreeMap<String, String>,
}

impl CodeTables {
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// ISO alpha-2 for a FIPS code, if the table holds a well-formed one.
    pub fn iso2_for(&self, fips: &str) -> Option<&str> {
        self.country_fips_to_iso2
            .get(fips)
            .map(String::as_str)
            .filter(|iso| iso.len() == 2 && iso.bytes().all(|b| b.is_ascii_uppercase()))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MappingStats {
    pub incomplete: usize,
    pub unknown_root: usize,
    pub unknown_base: usize,
    pub unknown_event: usize,
    pub unknown_country: usize,
}

#[derive(Debug)]
pub struct MappingOutcome {
    pub records: Vec<EventRecord>,
    pub stats: MappingStats,
}

pub struct CodeMapper<'a> {
    tables: &'a CodeTables,
}

impl<'a> CodeMapper<'a> {
    pub fn new(tables: &'a CodeTables) -> Self {
        Self { tables }
    }

    pub fn map(&self, records: Vec<EventRecord>) -> MappingOutcome {
        let mut stats = MappingStats::default();
        let records: Vec<EventRecord> = records
            .into_iter()
            .map(|r| self.map_record(r, &mut stats))
            .collect();

        info!(
            records = records.len(),
            incomplete = stats.incomplete,
            unknown_root = stats.unknown_root,
            unknown_base = stats.unknown_base,
            unknown_event = stats.unknown_event,
            unknown_country = stats.unknown_country,
            tables_version = %self.tables.version,
            "Codes mapped"
        );

        MappingOutcome { records, stats }
    }

    fn map_record(&self, mut record: EventRecord, stats: &mut MappingStats) -> EventRecord {
        let t = self.tables;
        let mut complete = true;

        if !t.event_root_codes.contains_key(&record.event_root_code) {
            stats.unknown_root += 1;
            complete = false;
        }
        if !t.event_base_codes.contains_key(&record.event_base_code) {
            stats.unknown_base += 1;
            complete = false;
        }
        if !t.event_codes.contains_key(&record.event_code) {
            stats.unknown_event += 1;
            complete = false;
        }

        record.country_iso2 = t.iso2_for(&record.country_code).map(str::to_string);
        if record.country_iso2.is_none() {
            stats.unknown_country += 1;
            complete = false;
        }

        record.mapping_incomplete = !complete;
        if !complete {
            stats.incomplete += 1;
            debug!(
                event_id = %record.event_id,
                root = %record.event_root_code,
                base = %record.event_base_code,
                code = %record.event_code,
                country = %record.country_code,
                "mapping incomplete"
            );
        }
        record
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::CodeTables;

    pub fn sample_tables() -> CodeTables {
        CodeTables::from_json(
            r#"{
                "version": "test-1",
                "event_root_codes": {"01": "MAKE PUBLIC STATEMENT", "04": "CONSULT"},
                "event_base_codes": {"010": "Make statement", "040": "Consult"},
                "event_codes": {"010": "Make statement", "040": "Consult"},
                "country_fips_to_iso2": {"US": "US", "UK": "GB", "XX": "bad"}
            }"#,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_tables;
    use super::*;
    use crate::normalize::normalize_feed;
    use crate::normalize::test_support::feed_line;

    fn record(root: &str, country: &str) -> EventRecord {
        normalize_feed(&feed_line("1", root, country, "1", "1"))
            .unwrap()
            .records
            .remove(0)
    }

    #[test]
    fn test_known_codes_are_complete() {
        let tables = sample_tables();
        let out = CodeMapper::new(&tables).map(vec![record("04", "US")]);

        assert!(!out.records[0].mapping_incomplete);
        assert_eq!(out.records[0].country_iso2.as_deref(), Some("US"));
        assert_eq!(out.stats, MappingStats::default());
    }

    #[test]
    fn test_fips_differs_from_iso() {
        let tables = sample_tables();
        let out = CodeMapper::new(&tables).map(vec![record("01", "UK")]);
        assert_eq!(out.records[0].country_iso2.as_deref(), Some("GB"));
        assert!(!out.records[0].mapping_incomplete);
    }

    #[test]
    fn test_unknown_root_code_is_flagged_not_dropped() {
        let tables = sample_tables();
        let out = CodeMapper::new(&tables).map(vec![record("99", "US"), record("01", "US")]);

        assert_eq!(out.records.len(), 2);
        assert!(out.records[0].mapping_incomplete);
        assert!(!out.records[1].mapping_incomplete);
        assert_eq!(out.stats.incomplete, 1);
        assert_eq!(out.stats.unknown_root, 1);
        assert_eq!(out.stats.unknown_base, 1);
        assert_eq!(out.stats.unknown_event, 1);
    }

    #[test]
    fn test_unmapped_or_malformed_country_is_flagged() {
        let tables = sample_tables();
        let out = CodeMapper::new(&tables).map(vec![record("01", "ZZ"), record("01", "XX")]);

        assert!(out.records.iter().all(|r| r.mapping_incomplete));
        assert!(out.records.iter().all(|r| r.country_iso2.is_none()));
        assert_eq!(out.stats.unknown_country, 2);
    }

    #[test]
    fn test_tables_parse_errors() {
        assert!(CodeTables::from_json("{}").is_err());
        assert!(CodeTables::from_json("not json").is_err());
    }
}
