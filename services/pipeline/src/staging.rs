//! Load Staging - package the final records and lookup tables for persistence
//!
//! A `StagedLoad` is handed to the store by value: once staged, the core holds
//! no reference to the rows it produced.

use chrono::{NaiveDate, NaiveDateTime};
use tracing::warn;
use uuid::Uuid;

use crate::codes::CodeTables;
use crate::record::EventRecord;

pub const FACT_TABLE: &str = "events";
pub const FACT_KEY: &str = "global_event_id";

/// One row of the `events` fact table.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub event_id: String,
    pub event_date: NaiveDate,
    pub event_code: String,
    pub event_base_code: String,
    pub event_root_code: String,
    pub location_name: String,
    pub country_code: String,
    pub country_iso2: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub region_id: String,
    pub date_added: NaiveDateTime,
    pub source_url: String,
    pub mapping_incomplete: bool,
}

impl FactRow {
    /// `None` for a record that never went through the spatial filter.
    pub fn from_record(record: EventRecord) -> Option<FactRow> {
        let point = record.geometry?;
        let region_id = record.region_id?;
        Some(FactRow {
            event_id: record.event_id,
            event_date: record.event_date,
            event_code: record.event_code,
            event_base_code: record.event_base_code,
            event_root_code: record.event_root_code,
            location_name: record.location_name,
            country_code: record.country_code,
            country_iso2: record.country_iso2,
            latitude: point.y(),
            longitude: point.x(),
            region_id,
            date_added: record.date_added,
            source_url: record.source_url,
            mapping_incomplete: record.mapping_incomplete,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionRow {
    pub key: String,
    pub value: String,
}

/// A lookup table destined for one dimension table, upserted by `natural_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionTable {
    pub table: &'static str,
    pub natural_key: &'static str,
    pub value_column: &'static str,
    pub rows: Vec<DimensionRow>,
}

impl DimensionTable {
    fn from_map(
        table: &'static str,
        natural_key: &'static str,
        value_column: &'static str,
        map: &std::collections::BTreeMap<String, String>,
    ) -> Self {
        Self {
            table,
            natural_key,
            value_column,
            rows: map
                .iter()
                .map(|(k, v)| DimensionRow {
                    key: k.clone(),
                    value: v.clone(),
                })
                .collect(),
        }
    }
}

/// Everything one run hands to the persistence collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedLoad {
    pub run_id: Uuid,
    pub code_tables_version: String,
    pub fact_table: &'static str,
    pub fact_key: &'static str,
    pub facts: Vec<FactRow>,
    pub dimensions: Vec<DimensionTable>,
}

impl StagedLoad {
    pub fn dimension_row_count(&self) -> usize {
        self.dimensions.iter().map(|d| d.rows.len()).sum()
    }
}

/// Dimension tables in load order.
pub fn dimension_tables(tables: &CodeTables) -> Vec<DimensionTable> {
    vec![
        DimensionTable::from_map(
            "event_root_codes",
            "code",
            "description",
            &tables.event_root_codes,
        ),
        DimensionTable::from_map(
            "event_base_codes",
            "code",
            "description",
            &tables.event_base_codes,
        ),
        DimensionTable::from_map("event_codes", "code", "description", &tables.event_codes),
        DimensionTable::from_map(
            "country_codes",
            "fips_code",
            "iso2",
            &tables.country_fips_to_iso2,
        ),
    ]
}

pub fn stage_load(run_id: Uuid, records: Vec<EventRecord>, tables: &CodeTables) -> StagedLoad {
    let total = records.len();
    let facts: Vec<FactRow> = records.into_iter().filter_map(FactRow::from_record).collect();
    if facts.len() != total {
        warn!(
            dropped = total - facts.len(),
            "records without region attribution were not staged"
        );
    }

    StagedLoad {
        run_id,
        code_tables_version: tables.version.clone(),
        fact_table: FACT_TABLE,
        fact_key: FACT_KEY,
        facts,
        dimensions: dimension_tables(tables),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::test_support::sample_tables;
    use crate::normalize::normalize_feed;
    use crate::normalize::test_support::feed_line;
    use geo::Point;

    #[test]
    fn test_fact_row_takes_coordinates_from_geometry() {
        let mut record = normalize_feed(&feed_line("42", "01", "US", "40.5", "-74.25"))
            .unwrap()
            .records
            .remove(0);
        record.geometry = Some(Point::new(-74.25, 40.5));
        record.region_id = Some("36061".to_string());
        record.country_iso2 = Some("US".to_string());

        let row = FactRow::from_record(record).unwrap();
        assert_eq!(row.event_id, "42");
        assert_eq!(row.latitude, 40.5);
        assert_eq!(row.longitude, -74.25);
        assert_eq!(row.region_id, "36061");
        assert_eq!(row.country_iso2.as_deref(), Some("US"));
    }

    #[test]
    fn test_unattributed_record_is_not_staged() {
        let record = normalize_feed(&feed_line("1", "01", "US", "1", "1"))
            .unwrap()
            .records;
        let load = stage_load(Uuid::new_v4(), record, &sample_tables());
        assert!(load.facts.is_empty());
    }

    #[test]
    fn test_dimensions_cover_all_four_tables() {
        let tables = sample_tables();
        let load = stage_load(Uuid::new_v4(), Vec::new(), &tables);

        let names: Vec<&str> = load.dimensions.iter().map(|d| d.table).collect();
        assert_eq!(
            names,
            vec!["event_root_codes", "event_base_codes", "event_codes", "country_codes"]
        );
        assert_eq!(load.dimensions[3].natural_key, "fips_code");
        assert_eq!(load.dimension_row_count(), 2 + 2 + 2 + 3);
        assert_eq!(load.code_tables_version, "test-1");
        assert_eq!(load.fact_table, "events");
        assert_eq!(load.fact_key, "global_event_id");
    }
}
