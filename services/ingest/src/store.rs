//! PostGIS-backed `EventStore`.
//!
//! A full `stage` runs in one transaction: dimension tables, then facts, then
//! the audit row in `ingest_runs`. Rows are upserted in batches, so re-running
//! with an overlapping feed replaces rather than duplicates.

use async_trait::async_trait;
use pipeline::staging::{DimensionTable, FactRow, StagedLoad};
use pipeline::{EventStore, PersistenceError, StageReceipt};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

/// 14 binds per fact row keeps a batch well under the 65535 bind limit.
const FACT_BATCH: usize = 1000;
const DIMENSION_BATCH: usize = 5000;

/// Non-key fact columns, in bind order after the key.
const FACT_COLUMNS: [&str; 13] = [
    "event_date",
    "event_code",
    "event_base_code",
    "event_root_code",
    "location_name",
    "country_code",
    "country_iso2",
    "latitude",
    "longitude",
    "region_id",
    "date_added",
    "source_url",
    "mapping_incomplete",
];

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }
}

fn stage_error(table: &str) -> impl Fn(sqlx::Error) -> PersistenceError + '_ {
    move |e| PersistenceError::Stage {
        table: table.to_string(),
        reason: e.to_string(),
    }
}

/// Table and column names are spliced into SQL, so only plain identifiers pass.
fn identifier(name: &str) -> Result<&str, PersistenceError> {
    let valid = !name.is_empty()
        && name.starts_with(|c: char| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(PersistenceError::Stage {
            table: name.to_string(),
            reason: "not a plain SQL identifier".to_string(),
        })
    }
}

fn dimension_upsert<'a>(
    table: &DimensionTable,
    rows: &'a [pipeline::DimensionRow],
) -> Result<QueryBuilder<'a, Postgres>, PersistenceError> {
    let name = identifier(table.table)?;
    let key = identifier(table.natural_key)?;
    let value = identifier(table.value_column)?;

    let mut qb = QueryBuilder::new(format!("INSERT INTO {} ({}, {}) ", name, key, value));
    qb.push_values(rows, |mut b, row| {
        b.push_bind(&row.key).push_bind(&row.value);
    });
    qb.push(format!(
        " ON CONFLICT ({key}) DO UPDATE SET {value} = EXCLUDED.{value}",
        key = key,
        value = value
    ));
    Ok(qb)
}

fn fact_upsert<'a>(
    table: &str,
    key: &str,
    rows: &'a [FactRow],
) -> Result<QueryBuilder<'a, Postgres>, PersistenceError> {
    let name = identifier(table)?;
    let key = identifier(key)?;

    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}, {}, geom) ",
        name,
        key,
        FACT_COLUMNS.join(", ")
    ));
    qb.push_values(rows, |mut b, row| {
        b.push_bind(&row.event_id)
            .push_bind(row.event_date)
            .push_bind(&row.event_code)
            .push_bind(&row.event_base_code)
            .push_bind(&row.event_root_code)
            .push_bind(&row.location_name)
            .push_bind(&row.country_code)
            .push_bind(row.country_iso2.as_deref())
            .push_bind(row.latitude)
            .push_bind(row.longitude)
            .push_bind(&row.region_id)
            .push_bind(row.date_added)
            .push_bind(&row.source_url)
            .push_bind(row.mapping_incomplete)
            .push("ST_SetSRID(ST_MakePoint(")
            .push_bind_unseparated(row.longitude)
            .push_unseparated(", ")
            .push_bind_unseparated(row.latitude)
            .push_unseparated("), 4326)");
    });

    let updates: Vec<String> = FACT_COLUMNS
        .iter()
        .chain(std::iter::once(&"geom"))
        .map(|c| format!("{c} = EXCLUDED.{c}", c = c))
        .collect();
    qb.push(format!(
        " ON CONFLICT ({}) DO UPDATE SET {}, updated_at = now()",
        key,
        updates.join(", ")
    ));
    Ok(qb)
}

async fn upsert_dimension(
    conn: &mut PgConnection,
    table: &DimensionTable,
) -> Result<u64, PersistenceError> {
    let mut written = 0;
    for chunk in table.rows.chunks(DIMENSION_BATCH) {
        let mut qb = dimension_upsert(table, chunk)?;
        let result = qb
            .build()
            .execute(&mut *conn)
            .await
            .map_err(stage_error(table.table))?;
        written += result.rows_affected();
    }
    debug!(table = table.table, rows = written, "dimension upserted");
    Ok(written)
}

async fn upsert_facts(
    conn: &mut PgConnection,
    table: &str,
    rows: &[FactRow],
    key: &str,
) -> Result<u64, PersistenceError> {
    let mut written = 0;
    for chunk in rows.chunks(FACT_BATCH) {
        let mut qb = fact_upsert(table, key, chunk)?;
        let result = qb
            .build()
            .execute(&mut *conn)
            .await
            .map_err(stage_error(table))?;
        written += result.rows_affected();
    }
    debug!(table = table, rows = written, "facts upserted");
    Ok(written)
}

async fn record_run(
    conn: &mut PgConnection,
    load: &StagedLoad,
    receipt: &StageReceipt,
) -> Result<(), PersistenceError> {
    sqlx::query(
        r#"
        INSERT INTO ingest_runs (run_id, code_tables_version, status, detail)
        VALUES ($1, $2, 'ok', $3)
        "#,
    )
    .bind(load.run_id)
    .bind(&load.code_tables_version)
    .bind(serde_json::json!({
        "fact_table": load.fact_table,
        "fact_rows": receipt.fact_rows,
        "dimension_rows": receipt.dimension_rows,
    }))
    .execute(&mut *conn)
    .await
    .map_err(stage_error("ingest_runs"))?;
    Ok(())
}

#[async_trait]
impl EventStore for PgStore {
    async fn stage_dimension_rows(
        &mut self,
        table: DimensionTable,
    ) -> Result<u64, PersistenceError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;
        upsert_dimension(&mut conn, &table).await
    }

    async fn stage_fact_rows(
        &mut self,
        table: &str,
        rows: Vec<FactRow>,
        key: &str,
    ) -> Result<u64, PersistenceError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;
        upsert_facts(&mut conn, table, &rows, key).await
    }

    async fn stage(&mut self, load: StagedLoad) -> Result<StageReceipt, PersistenceError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;

        let mut receipt = StageReceipt::default();
        for table in &load.dimensions {
            receipt.dimension_rows += upsert_dimension(&mut tx, table).await?;
        }
        receipt.fact_rows =
            upsert_facts(&mut tx, load.fact_table, &load.facts, load.fact_key).await?;
        record_run(&mut tx, &load, &receipt).await?;

        tx.commit().await.map_err(stage_error(load.fact_table))?;
        info!(
            run_id = %load.run_id,
            fact_rows = receipt.fact_rows,
            dimension_rows = receipt.dimension_rows,
            "Load committed"
        );
        Ok(receipt)
    }
}
