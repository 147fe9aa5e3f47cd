//! Sample persistence
//!
//! [`SampleSink`] is the durable-write seam used by the monitor. [`SqliteSink`]
//! writes into a table compatible with the existing dashboard database; every
//! row goes through one cached, parameterized INSERT.

use std::fs;
use std::path::Path;

use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::types::SampleRecord;
use super::validation::validate_table_name;
use crate::error::{InamonError, Result};

/// Destination for persisted samples
pub trait SampleSink {
    fn append(&mut self, record: &SampleRecord) -> Result<()>;
}

impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    fn append(&mut self, record: &SampleRecord) -> Result<()> {
        (**self).append(record)
    }
}

fn sql_error(e: rusqlite::Error) -> InamonError {
    InamonError::persistence(e.to_string())
}

/// Table name as a quoted SQL identifier; keywords such as `order` stay usable
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

/// SQLite-backed sample store
#[derive(Debug)]
pub struct SqliteSink {
    conn: Connection,
    table: String,
    insert_sql: String,
}

impl SqliteSink {
    /// Open (or create) the database at `path` and ensure `table` exists
    pub fn open(path: &Path, table: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(sql_error)?;
        let sink = Self::with_connection(conn, table)?;
        info!(database = %path.display(), table, "Opened sample store");
        Ok(sink)
    }

    /// Private in-memory database
    pub fn open_in_memory(table: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_error)?;
        Self::with_connection(conn, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self> {
        let table = validate_table_name(table)?.to_string();
        let ident = quote_ident(&table);

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {ident} (
                channel INTEGER NOT NULL,
                bus_voltage REAL NOT NULL,
                shunt_voltage REAL NOT NULL,
                current REAL NOT NULL,
                power REAL NOT NULL,
                timestamp REAL NOT NULL
            )"
        ))
        .map_err(sql_error)?;

        let insert_sql = format!(
            "INSERT INTO {ident} (channel, bus_voltage, shunt_voltage, current, power, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        );
        debug!(table = %table, "Sample table ready");

        Ok(Self {
            conn,
            table,
            insert_sql,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of rows in the sample table
    pub fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&self.table));
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(sql_error)?;
        Ok(count.max(0) as u64)
    }

    /// Most recent rows, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<SampleRecord>> {
        let sql = format!(
            "SELECT channel, bus_voltage, shunt_voltage, current, power, timestamp \
             FROM {} ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
            quote_ident(&self.table)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(sql_error)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SampleRecord {
                    channel_id: row.get(0)?,
                    bus_voltage_v: row.get(1)?,
                    shunt_voltage_v: row.get(2)?,
                    current_a: row.get(3)?,
                    power_w: row.get(4)?,
                    timestamp: row.get(5)?,
                })
            })
            .map_err(sql_error)?;
        let records = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(sql_error)?;
        Ok(records)
    }
}

impl SampleSink for SqliteSink {
    fn append(&mut self, record: &SampleRecord) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(&self.insert_sql).map_err(sql_error)?;
        stmt.execute(params![
            record.channel_id,
            record.bus_voltage_v,
            record.shunt_voltage_v,
            record.current_a,
            record.power_w,
            record.timestamp,
        ])
        .map_err(sql_error)?;
        Ok(())
    }
}

/// Sample store kept in memory
///
/// Used by `inamond --simulate` and tests. Can be switched into a failing
/// state to exercise persistence error handling.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<SampleRecord>,
    failing: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }
}

impl SampleSink for MemorySink {
    fn append(&mut self, record: &SampleRecord) -> Result<()> {
        if self.failing {
            return Err(InamonError::persistence("memory sink is set to fail"));
        }
        self.records.push(*record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(channel_id: u32, timestamp: f64) -> SampleRecord {
        SampleRecord {
            channel_id,
            bus_voltage_v: 12.48,
            shunt_voltage_v: 0.0021,
            current_a: 0.021,
            power_w: 0.262,
            timestamp,
        }
    }

    #[test]
    fn test_sqlite_append_and_read_back() {
        let mut sink = SqliteSink::open_in_memory("STC_BAT_dades").unwrap();
        sink.append(&record(1, 100.0)).unwrap();
        sink.append(&record(2, 101.0)).unwrap();

        assert_eq!(sink.count().unwrap(), 2);
        let recent = sink.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], record(2, 101.0));
        assert_eq!(recent[1], record(1, 100.0));
    }

    #[test]
    fn test_sqlite_creates_parent_dir_and_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("samples.db");

        {
            let mut sink = SqliteSink::open(&path, "samples").unwrap();
            sink.append(&record(4, 1.0)).unwrap();
        }

        let sink = SqliteSink::open(&path, "samples").unwrap();
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn test_sqlite_rejects_unsafe_table_name() {
        let result = SqliteSink::open_in_memory("x; DROP TABLE y");
        assert!(matches!(result, Err(InamonError::InvalidConfig { .. })));
    }

    #[test]
    fn test_sqlite_keyword_table_name() {
        for table in ["select", "order"] {
            let mut sink = SqliteSink::open_in_memory(table).unwrap();
            sink.append(&record(3, 5.0)).unwrap();
            assert_eq!(sink.count().unwrap(), 1);
            assert_eq!(sink.recent(1).unwrap()[0], record(3, 5.0));
        }
    }

    #[test]
    fn test_memory_sink_failure_mode() {
        let mut sink = MemorySink::new();
        sink.append(&record(1, 1.0)).unwrap();
        sink.set_failing(true);
        assert!(matches!(
            sink.append(&record(1, 2.0)),
            Err(InamonError::Persistence { .. })
        ));
        sink.set_failing(false);
        sink.append(&record(1, 3.0)).unwrap();
        assert_eq!(sink.records().len(), 2);
    }

    #[test]
    fn test_boxed_sink_forwards() {
        let mut sink: Box<dyn SampleSink> = Box::new(MemorySink::new());
        assert!(sink.append(&record(1, 1.0)).is_ok());
    }
}
