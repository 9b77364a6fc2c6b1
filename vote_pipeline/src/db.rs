use std::path::Path;

use log::{debug, error, info};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value as JSValue;
use snafu::prelude::*;

use crate::error::*;

pub const STAGING_LOAD_TABLE: &str = "staging_votes_load";
pub const STAGING_FINAL_TABLE: &str = "staging_votes";
pub const OPERATIONAL_TABLE: &str = "votes";
pub const WEEKLY_VIEW: &str = "weekly_vote_counts";
pub const OUTLIER_VIEW: &str = "outlier_weeks";

pub(crate) const ID_INDEX: &str = "votes_id_idx";
pub(crate) const CREATION_DATE_INDEX: &str = "votes_creation_date_idx";

const OPERATIONAL_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS votes (
        Id INTEGER NOT NULL,
        PostId INTEGER,
        VoteTypeId INTEGER,
        CreationDate TIMESTAMP NOT NULL,
        UserId INTEGER,
        -- DECIMAL(18,2) kept as exact text, e.g. '50.00'.
        BountyAmount TEXT,
        InsertedAt TIMESTAMP NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS votes_id_idx ON votes (Id);
    CREATE INDEX IF NOT EXISTS votes_creation_date_idx ON votes (CreationDate);
";

/// The single connection to the warehouse.
///
/// Every stage receives it explicitly. The connection is released when the handle is
/// dropped, on success and error paths alike; `close` reports a failure to close.
pub struct WarehouseDb {
    conn: Connection,
    location: String,
}

impl WarehouseDb {
    /// Opens (or creates) the database file, creating its parent directories.
    pub fn open(path: &Path) -> PipelineResult<WarehouseDb> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context(CreateDirectorySnafu { path: parent })?;
            }
        }
        let location = path.display().to_string();
        let conn = Connection::open(path).context(DatabaseSnafu {
            action: format!("opening {}", location),
        })?;
        info!("Connected to warehouse database {}", location);
        Ok(WarehouseDb { conn, location })
    }

    pub fn open_in_memory() -> PipelineResult<WarehouseDb> {
        let conn = Connection::open_in_memory().context(DatabaseSnafu {
            action: "opening an in-memory database",
        })?;
        Ok(WarehouseDb {
            conn,
            location: ":memory:".to_string(),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Runs a trivial query against the connection.
    pub fn check_connection(&self) -> bool {
        match self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
            Ok(_) => true,
            Err(e) => {
                error!("Database connection test failed: {}", e);
                false
            }
        }
    }

    /// Creates the operational table and its indexes when they are missing.
    pub fn ensure_schema(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(OPERATIONAL_SCHEMA)
            .context(DatabaseSnafu {
                action: "setting up the operational schema",
            })?;
        debug!("ensure_schema: table {} is ready", OPERATIONAL_TABLE);
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> PipelineResult<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .context(DatabaseSnafu {
                action: format!("looking up {}", name),
            })?;
        Ok(count > 0)
    }

    /// The number of rows of one of the warehouse tables or views.
    pub fn count_rows(&self, table: &str) -> PipelineResult<u64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .context(DatabaseSnafu {
                action: format!("counting rows of {}", table),
            })?;
        Ok(count as u64)
    }

    /// Runs an arbitrary query and returns the column names and the rows as JSON values.
    pub fn query_json(&self, sql: &str) -> PipelineResult<(Vec<String>, Vec<Vec<JSValue>>)> {
        let action = || format!("running query {:?}", sql);
        let mut stmt = self
            .conn
            .prepare(sql)
            .context(DatabaseSnafu { action: action() })?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                let mut values: Vec<JSValue> = Vec::with_capacity(width);
                for idx in 0..width {
                    values.push(json_value(row.get_ref(idx)?));
                }
                Ok(values)
            })
            .context(DatabaseSnafu { action: action() })?
            .collect::<Result<Vec<_>, _>>()
            .context(DatabaseSnafu { action: action() })?;
        Ok((columns, rows))
    }

    /// Closes the connection, reporting any failure.
    pub fn close(self) -> PipelineResult<()> {
        let location = self.location;
        self.conn
            .close()
            .map_err(|(_, source)| source)
            .context(DatabaseSnafu {
                action: format!("closing {}", location),
            })?;
        info!("Database connection {} closed.", location);
        Ok(())
    }
}

fn json_value(v: ValueRef<'_>) -> JSValue {
    match v {
        ValueRef::Null => JSValue::Null,
        ValueRef::Integer(i) => JSValue::from(i),
        ValueRef::Real(r) => JSValue::from(r),
        ValueRef::Text(t) => JSValue::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JSValue::from(format!("<{} bytes>", b.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_is_idempotent() {
        let db = WarehouseDb::open_in_memory().unwrap();
        assert!(db.check_connection());
        db.ensure_schema().unwrap();
        db.ensure_schema().unwrap();
        assert!(db.table_exists(OPERATIONAL_TABLE).unwrap());
        assert!(!db.table_exists(STAGING_LOAD_TABLE).unwrap());
        assert_eq!(db.count_rows(OPERATIONAL_TABLE).unwrap(), 0);
    }

    #[test]
    fn query_as_json() {
        let db = WarehouseDb::open_in_memory().unwrap();
        let (cols, rows) = db
            .query_json("SELECT 1 AS a, 'x' AS b, NULL AS c, 2.5 AS d")
            .unwrap();
        assert_eq!(cols, vec!["a", "b", "c", "d"]);
        assert_eq!(rows, vec![vec![json!(1), json!("x"), JSValue::Null, json!(2.5)]]);
    }

    #[test]
    fn bad_query_is_an_error() {
        let db = WarehouseDb::open_in_memory().unwrap();
        let res = db.query_json("SELECT * FROM missing_table");
        assert!(matches!(res, Err(PipelineError::Database { .. })));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("warehouse.db");
        let db = WarehouseDb::open(&path).unwrap();
        db.ensure_schema().unwrap();
        db.close().unwrap();
        assert!(path.exists());
    }
}
