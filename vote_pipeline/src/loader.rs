// Loading newline-delimited JSON files into the staging-load table.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, error, info, warn};
use rusqlite::params;
use serde_json::Value as JSValue;
use snafu::prelude::*;

use crate::db::*;
use crate::error::*;
use crate::records::*;

/// What happened to the lines of one file.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct LoadStats {
    pub loaded: u64,
    pub dropped: u64,
}

/// Replaces the staging-load table with the content of the given file.
///
/// Lines that are not JSON objects are dropped. The file is fully read before the table
/// is touched, so a missing or unreadable file leaves the previous staging data in place.
pub fn load_staging_table(db: &mut WarehouseDb, path: &Path) -> PipelineResult<LoadStats> {
    if !path.exists() {
        let e = PipelineError::FileNotFound {
            path: path.to_path_buf(),
        };
        error!("{}", e);
        return Err(e);
    }
    let (records, dropped) = read_vote_lines(path)?;
    info!(
        "Read {} records from {} ({} lines dropped)",
        records.len(),
        path.display(),
        dropped
    );
    replace_staging_load(db, &records)?;
    Ok(LoadStats {
        loaded: records.len() as u64,
        dropped,
    })
}

/// Parses every line of the file, returning the records and the number of dropped lines.
pub fn read_vote_lines(path: &Path) -> PipelineResult<(Vec<VoteRecord>, u64)> {
    let file = File::open(path).context(ReadInputSnafu { path })?;
    let reader = BufReader::new(file);
    let mut records: Vec<VoteRecord> = Vec::new();
    let mut dropped: u64 = 0;
    for (idx, line_r) in reader.split(b'\n').enumerate() {
        let lineno = idx as u64 + 1;
        let line = line_r.context(ReadInputSnafu { path })?;
        let trimmed = trim_line(&line);
        if trimmed.is_empty() {
            continue;
        }
        match parse_vote_line(lineno, trimmed) {
            Some(r) => records.push(r),
            None => {
                warn!("{}:{}: dropping malformed line", path.display(), lineno);
                dropped += 1;
            }
        }
    }
    Ok((records, dropped))
}

/// Reads one JSON object into a raw record. Returns `None` for anything else.
pub fn parse_vote_line(line_number: u64, line: &[u8]) -> Option<VoteRecord> {
    let js: JSValue = serde_json::from_slice(line).ok()?;
    let obj = js.as_object()?;
    let text = |field: VoteField| obj.get(field.column()).and_then(json_text);
    Some(VoteRecord {
        line_number,
        id: text(VoteField::Id),
        post_id: text(VoteField::PostId),
        vote_type_id: text(VoteField::VoteTypeId),
        creation_date: text(VoteField::CreationDate),
        user_id: text(VoteField::UserId),
        bounty_amount: text(VoteField::BountyAmount),
    })
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &line[start..end]
}

fn json_text(v: &JSValue) -> Option<String> {
    match v {
        JSValue::Null => None,
        JSValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn replace_staging_load(db: &mut WarehouseDb, records: &[VoteRecord]) -> PipelineResult<()> {
    let action = || format!("replacing {}", STAGING_LOAD_TABLE);
    let tx = db
        .conn_mut()
        .transaction()
        .context(DatabaseSnafu { action: action() })?;
    tx.execute_batch(
        "DROP TABLE IF EXISTS staging_votes_load;
         CREATE TABLE staging_votes_load (
             LineNumber INTEGER NOT NULL,
             Id TEXT,
             PostId TEXT,
             VoteTypeId TEXT,
             CreationDate TEXT,
             UserId TEXT,
             BountyAmount TEXT
         );",
    )
    .context(DatabaseSnafu { action: action() })?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO staging_votes_load
                 (LineNumber, Id, PostId, VoteTypeId, CreationDate, UserId, BountyAmount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .context(DatabaseSnafu { action: action() })?;
        for r in records {
            stmt.execute(params![
                r.line_number as i64,
                r.id,
                r.post_id,
                r.vote_type_id,
                r.creation_date,
                r.user_id,
                r.bounty_amount,
            ])
            .context(DatabaseSnafu { action: action() })?;
        }
    }
    tx.commit().context(DatabaseSnafu { action: action() })?;
    debug!(
        "replace_staging_load: {} rows in {}",
        records.len(),
        STAGING_LOAD_TABLE
    );
    Ok(())
}

/// The content of the staging-load table, in file order.
pub fn staged_records(db: &WarehouseDb) -> PipelineResult<Vec<VoteRecord>> {
    let action = || format!("reading {}", STAGING_LOAD_TABLE);
    let mut stmt = db
        .conn()
        .prepare(
            "SELECT LineNumber, Id, PostId, VoteTypeId, CreationDate, UserId, BountyAmount
             FROM staging_votes_load ORDER BY LineNumber",
        )
        .context(DatabaseSnafu { action: action() })?;
    let rows = stmt
        .query_map([], |row| {
            Ok(VoteRecord {
                line_number: row.get::<_, i64>(0)? as u64,
                id: row.get(1)?,
                post_id: row.get(2)?,
                vote_type_id: row.get(3)?,
                creation_date: row.get(4)?,
                user_id: row.get(5)?,
                bounty_amount: row.get(6)?,
            })
        })
        .context(DatabaseSnafu { action: action() })?
        .collect::<Result<Vec<_>, _>>()
        .context(DatabaseSnafu { action: action() })?;
    Ok(rows)
}
