use std::cmp::Reverse;
use std::collections::HashMap;

use log::{debug, info};
use rusqlite::params;
use snafu::prelude::*;

use crate::db::*;
use crate::error::*;
use crate::loader::staged_records;
use crate::records::*;
use crate::rules::*;

/// Rows sharing an `Id`: the integer when the id casts, the raw text otherwise.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
enum PartitionKey {
    Parsed(i64),
    Raw(Option<String>),
}

fn partition_key(record: &VoteRecord) -> PartitionKey {
    match record.id.as_deref().and_then(cast_bigint) {
        Some(FieldValue::Integer(i)) => PartitionKey::Parsed(i),
        _ => PartitionKey::Raw(record.id.clone()),
    }
}

/// Number of rows per status, after validation.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ValidationStats {
    pub ready: u64,
    pub failed: u64,
    pub duplicate: u64,
}

/// Validates and deduplicates the given rows. The output keeps the input order.
///
/// Within the rows sharing an id, the one with the latest `CreationDate` ranks first;
/// rows with unreadable dates rank last and ties go to the earlier line. Every other row
/// of the group is a duplicate.
pub fn classify(records: &[VoteRecord]) -> Vec<StagingRecord> {
    let mut partitions: HashMap<PartitionKey, Vec<usize>> = HashMap::new();
    for (idx, r) in records.iter().enumerate() {
        partitions.entry(partition_key(r)).or_default().push(idx);
    }

    let mut rank: Vec<usize> = vec![1; records.len()];
    for members in partitions.values_mut() {
        if members.len() < 2 {
            continue;
        }
        members.sort_by_key(|idx| {
            let r = &records[*idx];
            let created = r.creation_date.as_deref().and_then(parse_timestamp);
            (Reverse(created), r.line_number)
        });
        for (pos, idx) in members.iter().enumerate() {
            rank[*idx] = pos + 1;
        }
    }

    records
        .iter()
        .zip(rank)
        .map(|(r, rn)| {
            let mut failures = violations(r);
            let type_failure = !failures.is_empty();
            if rn > 1 {
                failures.push(DUPLICATE_FAILURE);
            }
            let status = if type_failure {
                StagingStatus::Failed
            } else if rn > 1 {
                StagingStatus::Duplicate
            } else {
                StagingStatus::ReadyToLoad
            };
            if status != StagingStatus::ReadyToLoad {
                debug!(
                    "classify: line {}: {} ({})",
                    r.line_number,
                    status,
                    failures.join(FAILURE_SEPARATOR)
                );
            }
            StagingRecord {
                record: r.clone(),
                status,
                error_description: failures.join(FAILURE_SEPARATOR),
            }
        })
        .collect()
}

/// Rebuilds the staging-final table from the staging-load table.
pub fn build_staging_final(db: &mut WarehouseDb) -> PipelineResult<ValidationStats> {
    let staged = staged_records(db)?;
    let classified = classify(&staged);
    let mut stats = ValidationStats::default();
    for sr in classified.iter() {
        match sr.status {
            StagingStatus::ReadyToLoad => stats.ready += 1,
            StagingStatus::Failed => stats.failed += 1,
            StagingStatus::Duplicate => stats.duplicate += 1,
        }
    }
    replace_staging_final(db, &classified)?;
    info!(
        "Staging table {} rebuilt: {} ready, {} failed, {} duplicates",
        STAGING_FINAL_TABLE, stats.ready, stats.failed, stats.duplicate
    );
    Ok(stats)
}

fn replace_staging_final(db: &mut WarehouseDb, rows: &[StagingRecord]) -> PipelineResult<()> {
    let action = || format!("replacing {}", STAGING_FINAL_TABLE);
    let tx = db
        .conn_mut()
        .transaction()
        .context(DatabaseSnafu { action: action() })?;
    tx.execute_batch(
        "DROP TABLE IF EXISTS staging_votes;
         CREATE TABLE staging_votes (
             LineNumber INTEGER NOT NULL,
             Id TEXT,
             PostId TEXT,
             VoteTypeId TEXT,
             CreationDate TEXT,
             UserId TEXT,
             BountyAmount TEXT,
             staging_status TEXT NOT NULL,
             error_description TEXT NOT NULL
         );",
    )
    .context(DatabaseSnafu { action: action() })?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO staging_votes
                 (LineNumber, Id, PostId, VoteTypeId, CreationDate, UserId, BountyAmount,
                  staging_status, error_description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .context(DatabaseSnafu { action: action() })?;
        for sr in rows {
            let r = &sr.record;
            stmt.execute(params![
                r.line_number as i64,
                r.id,
                r.post_id,
                r.vote_type_id,
                r.creation_date,
                r.user_id,
                r.bounty_amount,
                sr.status.as_str(),
                sr.error_description,
            ])
            .context(DatabaseSnafu { action: action() })?;
        }
    }
    tx.commit().context(DatabaseSnafu { action: action() })?;
    Ok(())
}

/// The rows of the staging-final table with the given status, in file order.
pub fn staging_rows(
    db: &WarehouseDb,
    status: StagingStatus,
) -> PipelineResult<Vec<StagingRecord>> {
    let action = || format!("reading {} rows of {}", status, STAGING_FINAL_TABLE);
    let mut stmt = db
        .conn()
        .prepare(
            "SELECT LineNumber, Id, PostId, VoteTypeId, CreationDate, UserId, BountyAmount,
                    error_description
             FROM staging_votes WHERE staging_status = ?1 ORDER BY LineNumber",
        )
        .context(DatabaseSnafu { action: action() })?;
    let rows = stmt
        .query_map([status.as_str()], |row| {
            Ok(StagingRecord {
                record: VoteRecord {
                    line_number: row.get::<_, i64>(0)? as u64,
                    id: row.get(1)?,
                    post_id: row.get(2)?,
                    vote_type_id: row.get(3)?,
                    creation_date: row.get(4)?,
                    user_id: row.get(5)?,
                    bounty_amount: row.get(6)?,
                },
                status,
                error_description: row.get(7)?,
            })
        })
        .context(DatabaseSnafu { action: action() })?
        .collect::<Result<Vec<_>, _>>()
        .context(DatabaseSnafu { action: action() })?;
    Ok(rows)
}
