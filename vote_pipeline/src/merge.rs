use chrono::{NaiveDateTime, Utc};
use log::{debug, error, info};
use rusqlite::{params, Transaction};
use snafu::prelude::*;

use crate::db::*;
use crate::error::*;
use crate::records::*;
use crate::rules::*;
use crate::validate::staging_rows;

/// How ready rows are written to the operational table.
///
/// Both strategies leave the table in the same state. The upsert is the one used by
/// the pipeline.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum MergeStrategy {
    /// Insert new ids, replace stored ones unless the stored version is newer.
    #[default]
    Upsert,
    /// Delete the stored versions that are not newer, then insert the ids that are absent.
    DeleteInsert,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct MergeStats {
    /// Ready rows written to the operational table.
    pub applied: u64,
    /// Ready rows ignored because a newer version is already stored.
    pub superseded: u64,
    pub operational_rows: u64,
}

/// Converts a ready staging row to its typed form.
///
/// Ready rows passed validation, so a failure here means the pipeline is broken.
pub fn to_operational(record: &VoteRecord) -> PipelineResult<OperationalRecord> {
    let cast = |field: VoteField| -> PipelineResult<Option<FieldValue>> {
        rule_for(field)
            .check(record)
            .ok()
            .context(UnexpectedCastSnafu {
                line_number: record.line_number,
                field: field.column(),
                value: field.value(record).map(|s| s.to_string()),
            })
    };
    let required = |field: VoteField, v: Option<FieldValue>| -> PipelineResult<FieldValue> {
        v.context(UnexpectedCastSnafu {
            line_number: record.line_number,
            field: field.column(),
            value: None::<String>,
        })
    };
    let id = required(VoteField::Id, cast(VoteField::Id)?)?.as_integer();
    let creation_date =
        required(VoteField::CreationDate, cast(VoteField::CreationDate)?)?.as_timestamp();
    match (id, creation_date) {
        (Some(id), Some(creation_date)) => Ok(OperationalRecord {
            id,
            post_id: cast(VoteField::PostId)?.and_then(|v| v.as_integer()),
            vote_type_id: cast(VoteField::VoteTypeId)?.and_then(|v| v.as_integer()),
            creation_date,
            user_id: cast(VoteField::UserId)?.and_then(|v| v.as_integer()),
            bounty_amount: cast(VoteField::BountyAmount)?.and_then(|v| v.as_amount()),
        }),
        _ => UnexpectedCastSnafu {
            line_number: record.line_number,
            field: "Id",
            value: record.id.clone(),
        }
        .fail(),
    }
}

pub fn format_timestamp(t: &NaiveDateTime) -> String {
    t.format(STORAGE_TIMESTAMP_FORMAT).to_string()
}

/// Merges the ready rows of the staging-final table into the operational table.
///
/// The writes and the rebuild of the indexes happen in one transaction: on failure the
/// operational table keeps its previous content.
pub fn merge_into_operational(
    db: &mut WarehouseDb,
    strategy: MergeStrategy,
) -> PipelineResult<MergeStats> {
    db.ensure_schema()?;
    let ready = staging_rows(db, StagingStatus::ReadyToLoad)?;
    let typed: Vec<OperationalRecord> = match ready
        .iter()
        .map(|sr| to_operational(&sr.record))
        .collect::<PipelineResult<Vec<_>>>()
    {
        Ok(v) => v,
        Err(e) => {
            error!("Error merging staging rows into {}: {}", OPERATIONAL_TABLE, e);
            return Err(e);
        }
    };
    let inserted_at = format_timestamp(&Utc::now().naive_utc());

    let action = || format!("merging into {}", OPERATIONAL_TABLE);
    let tx = db
        .conn_mut()
        .transaction()
        .context(DatabaseSnafu { action: action() })?;
    let applied = match strategy {
        MergeStrategy::Upsert => upsert_all(&tx, &typed, &inserted_at),
        MergeStrategy::DeleteInsert => delete_insert_all(&tx, &typed, &inserted_at),
    }
    .context(DatabaseSnafu { action: action() })?;
    rebuild_indexes(&tx).context(DatabaseSnafu {
        action: "rebuilding the operational indexes",
    })?;
    tx.commit().context(DatabaseSnafu { action: action() })?;

    let stats = MergeStats {
        applied,
        superseded: typed.len() as u64 - applied,
        operational_rows: db.count_rows(OPERATIONAL_TABLE)?,
    };
    info!(
        "Operational table {} updated with {} rows ({} superseded), {} rows in total ({:?})",
        OPERATIONAL_TABLE, stats.applied, stats.superseded, stats.operational_rows, strategy
    );
    Ok(stats)
}

const UPSERT_SQL: &str = "
    INSERT INTO votes (Id, PostId, VoteTypeId, CreationDate, UserId, BountyAmount, InsertedAt)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT (Id) DO UPDATE SET
        PostId = excluded.PostId,
        VoteTypeId = excluded.VoteTypeId,
        CreationDate = excluded.CreationDate,
        UserId = excluded.UserId,
        BountyAmount = excluded.BountyAmount,
        InsertedAt = excluded.InsertedAt
    WHERE excluded.CreationDate >= votes.CreationDate";

fn upsert_all(
    tx: &Transaction<'_>,
    rows: &[OperationalRecord],
    inserted_at: &str,
) -> rusqlite::Result<u64> {
    let mut stmt = tx.prepare(UPSERT_SQL)?;
    let mut applied: u64 = 0;
    for r in rows {
        let changed = stmt.execute(params![
            r.id,
            r.post_id,
            r.vote_type_id,
            format_timestamp(&r.creation_date),
            r.user_id,
            r.bounty_amount,
            inserted_at,
        ])?;
        if changed == 0 {
            debug!("upsert: id {} superseded by a newer stored version", r.id);
        }
        applied += changed as u64;
    }
    Ok(applied)
}

fn delete_insert_all(
    tx: &Transaction<'_>,
    rows: &[OperationalRecord],
    inserted_at: &str,
) -> rusqlite::Result<u64> {
    let mut delete = tx.prepare("DELETE FROM votes WHERE Id = ?1 AND CreationDate <= ?2")?;
    let mut insert = tx.prepare(
        "INSERT INTO votes (Id, PostId, VoteTypeId, CreationDate, UserId, BountyAmount, InsertedAt)
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
         WHERE NOT EXISTS (SELECT 1 FROM votes WHERE Id = ?1)",
    )?;
    let mut applied: u64 = 0;
    for r in rows {
        let created = format_timestamp(&r.creation_date);
        delete.execute(params![r.id, created])?;
        let changed = insert.execute(params![
            r.id,
            r.post_id,
            r.vote_type_id,
            created,
            r.user_id,
            r.bounty_amount,
            inserted_at,
        ])?;
        applied += changed as u64;
    }
    Ok(applied)
}

fn rebuild_indexes(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(&format!(
        "DROP INDEX IF EXISTS {id_idx};
         CREATE UNIQUE INDEX {id_idx} ON votes (Id);
         DROP INDEX IF EXISTS {date_idx};
         CREATE INDEX {date_idx} ON votes (CreationDate);",
        id_idx = ID_INDEX,
        date_idx = CREATION_DATE_INDEX
    ))
}

/// The content of the operational table, ordered by id.
pub fn operational_records(db: &WarehouseDb) -> PipelineResult<Vec<OperationalRecord>> {
    let action = || format!("reading {}", OPERATIONAL_TABLE);
    let mut stmt = db
        .conn()
        .prepare(
            "SELECT Id, PostId, VoteTypeId, CreationDate, UserId, BountyAmount
             FROM votes ORDER BY Id",
        )
        .context(DatabaseSnafu { action: action() })?;
    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<Amount>>(5)?,
            ))
        })
        .context(DatabaseSnafu { action: action() })?
        .collect::<Result<Vec<_>, _>>()
        .context(DatabaseSnafu { action: action() })?;
    raw.into_iter()
        .map(|(id, post_id, vote_type_id, created, user_id, bounty_amount)| {
            let creation_date = parse_timestamp(&created).context(StoredTimestampSnafu {
                table: OPERATIONAL_TABLE,
                value: created.clone(),
            })?;
            Ok::<_, PipelineError>(OperationalRecord {
                id,
                post_id,
                vote_type_id,
                creation_date,
                user_id,
                bounty_amount,
            })
        })
        .collect::<PipelineResult<Vec<_>>>()
}
