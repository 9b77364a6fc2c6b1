mod db;
mod error;
mod loader;
pub mod manual;
mod merge;
mod outliers;
mod records;
mod rules;
mod validate;

use std::path::Path;

use log::{error, info};

pub use crate::db::*;
pub use crate::error::*;
pub use crate::loader::{load_staging_table, parse_vote_line, read_vote_lines, LoadStats};
pub use crate::merge::{
    merge_into_operational, operational_records, to_operational, MergeStats, MergeStrategy,
};
pub use crate::outliers::*;
pub use crate::records::*;
pub use crate::rules::*;
pub use crate::validate::{build_staging_final, classify, staging_rows, ValidationStats};

/// Ingests one file of votes into the operational table.
///
/// The file is loaded into the staging-load table, validated and deduplicated into the
/// staging-final table, and its ready rows are merged into the operational table.
/// Ingesting the same file again leaves the operational table unchanged, apart from the
/// insertion timestamps.
///
/// On error, the operational table keeps its content from before the call.
pub fn ingest(path: &Path, db: &mut WarehouseDb) -> PipelineResult<IngestReport> {
    ingest_with(path, db, MergeStrategy::default())
}

/// Same as `ingest`, with an explicit merge strategy.
pub fn ingest_with(
    path: &Path,
    db: &mut WarehouseDb,
    strategy: MergeStrategy,
) -> PipelineResult<IngestReport> {
    info!("Ingesting {} into {}", path.display(), db.location());
    let res = run_stages(path, db, strategy);
    match &res {
        Ok(report) => info!("Ingestion of {} done: {:?}", path.display(), report),
        Err(e) => error!("Ingestion of {} failed: {}", path.display(), e),
    }
    res
}

fn run_stages(
    path: &Path,
    db: &mut WarehouseDb,
    strategy: MergeStrategy,
) -> PipelineResult<IngestReport> {
    let loaded = load_staging_table(db, path)?;
    let validated = build_staging_final(db)?;
    let merged = merge_into_operational(db, strategy)?;
    Ok(IngestReport {
        lines_loaded: loaded.loaded,
        lines_dropped: loaded.dropped,
        ready: validated.ready,
        failed: validated.failed,
        duplicate: validated.duplicate,
        superseded: merged.superseded,
        operational_rows: merged.operational_rows,
    })
}

/// Creates or refreshes the outlier view over the current operational table.
pub fn compute_outliers(db: &mut WarehouseDb) -> PipelineResult<()> {
    create_outlier_views(db)
}
