// Weekly vote counts and the weeks that deviate from the mean.
//
// The week number follows the warehouse reporting convention: the ISO week of the date,
// except that dates in the first seven days of January that fall on or after a Thursday
// are placed in week 0. The year is the calendar year of the date, so the last days of
// December may be counted in week 1 of that same year.

use log::{debug, info};
use snafu::prelude::*;

use crate::db::*;
use crate::error::*;
use crate::records::*;

/// Fraction of the mean below and above which a week is an outlier.
pub const OUTLIER_TOLERANCE: f64 = 0.2;

const WEEKLY_VIEW_SQL: &str = "
    CREATE VIEW weekly_vote_counts AS
    SELECT Year, WeekNumber, COUNT(*) AS VoteCount
    FROM (
        SELECT
            CAST(strftime('%Y', CreationDate) AS INTEGER) AS Year,
            CASE
                WHEN CAST(strftime('%m', CreationDate) AS INTEGER) = 1
                    AND CAST(strftime('%d', CreationDate) AS INTEGER) <= 7
                    AND ((CAST(strftime('%w', CreationDate) AS INTEGER) + 6) % 7) + 1 >= 4
                THEN 0
                ELSE (CAST(strftime('%j', date(CreationDate, '-3 days', 'weekday 4')) AS INTEGER) - 1) / 7 + 1
            END AS WeekNumber
        FROM votes
    )
    GROUP BY Year, WeekNumber";

fn outlier_view_sql() -> String {
    format!(
        "CREATE VIEW outlier_weeks AS
         SELECT w.Year, w.WeekNumber, w.VoteCount
         FROM weekly_vote_counts w,
              (SELECT AVG(VoteCount) AS AvgVoteCount FROM weekly_vote_counts) a
         WHERE w.VoteCount < {low} * a.AvgVoteCount
            OR w.VoteCount > {high} * a.AvgVoteCount
         ORDER BY w.Year, w.WeekNumber",
        low = 1.0 - OUTLIER_TOLERANCE,
        high = 1.0 + OUTLIER_TOLERANCE,
    )
}

/// (Re)creates the weekly count and outlier views over the operational table.
///
/// The operational table is created if needed, so this works on a fresh warehouse.
pub fn create_outlier_views(db: &mut WarehouseDb) -> PipelineResult<()> {
    db.ensure_schema()?;
    let action = || format!("creating the view {}", OUTLIER_VIEW);
    let tx = db
        .conn_mut()
        .transaction()
        .context(DatabaseSnafu { action: action() })?;
    tx.execute_batch(&format!(
        "DROP VIEW IF EXISTS {outliers};
         DROP VIEW IF EXISTS {weekly};
         {weekly_sql};
         {outlier_sql};",
        outliers = OUTLIER_VIEW,
        weekly = WEEKLY_VIEW,
        weekly_sql = WEEKLY_VIEW_SQL,
        outlier_sql = outlier_view_sql(),
    ))
    .context(DatabaseSnafu { action: action() })?;
    tx.commit().context(DatabaseSnafu { action: action() })?;
    info!("View {} created", OUTLIER_VIEW);
    Ok(())
}

fn read_buckets(db: &WarehouseDb, sql: &str, view: &str) -> PipelineResult<Vec<WeeklyBucket>> {
    let action = || format!("reading {}", view);
    let mut stmt = db
        .conn()
        .prepare(sql)
        .context(DatabaseSnafu { action: action() })?;
    let buckets = stmt
        .query_map([], |row| {
            Ok(WeeklyBucket {
                year: row.get(0)?,
                week_number: row.get(1)?,
                vote_count: row.get(2)?,
            })
        })
        .context(DatabaseSnafu { action: action() })?
        .collect::<Result<Vec<_>, _>>()
        .context(DatabaseSnafu { action: action() })?;
    debug!("read_buckets: {} rows from {}", buckets.len(), view);
    Ok(buckets)
}

/// All the weekly buckets, ordered by year and week.
pub fn weekly_buckets(db: &WarehouseDb) -> PipelineResult<Vec<WeeklyBucket>> {
    read_buckets(
        db,
        "SELECT Year, WeekNumber, VoteCount FROM weekly_vote_counts ORDER BY Year, WeekNumber",
        WEEKLY_VIEW,
    )
}

/// The content of the outlier view.
pub fn outlier_weeks(db: &WarehouseDb) -> PipelineResult<Vec<OutlierWeek>> {
    read_buckets(
        db,
        "SELECT Year, WeekNumber, VoteCount FROM outlier_weeks",
        OUTLIER_VIEW,
    )
}

/// Mean number of votes per bucket, `None` when there are no buckets.
pub fn mean_vote_count(buckets: &[WeeklyBucket]) -> Option<f64> {
    if buckets.is_empty() {
        return None;
    }
    let total: i64 = buckets.iter().map(|b| b.vote_count).sum();
    Some(total as f64 / buckets.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_dates(db: &WarehouseDb, dates: &[&str]) {
        db.ensure_schema().unwrap();
        for (idx, d) in dates.iter().enumerate() {
            db.conn()
                .execute(
                    "INSERT INTO votes (Id, CreationDate, InsertedAt) VALUES (?1, ?2, ?2)",
                    rusqlite::params![idx as i64 + 1, d],
                )
                .unwrap();
        }
    }

    fn bucket(year: i64, week_number: i64, vote_count: i64) -> WeeklyBucket {
        WeeklyBucket {
            year,
            week_number,
            vote_count,
        }
    }

    fn weeks_of(dates: &[&str]) -> Vec<(i64, i64)> {
        let mut db = WarehouseDb::open_in_memory().unwrap();
        insert_dates(&db, dates);
        create_outlier_views(&mut db).unwrap();
        weekly_buckets(&db)
            .unwrap()
            .iter()
            .map(|b| (b.year, b.week_number))
            .collect()
    }

    #[test]
    fn week_numbering() {
        // 2022-01-01 is a Saturday, 2022-01-03 a Monday.
        assert_eq!(weeks_of(&["2022-01-01 00:00:00.000000"]), vec![(2022, 0)]);
        assert_eq!(weeks_of(&["2022-01-03 12:00:00.000000"]), vec![(2022, 1)]);
        assert_eq!(weeks_of(&["2022-01-06 00:00:00.000000"]), vec![(2022, 0)]);
        assert_eq!(weeks_of(&["2022-01-10 00:00:00.000000"]), vec![(2022, 2)]);
        assert_eq!(weeks_of(&["2022-12-31 00:00:00.000000"]), vec![(2022, 52)]);
        // 2024-12-31 belongs to ISO week 1 of 2025 but keeps its calendar year.
        assert_eq!(weeks_of(&["2024-12-31 00:00:00.000000"]), vec![(2024, 1)]);
        // 2021-01-04 is a Monday in the first seven days of January.
        assert_eq!(weeks_of(&["2021-01-04 00:00:00.000000"]), vec![(2021, 1)]);
        assert_eq!(weeks_of(&["2021-01-07 00:00:00.000000"]), vec![(2021, 0)]);
    }

    #[test]
    fn outliers_of_early_2022() {
        let mut db = WarehouseDb::open_in_memory().unwrap();
        insert_dates(
            &db,
            &[
                "2022-01-01 10:00:00.000000",
                "2022-01-03 10:00:00.000000",
                "2022-01-04 10:00:00.000000",
                "2022-01-05 10:00:00.000000",
                "2022-01-10 10:00:00.000000",
                "2022-01-12 10:00:00.000000",
                "2022-01-16 10:00:00.000000",
                "2022-01-17 10:00:00.000000",
                "2022-01-23 10:00:00.000000",
                "2022-01-24 10:00:00.000000",
                "2022-01-30 10:00:00.000000",
                "2022-02-01 10:00:00.000000",
                "2022-02-08 10:00:00.000000",
                "2022-02-14 10:00:00.000000",
                "2022-02-20 10:00:00.000000",
                "2022-02-22 10:00:00.000000",
            ],
        );
        create_outlier_views(&mut db).unwrap();
        let weekly = weekly_buckets(&db).unwrap();
        assert_eq!(weekly.len(), 9);
        assert_eq!(mean_vote_count(&weekly), Some(16.0 / 9.0));
        assert_eq!(
            outlier_weeks(&db).unwrap(),
            vec![
                bucket(2022, 0, 1),
                bucket(2022, 1, 3),
                bucket(2022, 2, 3),
                bucket(2022, 5, 1),
                bucket(2022, 6, 1),
                bucket(2022, 8, 1),
            ]
        );
    }

    #[test]
    fn uniform_weeks_have_no_outliers() {
        let mut db = WarehouseDb::open_in_memory().unwrap();
        insert_dates(
            &db,
            &[
                "2022-01-10 00:00:00.000000",
                "2022-01-17 00:00:00.000000",
                "2022-01-24 00:00:00.000000",
            ],
        );
        create_outlier_views(&mut db).unwrap();
        assert_eq!(weekly_buckets(&db).unwrap().len(), 3);
        assert!(outlier_weeks(&db).unwrap().is_empty());
    }

    #[test]
    fn views_follow_the_operational_table() {
        let mut db = WarehouseDb::open_in_memory().unwrap();
        create_outlier_views(&mut db).unwrap();
        assert!(db.table_exists(OUTLIER_VIEW).unwrap());
        assert!(weekly_buckets(&db).unwrap().is_empty());
        assert!(outlier_weeks(&db).unwrap().is_empty());
        assert_eq!(mean_vote_count(&[]), None);

        // Recreating the views is harmless, and they see new rows.
        insert_dates(&db, &["2022-01-10 00:00:00.000000", "2022-01-11 00:00:00.000000"]);
        create_outlier_views(&mut db).unwrap();
        create_outlier_views(&mut db).unwrap();
        assert_eq!(weekly_buckets(&db).unwrap(), vec![bucket(2022, 2, 2)]);
    }
}
