use serde_json::json;
use vote_pipeline::*;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// (day, number of votes) for the first weeks of 2022.
const EARLY_2022: [(&str, usize); 12] = [
    ("2022-01-01", 1),
    ("2022-01-03", 2),
    ("2022-01-05", 1),
    ("2022-01-11", 3),
    ("2022-01-18", 2),
    ("2022-01-25", 1),
    ("2022-01-29", 1),
    ("2022-02-02", 1),
    ("2022-02-09", 1),
    ("2022-02-15", 1),
    ("2022-02-19", 1),
    ("2022-02-23", 1),
];

fn bucket(year: i64, week_number: i64, vote_count: i64) -> OutlierWeek {
    OutlierWeek {
        year,
        week_number,
        vote_count,
    }
}

fn ingest_early_2022(db: &mut WarehouseDb) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("votes.jsonl");
    let mut lines: Vec<String> = Vec::new();
    let mut id = 0;
    for (day, count) in EARLY_2022 {
        for hour in 0..count {
            id += 1;
            lines.push(
                json!({
                    "Id": id,
                    "PostId": 1,
                    "VoteTypeId": 2,
                    "CreationDate": format!("{}T{:02}:00:00.000", day, hour + 8),
                })
                .to_string(),
            );
        }
    }
    std::fs::write(&path, lines.join("\n")).unwrap();
    let report = ingest(&path, db).unwrap();
    assert_eq!(report.operational_rows, 16);
}

#[test]
fn outlier_weeks_of_early_2022() {
    init();
    let mut db = WarehouseDb::open_in_memory().unwrap();
    ingest_early_2022(&mut db);
    compute_outliers(&mut db).unwrap();

    let weekly = weekly_buckets(&db).unwrap();
    let counts: Vec<(i64, i64)> = weekly.iter().map(|b| (b.week_number, b.vote_count)).collect();
    assert_eq!(
        counts,
        vec![(0, 1), (1, 3), (2, 3), (3, 2), (4, 2), (5, 1), (6, 1), (7, 2), (8, 1)]
    );
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
fn outlier_view_is_queryable() {
    init();
    let mut db = WarehouseDb::open_in_memory().unwrap();
    ingest_early_2022(&mut db);
    compute_outliers(&mut db).unwrap();
    compute_outliers(&mut db).unwrap();

    let (columns, rows) = db
        .query_json("SELECT * FROM outlier_weeks WHERE WeekNumber > 4")
        .unwrap();
    assert_eq!(columns, vec!["Year", "WeekNumber", "VoteCount"]);
    assert_eq!(
        rows,
        vec![
            vec![json!(2022), json!(5), json!(1)],
            vec![json!(2022), json!(6), json!(1)],
            vec![json!(2022), json!(8), json!(1)],
        ]
    );
}

#[test]
fn outliers_on_an_empty_warehouse() {
    init();
    let mut db = WarehouseDb::open_in_memory().unwrap();
    compute_outliers(&mut db).unwrap();
    assert!(outlier_weeks(&db).unwrap().is_empty());
    assert_eq!(db.count_rows(OUTLIER_VIEW).unwrap(), 0);
}
