use log::{info, warn};

use snafu::{prelude::*, Snafu};
use vote_pipeline::*;

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::{Args, Command};
use crate::warehouse::config_reader::*;

pub mod config_reader;

#[derive(Debug, Snafu)]
pub enum WarehouseError {
    #[snafu(display("Error opening configuration file {}", path.display()))]
    OpeningConfig {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error parsing configuration file {}", path.display()))]
    ParsingConfig {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[snafu(display("Error opening reference report {path}"))]
    OpeningReference {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing reference report {path}"))]
    ParsingReference {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error writing report to {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error serializing JSON"))]
    SerializingJson { source: serde_json::Error },
    #[snafu(display("No input file given, and no source in the configuration."))]
    MissingSources {},
    #[snafu(display("Pipeline failure: {source}"))]
    Pipeline { source: PipelineError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type WarehouseResult<T> = Result<T, WarehouseError>;

pub fn run(args: &Args) -> WarehouseResult<()> {
    let settings = settings(args)?;
    let mut db = WarehouseDb::open(&settings.database_path).context(PipelineSnafu {})?;
    match &args.command {
        Command::Ingest { files } => {
            let paths: Vec<PathBuf> = if files.is_empty() {
                settings.sources.clone()
            } else {
                files.iter().map(PathBuf::from).collect()
            };
            run_ingest(&mut db, &paths)?;
        }
        Command::Outliers { out, reference } => {
            let out_o = out.clone().or_else(|| settings.output.clone());
            run_outliers(&mut db, out_o, reference.clone())?;
        }
        Command::Query { sql } => {
            let lines = run_query(&db, sql)?;
            for l in lines {
                println!("{}", l);
            }
        }
    }
    db.close().context(PipelineSnafu {})
}

/// Ingests the files in order and stops at the first failure.
pub fn run_ingest(db: &mut WarehouseDb, paths: &[PathBuf]) -> WarehouseResult<Vec<IngestReport>> {
    ensure!(!paths.is_empty(), MissingSourcesSnafu {});
    let mut reports: Vec<IngestReport> = Vec::new();
    for p in paths {
        let report = ingest(p, db).context(PipelineSnafu {})?;
        println!(
            "{}: {} lines, {} ready, {} failed, {} duplicates, {} superseded, {} rows in {}",
            p.display(),
            report.lines_loaded + report.lines_dropped,
            report.ready,
            report.failed,
            report.duplicate,
            report.superseded,
            report.operational_rows,
            OPERATIONAL_TABLE
        );
        reports.push(report);
    }
    Ok(reports)
}

fn build_report_js(weekly: &[WeeklyBucket], outliers: &[OutlierWeek]) -> JSValue {
    json!({
        "bucketCount": weekly.len(),
        "meanVoteCount": mean_vote_count(weekly),
        "outliers": outliers,
    })
}

fn read_reference(path: &str) -> WarehouseResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningReferenceSnafu { path })?;
    let js: JSValue = serde_json::from_str(&contents).context(ParsingReferenceSnafu { path })?;
    Ok(js)
}

/// Recomputes the outlier view and renders the report.
///
/// The report goes to `out` (a file path or `stdout`), and is compared with the
/// reference report when one is given. Returns the rendered report.
pub fn run_outliers(
    db: &mut WarehouseDb,
    out: Option<String>,
    reference: Option<String>,
) -> WarehouseResult<String> {
    compute_outliers(db).context(PipelineSnafu {})?;
    let weekly = weekly_buckets(db).context(PipelineSnafu {})?;
    let outliers = outlier_weeks(db).context(PipelineSnafu {})?;
    info!(
        "{} weekly buckets, {} outlier weeks",
        weekly.len(),
        outliers.len()
    );

    let report_js = build_report_js(&weekly, &outliers);
    let pretty_report = serde_json::to_string_pretty(&report_js).context(SerializingJsonSnafu {})?;

    match out.as_deref() {
        None | Some(STDOUT) => println!("{}", pretty_report),
        Some(path) => {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).context(WritingOutputSnafu { path })?;
                }
            }
            fs::write(path, &pretty_report).context(WritingOutputSnafu { path })?;
            info!("Report written to {}", path);
        }
    }

    // The reference report, if provided for comparison
    if let Some(reference_p) = reference {
        let reference_js = read_reference(&reference_p)?;
        let pretty_reference =
            serde_json::to_string_pretty(&reference_js).context(SerializingJsonSnafu {})?;
        if pretty_reference != pretty_report {
            warn!("Found differences with the reference report");
            print_diff(pretty_reference.as_str(), pretty_report.as_str(), "\n");
            whatever!("Difference detected between computed report and reference report")
        }
    }

    Ok(pretty_report)
}

/// Runs a query and returns the column names followed by every row, one JSON array per line.
pub fn run_query(db: &WarehouseDb, sql: &str) -> WarehouseResult<Vec<String>> {
    let (columns, rows) = db.query_json(sql).context(PipelineSnafu {})?;
    let mut lines: Vec<String> = Vec::with_capacity(rows.len() + 1);
    lines.push(serde_json::to_string(&columns).context(SerializingJsonSnafu {})?);
    for row in rows {
        lines.push(serde_json::to_string(&row).context(SerializingJsonSnafu {})?);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_votes(dir: &Path, name: &str, dates: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let lines: Vec<String> = dates
            .iter()
            .enumerate()
            .map(|(idx, d)| json!({"Id": idx + 1, "PostId": 1, "CreationDate": d}).to_string())
            .collect();
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn january_votes(dir: &Path) -> PathBuf {
        write_votes(
            dir,
            "votes.jsonl",
            &[
                "2022-01-10T00:00:00.000",
                "2022-01-11T00:00:00.000",
                "2022-01-12T00:00:00.000",
                "2022-01-17T00:00:00.000",
            ],
        )
    }

    #[test]
    fn ingest_needs_files() {
        let mut db = WarehouseDb::open_in_memory().unwrap();
        assert!(matches!(
            run_ingest(&mut db, &[]),
            Err(WarehouseError::MissingSources {})
        ));
    }

    #[test]
    fn ingest_then_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = january_votes(dir.path());
        let mut db = WarehouseDb::open_in_memory().unwrap();
        let reports = run_ingest(&mut db, &[path.clone(), path]).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].operational_rows, 4);

        let out = dir.path().join("reports").join("outliers.json");
        let pretty = run_outliers(&mut db, Some(out.display().to_string()), None).unwrap();
        let js: JSValue = serde_json::from_str(&pretty).unwrap();
        assert_eq!(
            js,
            json!({
                "bucketCount": 2,
                "meanVoteCount": 2.0,
                "outliers": [
                    {"Year": 2022, "WeekNumber": 2, "VoteCount": 3},
                    {"Year": 2022, "WeekNumber": 3, "VoteCount": 1},
                ]
            })
        );
        assert_eq!(fs::read_to_string(&out).unwrap(), pretty);
    }

    #[test]
    fn reference_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let path = january_votes(dir.path());
        let mut db = WarehouseDb::open_in_memory().unwrap();
        run_ingest(&mut db, &[path]).unwrap();

        let pretty = run_outliers(&mut db, Some(STDOUT.to_string()), None).unwrap();
        let good = dir.path().join("good.json");
        fs::write(&good, &pretty).unwrap();
        let res = run_outliers(&mut db, None, Some(good.display().to_string()));
        assert!(res.is_ok());

        let bad = dir.path().join("bad.json");
        fs::write(
            &bad,
            json!({"bucketCount": 2, "meanVoteCount": 2.0, "outliers": []}).to_string(),
        )
        .unwrap();
        let res = run_outliers(&mut db, None, Some(bad.display().to_string()));
        assert!(matches!(res, Err(WarehouseError::Whatever { .. })));
    }

    #[test]
    fn empty_report() {
        let mut db = WarehouseDb::open_in_memory().unwrap();
        let pretty = run_outliers(&mut db, None, None).unwrap();
        let js: JSValue = serde_json::from_str(&pretty).unwrap();
        assert_eq!(
            js,
            json!({"bucketCount": 0, "meanVoteCount": null, "outliers": []})
        );
    }

    #[test]
    fn query_rows_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = january_votes(dir.path());
        let mut db = WarehouseDb::open_in_memory().unwrap();
        run_ingest(&mut db, &[path]).unwrap();
        let lines = run_query(&db, "SELECT Id, PostId FROM votes WHERE Id <= 2 ORDER BY Id").unwrap();
        assert_eq!(lines, vec!["[\"Id\",\"PostId\"]", "[1,1]", "[2,1]"]);
        assert!(run_query(&db, "SELECT * FROM nothing").is_err());
    }

    #[test]
    fn run_with_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        january_votes(dir.path());
        let config_path = dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{"databasePath": "wh/warehouse.db", "sources": [{"filePath": "votes.jsonl"}], "outputPath": "out.json"}"#,
        )
        .unwrap();
        let config = Some(config_path.display().to_string());

        run(&Args {
            db: None,
            config: config.clone(),
            verbose: false,
            command: Command::Ingest { files: vec![] },
        })
        .unwrap();
        run(&Args {
            db: None,
            config,
            verbose: false,
            command: Command::Outliers {
                out: None,
                reference: None,
            },
        })
        .unwrap();
        assert!(dir.path().join("wh").join("warehouse.db").exists());
        let js: JSValue =
            serde_json::from_str(&fs::read_to_string(dir.path().join("out.json")).unwrap())
                .unwrap();
        assert_eq!(js["bucketCount"], json!(2));
    }
}
