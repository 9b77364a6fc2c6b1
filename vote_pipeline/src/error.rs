use std::path::PathBuf;

use snafu::Snafu;

/// Failures that abort a pipeline stage.
///
/// Data-quality problems of individual rows are not errors: they are recorded in the
/// staging-final table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    #[snafu(display("File {} does not exist.", path.display()))]
    FileNotFound { path: PathBuf },

    #[snafu(display("Error reading input file {}", path.display()))]
    ReadInput {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Error creating directory {}", path.display()))]
    CreateDirectory {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("Database error while {action}: {source}"))]
    Database {
        source: rusqlite::Error,
        action: String,
    },

    #[snafu(display(
        "Row at line {line_number} was ready to load but its field {field} does not cast: {value:?}"
    ))]
    UnexpectedCast {
        line_number: u64,
        field: String,
        value: Option<String>,
    },

    #[snafu(display("Unreadable timestamp {value:?} stored in table {table}"))]
    StoredTimestamp { table: String, value: String },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
