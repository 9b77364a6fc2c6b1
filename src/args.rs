use clap::{Parser, Subcommand};

/// Loads vote event files into a SQLite warehouse and reports the outlier weeks.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) The warehouse database. Created if it does not exist.
    /// Setting this option overrides the path that may be specified with the --config option.
    #[clap(long, value_parser)]
    pub db: Option<String>,

    /// (file path, optional) A JSON configuration file with the database, the input files and
    /// the output location.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Ingests the given files, in order. Without files, ingests the sources of the configuration.
    Ingest {
        /// (file paths) Newline-delimited JSON files of votes.
        #[clap(value_parser)]
        files: Vec<String>,
    },
    /// Recomputes the outlier view and writes the report.
    Outliers {
        /// (file path, 'stdout' or empty) If specified, the report will be written in JSON format to the given
        /// location. Setting this option overrides the path that may be specified with the --config option.
        #[clap(short, long, value_parser)]
        out: Option<String>,

        /// (file path) A reference report in JSON format. If provided, votewh will
        /// check that the computed report matches the reference.
        #[clap(short, long, value_parser)]
        reference: Option<String>,
    },
    /// Runs a SQL query against the warehouse and prints the rows as JSON.
    Query {
        #[clap(value_parser)]
        sql: String,
    },
}
