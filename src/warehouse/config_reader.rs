use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::args::Args;
use crate::warehouse::*;

pub const DEFAULT_DATABASE_PATH: &str = "warehouse.db";

/// Special output location that writes the report to the standard output.
pub const STDOUT: &str = "stdout";

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FileSource {
    #[serde(rename = "filePath")]
    pub file_path: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    #[serde(rename = "databasePath")]
    pub database_path: Option<String>,
    #[serde(default)]
    pub sources: Vec<FileSource>,
    #[serde(rename = "outputPath")]
    pub output_path: Option<String>,
}

/// The settings of one invocation, after merging the configuration file and the flags.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Settings {
    pub database_path: PathBuf,
    pub sources: Vec<PathBuf>,
    pub output: Option<String>,
}

pub fn read_config(path: &Path) -> WarehouseResult<WarehouseConfig> {
    let config_str = fs::read_to_string(path).context(OpeningConfigSnafu { path })?;
    let config: WarehouseConfig =
        serde_json::from_str(&config_str).context(ParsingConfigSnafu { path })?;
    info!("config: {:?}", config);
    Ok(config)
}

// Paths of the configuration file are relative to its directory.
fn resolve(root: &Path, p: &str) -> PathBuf {
    let path = Path::new(p);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

pub fn settings(args: &Args) -> WarehouseResult<Settings> {
    let (config, root) = match &args.config {
        Some(config_path) => {
            let p = Path::new(config_path);
            let root = p.parent().map(|x| x.to_path_buf()).unwrap_or_default();
            (Some(read_config(p)?), root)
        }
        None => (None, PathBuf::new()),
    };

    let database_path = match (&args.db, config.as_ref().and_then(|c| c.database_path.as_ref())) {
        (Some(db), _) => PathBuf::from(db),
        (None, Some(db)) => resolve(&root, db),
        (None, None) => PathBuf::from(DEFAULT_DATABASE_PATH),
    };
    let sources: Vec<PathBuf> = config
        .as_ref()
        .map(|c| {
            c.sources
                .iter()
                .map(|source| resolve(&root, &source.file_path))
                .collect()
        })
        .unwrap_or_default();
    let output = config.as_ref().and_then(|c| c.output_path.as_ref()).map(|o| {
        if o == STDOUT {
            o.clone()
        } else {
            resolve(&root, o).display().to_string()
        }
    });

    let res = Settings {
        database_path,
        sources,
        output,
    };
    debug!("settings: {:?}", res);
    Ok(res)
}
