use crate::etl::*;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_BASE_DIR: &str = "output";
pub const DEFAULT_METADATA_FILE: &str = "results-metadata.json";
pub const DEFAULT_DB_PATH: &str = "elections.db";

/// One precinct boundary file and the years it is valid for.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryVintage {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "validFromYear")]
    pub valid_from_year: i32,
    #[serde(rename = "validToYear")]
    pub valid_to_year: Option<i32>,
}

/// The run configuration, as written in the JSON configuration file.
///
/// All the fields are optional. Relative paths are interpreted relative to the
/// directory containing the configuration file.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlConfig {
    #[serde(rename = "baseDir")]
    pub base_dir: Option<String>,
    #[serde(rename = "metadataPath")]
    pub metadata_path: Option<String>,
    #[serde(rename = "dbPath")]
    pub db_path: Option<String>,
    #[serde(rename = "batchSize")]
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub fresh: Option<bool>,
    #[serde(rename = "boundaryVintages", default)]
    pub boundary_vintages: Vec<BoundaryVintage>,
}

/// A vintage with its file path resolved.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ResolvedVintage {
    pub path: PathBuf,
    pub valid_from_year: i32,
    pub valid_to_year: Option<i32>,
}

/// The settings of a run, after applying the defaults and resolving the paths.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RunSettings {
    pub base_dir: PathBuf,
    pub metadata_path: PathBuf,
    pub db_path: PathBuf,
    pub batch_size: usize,
    pub workers: usize,
    pub fresh: bool,
    pub vintages: Vec<ResolvedVintage>,
}

pub fn read_config(path: &Path) -> EtlResult<EtlConfig> {
    let path_s = path.display().to_string();
    let config_str = fs::read_to_string(path).context(OpeningFileSnafu { path: &path_s })?;
    let config: EtlConfig =
        serde_json::from_str(&config_str).context(ParsingJsonSnafu { path: &path_s })?;
    debug!("read_config: {:?}", config);
    Ok(config)
}

/// Leaves one core to the coordinator.
pub fn default_workers() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    available.saturating_sub(1).max(1)
}

fn resolve_path(root: &Path, p: &str) -> PathBuf {
    let path = Path::new(p);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

impl EtlConfig {
    /// Applies the command line overrides on top of the configuration file.
    pub fn with_overrides(mut self, args: &Args) -> EtlConfig {
        if let Some(db) = &args.db {
            self.db_path = Some(db.clone());
        }
        if let Command::ImportResults {
            base_dir,
            metadata,
            batch_size,
            workers,
            append,
            ..
        } = &args.command
        {
            if base_dir.is_some() {
                self.base_dir = base_dir.clone();
            }
            if metadata.is_some() {
                self.metadata_path = metadata.clone();
            }
            if batch_size.is_some() {
                self.batch_size = *batch_size;
            }
            if workers.is_some() {
                self.workers = *workers;
            }
            if *append {
                self.fresh = Some(false);
            }
        }
        if let Command::AddPrecinctIds {
            base_dir: Some(base_dir),
        } = &args.command
        {
            self.base_dir = Some(base_dir.clone());
        }
        self
    }

    /// Resolves the paths against `root` (the directory of the configuration
    /// file, or the working directory) and fills in the defaults.
    pub fn resolve(&self, root: &Path) -> EtlResult<RunSettings> {
        let base_dir = resolve_path(root, self.base_dir.as_deref().unwrap_or(DEFAULT_BASE_DIR));
        let metadata_path = match &self.metadata_path {
            Some(p) => resolve_path(root, p),
            None => base_dir.join(DEFAULT_METADATA_FILE),
        };
        let db_path = resolve_path(root, self.db_path.as_deref().unwrap_or(DEFAULT_DB_PATH));
        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        ensure_whatever!(batch_size > 0, "batchSize must be positive");
        let workers = match self.workers {
            Some(0) => whatever!("workers must be positive"),
            Some(w) => w,
            None => default_workers(),
        };
        let mut vintages = Vec::new();
        for v in self.boundary_vintages.iter() {
            if let Some(to) = v.valid_to_year {
                ensure_whatever!(
                    to >= v.valid_from_year,
                    "Boundary vintage {} ends in {} before it starts in {}",
                    v.file_path,
                    to,
                    v.valid_from_year
                );
            }
            vintages.push(ResolvedVintage {
                path: resolve_path(root, &v.file_path),
                valid_from_year: v.valid_from_year,
                valid_to_year: v.valid_to_year,
            });
        }
        Ok(RunSettings {
            base_dir,
            metadata_path,
            db_path,
            batch_size,
            workers,
            fresh: self.fresh.unwrap_or(true),
            vintages,
        })
    }
}

/// Reads the configuration (if any) and builds the settings for this run.
pub fn load_settings(args: &Args) -> EtlResult<RunSettings> {
    let (config, root) = match &args.config {
        Some(config_path) => {
            let p = Path::new(config_path);
            let config = read_config(p)?;
            let root = p
                .parent()
                .map(|x| x.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (config, root)
        }
        None => (EtlConfig::default(), PathBuf::from(".")),
    };
    let settings = config.with_overrides(args).resolve(&root)?;
    info!("load_settings: {:?}", settings);
    Ok(settings)
}
