//! Reads a data directory into a [`Catalog`] and a [`SchedulerConfig`].
//!
//! Each data set is stored under a base name with one of the extensions
//! `.ron`, `.toml` or `.json`:
//!
//! | base name   | required | content                                 |
//! |-------------|----------|-----------------------------------------|
//! | `items`     | yes      | list of [`ItemData`]                    |
//! | `capacity`  | yes      | list of [`CapacityData`]                |
//! | `scheduler` | no       | [`SchedulerConfig`], defaults if absent |
//!
//! Two files sharing a base name are rejected rather than merged.

use std::fs;
use std::path::{Path, PathBuf};

use outpost_core::catalog::{Catalog, CatalogError};
use outpost_scheduler::SchedulerConfig;
use outpost_scheduler::config::ConfigError;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::resolve::build_catalog;
use crate::schema::{CapacityData, ItemData};

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("no '{file}' data file (.ron, .toml or .json) in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    #[error("{file}: unknown data file extension")]
    UnsupportedFormat { file: PathBuf },

    /// Same base name stored in two formats.
    #[error("ambiguous data file: both {a} and {b} exist")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("{file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    #[error("{file}: '{name}' is defined more than once")]
    DuplicateName { file: PathBuf, name: String },

    #[error("{file}: {source}")]
    Catalog {
        file: PathBuf,
        #[source]
        source: CatalogError,
    },

    #[error("{file}: {source}")]
    Config {
        file: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DataLoadError {
    pub(crate) fn parse(file: &Path, detail: impl std::fmt::Display) -> Self {
        DataLoadError::Parse {
            file: file.to_path_buf(),
            detail: detail.to_string(),
        }
    }
}

// ===========================================================================
// Formats
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    /// Lookup order when searching a directory.
    pub const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }

    pub fn of(path: &Path) -> Result<Self, DataLoadError> {
        let ext = path.extension().and_then(|e| e.to_str());
        Format::ALL
            .into_iter()
            .find(|f| Some(f.extension()) == ext)
            .ok_or_else(|| DataLoadError::UnsupportedFormat {
                file: path.to_path_buf(),
            })
    }

    fn parse<T: DeserializeOwned>(self, path: &Path, text: &str) -> Result<T, DataLoadError> {
        match self {
            Format::Ron => ron::from_str(text).map_err(|e| DataLoadError::parse(path, e)),
            Format::Toml => toml::from_str(text).map_err(|e| DataLoadError::parse(path, e)),
            Format::Json => serde_json::from_str(text).map_err(|e| DataLoadError::parse(path, e)),
        }
    }
}

/// Read a single value from a data file.
pub fn read_value<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = Format::of(path)?;
    let text = fs::read_to_string(path)?;
    format.parse(path, &text)
}

// ===========================================================================
// Data files
// ===========================================================================

/// One data set in a directory, identified by its base name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFile(pub &'static str);

pub const ITEMS: DataFile = DataFile("items");
pub const CAPACITY: DataFile = DataFile("capacity");
pub const SCHEDULER: DataFile = DataFile("scheduler");

impl DataFile {
    /// Path of this data set inside `dir`, if one exists.
    pub fn locate(self, dir: &Path) -> Result<Option<PathBuf>, DataLoadError> {
        let mut present = Format::ALL
            .into_iter()
            .map(|f| dir.join(format!("{}.{}", self.0, f.extension())))
            .filter(|p| p.is_file());
        let first = present.next();
        if let (Some(a), Some(b)) = (&first, present.next()) {
            return Err(DataLoadError::ConflictingFormats { a: a.clone(), b });
        }
        Ok(first)
    }

    pub fn require(self, dir: &Path) -> Result<PathBuf, DataLoadError> {
        self.locate(dir)?.ok_or_else(|| DataLoadError::MissingRequired {
            file: self.0.to_string(),
            dir: dir.to_path_buf(),
        })
    }

    /// Read a list of records. RON and JSON files hold the list itself; a
    /// TOML file holds it as an array of tables named after the data set.
    pub fn read_list<T: DeserializeOwned>(self, path: &Path) -> Result<Vec<T>, DataLoadError> {
        let format = Format::of(path)?;
        let text = fs::read_to_string(path)?;
        if format != Format::Toml {
            return format.parse(path, &text);
        }
        let mut table: toml::Table = format.parse(path, &text)?;
        let records = table
            .remove(self.0)
            .ok_or_else(|| DataLoadError::parse(path, format!("expected [[{}]] entries", self.0)))?;
        records
            .try_into()
            .map_err(|e: toml::de::Error| DataLoadError::parse(path, e))
    }
}

// ===========================================================================
// Pipeline
// ===========================================================================

/// Everything a scheduler needs from disk.
#[derive(Debug, Clone)]
pub struct GameData {
    pub catalog: Catalog,
    pub config: SchedulerConfig,
}

/// Build a validated catalog from the `items` and `capacity` files in `dir`.
pub fn load_catalog(dir: &Path) -> Result<Catalog, DataLoadError> {
    let items_path = ITEMS.require(dir)?;
    let capacity_path = CAPACITY.require(dir)?;
    let items: Vec<ItemData> = ITEMS.read_list(&items_path)?;
    let capacity: Vec<CapacityData> = CAPACITY.read_list(&capacity_path)?;
    debug!(
        target: "outpost::data",
        items = items.len(),
        capacity_tables = capacity.len(),
        "data.parsed"
    );
    build_catalog(&items, &items_path, &capacity, &capacity_path)
}

/// Read a scheduler config file and check its values.
pub fn load_config(path: &Path) -> Result<SchedulerConfig, DataLoadError> {
    let config: SchedulerConfig = read_value(path)?;
    if let Err(source) = config.validate() {
        return Err(DataLoadError::Config {
            file: path.to_path_buf(),
            source,
        });
    }
    Ok(config)
}

/// Load the catalog and, when a `scheduler` file exists, the config from
/// `dir`. Without one the default config is used.
pub fn load_game_data(dir: &Path) -> Result<GameData, DataLoadError> {
    let catalog = load_catalog(dir)?;
    let config = SCHEDULER
        .locate(dir)?
        .map(|path| load_config(&path))
        .transpose()?
        .unwrap_or_default();
    info!(
        target: "outpost::data",
        dir = %dir.display(),
        items = catalog.len(),
        tick_interval_ms = config.tick_interval_ms,
        "data.loaded"
    );
    Ok(GameData { catalog, config })
}
