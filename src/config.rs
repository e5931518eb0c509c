use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::processor::{ProcessorError, views::ViewSettings};

/// Environment variable prefix, e.g. `EMISSIONS_TOP_N=10`
pub const ENV_PREFIX: &str = "EMISSIONS";

/// Runtime settings
///
/// Layered lowest to highest: built-in defaults, an optional TOML file,
/// `EMISSIONS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_path: PathBuf,
    pub top_n: usize,
    pub all_regions_label: String,
    pub parallel_views: bool,
    pub table_cache_capacity: usize,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_path: PathBuf::from("data/Carbon_(CO2)_Emissions_by_Country.csv"),
            top_n: 5,
            all_regions_label: "World".to_string(),
            parallel_views: true,
            table_cache_capacity: 4,
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Self, ProcessorError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ProcessorError> {
        if self.top_n == 0 {
            return Err(ProcessorError::InvalidArgument("top_n must be positive".into()));
        }
        if self.table_cache_capacity == 0 {
            return Err(ProcessorError::InvalidArgument(
                "table_cache_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn view_settings(&self) -> ViewSettings {
        ViewSettings {
            top_n: self.top_n,
            all_label: self.all_regions_label.clone(),
            parallel: self.parallel_views,
        }
    }

    pub fn cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.table_cache_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
