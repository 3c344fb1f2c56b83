//! TOML settings for a preparation session.
//!
//! Every field has a default so an empty file (or no file) is a valid configuration.
//! The API key never lives here, it is read from the environment.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::collect::global_variables::{
    AGRICULTURAL_CLASSES, API_KEY_ENV, COVERAGE_THRESHOLD, DEFAULT_ASSET_TYPES,
    DEFAULT_CLASS_FIELD, DEFAULT_ITEM_TYPE, DEFAULT_MAX_CLOUD_COVER, DOWNLOAD_PROGRAM,
    MAX_SEARCH_RESULTS, PLANET_DATA_URL, TEMP_PATH,
};
use crate::geo_core::BoundingBox;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub output_path: String,
    pub ground_truth: GroundTruthSettings,
    pub search: SearchSettings,
    pub download: DownloadSettings,
    #[serde(rename = "aoi")]
    pub aois: Vec<AoiSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            output_path: TEMP_PATH.to_string(),
            ground_truth: GroundTruthSettings::default(),
            search: SearchSettings::default(),
            download: DownloadSettings::default(),
            aois: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        Self::from_toml(&text).with_context(|| format!("Invalid settings file: {:?}", path))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text).context("Failed to parse TOML settings")?;
        settings.search.validate()?;
        Ok(settings)
    }

    /// Settings from `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

/// Output CRS is fixed to EPSG:4326, so a `target_epsg` key is rejected
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroundTruthSettings {
    pub shapefile: Option<PathBuf>,
    pub class_field: String,
    pub classes: Vec<i64>,
    /// Used only when the shapefile has no spatial reference at all
    pub source_epsg: Option<i32>,
}

impl Default for GroundTruthSettings {
    fn default() -> Self {
        GroundTruthSettings {
            shapefile: None,
            class_field: DEFAULT_CLASS_FIELD.to_string(),
            classes: AGRICULTURAL_CLASSES.to_vec(),
            source_epsg: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub base_url: String,
    pub api_key_env: String,
    pub item_types: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Fraction in [0, 1]
    pub max_cloud_cover: f64,
    /// Percent of the AOI a footprint must exceed
    pub coverage_threshold: f64,
    pub max_results: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            base_url: PLANET_DATA_URL.to_string(),
            api_key_env: API_KEY_ENV.to_string(),
            item_types: vec![DEFAULT_ITEM_TYPE.to_string()],
            start_date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2019, 12, 31).unwrap_or_default(),
            max_cloud_cover: DEFAULT_MAX_CLOUD_COVER,
            coverage_threshold: COVERAGE_THRESHOLD,
            max_results: MAX_SEARCH_RESULTS,
        }
    }
}

impl SearchSettings {
    pub fn validate(&self) -> Result<()> {
        if self.start_date > self.end_date {
            anyhow::bail!(
                "start_date {} is after end_date {}",
                self.start_date,
                self.end_date
            );
        }
        if !(0.0..=1.0).contains(&self.max_cloud_cover) {
            anyhow::bail!(
                "max_cloud_cover must be a fraction in [0, 1], got {}",
                self.max_cloud_cover
            );
        }
        if self.item_types.is_empty() {
            anyhow::bail!("at least one item type is required");
        }
        Ok(())
    }

    /// Start of `start_date` in UTC
    pub fn start(&self) -> DateTime<Utc> {
        self.start_date.and_time(NaiveTime::MIN).and_utc()
    }

    /// Last second of `end_date` in UTC
    pub fn end(&self) -> Result<DateTime<Utc>> {
        let end = self
            .end_date
            .and_hms_opt(23, 59, 59)
            .context("Invalid end of day")?;
        Ok(end.and_utc())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub program: String,
    pub item_type: String,
    pub asset_types: Vec<String>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        DownloadSettings {
            program: DOWNLOAD_PROGRAM.to_string(),
            item_type: DEFAULT_ITEM_TYPE.to_string(),
            asset_types: DEFAULT_ASSET_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AoiSettings {
    pub name: String,
    pub bbox: BoundingBox,
}
