use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use geo::{Area, BooleanOps, MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::collect::global_variables::{COVERAGE_THRESHOLD, TEMP_PATH};
use crate::collect::planet::planet_collect::PlanetCollect;
use crate::commons::basic_functions::{
    as_multi_polygon, to_geojson_geometry, write_feature_collection,
};
use crate::config::SearchSettings;
use crate::geometric::aoi::AreaOfInterest;

/// A satellite scene returned by the search API
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub id: String,
    pub item_type: String,
    pub footprint: geo::Geometry<f64>,
    /// Fraction in [0, 1]
    pub cloud_cover: Option<f64>,
    pub acquired: Option<DateTime<Utc>>,
    pub thumbnail: Option<String>,
    /// Share of the AOI covered by the footprint, in percent
    pub overlap_pct: f64,
}

/// Percentage of `aoi` covered by `footprint`: area(footprint ∩ aoi) / area(aoi) * 100.
///
/// Non-areal footprints and zero-area AOIs give 0.
pub fn overlap_percentage(aoi: &Polygon<f64>, footprint: &geo::Geometry<f64>) -> f64 {
    let aoi_area = aoi.unsigned_area();
    if aoi_area <= 0.0 {
        return 0.0;
    }
    let Some(footprint) = as_multi_polygon(footprint) else {
        return 0.0;
    };
    let intersection = MultiPolygon::new(vec![aoi.clone()])
        .intersection(&footprint)
        .unsigned_area();
    (intersection / aoi_area * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Serialize, Deserialize)]
struct SceneRow {
    id: String,
    item_type: String,
    acquired: Option<String>,
    cloud_cover: Option<f64>,
    overlap_pct: f64,
    thumbnail: Option<String>,
}

/// Scenes matching one AOI, with overlap computed
#[derive(Debug, Clone)]
pub struct SceneTable {
    aoi_name: String,
    scenes: Vec<Scene>,
}

impl SceneTable {
    /// Compute the overlap of every scene with `aoi`
    pub fn from_scenes(aoi: &AreaOfInterest, mut scenes: Vec<Scene>) -> Self {
        let polygon = aoi.polygon();

        #[cfg(feature = "rayon")]
        scenes
            .par_iter_mut()
            .for_each(|scene| scene.overlap_pct = overlap_percentage(polygon, &scene.footprint));

        #[cfg(not(feature = "rayon"))]
        scenes
            .iter_mut()
            .for_each(|scene| scene.overlap_pct = overlap_percentage(polygon, &scene.footprint));

        SceneTable {
            aoi_name: aoi.name().to_string(),
            scenes,
        }
    }

    /// Keep scenes covering strictly more than `threshold` percent of the AOI
    pub fn retain_coverage(&mut self, threshold: f64) {
        let before = self.scenes.len();
        self.scenes.retain(|scene| scene.overlap_pct > threshold);
        debug!(
            aoi = %self.aoi_name,
            kept = self.scenes.len(),
            dropped = before - self.scenes.len(),
            "coverage filter"
        );
    }

    /// Least cloudy first, unknown cloud cover last
    pub fn sort_by_cloud_cover(&mut self) {
        self.scenes.sort_by(|a, b| {
            let a = a.cloud_cover.unwrap_or(f64::INFINITY);
            let b = b.cloud_cover.unwrap_or(f64::INFINITY);
            a.total_cmp(&b)
        });
    }

    pub fn aoi_name(&self) -> &str {
        &self.aoi_name
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.scenes.iter().map(|s| s.id.clone()).collect()
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .scenes
            .iter()
            .map(|scene| {
                let mut properties = Map::new();
                properties.insert("id".to_string(), scene.id.clone().into());
                properties.insert("item_type".to_string(), scene.item_type.clone().into());
                properties.insert("cloud_cover".to_string(), scene.cloud_cover.into());
                properties.insert(
                    "acquired".to_string(),
                    scene.acquired.map(|d| d.to_rfc3339()).into(),
                );
                properties.insert("thumbnail".to_string(), scene.thumbnail.clone().into());
                properties.insert("overlap_pct".to_string(), scene.overlap_pct.into());
                properties.insert("aoi".to_string(), self.aoi_name.clone().into());

                let mut feature = Feature::from(to_geojson_geometry(&scene.footprint));
                feature.properties = Some(properties);
                feature
            })
            .collect();

        FeatureCollection {
            bbox: None,
            foreign_members: None,
            features,
        }
    }

    pub fn to_geojson(&self, path: &Path) -> Result<()> {
        write_feature_collection(path, &self.to_feature_collection())
    }

    /// One row per scene: id, item_type, acquired, cloud_cover, overlap_pct, thumbnail
    pub fn to_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create CSV file: {:?}", path))?;
        for scene in &self.scenes {
            writer
                .serialize(SceneRow {
                    id: scene.id.clone(),
                    item_type: scene.item_type.clone(),
                    acquired: scene.acquired.map(|d| d.to_rfc3339()),
                    cloud_cover: scene.cloud_cover,
                    overlap_pct: scene.overlap_pct,
                    thumbnail: scene.thumbnail.clone(),
                })
                .context("Failed to write scene row")?;
        }
        writer.flush().context("Failed to flush CSV file")?;
        Ok(())
    }
}

/// Scene ids from a CSV written by `SceneTable::to_csv`
pub fn read_scene_ids(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open scene table: {:?}", path))?;
    let mut ids = Vec::new();
    for row in reader.deserialize() {
        let row: SceneRow = row.context("Failed to read scene row")?;
        ids.push(row.id);
    }
    Ok(ids)
}

/// Scene selection for one AOI: search, overlap, coverage filter, export
pub struct SceneSearch {
    planet_collect: PlanetCollect,
    /// Output path for processed data
    output_path: PathBuf,
    coverage_threshold: f64,
    table: Option<SceneTable>,
}

impl SceneSearch {
    pub fn new(planet_collect: PlanetCollect, output_path: Option<String>) -> Self {
        SceneSearch {
            planet_collect,
            output_path: PathBuf::from(output_path.as_deref().unwrap_or(TEMP_PATH)),
            coverage_threshold: COVERAGE_THRESHOLD,
            table: None,
        }
    }

    /// Client from the environment credential, threshold from the settings
    pub fn from_settings(settings: &SearchSettings, output_path: Option<String>) -> Result<Self> {
        let planet_collect = PlanetCollect::from_env(settings)?;
        let mut search = Self::new(planet_collect, output_path);
        search.set_coverage_threshold(settings.coverage_threshold);
        Ok(search)
    }

    pub fn set_coverage_threshold(&mut self, threshold: f64) {
        self.coverage_threshold = threshold;
    }

    /// Search scenes intersecting `aoi` and keep the ones covering it
    pub fn run(&mut self, aoi: &AreaOfInterest) -> Result<&SceneTable> {
        info!(aoi = %aoi.name(), "searching scenes");

        let scenes = self
            .planet_collect
            .search(aoi.polygon())
            .with_context(|| format!("Scene search failed for AOI '{}'", aoi.name()))?;
        let returned = scenes.len();

        let mut table = SceneTable::from_scenes(aoi, scenes);
        table.retain_coverage(self.coverage_threshold);
        table.sort_by_cloud_cover();

        info!(
            aoi = %aoi.name(),
            returned,
            covering = table.len(),
            threshold = self.coverage_threshold,
            "scene search done"
        );
        Ok(self.table.insert(table))
    }

    pub fn get_table(&self) -> Option<&SceneTable> {
        self.table.as_ref()
    }

    /// Save `<name>_scenes.geojson` and `<name>_scenes.csv`
    pub fn to_geojson(&self, name: Option<&str>) -> Result<(PathBuf, PathBuf)> {
        let table = self
            .table
            .as_ref()
            .context("No scene table available. Call run() first.")?;
        let name = name.unwrap_or(table.aoi_name());

        std::fs::create_dir_all(&self.output_path)
            .with_context(|| format!("Failed to create output directory: {:?}", self.output_path))?;
        let geojson_file = self.output_path.join(format!("{}_scenes.geojson", name));
        let csv_file = self.output_path.join(format!("{}_scenes.csv", name));
        table.to_geojson(&geojson_file)?;
        table.to_csv(&csv_file)?;

        info!(path = ?geojson_file, scenes = table.len(), "scene table saved");
        Ok((geojson_file, csv_file))
    }

    pub fn get_output_path(&self) -> &Path {
        &self.output_path
    }
}
