use anyhow::{Context, Result};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{FieldValue, LayerAccess};
use gdal::Dataset;
use geo::{BoundingRect, Intersects};
use geojson::{Feature, FeatureCollection};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::collect::global_variables::{AGRICULTURAL_CLASSES, DEFAULT_CLASS_FIELD, TEMP_PATH};
use crate::commons::basic_functions::{
    as_multi_polygon, read_feature_collection, to_geo_geometry, to_geojson_geometry,
    write_feature_collection,
};
use crate::config::GroundTruthSettings;
use crate::error::CropScoutError;
use crate::geo_core::{Crs, Reprojector};
use crate::geometric::aoi::{geometry_name, AreaOfInterest};

type Envelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Crop-type ground truth
/// Loads polygons from a shapefile, keeps agricultural classes and reprojects them
/// to EPSG:4326, the system AOIs and scene footprints use
pub struct GroundTruth {
    /// Shapefile path, `None` when built from features already in memory
    filepath_shp: Option<PathBuf>,
    /// Output path for processed data
    output_path: PathBuf,
    /// Used when the layer has no spatial reference
    source_epsg: Option<i32>,
    class_field: String,
    classes: BTreeSet<i64>,
    /// Kept features in file order
    features: Vec<Feature>,
}

impl GroundTruth {
    /// Create a loader for `filepath_shp`; fails if the file does not exist
    pub fn new(filepath_shp: impl Into<PathBuf>, output_path: Option<String>) -> Result<Self> {
        let filepath_shp = filepath_shp.into();
        if !filepath_shp.is_file() {
            return Err(CropScoutError::MissingInput(filepath_shp).into());
        }

        let mut ground_truth = Self::empty(output_path);
        ground_truth.filepath_shp = Some(filepath_shp);
        Ok(ground_truth)
    }

    pub fn from_settings(settings: &GroundTruthSettings, output_path: Option<String>) -> Result<Self> {
        let shapefile = settings
            .shapefile
            .clone()
            .context("No ground-truth shapefile configured")?;
        let mut ground_truth = Self::new(shapefile, output_path)?;
        ground_truth.set_class_field(&settings.class_field);
        ground_truth.set_classes(settings.classes.iter().copied());
        if let Some(epsg) = settings.source_epsg {
            ground_truth.set_source_crs(epsg);
        }
        Ok(ground_truth)
    }

    /// Wrap features that are already filtered and in EPSG:4326
    pub fn from_features(features: Vec<Feature>, output_path: Option<String>) -> Self {
        let mut ground_truth = Self::empty(output_path);
        ground_truth.features = features;
        ground_truth
    }

    /// Reload ground truth saved by `to_geojson`
    pub fn from_geojson(path: &Path, output_path: Option<String>) -> Result<Self> {
        if !path.exists() {
            return Err(CropScoutError::MissingInput(path.to_path_buf()).into());
        }
        let collection = read_feature_collection(path)?;
        Ok(Self::from_features(collection.features, output_path))
    }

    fn empty(output_path: Option<String>) -> Self {
        GroundTruth {
            filepath_shp: None,
            output_path: PathBuf::from(output_path.as_deref().unwrap_or(TEMP_PATH)),
            source_epsg: None,
            class_field: DEFAULT_CLASS_FIELD.to_string(),
            classes: AGRICULTURAL_CLASSES.iter().copied().collect(),
            features: Vec::new(),
        }
    }

    pub fn set_class_field(&mut self, class_field: &str) {
        self.class_field = class_field.to_string();
    }

    pub fn set_classes(&mut self, classes: impl IntoIterator<Item = i64>) {
        self.classes = classes.into_iter().collect();
    }

    pub fn set_source_crs(&mut self, epsg: i32) {
        self.source_epsg = Some(epsg);
    }

    pub fn class_field(&self) -> &str {
        &self.class_field
    }

    /// Read the shapefile, keep agricultural classes, reproject
    pub fn run(mut self) -> Result<Self> {
        self.run_internal()?;
        Ok(self)
    }

    pub fn run_internal(&mut self) -> Result<()> {
        let filepath = self
            .filepath_shp
            .clone()
            .context("No shapefile path provided")?;

        let (layer_crs, features) = read_shapefile(&filepath)?;
        let total = features.len();

        let source = match (layer_crs, self.source_epsg) {
            (Some(layer), configured) => {
                if let (Crs::Epsg(code), Some(configured)) = (&layer, configured) {
                    if *code != configured {
                        warn!(
                            layer = *code,
                            configured, "shapefile CRS differs from configured source_epsg, using the layer's"
                        );
                    }
                }
                layer
            }
            (None, Some(configured)) => Crs::Epsg(configured),
            (None, None) => return Err(CropScoutError::MissingSourceCrs(filepath).into()),
        };

        let kept = retain_classes(features, &self.class_field, &self.classes);
        let reprojector = Reprojector::to_target(source)?;
        self.features = reproject_features(kept, &reprojector)?;

        info!(
            path = ?filepath,
            total,
            kept = self.features.len(),
            from = %reprojector.source(),
            to = %reprojector.target(),
            "ground truth loaded"
        );
        Ok(())
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of features per class code
    pub fn class_counts(&self) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for feature in &self.features {
            if let Some(code) = feature_class(feature, &self.class_field) {
                *counts.entry(code).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Features intersecting the AOI, in file order
    pub fn features_within(&self, aoi: &AreaOfInterest) -> Result<Vec<&Feature>> {
        let mut envelopes = Vec::with_capacity(self.features.len());
        let mut geometries = Vec::with_capacity(self.features.len());
        for (idx, feature) in self.features.iter().enumerate() {
            let Some(geometry) = feature.geometry.as_ref() else {
                geometries.push(None);
                continue;
            };
            let geometry = to_geo_geometry(geometry)?;
            if let Some(rect) = geometry.bounding_rect() {
                envelopes.push(Envelope::new(
                    Rectangle::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    idx,
                ));
            }
            geometries.push(Some(geometry));
        }

        let tree = RTree::bulk_load(envelopes);
        let bbox = aoi.bbox();
        let query = AABB::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y]);

        let mut hits: Vec<usize> = tree
            .locate_in_envelope_intersecting(&query)
            .map(|envelope| envelope.data)
            .filter(|idx| {
                geometries[*idx]
                    .as_ref()
                    .is_some_and(|geometry| aoi.polygon().intersects(geometry))
            })
            .collect();
        hits.sort_unstable();

        debug!(aoi = %aoi.name(), hits = hits.len(), "ground truth within AOI");
        Ok(hits.into_iter().map(|idx| &self.features[idx]).collect())
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            foreign_members: None,
            features: self.features.clone(),
        }
    }

    /// Save to `<output_path>/<name>.geojson`
    pub fn to_geojson(&self, name: Option<&str>) -> Result<PathBuf> {
        let name = name.unwrap_or("ground_truth");
        let output_file = self.output_path.join(format!("{}.geojson", name));
        write_feature_collection(&output_file, &self.to_feature_collection())?;
        info!(path = ?output_file, features = self.features.len(), "ground truth saved");
        Ok(output_file)
    }

    /// Save the features intersecting `aoi` to `<output_path>/<aoi>_ground_truth.geojson`
    pub fn to_geojson_within(&self, aoi: &AreaOfInterest) -> Result<PathBuf> {
        let features = self
            .features_within(aoi)?
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        let count = features.len();
        let collection = FeatureCollection {
            bbox: None,
            foreign_members: None,
            features,
        };
        let output_file = self
            .output_path
            .join(format!("{}_ground_truth.geojson", aoi.name()));
        write_feature_collection(&output_file, &collection)?;
        info!(path = ?output_file, features = count, "AOI ground truth saved");
        Ok(output_file)
    }

    pub fn get_output_path(&self) -> &Path {
        &self.output_path
    }
}

/// Read every feature of the first layer, with the layer's CRS when it has a spatial reference
fn read_shapefile(filepath: &Path) -> Result<(Option<Crs>, Vec<Feature>)> {
    let dataset = Dataset::open(filepath)
        .with_context(|| format!("Failed to open shapefile: {:?}", filepath))?;
    let mut layer = dataset
        .layer(0)
        .with_context(|| format!("Failed to access first layer of {:?}", filepath))?;

    let layer_crs = layer
        .spatial_ref()
        .map(|srs| layer_crs(&srs))
        .transpose()
        .with_context(|| format!("Unusable spatial reference in {:?}", filepath))?;
    debug!(path = ?filepath, crs = ?layer_crs, "layer spatial reference");

    let mut features = Vec::new();
    for (idx, feature) in layer.features().enumerate() {
        let geometry = feature
            .geometry()
            .with_context(|| format!("Feature {} of {:?} has no geometry", idx, filepath))?;
        let geometry = geometry
            .to_geo()
            .with_context(|| format!("Malformed geometry in feature {} of {:?}", idx, filepath))?;
        if as_multi_polygon(&geometry).is_none() {
            return Err(CropScoutError::UnsupportedGeometry(geometry_name(&geometry)).into());
        }

        let mut properties = Map::new();
        for (name, value) in feature.fields() {
            properties.insert(name, field_to_json(value));
        }

        let mut geojson_feature = Feature::from(to_geojson_geometry(&geometry));
        geojson_feature.properties = Some(properties);
        features.push(geojson_feature);
    }

    Ok((layer_crs, features))
}

/// EPSG code when GDAL identifies one, the layer's own WKT otherwise
fn layer_crs(srs: &SpatialRef) -> Result<Crs> {
    if let (Ok(name), Ok(code)) = (srs.auth_name(), srs.auth_code()) {
        if name.eq_ignore_ascii_case("EPSG") {
            return Ok(Crs::Epsg(code));
        }
    }
    let wkt = srs
        .to_wkt()
        .context("Failed to export spatial reference as WKT")?;
    Ok(Crs::Definition(wkt))
}

fn field_to_json(value: Option<FieldValue>) -> Value {
    match value {
        Some(FieldValue::IntegerValue(v)) => Value::from(v),
        Some(FieldValue::Integer64Value(v)) => Value::from(v),
        Some(FieldValue::RealValue(v)) => Value::from(v),
        Some(FieldValue::StringValue(v)) => Value::from(v),
        Some(FieldValue::DateValue(v)) => Value::from(v.to_string()),
        Some(FieldValue::DateTimeValue(v)) => Value::from(v.to_rfc3339()),
        Some(other) => Value::from(format!("{:?}", other)),
        None => Value::Null,
    }
}

/// Class code of a property value: integers, integral reals and numeric strings
pub fn class_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn feature_class(feature: &Feature, class_field: &str) -> Option<i64> {
    feature.property(class_field).and_then(class_code)
}

/// Keep features whose class code is in `classes`, preserving order
pub fn retain_classes(
    features: Vec<Feature>,
    class_field: &str,
    classes: &BTreeSet<i64>,
) -> Vec<Feature> {
    features
        .into_iter()
        .filter(|feature| {
            feature_class(feature, class_field).is_some_and(|code| classes.contains(&code))
        })
        .collect()
}

/// Reproject the geometry of every feature in place
pub fn reproject_features(features: Vec<Feature>, reprojector: &Reprojector) -> Result<Vec<Feature>> {
    if reprojector.is_identity() {
        return Ok(features);
    }
    features
        .into_iter()
        .map(|mut feature| {
            if let Some(geometry) = feature.geometry.as_ref() {
                let reprojected = reprojector.reproject(&to_geo_geometry(geometry)?)?;
                feature.geometry = Some(to_geojson_geometry(&reprojected));
            }
            Ok(feature)
        })
        .collect()
}
