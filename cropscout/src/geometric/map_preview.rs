use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection};
use std::path::Path;

use crate::commons::basic_functions::write_feature_collection;
use crate::geometric::aoi::{AoiStyle, AreaOfInterest};
use crate::geometric::ground_truth::{class_code, GroundTruth};

const PALETTE: [&str; 10] = [
    "#1b9e77", "#d95f02", "#7570b3", "#e7298a", "#66a61e", "#e6ab02", "#a6761d", "#666666",
    "#1f78b4", "#b2df8a",
];

/// Stable colour for a class code
pub fn class_color(code: i64) -> &'static str {
    PALETTE[code.rem_euclid(PALETTE.len() as i64) as usize]
}

/// Styled layers for picking AOIs by eye in any GeoJSON viewer.
///
/// Ground-truth polygons get a per-class fill, AOIs keep their own style.
/// The `layer` property tells the two apart.
#[derive(Default)]
pub struct MapPreview {
    features: Vec<Feature>,
}

impl MapPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ground_truth(&mut self, ground_truth: &GroundTruth) -> Result<()> {
        for feature in ground_truth.features() {
            let mut feature = feature.clone();
            let color = feature
                .property(ground_truth.class_field())
                .and_then(class_code)
                .map(class_color)
                .unwrap_or("#000000");
            let style = AoiStyle {
                color: color.to_string(),
                fill_color: color.to_string(),
                fill_opacity: 0.6,
                weight: 1.0,
            };
            feature.set_property(
                "style",
                serde_json::to_value(&style).context("Failed to serialise style")?,
            );
            feature.set_property("layer", "ground_truth");
            self.features.push(feature);
        }
        Ok(())
    }

    pub fn add_aoi(&mut self, aoi: &AreaOfInterest) -> Result<()> {
        let mut feature = aoi.to_feature()?;
        feature.set_property("layer", "aoi");
        self.features.push(feature);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let collection = FeatureCollection {
            bbox: None,
            foreign_members: None,
            features: self.features.clone(),
        };
        write_feature_collection(path, &collection)
    }
}
