use anyhow::{Context, Result};
use geo::{Area, BoundingRect, Polygon};
use geojson::{Feature, FeatureCollection};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::commons::basic_functions::{
    read_feature_collection, to_geo_geometry, to_geojson_geometry, write_feature_collection,
};
use crate::collect::global_variables::{RESERVED_AOI_NAMES, RESERVED_AOI_SUFFIXES};
use crate::error::CropScoutError;
use crate::geo_core::BoundingBox;

/// Display style of an AOI, serialised with leaflet path option names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AoiStyle {
    pub color: String,
    pub fill_color: String,
    pub fill_opacity: f64,
    pub weight: f64,
}

impl Default for AoiStyle {
    fn default() -> Self {
        AoiStyle {
            color: "#ff7800".to_string(),
            fill_color: "#ff7800".to_string(),
            fill_opacity: 0.1,
            weight: 2.0,
        }
    }
}

/// A named polygon used to select imagery and clip ground truth.
///
/// There are no setters: an AOI is built once (from a bbox, a polygon or a saved
/// GeoJSON file) and `with_style` is the only way to derive a variant.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    name: String,
    polygon: Polygon<f64>,
    style: AoiStyle,
}

impl AreaOfInterest {
    pub fn from_bbox(name: &str, bbox: BoundingBox) -> Result<Self> {
        if !bbox.is_valid() {
            return Err(CropScoutError::InvalidAoi {
                name: name.to_string(),
                reason: format!("degenerate bounding box {:?}", bbox),
            }
            .into());
        }
        Self::from_polygon(name, bbox.to_polygon())
    }

    pub fn from_polygon(name: &str, polygon: Polygon<f64>) -> Result<Self> {
        if let Some(reason) = name_problem(name) {
            return Err(CropScoutError::InvalidAoi {
                name: name.to_string(),
                reason,
            }
            .into());
        }
        if polygon.unsigned_area() <= 0.0 {
            return Err(CropScoutError::InvalidAoi {
                name: name.to_string(),
                reason: "polygon has zero area".to_string(),
            }
            .into());
        }
        Ok(AreaOfInterest {
            name: name.to_string(),
            polygon,
            style: AoiStyle::default(),
        })
    }

    pub fn with_style(mut self, style: AoiStyle) -> Self {
        self.style = style;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn style(&self) -> &AoiStyle {
        &self.style
    }

    pub fn area(&self) -> f64 {
        self.polygon.unsigned_area()
    }

    pub fn bbox(&self) -> BoundingBox {
        // from_polygon guarantees a non-empty exterior
        self.polygon
            .bounding_rect()
            .map(BoundingBox::from_rect)
            .unwrap_or_else(|| BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }

    pub fn to_feature(&self) -> Result<Feature> {
        let geometry = to_geojson_geometry(&geo::Geometry::Polygon(self.polygon.clone()));
        let mut properties = Map::new();
        properties.insert(
            "name".to_string(),
            serde_json::Value::String(self.name.clone()),
        );
        properties.insert(
            "style".to_string(),
            serde_json::to_value(&self.style).context("Failed to serialise AOI style")?,
        );
        let mut feature = Feature::from(geometry);
        feature.properties = Some(properties);
        Ok(feature)
    }

    /// Build an AOI from a polygon feature; `fallback_name` is used when it has no `name`
    pub fn from_feature(feature: &Feature, fallback_name: &str) -> Result<Self> {
        let geometry = feature
            .geometry
            .as_ref()
            .context("AOI feature has no geometry")?;
        let polygon = match to_geo_geometry(geometry)? {
            geo::Geometry::Polygon(polygon) => polygon,
            geo::Geometry::Rect(rect) => rect.to_polygon(),
            other => {
                return Err(CropScoutError::UnsupportedGeometry(geometry_name(&other)).into())
            }
        };
        let name = feature
            .property("name")
            .and_then(|v| v.as_str())
            .unwrap_or(fallback_name);
        let style = match feature.property("style") {
            Some(value) => serde_json::from_value(value.clone())
                .context("AOI feature has a malformed style property")?,
            None => AoiStyle::default(),
        };
        Ok(Self::from_polygon(name, polygon)?.with_style(style))
    }

    /// Save as `<dir>/<name>.geojson`, one feature in a FeatureCollection
    pub fn to_geojson(&self, dir: &Path) -> Result<PathBuf> {
        let collection = FeatureCollection {
            bbox: None,
            foreign_members: None,
            features: vec![self.to_feature()?],
        };
        let output_file = dir.join(format!("{}.geojson", self.name));
        write_feature_collection(&output_file, &collection)?;
        info!(aoi = %self.name, path = ?output_file, "AOI saved");
        Ok(output_file)
    }

    /// Load the first polygon feature of a GeoJSON file
    pub fn from_geojson(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CropScoutError::MissingInput(path.to_path_buf()).into());
        }
        let collection = read_feature_collection(path)?;
        let fallback_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("aoi");
        let feature = collection
            .features
            .first()
            .with_context(|| format!("{:?} contains no feature", path))?;
        Self::from_feature(feature, fallback_name)
    }
}

/// AOI names become file stems in the output directory
fn name_problem(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return Some("empty name".to_string());
    }
    if name.starts_with('.')
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Some("name may only use letters, digits, '_', '-' and '.' and must not start with '.'".to_string());
    }
    if RESERVED_AOI_NAMES.iter().any(|reserved| *reserved == name) {
        return Some(format!("'{}' is a reserved output name", name));
    }
    if let Some(suffix) = RESERVED_AOI_SUFFIXES.iter().find(|s| name.ends_with(*s)) {
        return Some(format!("name must not end with '{}'", suffix));
    }
    None
}

pub(crate) fn geometry_name(geometry: &geo::Geometry<f64>) -> String {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_from_bbox() {
        let aoi = AreaOfInterest::from_bbox("north", BoundingBox::new(0.0, 0.0, 2.0, 1.0)).unwrap();
        assert_eq!(aoi.name(), "north");
        assert_eq!(aoi.area(), 2.0);
        assert_eq!(aoi.bbox(), BoundingBox::new(0.0, 0.0, 2.0, 1.0));
    }

    #[test]
    fn test_rejects_degenerate_bbox() {
        let err = AreaOfInterest::from_bbox("flat", BoundingBox::new(0.0, 1.0, 2.0, 1.0))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CropScoutError>(),
            Some(CropScoutError::InvalidAoi { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_area_polygon() {
        let line_like = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 2.0, y: 2.0)];
        assert!(AreaOfInterest::from_polygon("line", line_like).is_err());
    }

    #[test]
    fn test_feature_carries_style() {
        let aoi = AreaOfInterest::from_bbox("a", BoundingBox::new(0.0, 0.0, 1.0, 1.0)).unwrap();
        let feature = aoi.to_feature().unwrap();
        let style = feature.property("style").unwrap();
        assert_eq!(style["fillOpacity"], serde_json::json!(0.1));
        assert_eq!(style["color"], serde_json::json!("#ff7800"));
        assert_eq!(feature.property("name").unwrap(), "a");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let style = AoiStyle {
            color: "#0000ff".to_string(),
            ..AoiStyle::default()
        };
        let aoi = AreaOfInterest::from_bbox("south", BoundingBox::new(36.7, -1.5, 36.8, -1.4))
            .unwrap()
            .with_style(style);

        let path = aoi.to_geojson(dir.path()).unwrap();
        assert!(path.ends_with("south.geojson"));

        let loaded = AreaOfInterest::from_geojson(&path).unwrap();
        assert_eq!(loaded, aoi);
    }

    #[test]
    fn test_load_missing_file() {
        let err = AreaOfInterest::from_geojson(Path::new("nowhere/aoi.geojson")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CropScoutError>(),
            Some(CropScoutError::MissingInput(_))
        ));
    }

    #[test]
    fn test_rejects_unsafe_names() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        for name in [
            "",
            "../north",
            "a/b",
            "a\\b",
            "..",
            ".hidden",
            "ground_truth",
            "map_preview",
            "north_ground_truth",
            "north_scenes",
        ] {
            let err = AreaOfInterest::from_bbox(name, bbox).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<CropScoutError>(),
                    Some(CropScoutError::InvalidAoi { .. })
                ),
                "{:?} accepted",
                name
            );
        }
        for name in ["north", "field-2", "plot_7.v2"] {
            assert!(AreaOfInterest::from_bbox(name, bbox).is_ok(), "{:?} rejected", name);
        }
    }
}
