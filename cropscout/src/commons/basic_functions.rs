use anyhow::{Context, Result};
use geojson::{FeatureCollection, GeoJson};
use std::fs;
use std::path::Path;

/// Convert a GeoJSON geometry into a `geo` geometry
pub fn to_geo_geometry(geometry: &geojson::Geometry) -> Result<geo::Geometry<f64>> {
    geo::Geometry::<f64>::try_from(geometry.value.clone())
        .context("Failed to convert GeoJSON geometry to geo geometry")
}

/// Convert a `geo` geometry into a GeoJSON geometry
pub fn to_geojson_geometry(geometry: &geo::Geometry<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(geometry))
}

/// Areal part of a geometry, `None` for points and lines
pub fn as_multi_polygon(geometry: &geo::Geometry<f64>) -> Option<geo::MultiPolygon<f64>> {
    match geometry {
        geo::Geometry::Polygon(p) => Some(geo::MultiPolygon::new(vec![p.clone()])),
        geo::Geometry::MultiPolygon(mp) => Some(mp.clone()),
        geo::Geometry::Rect(r) => Some(geo::MultiPolygon::new(vec![r.to_polygon()])),
        _ => None,
    }
}

/// Write a FeatureCollection to `path`, creating parent directories
pub fn write_feature_collection(path: &Path, collection: &FeatureCollection) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
        }
    }
    fs::write(path, collection.to_string())
        .with_context(|| format!("Failed to write GeoJSON file: {:?}", path))?;
    Ok(())
}

/// Read a FeatureCollection from `path`
pub fn read_feature_collection(path: &Path) -> Result<FeatureCollection> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read GeoJSON file: {:?}", path))?;
    let geojson: GeoJson = text
        .parse()
        .with_context(|| format!("Failed to parse GeoJSON from {:?}", path))?;
    FeatureCollection::try_from(geojson)
        .with_context(|| format!("{:?} is not a GeoJSON FeatureCollection", path))
}
