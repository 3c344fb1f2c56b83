use anyhow::{Context, Result};
use geo::{Coord, Geometry, LineString, MapCoords, Polygon, Rect};
use proj::Proj;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::collect::global_variables::TARGET_EPSG;

/// A coordinate reference system PROJ can resolve
#[derive(Debug, Clone, PartialEq)]
pub enum Crs {
    Epsg(i32),
    /// WKT or PROJ string, for layers without an authority code
    Definition(String),
}

impl Crs {
    /// The fixed system every output is written in
    pub fn target() -> Self {
        Crs::Epsg(TARGET_EPSG)
    }

    fn to_proj_string(&self) -> String {
        match self {
            Crs::Epsg(code) => format!("EPSG:{}", code),
            Crs::Definition(definition) => definition.clone(),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Definition(definition) => {
                let head: String = definition.chars().take(40).collect();
                write!(f, "custom CRS ({}...)", head)
            }
        }
    }
}

/// A PROJ transformation between two systems.
///
/// Axis order is normalised to (x, y) = (lon, lat) / (easting, northing) on both sides,
/// so geographic systems take longitude first like GeoJSON does.
pub struct Reprojector {
    proj: Proj,
    from: Crs,
    to: Crs,
}

impl Reprojector {
    pub fn new(from_epsg: i32, to_epsg: i32) -> Result<Self> {
        Self::between(Crs::Epsg(from_epsg), Crs::Epsg(to_epsg))
    }

    /// Transformation from `from` into the fixed target system
    pub fn to_target(from: Crs) -> Result<Self> {
        Self::between(from, Crs::target())
    }

    pub fn between(from: Crs, to: Crs) -> Result<Self> {
        let proj = Proj::new_known_crs(&from.to_proj_string(), &to.to_proj_string(), None)
            .with_context(|| format!("Failed to create Proj transformation {} -> {}", from, to))?;

        Ok(Reprojector { proj, from, to })
    }

    /// The transformation going the other way
    pub fn inverse(&self) -> Result<Self> {
        Reprojector::between(self.to.clone(), self.from.clone())
    }

    pub fn source(&self) -> &Crs {
        &self.from
    }

    pub fn target(&self) -> &Crs {
        &self.to
    }

    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Reproject every coordinate of a geometry
    pub fn reproject(&self, geometry: &Geometry<f64>) -> Result<Geometry<f64>> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        let proj = &self.proj;
        let reprojected = geometry
            .try_map_coords(|coord: Coord<f64>| {
                proj.convert((coord.x, coord.y))
                    .map(|(x, y)| Coord { x, y })
            })
            .with_context(|| {
                format!(
                    "Failed to reproject geometry from {} to {}",
                    self.from, self.to
                )
            })?;
        Ok(reprojected)
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64, // min longitude
    pub min_y: f64, // min latitude
    pub max_x: f64, // max longitude
    pub max_y: f64, // max latitude
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_rect(rect: Rect<f64>) -> Self {
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// True when the box has a strictly positive width and height
    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x < self.max_x
            && self.min_y < self.max_y
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (self.min_x, self.min_y),
                (self.max_x, self.min_y),
                (self.max_x, self.max_y),
                (self.min_x, self.max_y),
                (self.min_x, self.min_y),
            ]),
            vec![],
        )
    }
}

/// Parses `min_x,min_y,max_x,max_y`
impl FromStr for BoundingBox {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .with_context(|| format!("Invalid bbox coordinate '{}'", part.trim()))
            })
            .collect::<Result<Vec<f64>>>()?;

        match values.as_slice() {
            [min_x, min_y, max_x, max_y] => Ok(BoundingBox::new(*min_x, *min_y, *max_x, *max_y)),
            _ => anyhow::bail!(
                "Bounding box needs 4 comma-separated values (min_x,min_y,max_x,max_y), got {}",
                values.len()
            ),
        }
    }
}
