use std::path::PathBuf;
use thiserror::Error;

/// Precondition failures raised before any I/O library or network call.
///
/// Everything else (GDAL, PROJ, HTTP) is propagated as `anyhow::Error` with context.
#[derive(Debug, Error)]
pub enum CropScoutError {
    #[error("input file does not exist: {0}")]
    MissingInput(PathBuf),

    #[error("environment variable {0} is not set; it must hold the imagery API key")]
    MissingCredential(String),

    #[error("invalid area of interest '{name}': {reason}")]
    InvalidAoi { name: String, reason: String },

    #[error("no source CRS for {0}: the layer has no spatial reference and no source_epsg was configured")]
    MissingSourceCrs(PathBuf),

    #[error("unsupported geometry type '{0}', expected Polygon or MultiPolygon")]
    UnsupportedGeometry(String),

    #[error("download command '{program}' exited with {status}")]
    DownloadFailed { program: String, status: String },
}
