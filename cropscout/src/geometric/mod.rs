pub mod aoi;
pub mod ground_truth;
pub mod map_preview;
pub mod scene;
