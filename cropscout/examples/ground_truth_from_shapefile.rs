use anyhow::Result;
use cropscout::geo_core::BoundingBox;
use cropscout::geometric::aoi::AreaOfInterest;
use cropscout::geometric::ground_truth::GroundTruth;
use cropscout::geometric::map_preview::MapPreview;

/// Example: load crop-type ground truth, keep agricultural classes, save it
/// together with two AOIs and a styled map preview
fn main() -> Result<()> {
    println!("=== Example: Ground truth from shapefile ===\n");

    let shapefile = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data/ground_truth.shp".to_string());

    // Source CRS is read from the .prj; 32737 is only used when there is none
    let mut ground_truth = GroundTruth::new(&shapefile, Some("./output".to_string()))?;
    ground_truth.set_source_crs(32737);
    let ground_truth = ground_truth.run()?;

    println!("Ground truth processed successfully!");
    println!("  - Number of fields: {}", ground_truth.len());
    for (code, count) in ground_truth.class_counts() {
        println!("  - class {}: {}", code, count);
    }

    let north = AreaOfInterest::from_bbox("north", BoundingBox::new(36.50, -1.20, 36.60, -1.10))?;
    let south = AreaOfInterest::from_bbox("south", BoundingBox::new(36.70, -1.50, 36.80, -1.40))?;

    let mut preview = MapPreview::new();
    preview.add_ground_truth(&ground_truth)?;
    for aoi in [&north, &south] {
        aoi.to_geojson(ground_truth.get_output_path())?;
        ground_truth.to_geojson_within(aoi)?;
        preview.add_aoi(aoi)?;
    }

    println!("\nSaving to GeoJSON...");
    ground_truth.to_geojson(None)?;
    preview.save(&ground_truth.get_output_path().join("map_preview.geojson"))?;

    println!("\nProcessing complete!");
    println!("  - Output directory: {:?}", ground_truth.get_output_path());

    Ok(())
}
