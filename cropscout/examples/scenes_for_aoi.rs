use anyhow::Result;
use chrono::NaiveDate;
use cropscout::config::SearchSettings;
use cropscout::geo_core::BoundingBox;
use cropscout::geometric::aoi::AreaOfInterest;
use cropscout::geometric::scene::SceneSearch;

/// Example: scenes fully covering an AOI over one growing season
/// Needs PL_API_KEY in the environment
fn main() -> Result<()> {
    println!("=== Example: Scenes covering an AOI ===\n");

    let aoi = AreaOfInterest::from_bbox("north", BoundingBox::new(36.50, -1.20, 36.60, -1.10))?;

    let settings = SearchSettings {
        start_date: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap_or_default(),
        end_date: NaiveDate::from_ymd_opt(2020, 6, 30).unwrap_or_default(),
        max_cloud_cover: 0.05,
        ..SearchSettings::default()
    };

    println!("Bounding box: {:?}", aoi.bbox());
    println!("Date range: {} to {}", settings.start_date, settings.end_date);
    println!("Cloud cover ceiling: {}\n", settings.max_cloud_cover);

    let mut search = SceneSearch::from_settings(&settings, Some("./output".to_string()))?;
    let table = search.run(&aoi)?;

    println!("{} scenes cover the AOI:", table.len());
    for scene in table.scenes() {
        println!(
            "  - {} (cloud cover {:?}, overlap {:.2}%)",
            scene.id, scene.cloud_cover, scene.overlap_pct
        );
    }

    let (geojson, csv) = search.to_geojson(None)?;
    println!("\nSaved {:?} and {:?}", geojson, csv);

    Ok(())
}
