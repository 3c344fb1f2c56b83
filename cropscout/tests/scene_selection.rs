use approx::assert_abs_diff_eq;
use cropscout::collect::global_variables::COVERAGE_THRESHOLD;
use cropscout::collect::planet::planet_collect::parse_page;
use cropscout::geo_core::BoundingBox;
use cropscout::geometric::aoi::AreaOfInterest;
use cropscout::geometric::scene::{read_scene_ids, SceneTable};

const PAGE: &str = include_str!("fixtures/quick_search_page.json");

fn aoi() -> AreaOfInterest {
    AreaOfInterest::from_bbox("north", BoundingBox::new(36.5, -1.2, 36.6, -1.1)).unwrap()
}

#[test]
fn test_only_covering_scenes_survive() {
    let page = parse_page(PAGE).unwrap();
    assert_eq!(page.scenes.len(), 3);
    assert!(page.next.is_none());

    let mut table = SceneTable::from_scenes(&aoi(), page.scenes);
    let overlaps: Vec<f64> = table.scenes().iter().map(|s| s.overlap_pct).collect();
    assert_abs_diff_eq!(overlaps[0], 100.0, epsilon = 1e-6);
    // footprint starts at 36.55: half of the AOI
    assert_abs_diff_eq!(overlaps[1], 50.0, epsilon = 1e-6);
    assert_abs_diff_eq!(overlaps[2], 100.0, epsilon = 1e-6);

    table.retain_coverage(COVERAGE_THRESHOLD);
    table.sort_by_cloud_cover();
    assert_eq!(
        table.ids(),
        vec!["20200409_074501_1003", "20200402_074122_1035"]
    );
}

#[test]
fn test_scene_table_exports() {
    let dir = tempfile::tempdir().unwrap();
    let page = parse_page(PAGE).unwrap();
    let mut table = SceneTable::from_scenes(&aoi(), page.scenes);
    table.retain_coverage(COVERAGE_THRESHOLD);

    let csv_path = dir.path().join("north_scenes.csv");
    let geojson_path = dir.path().join("north_scenes.geojson");
    table.to_csv(&csv_path).unwrap();
    table.to_geojson(&geojson_path).unwrap();

    assert_eq!(read_scene_ids(&csv_path).unwrap(), table.ids());

    let collection =
        cropscout::commons::basic_functions::read_feature_collection(&geojson_path).unwrap();
    assert_eq!(collection.features.len(), 2);
    assert!(collection
        .features
        .iter()
        .all(|f| f.property("overlap_pct").and_then(|v| v.as_f64()).unwrap() > 99.0));
}
