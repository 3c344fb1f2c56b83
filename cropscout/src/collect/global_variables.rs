pub const TEMP_PATH: &str = "./temp";

/// Environment variable holding the imagery API key.
pub const API_KEY_ENV: &str = "PL_API_KEY";

pub const PLANET_DATA_URL: &str = "https://api.planet.com/data/v1";

/// WGS84 lon/lat, expected by the search API and by web maps.
pub const TARGET_EPSG: i32 = 4326;

pub const DEFAULT_CLASS_FIELD: &str = "class";

/// Ground-truth class codes kept as agricultural land.
pub const AGRICULTURAL_CLASSES: [i64; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

pub const DEFAULT_ITEM_TYPE: &str = "PSScene";

pub const DEFAULT_ASSET_TYPES: [&str; 2] = ["ortho_analytic_4b", "ortho_analytic_4b_xml"];

/// Cloud cover ceiling as a fraction in [0, 1].
pub const DEFAULT_MAX_CLOUD_COVER: f64 = 0.1;

/// Scenes must cover strictly more than this share of the AOI (percent).
pub const COVERAGE_THRESHOLD: f64 = 99.0;

/// Hard cap on the number of scenes collected across all pages.
pub const MAX_SEARCH_RESULTS: usize = 250;

pub const PAGE_SIZE: usize = 250;

pub const DOWNLOAD_PROGRAM: &str = "planet";

/// Output file stems an AOI name may not take or end with.
pub const RESERVED_AOI_NAMES: [&str; 2] = ["ground_truth", "map_preview"];
pub const RESERVED_AOI_SUFFIXES: [&str; 2] = ["_ground_truth", "_scenes"];
