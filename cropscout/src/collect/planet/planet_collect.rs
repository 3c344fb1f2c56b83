use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use geo::Polygon;
use reqwest::blocking::{Client, Request};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

#[cfg(feature = "indicatif")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::collect::global_variables::PAGE_SIZE;
use crate::commons::basic_functions::{to_geo_geometry, to_geojson_geometry};
use crate::config::SearchSettings;
use crate::error::CropScoutError;
use crate::geometric::scene::Scene;

#[cfg(feature = "indicatif")]
fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// One page of a search response
#[derive(Debug)]
pub struct SearchPage {
    pub scenes: Vec<Scene>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlanetPage {
    #[serde(default)]
    features: Vec<PlanetItem>,
    #[serde(rename = "_links", default)]
    links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    #[serde(rename = "_next")]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlanetItem {
    id: String,
    geometry: geojson::Geometry,
    #[serde(default)]
    properties: ItemProperties,
    #[serde(rename = "_links", default)]
    links: ItemLinks,
}

#[derive(Debug, Default, Deserialize)]
struct ItemProperties {
    acquired: Option<String>,
    cloud_cover: Option<f64>,
    item_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemLinks {
    thumbnail: Option<String>,
}

/// Client for the Planet Data API quick search.
///
/// A search is one POST followed by GETs on `_links._next` until the
/// result cap is reached. Failures are not retried.
pub struct PlanetCollect {
    client: Client,
    api_key: String,
    pub base_url: String,
    pub item_types: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Fraction in [0, 1]
    pub max_cloud_cover: f64,
    pub max_results: usize,
}

impl PlanetCollect {
    pub fn new(api_key: String, settings: &SearchSettings) -> Result<Self> {
        settings.validate()?;
        let client = Client::builder()
            .user_agent(concat!("cropscout/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(PlanetCollect {
            client,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            item_types: settings.item_types.clone(),
            start: settings.start(),
            end: settings.end()?,
            max_cloud_cover: settings.max_cloud_cover,
            max_results: settings.max_results,
        })
    }

    /// Read the API key from the environment variable named in the settings
    pub fn from_env(settings: &SearchSettings) -> Result<Self> {
        let api_key = read_api_key(&settings.api_key_env)?;
        Self::new(api_key, settings)
    }

    /// AndFilter of geometry intersection, acquisition date range and cloud cover ceiling
    pub fn build_filter(&self, aoi: &Polygon<f64>) -> Result<Value> {
        let geometry = to_geojson_geometry(&geo::Geometry::Polygon(aoi.clone()));
        let geometry =
            serde_json::to_value(&geometry).context("Failed to serialise AOI geometry")?;

        Ok(json!({
            "type": "AndFilter",
            "config": [
                {
                    "type": "GeometryFilter",
                    "field_name": "geometry",
                    "config": geometry,
                },
                {
                    "type": "DateRangeFilter",
                    "field_name": "acquired",
                    "config": {
                        "gte": self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                        "lte": self.end.to_rfc3339_opts(SecondsFormat::Secs, true),
                    },
                },
                {
                    "type": "RangeFilter",
                    "field_name": "cloud_cover",
                    "config": { "lte": self.max_cloud_cover },
                },
            ],
        }))
    }

    pub fn build_request(&self, aoi: &Polygon<f64>) -> Result<Value> {
        Ok(json!({
            "item_types": self.item_types,
            "filter": self.build_filter(aoi)?,
        }))
    }

    /// The first quick-search call: POST of the filter with page size and basic auth
    pub fn search_request(&self, aoi: &Polygon<f64>) -> Result<Request> {
        let url = format!("{}/quick-search", self.base_url);
        let body = self.build_request(aoi)?;
        debug!(%url, request = %body, "quick search");

        self.client
            .post(&url)
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[("_page_size", PAGE_SIZE.min(self.max_results.max(1)))])
            .json(&body)
            .build()
            .with_context(|| format!("Failed to build search request for {}", url))
    }

    /// Follow-up GET on a `_next` link
    pub fn page_request(&self, url: &str) -> Result<Request> {
        self.client
            .get(url)
            .basic_auth(&self.api_key, Option::<&str>::None)
            .build()
            .with_context(|| format!("Failed to build page request for {}", url))
    }

    /// Run the search for `aoi` and return at most `max_results` scenes, overlap not yet computed
    pub fn search(&self, aoi: &Polygon<f64>) -> Result<Vec<Scene>> {
        let first = self.execute(self.search_request(aoi)?)?;

        #[cfg(feature = "indicatif")]
        let pb = {
            let pb = ProgressBar::new(self.max_results as u64);
            pb.set_style(progress_style());
            pb.set_message("Scenes");
            pb.set_position(first.scenes.len() as u64);
            pb
        };

        let scenes = collect_pages(first, self.max_results, |next_url| {
            debug!(url = %next_url, "fetching next page");
            let page = self.execute(self.page_request(next_url)?)?;
            #[cfg(feature = "indicatif")]
            pb.inc(page.scenes.len() as u64);
            Ok(page)
        })?;

        #[cfg(feature = "indicatif")]
        pb.finish_with_message("Search complete");

        info!(count = scenes.len(), "scenes returned by search");
        Ok(scenes)
    }

    fn execute(&self, request: Request) -> Result<SearchPage> {
        let url = request.url().to_string();
        let response = self
            .client
            .execute(request)
            .with_context(|| format!("Search request to {} failed", url))?;
        let status = response.status();
        let body = response
            .text()
            .with_context(|| format!("Failed to read response body from {}", url))?;
        parse_page(&check_status(status, body, &url)?)
    }
}

/// API key from `var`, rejecting unset and blank values
pub fn read_api_key(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(CropScoutError::MissingCredential(var.to_string()).into()),
    }
}

/// Body of a successful response; any non-2xx status aborts the search
pub fn check_status(status: StatusCode, body: String, url: &str) -> Result<String> {
    if !status.is_success() {
        anyhow::bail!("Search API returned error {} for {}: {}", status, url, body);
    }
    Ok(body)
}

/// Parse a quick-search response body into scenes and the next page link
pub fn parse_page(body: &str) -> Result<SearchPage> {
    let page: PlanetPage =
        serde_json::from_str(body).context("Failed to parse search response JSON")?;

    let mut scenes = Vec::with_capacity(page.features.len());
    for item in page.features {
        let footprint = to_geo_geometry(&item.geometry)
            .with_context(|| format!("Invalid footprint for scene {}", item.id))?;

        let acquired = match item.properties.acquired.as_deref() {
            Some(text) => match DateTime::parse_from_rfc3339(text) {
                Ok(date) => Some(date.with_timezone(&Utc)),
                Err(e) => {
                    warn!(scene = %item.id, "unparseable acquired date '{}': {}", text, e);
                    None
                }
            },
            None => None,
        };

        scenes.push(Scene {
            id: item.id,
            item_type: item.properties.item_type.unwrap_or_default(),
            footprint,
            cloud_cover: item.properties.cloud_cover,
            acquired,
            thumbnail: item.links.thumbnail,
            overlap_pct: 0.0,
        });
    }

    Ok(SearchPage {
        scenes,
        next: page.links.next,
    })
}

/// Follow `next` links until there are none or `cap` scenes are collected
pub fn collect_pages<F>(first: SearchPage, cap: usize, mut fetch_next: F) -> Result<Vec<Scene>>
where
    F: FnMut(&str) -> Result<SearchPage>,
{
    let mut scenes = first.scenes;
    let mut next = first.next;

    while scenes.len() < cap {
        let Some(url) = next.take() else {
            break;
        };
        let page = fetch_next(&url)?;
        if page.scenes.is_empty() {
            break;
        }
        scenes.extend(page.scenes);
        next = page.next;
    }

    scenes.truncate(cap);
    Ok(scenes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::BoundingBox;
    use chrono::NaiveDate;
    use reqwest::header::AUTHORIZATION;
    use reqwest::Method;

    fn settings() -> SearchSettings {
        SearchSettings {
            start_date: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2020, 6, 30).unwrap(),
            max_cloud_cover: 0.05,
            ..SearchSettings::default()
        }
    }

    fn page_json(ids: &[&str], next: Option<&str>) -> String {
        let features: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "type": "Feature",
                    "id": id,
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                    },
                    "properties": {
                        "acquired": "2020-04-02T07:41:22.123456Z",
                        "cloud_cover": 0.02,
                        "item_type": "PSScene"
                    },
                    "_links": {
                        "thumbnail": format!("https://tiles.example.com/{}/thumb", id)
                    }
                })
            })
            .collect();
        json!({
            "type": "FeatureCollection",
            "features": features,
            "_links": { "_next": next }
        })
        .to_string()
    }

    #[test]
    fn test_filter_has_three_conditions() {
        let collect = PlanetCollect::new("key".to_string(), &settings()).unwrap();
        let aoi = BoundingBox::new(36.5, -1.2, 36.6, -1.1).to_polygon();
        let filter = collect.build_filter(&aoi).unwrap();

        assert_eq!(filter["type"], "AndFilter");
        let config = filter["config"].as_array().unwrap();
        assert_eq!(config.len(), 3);
        assert_eq!(config[0]["type"], "GeometryFilter");
        assert_eq!(config[0]["config"]["type"], "Polygon");
        assert_eq!(config[1]["type"], "DateRangeFilter");
        assert_eq!(config[1]["config"]["gte"], "2020-03-01T00:00:00Z");
        assert_eq!(config[1]["config"]["lte"], "2020-06-30T23:59:59Z");
        assert_eq!(config[2]["type"], "RangeFilter");
        assert_eq!(config[2]["field_name"], "cloud_cover");
        assert_eq!(config[2]["config"]["lte"], 0.05);
    }

    #[test]
    fn test_request_lists_item_types() {
        let collect = PlanetCollect::new("key".to_string(), &settings()).unwrap();
        let aoi = BoundingBox::new(0.0, 0.0, 1.0, 1.0).to_polygon();
        let request = collect.build_request(&aoi).unwrap();
        assert_eq!(request["item_types"], json!(["PSScene"]));
        assert!(request["filter"].is_object());
    }

    #[test]
    fn test_parse_page() {
        let page = parse_page(&page_json(&["a", "b"], Some("https://next"))).unwrap();
        assert_eq!(page.scenes.len(), 2);
        assert_eq!(page.next.as_deref(), Some("https://next"));

        let scene = &page.scenes[0];
        assert_eq!(scene.id, "a");
        assert_eq!(scene.item_type, "PSScene");
        assert_eq!(scene.cloud_cover, Some(0.02));
        assert_eq!(
            scene.acquired.unwrap().date_naive(),
            NaiveDate::from_ymd_opt(2020, 4, 2).unwrap()
        );
        assert_eq!(
            scene.thumbnail.as_deref(),
            Some("https://tiles.example.com/a/thumb")
        );
    }

    #[test]
    fn test_parse_last_page() {
        let page = parse_page(&page_json(&["a"], None)).unwrap();
        assert!(page.next.is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_page("<html>bad gateway</html>").is_err());
    }

    #[test]
    fn test_pagination_follows_next_links() {
        let first = parse_page(&page_json(&["a", "b"], Some("p2"))).unwrap();
        let mut requested = Vec::new();
        let scenes = collect_pages(first, 100, |url| {
            requested.push(url.to_string());
            match url {
                "p2" => parse_page(&page_json(&["c", "d"], Some("p3"))),
                _ => parse_page(&page_json(&["e"], None)),
            }
        })
        .unwrap();

        assert_eq!(requested, vec!["p2", "p3"]);
        let ids: Vec<&str> = scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_pagination_stops_at_cap() {
        let first = parse_page(&page_json(&["a", "b"], Some("p2"))).unwrap();
        let mut calls = 0;
        let scenes = collect_pages(first, 3, |_| {
            calls += 1;
            parse_page(&page_json(&["c", "d"], Some("p3")))
        })
        .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(scenes.len(), 3);
    }

    #[test]
    fn test_pagination_propagates_errors() {
        let first = parse_page(&page_json(&["a"], Some("p2"))).unwrap();
        let result = collect_pages(first, 10, |_| anyhow::bail!("connection reset"));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_credential() {
        let err = read_api_key("CROPSCOUT_TEST_UNSET_KEY").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CropScoutError>(),
            Some(CropScoutError::MissingCredential(_))
        ));
    }

    #[test]
    fn test_search_request_is_authenticated_post() {
        let collect = PlanetCollect::new("key".to_string(), &settings()).unwrap();
        let aoi = BoundingBox::new(36.5, -1.2, 36.6, -1.1).to_polygon();
        let request = collect.search_request(&aoi).unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://api.planet.com/data/v1/quick-search?_page_size=250"
        );
        // base64("key:")
        assert_eq!(request.headers()[AUTHORIZATION], "Basic a2V5Og==");

        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let body: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(body, collect.build_request(&aoi).unwrap());
    }

    #[test]
    fn test_page_size_follows_small_cap() {
        let settings = SearchSettings {
            max_results: 10,
            ..settings()
        };
        let collect = PlanetCollect::new("key".to_string(), &settings).unwrap();
        let aoi = BoundingBox::new(0.0, 0.0, 1.0, 1.0).to_polygon();
        let request = collect.search_request(&aoi).unwrap();
        assert_eq!(request.url().query(), Some("_page_size=10"));
    }

    #[test]
    fn test_page_request_keeps_credentials() {
        let collect = PlanetCollect::new("key".to_string(), &settings()).unwrap();
        let request = collect
            .page_request("https://api.planet.com/data/v1/searches/abc/results?_page=2")
            .unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.headers()[AUTHORIZATION], "Basic a2V5Og==");
    }

    #[test]
    fn test_check_status() {
        let url = "https://api.planet.com/data/v1/quick-search";
        assert_eq!(
            check_status(StatusCode::OK, "{}".to_string(), url).unwrap(),
            "{}"
        );

        let err = check_status(StatusCode::UNAUTHORIZED, "invalid api key".to_string(), url)
            .unwrap_err()
            .to_string();
        assert!(err.contains("401"));
        assert!(err.contains("invalid api key"));

        assert!(check_status(StatusCode::SERVICE_UNAVAILABLE, String::new(), url).is_err());
    }

    #[test]
    fn test_search_aborts_on_network_failure() {
        // nothing listens on port 1
        let settings = SearchSettings {
            base_url: "http://127.0.0.1:1".to_string(),
            ..settings()
        };
        let collect = PlanetCollect::new("key".to_string(), &settings).unwrap();
        let aoi = BoundingBox::new(0.0, 0.0, 1.0, 1.0).to_polygon();

        let err = collect.search(&aoi).unwrap_err();
        assert!(format!("{:#}", err).contains("Search request to http://127.0.0.1:1/quick-search"));
    }
}
