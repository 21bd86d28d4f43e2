use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_GEOCODE_BASE: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_GEOCODE_TIMEOUT_SECS: u64 = 10;

// Attribute priority: city-level names first, then broader administrative
// names. The first non-empty value wins.
const CITY_ATTRIBUTES: &[&str] = &["city", "town", "village", "municipality", "hamlet", "locality"];
const AREA_ATTRIBUTES: &[&str] = &["county", "state_district", "region", "state"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionResult {
    Found(String),
    Undetermined,
    Error,
}

// Seam between the dialog and the HTTP client; tests substitute a stub so
// dialog flows run without the network.
pub trait RegionResolver: Send + Sync {
    fn resolve_region(&self, latitude: f64, longitude: f64) -> RegionResult;
}

impl RegionResolver for GeocodeClient {
    fn resolve_region(&self, latitude: f64, longitude: f64) -> RegionResult {
        GeocodeClient::resolve_region(self, latitude, longitude)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct GeocodeClient {
    base_url: String,
    language: String,
    user_agent: String,
    timeout: Duration,
}

impl GeocodeClient {
    pub fn new(base_url: &str, language: &str, user_agent: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            language: language.to_string(),
            user_agent: user_agent.to_string(),
            timeout,
        }
    }

    // Never fails hard: network faults, timeouts and malformed bodies all
    // collapse into `RegionResult::Error`, which the dialog resolves by
    // falling back to manual region entry.
    pub fn resolve_region(&self, latitude: f64, longitude: f64) -> RegionResult {
        match self.reverse_lookup(latitude, longitude) {
            Ok(response) => match region_from_address(&response.address) {
                Some(name) => RegionResult::Found(name),
                None => RegionResult::Undetermined,
            },
            Err(_) => RegionResult::Error,
        }
    }

    fn reverse_lookup(&self, latitude: f64, longitude: f64) -> Result<ReverseResponse, String> {
        let query = [
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("format", "json".to_string()),
            ("accept-language", self.language.clone()),
        ];
        let encoded = query
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}/reverse?{encoded}", self.base_url);

        let response = ureq::get(&url)
            .timeout(self.timeout)
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| e.to_string())?;

        response.into_json::<ReverseResponse>().map_err(|e| e.to_string())
    }
}

fn region_from_address(address: &BTreeMap<String, serde_json::Value>) -> Option<String> {
    CITY_ATTRIBUTES
        .iter()
        .chain(AREA_ATTRIBUTES.iter())
        .find_map(|key| {
            address
                .get(*key)
                .and_then(|value| value.as_str())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
}
