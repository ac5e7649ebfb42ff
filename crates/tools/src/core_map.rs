//! Core mapping operations: geocoding, reverse geocoding, POI search, place
//! details, and routing, backed by Nominatim, Overpass, and OSRM.
//!
//! Each tool is a thin async transform over a shared per-source [`Fetcher`],
//! so pacing applies per upstream source, not per tool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use atlas_fetch::{Fetcher, ServerParams};

use crate::geo::{haversine_meters, json_f64, round2, validate_coords};
use crate::registry::{ParamSpec, ParamType, ToolRegistry, ToolTrait};
use crate::Envelope;

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
pub const OSRM_URL: &str = "https://router.project-osrm.org";
pub const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

const POI_RESULT_LIMIT: usize = 20;
const ROUTE_STEP_LIMIT: usize = 10;

/// The core map tool set. Owns one fetcher (and thus one rate state) per
/// upstream source.
pub struct CoreMapServer {
    nominatim: Arc<Fetcher>,
    osrm: Arc<Fetcher>,
    overpass: Arc<Fetcher>,
}

impl CoreMapServer {
    pub fn new(rate_limit_delay: Duration) -> Self {
        Self::with_base_urls(rate_limit_delay, NOMINATIM_URL, OSRM_URL, OVERPASS_URL)
    }

    /// Build against alternate endpoints (self-hosted mirrors, tests).
    pub fn with_base_urls(
        rate_limit_delay: Duration,
        nominatim_url: &str,
        osrm_url: &str,
        overpass_url: &str,
    ) -> Self {
        Self {
            nominatim: Arc::new(Fetcher::new(ServerParams::new(
                "nominatim",
                "Geocoding, reverse geocoding, and place lookup",
                nominatim_url,
                rate_limit_delay,
            ))),
            osrm: Arc::new(Fetcher::new(ServerParams::new(
                "osrm",
                "Route computation between coordinates",
                osrm_url,
                rate_limit_delay,
            ))),
            overpass: Arc::new(Fetcher::new(ServerParams::new(
                "overpass",
                "Point-of-interest search around a coordinate",
                overpass_url,
                rate_limit_delay,
            ))),
        }
    }

    pub fn register(&self, registry: &mut ToolRegistry) {
        registry.register(GeocodeTool {
            fetcher: self.nominatim.clone(),
        });
        registry.register(ReverseGeocodeTool {
            fetcher: self.nominatim.clone(),
        });
        registry.register(SearchPoiTool {
            fetcher: self.overpass.clone(),
        });
        registry.register(PlaceDetailsTool {
            fetcher: self.nominatim.clone(),
        });
        registry.register(RouteTool {
            fetcher: self.osrm.clone(),
        });
    }

    pub fn nominatim(&self) -> &Arc<Fetcher> {
        &self.nominatim
    }

    pub fn osrm(&self) -> &Arc<Fetcher> {
        &self.osrm
    }

    pub fn overpass(&self) -> &Arc<Fetcher> {
        &self.overpass
    }
}

/// OSM tag keys and values are plain tokens like `amenity`, `fast_food`, or
/// `contact:phone`; anything else would need escaping inside Overpass QL.
fn is_osm_tag_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-'))
}

/// Free-text address or place name to coordinates.
pub struct GeocodeTool {
    fetcher: Arc<Fetcher>,
}

#[async_trait]
impl ToolTrait for GeocodeTool {
    fn name(&self) -> &'static str {
        "geocode"
    }

    fn description(&self) -> &'static str {
        "Convert an address or place name to geographic coordinates (latitude and longitude) with a normalized address."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::new(
            "query",
            ParamType::String,
            true,
            "The address or place name to geocode, e.g. 'Hamra Street, Beirut'",
        )];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return Envelope::fail("missing required parameter: query");
        };
        let query = query.trim();
        if query.is_empty() {
            return Envelope::fail("parameter 'query' must not be empty");
        }

        let response = self
            .fetcher
            .get_json(
                "/search",
                &[
                    ("q", query.to_string()),
                    ("format", "json".to_string()),
                    ("limit", "1".to_string()),
                    ("addressdetails", "1".to_string()),
                ],
            )
            .await;
        let data = match response {
            Ok(data) => data,
            Err(e) => return Envelope::fail(e.to_string()),
        };

        let Some(best) = data.as_array().and_then(|results| results.first()) else {
            return Envelope::fail(format!("no results found for '{query}'"));
        };

        let (Some(latitude), Some(longitude)) =
            (json_f64(&best["lat"]), json_f64(&best["lon"]))
        else {
            return Envelope::fail("nominatim: malformed geocoding result");
        };
        let display_name = best["display_name"].as_str().unwrap_or("");

        Envelope::ok(json!({
            "latitude": latitude,
            "longitude": longitude,
            "display_name": display_name,
            "address": best.get("address").cloned().unwrap_or_else(|| json!({})),
            "normalized_address": display_name,
        }))
    }
}

/// Coordinates to nearest human-readable address.
pub struct ReverseGeocodeTool {
    fetcher: Arc<Fetcher>,
}

#[async_trait]
impl ToolTrait for ReverseGeocodeTool {
    fn name(&self) -> &'static str {
        "reverse_geocode"
    }

    fn description(&self) -> &'static str {
        "Convert geographic coordinates (latitude and longitude) to a human-readable address with neighborhood information."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::new("latitude", ParamType::Number, true, "Latitude coordinate"),
            ParamSpec::new("longitude", ParamType::Number, true, "Longitude coordinate"),
        ];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let (Some(latitude), Some(longitude)) = (
            args.get("latitude").and_then(Value::as_f64),
            args.get("longitude").and_then(Value::as_f64),
        ) else {
            return Envelope::fail("missing required parameter: latitude/longitude");
        };
        if let Err(message) = validate_coords(latitude, longitude) {
            return Envelope::fail(message);
        }

        let response = self
            .fetcher
            .get_json(
                "/reverse",
                &[
                    ("lat", latitude.to_string()),
                    ("lon", longitude.to_string()),
                    ("format", "json".to_string()),
                    ("addressdetails", "1".to_string()),
                ],
            )
            .await;
        let data = match response {
            Ok(data) => data,
            Err(e) => return Envelope::fail(e.to_string()),
        };

        // Nominatim reports unresolvable coordinates inside a 200 response.
        if let Some(message) = data.get("error").and_then(Value::as_str) {
            return Envelope::fail(format!("reverse geocoding failed: {message}"));
        }

        let address = &data["address"];
        let pick = |keys: &[&str]| -> String {
            keys.iter()
                .find_map(|k| address.get(*k).and_then(Value::as_str))
                .unwrap_or("")
                .to_string()
        };

        Envelope::ok(json!({
            "display_name": data["display_name"].as_str().unwrap_or(""),
            "address": {
                "road": pick(&["road"]),
                "neighbourhood": pick(&["neighbourhood", "suburb"]),
                "city": pick(&["city", "town", "village"]),
                "state": pick(&["state"]),
                "country": pick(&["country"]),
                "postcode": pick(&["postcode"]),
            },
            "latitude": latitude,
            "longitude": longitude,
        }))
    }
}

/// Points of interest around a coordinate, via Overpass QL.
pub struct SearchPoiTool {
    fetcher: Arc<Fetcher>,
}

#[async_trait]
impl ToolTrait for SearchPoiTool {
    fn name(&self) -> &'static str {
        "search_poi"
    }

    fn description(&self) -> &'static str {
        "Find points of interest near a location within a radius in meters. Returns name, category, distance, and coordinates for each match."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::new("latitude", ParamType::Number, true, "Center point latitude"),
            ParamSpec::new("longitude", ParamType::Number, true, "Center point longitude"),
            ParamSpec::new(
                "radius",
                ParamType::Number,
                false,
                "Search radius in meters (default 1000)",
            ),
            ParamSpec::new(
                "category",
                ParamType::String,
                false,
                "OpenStreetMap tag key to search, e.g. 'amenity', 'shop', 'tourism' (default 'amenity')",
            ),
            ParamSpec::new(
                "key",
                ParamType::String,
                false,
                "OpenStreetMap tag value for the chosen category, e.g. 'cafe', 'supermarket'. Omit to match every tagged point type.",
            ),
        ];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let (Some(latitude), Some(longitude)) = (
            args.get("latitude").and_then(Value::as_f64),
            args.get("longitude").and_then(Value::as_f64),
        ) else {
            return Envelope::fail("missing required parameter: latitude/longitude");
        };
        if let Err(message) = validate_coords(latitude, longitude) {
            return Envelope::fail(message);
        }

        let radius = args.get("radius").and_then(Value::as_f64).unwrap_or(1000.0);
        if radius <= 0.0 {
            return Envelope::fail(format!(
                "parameter 'radius' must be positive, got {radius}"
            ));
        }
        let radius = radius.round() as u64;
        let category = args
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or("amenity");
        let key = args.get("key").and_then(Value::as_str);

        // The values are interpolated into Overpass QL, so restrict them to
        // tag-token characters up front instead of letting the upstream
        // reject a malformed query.
        if !is_osm_tag_token(category) {
            return Envelope::fail(format!(
                "parameter 'category' must be an OpenStreetMap tag key, got '{category}'"
            ));
        }
        if let Some(key) = key {
            if !is_osm_tag_token(key) {
                return Envelope::fail(format!(
                    "parameter 'key' must be an OpenStreetMap tag value, got '{key}'"
                ));
            }
        }

        // Without a tag value, match anything carrying the tag key.
        let selector = match key {
            Some(key) => format!("[\"{category}\"=\"{key}\"]"),
            None => format!("[\"{category}\"]"),
        };
        let ql = format!(
            "[out:json];(node{selector}(around:{radius},{latitude},{longitude});\
             way{selector}(around:{radius},{latitude},{longitude}););out center;"
        );
        debug!(%ql, "overpass query");

        let response = self.fetcher.post_form_json("", &[("data", ql)]).await;
        let data = match response {
            Ok(data) => data,
            Err(e) => return Envelope::fail(e.to_string()),
        };

        let elements = data["elements"].as_array().cloned().unwrap_or_default();
        let mut pois: Vec<Value> = elements
            .iter()
            .take(POI_RESULT_LIMIT)
            .map(|element| {
                let tags = &element["tags"];
                // Ways carry their coordinate under "center".
                let poi_lat = json_f64(&element["lat"])
                    .or_else(|| json_f64(&element["center"]["lat"]))
                    .unwrap_or(0.0);
                let poi_lon = json_f64(&element["lon"])
                    .or_else(|| json_f64(&element["center"]["lon"]))
                    .unwrap_or(0.0);
                let distance =
                    round2(haversine_meters(latitude, longitude, poi_lat, poi_lon));

                json!({
                    "id": element["id"],
                    "name": tags["name"].as_str().unwrap_or("Unnamed"),
                    "category": category,
                    "key": tags[category],
                    "type": element["type"],
                    "distance_meters": distance,
                    "latitude": poi_lat,
                    "longitude": poi_lon,
                })
            })
            .collect();

        pois.sort_by(|a, b| {
            let da = a["distance_meters"].as_f64().unwrap_or(f64::MAX);
            let db = b["distance_meters"].as_f64().unwrap_or(f64::MAX);
            da.total_cmp(&db)
        });

        Envelope::ok(json!({
            "count": pois.len(),
            "pois": pois,
        }))
    }
}

/// Expand an opaque OSM place id into full details.
pub struct PlaceDetailsTool {
    fetcher: Arc<Fetcher>,
}

#[async_trait]
impl ToolTrait for PlaceDetailsTool {
    fn name(&self) -> &'static str {
        "get_place_details"
    }

    fn description(&self) -> &'static str {
        "Get detailed information about a place from its OpenStreetMap id (e.g. 'N123456' for a node, 'W123456' for a way): full address, coordinates, contact info, and opening hours where available."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::new(
            "place_id",
            ParamType::String,
            true,
            "OpenStreetMap place id, prefixed N (node), W (way), or R (relation)",
        )];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let Some(place_id) = args.get("place_id").and_then(Value::as_str) else {
            return Envelope::fail("missing required parameter: place_id");
        };
        let place_id = place_id.trim();
        if place_id.is_empty() {
            return Envelope::fail("parameter 'place_id' must not be empty");
        }

        // Bare numeric ids default to nodes.
        let mut chars = place_id.chars();
        let osm_ids = match chars.next() {
            Some('N' | 'W' | 'R') if !chars.as_str().is_empty() => place_id.to_string(),
            _ => format!("N{place_id}"),
        };

        let response = self
            .fetcher
            .get_json(
                "/lookup",
                &[
                    ("osm_ids", osm_ids),
                    ("format", "json".to_string()),
                    ("addressdetails", "1".to_string()),
                    ("extratags", "1".to_string()),
                ],
            )
            .await;
        let data = match response {
            Ok(data) => data,
            Err(e) => return Envelope::fail(e.to_string()),
        };

        let Some(place) = data.as_array().and_then(|results| results.first()) else {
            return Envelope::fail(format!("place not found: {place_id}"));
        };

        let (Some(latitude), Some(longitude)) =
            (json_f64(&place["lat"]), json_f64(&place["lon"]))
        else {
            return Envelope::fail("nominatim: malformed place lookup result");
        };
        let display_name = place["display_name"].as_str().unwrap_or("");
        let extratags = &place["extratags"];
        let tag = |keys: &[&str]| -> String {
            keys.iter()
                .find_map(|k| extratags.get(*k).and_then(Value::as_str))
                .unwrap_or("")
                .to_string()
        };

        Envelope::ok(json!({
            "place_id": place_id,
            "name": display_name.split(',').next().unwrap_or(""),
            "full_address": display_name,
            "latitude": latitude,
            "longitude": longitude,
            "address": place.get("address").cloned().unwrap_or_else(|| json!({})),
            "category": place["class"].as_str().unwrap_or(""),
            "type": place["type"].as_str().unwrap_or(""),
            "phone": tag(&["phone", "contact:phone"]),
            "website": tag(&["website", "contact:website"]),
            "opening_hours": tag(&["opening_hours"]),
            "extratags": if extratags.is_object() { extratags.clone() } else { json!({}) },
        }))
    }
}

/// Route between two coordinates via OSRM.
pub struct RouteTool {
    fetcher: Arc<Fetcher>,
}

impl RouteTool {
    fn profile(mode: &str) -> Option<&'static str> {
        match mode {
            "driving" => Some("car"),
            "walking" => Some("foot"),
            "cycling" => Some("bike"),
            _ => None,
        }
    }
}

#[async_trait]
impl ToolTrait for RouteTool {
    fn name(&self) -> &'static str {
        "get_route"
    }

    fn description(&self) -> &'static str {
        "Calculate a route between two geographic coordinates. Returns distance, duration, turn-by-turn steps, the path geometry, and a summary."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::new("origin_lat", ParamType::Number, true, "Origin latitude"),
            ParamSpec::new("origin_lon", ParamType::Number, true, "Origin longitude"),
            ParamSpec::new("dest_lat", ParamType::Number, true, "Destination latitude"),
            ParamSpec::new("dest_lon", ParamType::Number, true, "Destination longitude"),
            ParamSpec::new(
                "mode",
                ParamType::String,
                false,
                "Transportation mode: driving, walking, or cycling (default driving)",
            )
            .one_of(&["driving", "walking", "cycling"]),
        ];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let coords = [
            ("origin_lat", args.get("origin_lat").and_then(Value::as_f64)),
            ("origin_lon", args.get("origin_lon").and_then(Value::as_f64)),
            ("dest_lat", args.get("dest_lat").and_then(Value::as_f64)),
            ("dest_lon", args.get("dest_lon").and_then(Value::as_f64)),
        ];
        for (field, value) in &coords {
            if value.is_none() {
                return Envelope::fail(format!("missing required parameter: {field}"));
            }
        }
        let (origin_lat, origin_lon, dest_lat, dest_lon) = (
            coords[0].1.unwrap_or_default(),
            coords[1].1.unwrap_or_default(),
            coords[2].1.unwrap_or_default(),
            coords[3].1.unwrap_or_default(),
        );
        if let Err(message) = validate_coords(origin_lat, origin_lon) {
            return Envelope::fail(format!("origin: {message}"));
        }
        if let Err(message) = validate_coords(dest_lat, dest_lon) {
            return Envelope::fail(format!("destination: {message}"));
        }

        let mode = args.get("mode").and_then(Value::as_str).unwrap_or("driving");
        let Some(profile) = Self::profile(mode) else {
            return Envelope::fail(format!(
                "parameter 'mode' must be one of [driving, walking, cycling], got '{mode}'"
            ));
        };

        let path = format!(
            "/route/v1/{profile}/{origin_lon},{origin_lat};{dest_lon},{dest_lat}"
        );
        let response = self
            .fetcher
            .get_json(
                &path,
                &[
                    ("overview", "full".to_string()),
                    ("steps", "true".to_string()),
                    ("geometries", "geojson".to_string()),
                ],
            )
            .await;
        let data = match response {
            Ok(data) => data,
            Err(e) => return Envelope::fail(e.to_string()),
        };

        if data["code"].as_str() != Some("Ok") {
            let message = data["message"].as_str().unwrap_or("unknown error");
            return Envelope::fail(format!("routing failed: {message}"));
        }
        let Some(route) = data["routes"].get(0) else {
            return Envelope::fail("routing failed: no route returned");
        };

        let distance = route["distance"].as_f64().unwrap_or(0.0);
        let duration = route["duration"].as_f64().unwrap_or(0.0);

        let steps: Vec<Value> = route["legs"][0]["steps"]
            .as_array()
            .map(|steps| {
                steps
                    .iter()
                    .take(ROUTE_STEP_LIMIT)
                    .map(|step| {
                        json!({
                            "instruction": step["maneuver"]["instruction"]
                                .as_str()
                                .unwrap_or("Continue"),
                            "distance_meters": round2(step["distance"].as_f64().unwrap_or(0.0)),
                            "duration_seconds": round2(step["duration"].as_f64().unwrap_or(0.0)),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Envelope::ok(json!({
            "mode": mode,
            "distance_meters": round2(distance),
            "distance_km": round2(distance / 1000.0),
            "duration_seconds": round2(duration),
            "duration_minutes": round2(duration / 60.0),
            "steps": steps,
            "geometry": route.get("geometry").cloned().unwrap_or(Value::Null),
            "summary": format!(
                "{:.1} km, approximately {:.0} minutes by {mode}",
                distance / 1000.0,
                duration / 60.0
            ),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_server() -> CoreMapServer {
        CoreMapServer::with_base_urls(
            Duration::from_millis(0),
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
        )
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn empty_geocode_query_makes_no_network_call() {
        let server = offline_server();
        let tool = GeocodeTool {
            fetcher: server.nominatim().clone(),
        };

        let envelope = tool.call(&args(json!({"query": "   "}))).await;
        assert!(!envelope.is_success());
        assert_eq!(server.nominatim().attempts(), 0);
    }

    #[tokio::test]
    async fn invalid_route_mode_makes_no_network_call() {
        let server = offline_server();
        let tool = RouteTool {
            fetcher: server.osrm().clone(),
        };

        let envelope = tool
            .call(&args(json!({
                "origin_lat": 40.758, "origin_lon": -73.985,
                "dest_lat": 40.785, "dest_lon": -73.968,
                "mode": "teleport"
            })))
            .await;
        let error = envelope.error().unwrap();
        assert!(error.contains("mode"), "{error}");
        assert!(error.contains("teleport"), "{error}");
        assert_eq!(server.osrm().attempts(), 0);
    }

    #[tokio::test]
    async fn out_of_range_coordinates_fail_before_fetch() {
        let server = offline_server();
        let tool = ReverseGeocodeTool {
            fetcher: server.nominatim().clone(),
        };

        let envelope = tool
            .call(&args(json!({"latitude": 95.0, "longitude": 10.0})))
            .await;
        assert!(envelope.error().unwrap().contains("latitude"));
        assert_eq!(server.nominatim().attempts(), 0);
    }

    #[tokio::test]
    async fn non_positive_radius_is_rejected() {
        let server = offline_server();
        let tool = SearchPoiTool {
            fetcher: server.overpass().clone(),
        };

        let envelope = tool
            .call(&args(json!({
                "latitude": 33.9, "longitude": 35.5, "radius": -5
            })))
            .await;
        assert!(envelope.error().unwrap().contains("radius"));
        assert_eq!(server.overpass().attempts(), 0);
    }

    #[tokio::test]
    async fn quoted_tag_values_are_rejected_before_fetch() {
        let server = offline_server();
        let tool = SearchPoiTool {
            fetcher: server.overpass().clone(),
        };

        let envelope = tool
            .call(&args(json!({
                "latitude": 33.9, "longitude": 35.5,
                "category": "amenity\"];node[\"x"
            })))
            .await;
        assert!(envelope.error().unwrap().contains("category"));
        assert_eq!(server.overpass().attempts(), 0);

        let envelope = tool
            .call(&args(json!({
                "latitude": 33.9, "longitude": 35.5, "key": "ca\"fe"
            })))
            .await;
        assert!(envelope.error().unwrap().contains("key"));
        assert_eq!(server.overpass().attempts(), 0);
    }

    #[test]
    fn osm_tag_tokens() {
        assert!(is_osm_tag_token("amenity"));
        assert!(is_osm_tag_token("fast_food"));
        assert!(is_osm_tag_token("contact:phone"));
        assert!(is_osm_tag_token("drive-through"));
        assert!(!is_osm_tag_token(""));
        assert!(!is_osm_tag_token("a\"b"));
        assert!(!is_osm_tag_token("a b"));
    }

    #[test]
    fn mode_profile_mapping() {
        assert_eq!(RouteTool::profile("driving"), Some("car"));
        assert_eq!(RouteTool::profile("walking"), Some("foot"));
        assert_eq!(RouteTool::profile("cycling"), Some("bike"));
        assert_eq!(RouteTool::profile("teleport"), None);
    }

    #[test]
    fn registration_covers_all_five_operations() {
        let mut registry = ToolRegistry::new();
        offline_server().register(&mut registry);
        assert_eq!(
            registry.names(),
            vec![
                "geocode",
                "reverse_geocode",
                "search_poi",
                "get_place_details",
                "get_route"
            ]
        );
    }
}
