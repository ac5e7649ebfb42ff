//! Travel-history analytics over the preloaded trip dataset.
//!
//! These tools never touch the network: the dataset is loaded once at
//! startup and held immutable. "No trips in range" is a legitimate empty
//! aggregate for the statistics summary, but a failure for the typical-route
//! lookup, which asks about one specific pair.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::info;

use crate::dates::parse_date_arg;
use crate::geo::round2;
use crate::registry::{ParamSpec, ParamType, ToolRegistry, ToolTrait};
use crate::Envelope;

const TOP_ROUTE_LIMIT: usize = 5;

/// Errors loading the trip dataset.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("failed to read trip dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse trip dataset {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A labeled endpoint of a trip.
#[derive(Debug, Clone, Deserialize)]
pub struct TripPlace {
    pub label: String,
    pub lat: f64,
    pub lon: f64,
}

/// One historical trip record.
#[derive(Debug, Clone, Deserialize)]
pub struct Trip {
    pub date: NaiveDate,
    pub hour: u8,
    pub origin: TripPlace,
    pub destination: TripPlace,
    pub mode: String,
    pub distance_km: f64,
    pub duration_minutes: f64,
}

/// The immutable, preloaded trip dataset.
#[derive(Debug)]
pub struct TripLog {
    trips: Vec<Trip>,
}

impl TripLog {
    /// Load the dataset from a JSON file once at startup.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        let display_path = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| HistoryError::Io {
            path: display_path.clone(),
            source,
        })?;
        let trips: Vec<Trip> =
            serde_json::from_str(&content).map_err(|source| HistoryError::Parse {
                path: display_path.clone(),
                source,
            })?;
        info!(path = %display_path, trips = trips.len(), "trip history loaded");
        Ok(Self { trips })
    }

    pub fn from_trips(trips: Vec<Trip>) -> Self {
        Self { trips }
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    fn in_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<&Trip> {
        self.trips
            .iter()
            .filter(|trip| start.map_or(true, |s| trip.date >= s))
            .filter(|trip| end.map_or(true, |e| trip.date <= e))
            .collect()
    }
}

/// The history tool set, sharing one read-only trip log.
pub struct HistoryServer {
    log: Arc<TripLog>,
}

impl HistoryServer {
    pub fn new(log: TripLog) -> Self {
        Self { log: Arc::new(log) }
    }

    pub fn register(&self, registry: &mut ToolRegistry) {
        registry.register(FrequentPlacesTool {
            log: self.log.clone(),
        });
        registry.register(TravelStatsTool {
            log: self.log.clone(),
        });
        registry.register(TypicalRouteTool {
            log: self.log.clone(),
        });
    }
}

fn window_value(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    matched: &[&Trip],
) -> Value {
    // Report the effective window: explicit bounds, or the span of the
    // matched trips when a bound was left open.
    let effective_start = start.or_else(|| matched.iter().map(|t| t.date).min());
    let effective_end = end.or_else(|| matched.iter().map(|t| t.date).max());
    json!({
        "start_date": effective_start.map(|d| d.to_string()),
        "end_date": effective_end.map(|d| d.to_string()),
    })
}

/// Frequently visited places within a date range.
pub struct FrequentPlacesTool {
    log: Arc<TripLog>,
}

#[async_trait]
impl ToolTrait for FrequentPlacesTool {
    fn name(&self) -> &'static str {
        "get_frequent_places"
    }

    fn description(&self) -> &'static str {
        "Retrieve frequently visited places from historical trip data within a time window. Returns user-set place labels with visit counts, most visited first."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::new(
                "start_date",
                ParamType::String,
                false,
                "Start date in YYYY-MM-DD format (inclusive)",
            ),
            ParamSpec::new(
                "end_date",
                ParamType::String,
                false,
                "End date in YYYY-MM-DD format (inclusive)",
            ),
            ParamSpec::new(
                "min_visits",
                ParamType::Number,
                false,
                "Minimum number of visits to include a place (default 3)",
            ),
        ];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let start = match parse_date_arg(args, "start_date") {
            Ok(date) => date,
            Err(envelope) => return envelope,
        };
        let end = match parse_date_arg(args, "end_date") {
            Ok(date) => date,
            Err(envelope) => return envelope,
        };
        let min_visits = args
            .get("min_visits")
            .and_then(Value::as_f64)
            .unwrap_or(3.0);
        if min_visits < 0.0 {
            return Envelope::fail(format!(
                "parameter 'min_visits' must be non-negative, got {min_visits}"
            ));
        }

        let matched = self.log.in_range(start, end);

        struct Visits {
            count: u64,
            lat: f64,
            lon: f64,
        }
        // BTreeMap keeps labels sorted, which settles count ties by label.
        let mut visits: BTreeMap<&str, Visits> = BTreeMap::new();
        for trip in &matched {
            for place in [&trip.origin, &trip.destination] {
                let entry = visits.entry(place.label.as_str()).or_insert(Visits {
                    count: 0,
                    lat: place.lat,
                    lon: place.lon,
                });
                entry.count += 1;
            }
        }

        let mut places: Vec<(&str, Visits)> = visits
            .into_iter()
            .filter(|(_, v)| v.count as f64 >= min_visits)
            .collect();
        // Stable sort: equal counts stay in label order.
        places.sort_by(|a, b| b.1.count.cmp(&a.1.count));

        let places: Vec<Value> = places
            .into_iter()
            .map(|(label, v)| {
                json!({
                    "label": label,
                    "latitude": v.lat,
                    "longitude": v.lon,
                    "visit_count": v.count,
                })
            })
            .collect();

        Envelope::ok(json!({
            "time_window": window_value(start, end, &matched),
            "total_places": places.len(),
            "places": places,
        }))
    }
}

/// Aggregate travel statistics over a date range.
pub struct TravelStatsTool {
    log: Arc<TripLog>,
}

#[async_trait]
impl ToolTrait for TravelStatsTool {
    fn name(&self) -> &'static str {
        "summarize_travel_stats"
    }

    fn description(&self) -> &'static str {
        "Get aggregate travel statistics over a time window: total trips, distance, time, breakdown by transportation mode, and top routes. An empty window yields zero-valued aggregates."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::new(
                "start_date",
                ParamType::String,
                false,
                "Start date in YYYY-MM-DD format (inclusive)",
            ),
            ParamSpec::new(
                "end_date",
                ParamType::String,
                false,
                "End date in YYYY-MM-DD format (inclusive)",
            ),
        ];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let start = match parse_date_arg(args, "start_date") {
            Ok(date) => date,
            Err(envelope) => return envelope,
        };
        let end = match parse_date_arg(args, "end_date") {
            Ok(date) => date,
            Err(envelope) => return envelope,
        };

        let matched = self.log.in_range(start, end);

        // No data is a valid, not exceptional, outcome: zero aggregates.
        if matched.is_empty() {
            return Envelope::ok(json!({
                "time_window": window_value(start, end, &matched),
                "summary": {
                    "total_trips": 0,
                    "total_distance_km": 0.0,
                    "total_time_hours": 0.0,
                    "avg_trip_distance_km": 0.0,
                    "avg_trip_duration_minutes": 0.0,
                },
                "by_mode": {},
                "top_routes": [],
            }));
        }

        let total_trips = matched.len();
        let total_distance: f64 = matched.iter().map(|t| t.distance_km).sum();
        let total_minutes: f64 = matched.iter().map(|t| t.duration_minutes).sum();

        #[derive(Default)]
        struct ModeStats {
            trips: u64,
            distance_km: f64,
            time_minutes: f64,
        }
        let mut by_mode: BTreeMap<&str, ModeStats> = BTreeMap::new();
        for trip in &matched {
            let entry = by_mode.entry(trip.mode.as_str()).or_default();
            entry.trips += 1;
            entry.distance_km += trip.distance_km;
            entry.time_minutes += trip.duration_minutes;
        }
        let by_mode: Map<String, Value> = by_mode
            .into_iter()
            .map(|(mode, stats)| {
                (
                    mode.to_string(),
                    json!({
                        "trips": stats.trips,
                        "distance_km": round2(stats.distance_km),
                        "time_minutes": round2(stats.time_minutes),
                    }),
                )
            })
            .collect();

        let mut route_counts: BTreeMap<String, u64> = BTreeMap::new();
        for trip in &matched {
            let route = format!("{} → {}", trip.origin.label, trip.destination.label);
            *route_counts.entry(route).or_insert(0) += 1;
        }
        let mut top_routes: Vec<(String, u64)> = route_counts.into_iter().collect();
        top_routes.sort_by(|a, b| b.1.cmp(&a.1));
        let top_routes: Vec<Value> = top_routes
            .into_iter()
            .take(TOP_ROUTE_LIMIT)
            .map(|(route, count)| json!({"route": route, "trip_count": count}))
            .collect();

        Envelope::ok(json!({
            "time_window": window_value(start, end, &matched),
            "summary": {
                "total_trips": total_trips,
                "total_distance_km": round2(total_distance),
                "total_time_hours": round2(total_minutes / 60.0),
                "avg_trip_distance_km": round2(total_distance / total_trips as f64),
                "avg_trip_duration_minutes": round2(total_minutes / total_trips as f64),
            },
            "by_mode": by_mode,
            "top_routes": top_routes,
        }))
    }
}

/// Typical characteristics of trips between two labeled places.
pub struct TypicalRouteTool {
    log: Arc<TripLog>,
}

#[async_trait]
impl ToolTrait for TypicalRouteTool {
    fn name(&self) -> &'static str {
        "get_typical_route"
    }

    fn description(&self) -> &'static str {
        "Get typical route characteristics between two frequently visited places: median duration, average distance, most common transportation mode, and trip count."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::new(
                "origin_label",
                ParamType::String,
                true,
                "Origin place label, e.g. 'Home', 'Office'",
            ),
            ParamSpec::new(
                "destination_label",
                ParamType::String,
                true,
                "Destination place label",
            ),
            ParamSpec::new(
                "time_of_day",
                ParamType::Number,
                false,
                "Hour of day (0-23) to filter trips",
            ),
        ];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let Some(origin_label) = args.get("origin_label").and_then(Value::as_str) else {
            return Envelope::fail("missing required parameter: origin_label");
        };
        let Some(destination_label) = args.get("destination_label").and_then(Value::as_str)
        else {
            return Envelope::fail("missing required parameter: destination_label");
        };

        let hour = match args.get("time_of_day").and_then(Value::as_f64) {
            Some(raw) => {
                if raw.fract() != 0.0 || !(0.0..=23.0).contains(&raw) {
                    return Envelope::fail(format!(
                        "parameter 'time_of_day' must be an hour between 0 and 23, got {raw}"
                    ));
                }
                Some(raw as u8)
            }
            None => None,
        };

        let matched: Vec<&Trip> = self
            .log
            .trips
            .iter()
            .filter(|t| t.origin.label == origin_label)
            .filter(|t| t.destination.label == destination_label)
            .filter(|t| hour.map_or(true, |h| t.hour == h))
            .collect();

        if matched.is_empty() {
            return Envelope::fail(format!(
                "no trips found for route {origin_label} → {destination_label}"
            ));
        }

        let trip_count = matched.len();
        let avg_distance: f64 =
            matched.iter().map(|t| t.distance_km).sum::<f64>() / trip_count as f64;

        let mut durations: Vec<f64> = matched.iter().map(|t| t.duration_minutes).collect();
        durations.sort_by(f64::total_cmp);
        let median_duration = if trip_count % 2 == 1 {
            durations[trip_count / 2]
        } else {
            (durations[trip_count / 2 - 1] + durations[trip_count / 2]) / 2.0
        };

        let mut mode_counts: BTreeMap<&str, u64> = BTreeMap::new();
        for trip in &matched {
            *mode_counts.entry(trip.mode.as_str()).or_insert(0) += 1;
        }
        // Ties resolve to the alphabetically first mode.
        let mut most_common_mode = String::new();
        let mut best_count = 0u64;
        for (mode, count) in &mode_counts {
            if *count > best_count {
                best_count = *count;
                most_common_mode = mode.to_string();
            }
        }
        let mode_distribution: Map<String, Value> = mode_counts
            .into_iter()
            .map(|(mode, count)| (mode.to_string(), json!(count)))
            .collect();

        Envelope::ok(json!({
            "route": format!("{origin_label} → {destination_label}"),
            "time_of_day_filter": hour,
            "trip_count": trip_count,
            "average_distance_km": round2(avg_distance),
            "typical_duration_minutes": round2(median_duration),
            "most_common_mode": most_common_mode,
            "mode_distribution": mode_distribution,
        }))
    }
}
