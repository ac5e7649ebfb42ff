//! Weather, air quality, and astronomy operations backed by Open-Meteo.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};

use atlas_fetch::{Fetcher, ServerParams};

use crate::dates::parse_date;
use crate::geo::{round2, validate_coords};
use crate::registry::{ParamSpec, ParamType, ToolRegistry, ToolTrait};
use crate::Envelope;

pub const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const AIR_QUALITY_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

const FORECAST_HOURS: usize = 24;

/// The weather/environment tool set. Forecast and air quality are distinct
/// upstream hosts, so each gets its own fetcher and rate state.
pub struct WeatherServer {
    forecast: Arc<Fetcher>,
    air_quality: Arc<Fetcher>,
}

impl WeatherServer {
    pub fn new(rate_limit_delay: Duration) -> Self {
        Self::with_base_urls(rate_limit_delay, FORECAST_URL, AIR_QUALITY_URL)
    }

    pub fn with_base_urls(
        rate_limit_delay: Duration,
        forecast_url: &str,
        air_quality_url: &str,
    ) -> Self {
        Self {
            forecast: Arc::new(Fetcher::new(ServerParams::new(
                "open-meteo",
                "Current weather, forecasts, and astronomy data",
                forecast_url,
                rate_limit_delay,
            ))),
            air_quality: Arc::new(Fetcher::new(ServerParams::new(
                "open-meteo-air-quality",
                "Air quality index and pollutant concentrations",
                air_quality_url,
                rate_limit_delay,
            ))),
        }
    }

    pub fn register(&self, registry: &mut ToolRegistry) {
        registry.register(CurrentWeatherTool {
            fetcher: self.forecast.clone(),
        });
        registry.register(AirQualityTool {
            fetcher: self.air_quality.clone(),
        });
        registry.register(AstronomyTool {
            fetcher: self.forecast.clone(),
        });
    }

    pub fn forecast(&self) -> &Arc<Fetcher> {
        &self.forecast
    }

    pub fn air_quality(&self) -> &Arc<Fetcher> {
        &self.air_quality
    }
}

/// WMO weather interpretation code to human text.
fn weather_description(code: u64) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Foggy",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        71 => "Slight snow",
        73 => "Moderate snow",
        75 => "Heavy snow",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown",
    }
}

struct AqiBand {
    category: &'static str,
    health_impact: &'static str,
    recommendation: &'static str,
}

/// US AQI band. Thresholds are the fixed EPA breakpoints, not configurable.
fn aqi_band(aqi: i64) -> AqiBand {
    match aqi {
        i64::MIN..=50 => AqiBand {
            category: "Good",
            health_impact: "Air quality is satisfactory",
            recommendation: "Enjoy outdoor activities",
        },
        51..=100 => AqiBand {
            category: "Moderate",
            health_impact: "Acceptable for most people",
            recommendation: "Sensitive individuals should limit prolonged outdoor exertion",
        },
        101..=150 => AqiBand {
            category: "Unhealthy for Sensitive Groups",
            health_impact: "May cause breathing issues for sensitive groups",
            recommendation:
                "Children, elderly, and people with respiratory conditions should reduce outdoor activities",
        },
        151..=200 => AqiBand {
            category: "Unhealthy",
            health_impact: "Everyone may experience health effects",
            recommendation: "Avoid prolonged outdoor activities",
        },
        201..=300 => AqiBand {
            category: "Very Unhealthy",
            health_impact: "Health alert: everyone may experience serious effects",
            recommendation: "Stay indoors and keep windows closed",
        },
        _ => AqiBand {
            category: "Hazardous",
            health_impact: "Emergency conditions",
            recommendation: "Everyone should avoid all outdoor activities",
        },
    }
}

struct MoonPhase {
    name: &'static str,
    emoji: &'static str,
    illumination_percent: i64,
}

/// Synodic approximation from the reference new moon of 2000-01-06 18:14 UTC.
fn moon_phase(date: NaiveDate) -> MoonPhase {
    const LUNAR_CYCLE_DAYS: f64 = 29.53;
    // Seconds from the reference new moon to this date's midnight. Both
    // timestamps are constant-valid; the fallbacks are never taken.
    let reference = NaiveDate::from_ymd_opt(2000, 1, 6)
        .and_then(|d| d.and_hms_opt(18, 14, 0))
        .unwrap_or_default();
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    let days_since = (midnight - reference).num_seconds() as f64 / 86_400.0;
    let position = (days_since.rem_euclid(LUNAR_CYCLE_DAYS)) / LUNAR_CYCLE_DAYS;
    let illumination_percent = (100.0 * (1.0 - (2.0 * position - 1.0).abs())).round() as i64;

    let (name, emoji) = if !(0.03..=0.97).contains(&position) {
        ("New Moon", "🌑")
    } else if position < 0.22 {
        ("Waxing Crescent", "🌒")
    } else if position < 0.28 {
        ("First Quarter", "🌓")
    } else if position < 0.47 {
        ("Waxing Gibbous", "🌔")
    } else if position < 0.53 {
        ("Full Moon", "🌕")
    } else if position < 0.72 {
        ("Waning Gibbous", "🌖")
    } else if position < 0.78 {
        ("Last Quarter", "🌗")
    } else {
        ("Waning Crescent", "🌘")
    };

    MoonPhase {
        name,
        emoji,
        illumination_percent,
    }
}

fn coord_args(args: &Map<String, Value>) -> Result<(f64, f64), Envelope> {
    let (Some(latitude), Some(longitude)) = (
        args.get("latitude").and_then(Value::as_f64),
        args.get("longitude").and_then(Value::as_f64),
    ) else {
        return Err(Envelope::fail(
            "missing required parameter: latitude/longitude",
        ));
    };
    validate_coords(latitude, longitude).map_err(Envelope::fail)?;
    Ok((latitude, longitude))
}

fn display_num(value: &Value) -> String {
    value
        .as_f64()
        .map(|n| format!("{n}"))
        .unwrap_or_else(|| "N/A".to_string())
}

/// Current conditions, optionally with a 24-hour outlook.
pub struct CurrentWeatherTool {
    fetcher: Arc<Fetcher>,
}

#[async_trait]
impl ToolTrait for CurrentWeatherTool {
    fn name(&self) -> &'static str {
        "get_current_weather"
    }

    fn description(&self) -> &'static str {
        "Get current weather conditions at a location: temperature, humidity, wind, and precipitation. Optionally includes a 24-hour forecast."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::new("latitude", ParamType::Number, true, "Latitude coordinate"),
            ParamSpec::new("longitude", ParamType::Number, true, "Longitude coordinate"),
            ParamSpec::new(
                "include_forecast",
                ParamType::Boolean,
                false,
                "Include a 24-hour forecast (default false)",
            ),
        ];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let (latitude, longitude) = match coord_args(args) {
            Ok(coords) => coords,
            Err(envelope) => return envelope,
        };
        let include_forecast = args
            .get("include_forecast")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut query = vec![
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            (
                "current",
                "temperature_2m,relative_humidity_2m,apparent_temperature,precipitation,\
                 weather_code,wind_speed_10m,wind_direction_10m"
                    .to_string(),
            ),
            ("temperature_unit", "fahrenheit".to_string()),
            ("wind_speed_unit", "mph".to_string()),
        ];
        if include_forecast {
            query.push((
                "hourly",
                "temperature_2m,precipitation_probability,weather_code".to_string(),
            ));
            query.push(("forecast_days", "1".to_string()));
        }

        let data = match self.fetcher.get_json("", &query).await {
            Ok(data) => data,
            Err(e) => return Envelope::fail(e.to_string()),
        };

        let current = &data["current"];
        let conditions =
            weather_description(current["weather_code"].as_u64().unwrap_or(0));
        let timestamp = current["time"]
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        let mut result = json!({
            "location": {"latitude": latitude, "longitude": longitude},
            "timestamp": timestamp,
            "current": {
                "temperature_f": current["temperature_2m"],
                "feels_like_f": current["apparent_temperature"],
                "humidity_percent": current["relative_humidity_2m"],
                "precipitation_mm": current["precipitation"],
                "wind_speed_mph": current["wind_speed_10m"],
                "wind_direction_degrees": current["wind_direction_10m"],
                "conditions": conditions,
            },
            "summary": format!(
                "{conditions}, {}°F (feels like {}°F)",
                display_num(&current["temperature_2m"]),
                display_num(&current["apparent_temperature"]),
            ),
        });

        if include_forecast {
            if let Some(times) = data["hourly"]["time"].as_array() {
                let hourly = &data["hourly"];
                let forecast: Vec<Value> = times
                    .iter()
                    .take(FORECAST_HOURS)
                    .enumerate()
                    .map(|(i, time)| {
                        json!({
                            "time": time,
                            "temperature_f": hourly["temperature_2m"][i],
                            "precipitation_probability": hourly["precipitation_probability"]
                                .get(i)
                                .cloned()
                                .unwrap_or(json!(0)),
                            "conditions": weather_description(
                                hourly["weather_code"][i].as_u64().unwrap_or(0)
                            ),
                        })
                    })
                    .collect();
                result["forecast_24h"] = json!(forecast);
            }
        }

        Envelope::ok(result)
    }
}

/// Air quality index, pollutant concentrations, and a health recommendation.
pub struct AirQualityTool {
    fetcher: Arc<Fetcher>,
}

#[async_trait]
impl ToolTrait for AirQualityTool {
    fn name(&self) -> &'static str {
        "get_air_quality"
    }

    fn description(&self) -> &'static str {
        "Get the air quality index (AQI) and pollutant levels at a location, with a health recommendation derived from the index."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::new("latitude", ParamType::Number, true, "Latitude coordinate"),
            ParamSpec::new("longitude", ParamType::Number, true, "Longitude coordinate"),
        ];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let (latitude, longitude) = match coord_args(args) {
            Ok(coords) => coords,
            Err(envelope) => return envelope,
        };

        let query = [
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            (
                "current",
                "pm10,pm2_5,carbon_monoxide,nitrogen_dioxide,ozone,us_aqi,european_aqi"
                    .to_string(),
            ),
        ];
        let data = match self.fetcher.get_json("", &query).await {
            Ok(data) => data,
            Err(e) => return Envelope::fail(e.to_string()),
        };

        let current = &data["current"];
        let us_aqi = current["us_aqi"].as_i64().unwrap_or(0);
        let band = aqi_band(us_aqi);
        let timestamp = current["time"]
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        Envelope::ok(json!({
            "location": {"latitude": latitude, "longitude": longitude},
            "timestamp": timestamp,
            "air_quality": {
                "us_aqi": us_aqi,
                "european_aqi": current["european_aqi"],
                "category": band.category,
                "health_impact": band.health_impact,
                "recommendation": band.recommendation,
            },
            "pollutants": {
                "pm2_5_ugm3": current["pm2_5"],
                "pm10_ugm3": current["pm10"],
                "carbon_monoxide_ugm3": current["carbon_monoxide"],
                "nitrogen_dioxide_ugm3": current["nitrogen_dioxide"],
                "ozone_ugm3": current["ozone"],
            },
            "summary": format!(
                "Air Quality: {} (AQI {us_aqi}) - {}",
                band.category, band.health_impact
            ),
        }))
    }
}

/// Sunrise, sunset, daylight hours, and moon phase for a date.
pub struct AstronomyTool {
    fetcher: Arc<Fetcher>,
}

#[async_trait]
impl ToolTrait for AstronomyTool {
    fn name(&self) -> &'static str {
        "get_astronomy_data"
    }

    fn description(&self) -> &'static str {
        "Get astronomy data for a location and date: sunrise, sunset, daylight hours, and moon phase."
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::new("latitude", ParamType::Number, true, "Latitude coordinate"),
            ParamSpec::new("longitude", ParamType::Number, true, "Longitude coordinate"),
            ParamSpec::new(
                "date",
                ParamType::String,
                false,
                "Date in YYYY-MM-DD format (default today)",
            ),
        ];
        PARAMS
    }

    async fn call(&self, args: &Map<String, Value>) -> Envelope {
        let (latitude, longitude) = match coord_args(args) {
            Ok(coords) => coords,
            Err(envelope) => return envelope,
        };
        let date = match args.get("date").and_then(Value::as_str) {
            Some(raw) => match parse_date("date", raw) {
                Ok(date) => date,
                Err(envelope) => return envelope,
            },
            None => Utc::now().date_naive(),
        };
        let date_str = date.to_string();

        let query = [
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            (
                "daily",
                "sunrise,sunset,daylight_duration,sunshine_duration".to_string(),
            ),
            ("timezone", "auto".to_string()),
            ("start_date", date_str.clone()),
            ("end_date", date_str.clone()),
        ];
        // A date outside the source's supported range comes back as a non-2xx
        // and surfaces as a fetch failure naming the source.
        let data = match self.fetcher.get_json("", &query).await {
            Ok(data) => data,
            Err(e) => return Envelope::fail(e.to_string()),
        };

        let daily = &data["daily"];
        let Some(sunrise) = daily["sunrise"][0].as_str() else {
            return Envelope::fail(format!("astronomy data unavailable for {date_str}"));
        };
        let sunset = daily["sunset"][0].as_str().unwrap_or("N/A");
        let daylight_hours =
            round2(daily["daylight_duration"][0].as_f64().unwrap_or(0.0) / 3600.0);
        let sunshine_hours =
            round2(daily["sunshine_duration"][0].as_f64().unwrap_or(0.0) / 3600.0);

        let moon = moon_phase(date);

        Envelope::ok(json!({
            "location": {"latitude": latitude, "longitude": longitude},
            "date": date_str,
            "sun": {
                "sunrise": sunrise,
                "sunset": sunset,
                "daylight_hours": daylight_hours,
                "sunshine_hours": sunshine_hours,
            },
            "moon": {
                "phase": moon.name,
                "illumination_percent": moon.illumination_percent,
                "emoji": moon.emoji,
            },
            "summary": format!(
                "Sunrise: {sunrise}, Sunset: {sunset} ({daylight_hours}h daylight). Moon: {} {}",
                moon.emoji, moon.name
            ),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_server() -> WeatherServer {
        WeatherServer::with_base_urls(
            Duration::from_millis(0),
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

    #[test]
    fn weather_codes_map_to_text() {
        assert_eq!(weather_description(0), "Clear sky");
        assert_eq!(weather_description(63), "Moderate rain");
        assert_eq!(weather_description(95), "Thunderstorm");
        assert_eq!(weather_description(42), "Unknown");
    }

    #[test]
    fn aqi_bands_use_fixed_thresholds() {
        assert_eq!(aqi_band(0).category, "Good");
        assert_eq!(aqi_band(50).category, "Good");
        assert_eq!(aqi_band(51).category, "Moderate");
        assert_eq!(aqi_band(150).category, "Unhealthy for Sensitive Groups");
        assert_eq!(aqi_band(200).category, "Unhealthy");
        assert_eq!(aqi_band(300).category, "Very Unhealthy");
        assert_eq!(aqi_band(301).category, "Hazardous");
    }

    #[test]
    fn moon_phase_matches_known_dates() {
        // 2000-01-21 was a full moon; 2000-02-05 a new moon.
        let full = moon_phase(NaiveDate::from_ymd_opt(2000, 1, 21).unwrap());
        assert_eq!(full.name, "Full Moon");
        assert!(full.illumination_percent > 90);

        let new = moon_phase(NaiveDate::from_ymd_opt(2000, 2, 5).unwrap());
        assert_eq!(new.name, "New Moon");
        assert!(new.illumination_percent < 10);
    }

    #[test]
    fn moon_phase_handles_dates_before_reference() {
        // Must not panic or go negative for dates before 2000.
        let phase = moon_phase(NaiveDate::from_ymd_opt(1999, 12, 1).unwrap());
        assert!((0..=100).contains(&phase.illumination_percent));
    }

    #[tokio::test]
    async fn bad_coordinates_fail_without_fetch() {
        let server = offline_server();
        let tool = CurrentWeatherTool {
            fetcher: server.forecast().clone(),
        };
        let envelope = tool
            .call(&args(json!({"latitude": 12.0, "longitude": 200.0})))
            .await;
        assert!(envelope.error().unwrap().contains("longitude"));
        assert_eq!(server.forecast().attempts(), 0);
    }

    #[tokio::test]
    async fn malformed_astronomy_date_fails_without_fetch() {
        let server = offline_server();
        let tool = AstronomyTool {
            fetcher: server.forecast().clone(),
        };
        let envelope = tool
            .call(&args(json!({
                "latitude": 33.9, "longitude": 35.5, "date": "today"
            })))
            .await;
        assert!(envelope.error().unwrap().contains("date"));
        assert_eq!(server.forecast().attempts(), 0);
    }

    #[test]
    fn registration_covers_all_three_operations() {
        let mut registry = ToolRegistry::new();
        offline_server().register(&mut registry);
        assert_eq!(
            registry.names(),
            vec!["get_current_weather", "get_air_quality", "get_astronomy_data"]
        );
    }
}
