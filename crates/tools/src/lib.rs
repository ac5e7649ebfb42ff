//! Domain tool sets for the map agent: geocoding and routing, travel-history
//! analytics, and weather/environment data.
//!
//! Every operation returns an [`Envelope`] so callers (and the model on the
//! other end of the provider) see one uniform success/failure shape. Tools are
//! collected in a [`ToolRegistry`], which validates arguments against each
//! tool's declared parameters before dispatching.

pub mod core_map;
pub mod envelope;
pub mod history;
pub mod registry;
pub mod weather;

mod dates;
mod geo;

use std::time::Duration;

pub use envelope::Envelope;
pub use registry::{ParamSpec, ParamType, ToolRegistry, ToolTrait};

use core_map::CoreMapServer;
use history::{HistoryServer, TripLog};
use weather::WeatherServer;

/// Build a registry with the full tool surface: five map operations, three
/// history analytics, and three weather/environment operations.
pub fn default_registry(rate_limit_delay: Duration, log: TripLog) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    CoreMapServer::new(rate_limit_delay).register(&mut registry);
    HistoryServer::new(log).register(&mut registry);
    WeatherServer::new(rate_limit_delay).register(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_exposes_every_operation() {
        let registry = default_registry(Duration::from_secs(1), TripLog::from_trips(vec![]));
        assert_eq!(registry.len(), 11);
        for name in [
            "geocode",
            "reverse_geocode",
            "search_poi",
            "get_place_details",
            "get_route",
            "get_frequent_places",
            "summarize_travel_stats",
            "get_typical_route",
            "get_current_weather",
            "get_air_quality",
            "get_astronomy_data",
        ] {
            assert!(registry.has(name), "missing {name}");
        }
    }
}
