//! Built-in station directory for the major US cities carried on
//! Polymarket's weather markets. Extends `DEFAULT_STATIONS`-style city/
//! lat/lon tables into full `Station` records with region groupings and
//! NWS resolution URLs.

use crate::domain::Station;
use chrono_tz::Tz;

struct StationSeed {
    code: &'static str,
    display_name: &'static str,
    city: &'static str,
    region: &'static str,
    timezone: Tz,
    latitude: f64,
    longitude: f64,
}

const SEEDS: &[StationSeed] = &[
    StationSeed {
        code: "KNYC",
        display_name: "New York City",
        city: "new york",
        region: "northeast",
        timezone: chrono_tz::America::New_York,
        latitude: 40.7128,
        longitude: -74.0060,
    },
    StationSeed {
        code: "KLAX",
        display_name: "Los Angeles",
        city: "los angeles",
        region: "west",
        timezone: chrono_tz::America::Los_Angeles,
        latitude: 33.9425,
        longitude: -118.2551,
    },
    StationSeed {
        code: "KORD",
        display_name: "Chicago",
        city: "chicago",
        region: "midwest",
        timezone: chrono_tz::America::Chicago,
        latitude: 41.8781,
        longitude: -87.6298,
    },
    StationSeed {
        code: "KMIA",
        display_name: "Miami",
        city: "miami",
        region: "southeast",
        timezone: chrono_tz::America::New_York,
        latitude: 25.7617,
        longitude: -80.1918,
    },
    StationSeed {
        code: "KIAH",
        display_name: "Houston",
        city: "houston",
        region: "texas",
        timezone: chrono_tz::America::Chicago,
        latitude: 29.7604,
        longitude: -95.3698,
    },
    StationSeed {
        code: "KPHL",
        display_name: "Philadelphia",
        city: "philadelphia",
        region: "northeast",
        timezone: chrono_tz::America::New_York,
        latitude: 39.9526,
        longitude: -75.1652,
    },
    StationSeed {
        code: "KDCA",
        display_name: "Washington",
        city: "washington",
        region: "northeast",
        timezone: chrono_tz::America::New_York,
        latitude: 38.9072,
        longitude: -77.0369,
    },
    StationSeed {
        code: "KDEN",
        display_name: "Denver",
        city: "denver",
        region: "mountain",
        timezone: chrono_tz::America::Denver,
        latitude: 39.7392,
        longitude: -104.9903,
    },
];

/// The built-in station directory. Each station's `resolution_source_url`
/// points at the NWS forecast page used as the human-auditable source of
/// truth for market resolution.
pub fn default_stations() -> Vec<Station> {
    SEEDS
        .iter()
        .map(|seed| Station {
            code: seed.code.to_string(),
            display_name: seed.display_name.to_string(),
            city: seed.city.to_string(),
            region: seed.region.to_string(),
            timezone: seed.timezone,
            latitude: seed.latitude,
            longitude: seed.longitude,
            resolution_source_url: format!("https://forecast.weather.gov/MapClick.php?lat={}&lon={}", seed.latitude, seed.longitude),
        })
        .collect()
}
