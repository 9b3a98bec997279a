//! Core record model for the Hainan Airlines route mirror.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub mod region;

pub use region::{classify, default_regions, RegionMap, RegionMapBuilder};

pub const CRATE_NAME: &str = "hnroutes-core";

/// `last_update` of a store that has never been written.
pub const NEVER_UPDATED: &str = "never updated";
/// `last_update` of a store whose file could not be decoded.
pub const DATA_CORRUPTED: &str = "data corrupted";
/// Source freshness when no upstream URL carries a date token.
pub const UNKNOWN_SOURCE_DATE: &str = "unknown";
/// Region assigned to cities the region table does not know.
pub const OTHER_REGION: &str = "other";

pub const LAST_UPDATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identity of a route across sources and runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlightKey {
    pub flight_number: String,
    pub departure_city: String,
    pub arrival_city: String,
}

/// One table row as published upstream, before region classification.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedRow {
    pub flight_number: String,
    pub departure_city: String,
    pub arrival_city: String,
    pub departure_time: String,
    pub schedule: String,
    pub product: String,
}

impl ExtractedRow {
    pub fn classify(self, regions: &RegionMap) -> FlightRecord {
        let departure_province = regions.classify(&self.departure_city).to_string();
        let arrival_province = regions.classify(&self.arrival_city).to_string();
        FlightRecord {
            flight_number: self.flight_number,
            departure_city: self.departure_city,
            arrival_city: self.arrival_city,
            departure_time: self.departure_time,
            schedule: self.schedule,
            product: self.product,
            departure_province,
            arrival_province,
        }
    }
}

/// Persisted route entry. Province fields are derived, never read from upstream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightRecord {
    pub flight_number: String,
    pub departure_city: String,
    pub arrival_city: String,
    pub departure_time: String,
    pub schedule: String,
    pub product: String,
    pub departure_province: String,
    pub arrival_province: String,
}

impl FlightRecord {
    pub fn key(&self) -> FlightKey {
        FlightKey {
            flight_number: self.flight_number.clone(),
            departure_city: self.departure_city.clone(),
            arrival_city: self.arrival_city.clone(),
        }
    }

    /// `/`-separated product codes, e.g. `"666/2666"` yields `666` and `2666`.
    pub fn product_tokens(&self) -> impl Iterator<Item = &str> {
        self.product.split('/').map(str::trim)
    }

    pub fn touches_province(&self, province: &str) -> bool {
        self.departure_province == province || self.arrival_province == province
    }

    /// Recompute both province fields against `regions`.
    pub fn reclassify(&mut self, regions: &RegionMap) {
        self.departure_province = regions.classify(&self.departure_city).to_string();
        self.arrival_province = regions.classify(&self.arrival_city).to_string();
    }
}

fn default_last_update() -> String {
    UNKNOWN_SOURCE_DATE.to_string()
}

/// The persisted unit: every known route plus when it was last fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    #[serde(default = "default_last_update")]
    pub last_update: String,
    #[serde(default)]
    pub total_flights: usize,
    #[serde(default)]
    pub flights: Vec<FlightRecord>,
}

impl RecordSet {
    pub fn empty(last_update: impl Into<String>) -> Self {
        Self {
            last_update: last_update.into(),
            total_flights: 0,
            flights: Vec::new(),
        }
    }

    pub fn never_updated() -> Self {
        Self::empty(NEVER_UPDATED)
    }

    pub fn corrupted() -> Self {
        Self::empty(DATA_CORRUPTED)
    }

    /// Build a set whose count matches `flights`, keeping `last_update` as given.
    pub fn with_last_update(flights: Vec<FlightRecord>, last_update: impl Into<String>) -> Self {
        Self {
            last_update: last_update.into(),
            total_flights: flights.len(),
            flights,
        }
    }

    pub fn stamped(flights: Vec<FlightRecord>, at: NaiveDateTime) -> Self {
        Self::with_last_update(flights, at.format(LAST_UPDATE_FORMAT).to_string())
    }

    /// True when `last_update` is one of the degraded-store sentinels.
    pub fn is_placeholder(&self) -> bool {
        matches!(self.last_update.as_str(), NEVER_UPDATED | DATA_CORRUPTED)
    }
}

impl Default for RecordSet {
    fn default() -> Self {
        Self::never_updated()
    }
}
