//! Rectangular geographic exclusion zones.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A latitude/longitude rectangle with inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExclusionZone {
    /// Southern edge.
    pub min_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl ExclusionZone {
    /// A zone spanning two opposite corners, in either order.
    #[must_use]
    pub fn new(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Self {
        Self {
            min_lat: lat1.min(lat2),
            min_lon: lon1.min(lon2),
            max_lat: lat1.max(lat2),
            max_lon: lon1.max(lon2),
        }
    }

    /// Whether the point lies inside or on the edge of the zone.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// Whether any zone contains the point.
#[must_use]
pub fn in_any(zones: &[ExclusionZone], lat: f64, lon: f64) -> bool {
    zones.iter().any(|zone| zone.contains(lat, lon))
}

impl FromStr for ExclusionZone {
    type Err = Error;

    /// Parse `LAT1,LON1,LAT2,LON2`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(Error::invalid_zone(
                s,
                format!("expected 4 comma-separated values, got {}", parts.len()),
            ));
        }

        let mut coords = [0.0_f64; 4];
        for (slot, part) in coords.iter_mut().zip(&parts) {
            *slot = part
                .parse::<f64>()
                .map_err(|_| Error::invalid_zone(s, format!("'{part}' is not a number")))?;
            if !slot.is_finite() {
                return Err(Error::invalid_zone(s, format!("'{part}' is not finite")));
            }
        }

        let [lat1, lon1, lat2, lon2] = coords;
        for lat in [lat1, lat2] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(Error::invalid_zone(s, format!("latitude {lat} out of range")));
            }
        }
        for lon in [lon1, lon2] {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(Error::invalid_zone(s, format!("longitude {lon} out of range")));
            }
        }

        Ok(Self::new(lat1, lon1, lat2, lon2))
    }
}

impl fmt::Display for ExclusionZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}
