//! # Compass bearing classification

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use util::maths::wrap_deg_360;

use super::OrientEstError;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Sixteen point compass labels, clockwise from north.
pub const BEARINGS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE",
    "S", "SSW", "SW", "WSW", "W", "WNW", "NW", "NNW",
];

/// Width of one bearing bin in degrees
const BIN_WIDTH_DEG: f64 = 22.5;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Heading {
    /// Heading in degrees, [0, 360)
    pub degrees: f64,

    /// Compass point label of the heading
    pub bearing: &'static str,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compute the heading from the horizontal magnetometer components.
///
/// Fails if both components are exactly zero as the heading is undefined.
pub fn heading(mag_x: f64, mag_y: f64) -> Result<Heading, OrientEstError> {
    if mag_x == 0.0 && mag_y == 0.0 {
        return Err(OrientEstError::InvalidSample)
    }

    let degrees = wrap_deg_360(mag_x.atan2(mag_y).to_degrees());

    Ok(Heading {
        degrees,
        bearing: bearing(degrees),
    })
}

/// Classify a heading in degrees into one of the sixteen compass points.
///
/// Each bin covers `[centre - 11.25, centre + 11.25)`, so `N` covers `[348.75, 11.25)`.
pub fn bearing(degrees: f64) -> &'static str {
    let degrees = wrap_deg_360(degrees);
    let index = ((degrees + BIN_WIDTH_DEG / 2.0) / BIN_WIDTH_DEG).floor() as usize;

    BEARINGS[index % BEARINGS.len()]
}
