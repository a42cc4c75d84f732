//! Unit conversion for raw gas readings.
//!
//! Sensor boards report gas concentrations in parts per billion together
//! with the ambient temperature. Downstream consumers expect micrograms
//! per cubic meter, so readings are rescaled here using the molar mass of
//! the measured species before they enter a batch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during unit conversion.
#[derive(Debug, Error, PartialEq)]
pub enum ConvertError {
    #[error("temperature {temp_celsius}°C is at or below absolute zero")]
    BelowAbsoluteZero { temp_celsius: i32 },
}

/// Gas species recognized by the attached sensor boards.
///
/// Tags not in the known set map to [`GasSpecies::Unknown`], whose molar
/// mass of zero makes the converted value degenerate to `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasSpecies {
    Ozone,
    SulfurDioxide,
    NitrogenDioxide,
    CarbonMonoxide,
    HydrogenSulfide,
    Unknown,
}

impl GasSpecies {
    /// Parse the species tag as transmitted by the sensor board.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "O3" => GasSpecies::Ozone,
            "SO2" => GasSpecies::SulfurDioxide,
            "NO2" => GasSpecies::NitrogenDioxide,
            "CO" => GasSpecies::CarbonMonoxide,
            "H2S" => GasSpecies::HydrogenSulfide,
            _ => GasSpecies::Unknown,
        }
    }

    /// The wire tag for this species.
    pub fn as_str(&self) -> &'static str {
        match self {
            GasSpecies::Ozone => "O3",
            GasSpecies::SulfurDioxide => "SO2",
            GasSpecies::NitrogenDioxide => "NO2",
            GasSpecies::CarbonMonoxide => "CO",
            GasSpecies::HydrogenSulfide => "H2S",
            GasSpecies::Unknown => "unknown",
        }
    }

    /// Molar mass in g/mol.
    pub fn molar_mass(&self) -> f64 {
        match self {
            GasSpecies::Ozone => 47.998,
            GasSpecies::SulfurDioxide => 64.06,
            GasSpecies::NitrogenDioxide => 46.0055,
            GasSpecies::CarbonMonoxide => 28.011,
            GasSpecies::HydrogenSulfide => 34.076,
            GasSpecies::Unknown => 0.0,
        }
    }
}

impl std::fmt::Display for GasSpecies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert a reading from parts per billion to micrograms per cubic meter.
///
/// Pure and deterministic; the result is intentionally unrounded so callers
/// decide how much precision to keep (see [`round2`]).
///
/// Temperatures at or below absolute zero would put zero or a negative
/// value in the denominator and are rejected as a domain error instead of
/// propagating infinity or NaN into an aggregate.
pub fn ppb_to_micrograms(
    species: GasSpecies,
    ppb: i32,
    temp_celsius: i32,
) -> Result<f64, ConvertError> {
    let kelvin = 273.15 + f64::from(temp_celsius);
    if kelvin <= 0.0 {
        return Err(ConvertError::BelowAbsoluteZero { temp_celsius });
    }

    Ok((f64::from(ppb) * 12.187 * species.molar_mass()) / kelvin)
}

/// Round a converted value to two decimal places.
///
/// Kept outside [`ppb_to_micrograms`] so the conversion itself stays exact.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
