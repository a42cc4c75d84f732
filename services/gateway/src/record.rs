//! Parsing of decoded sensor records.
//!
//! A frame decodes to a comma-separated ASCII record:
//! `species,ppb,temperature,phenomenonTime,serial`. Fields are split
//! without trimming; arity and numeric fields are validated here so a
//! short or corrupt record never reaches the conversion step.

use crate::convert::GasSpecies;
use thiserror::Error;

/// Number of fields a usable record must carry.
const MIN_FIELDS: usize = 5;

/// Errors that can occur while parsing a record.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("record has {found} fields, expected at least {MIN_FIELDS}")]
    TooFewFields { found: usize },

    #[error("field {field} is not a valid integer: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

/// One parsed sensor record.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub species: GasSpecies,
    pub ppb: i32,
    pub temperature: i32,
    pub phenomenon_time: String,
    pub serial: String,
}

impl SensorRecord {
    /// Parse the decoded frame text into a typed record.
    pub fn parse(text: &str) -> Result<Self, RecordError> {
        let fields: Vec<&str> = text.split(',').collect();
        if fields.len() < MIN_FIELDS {
            return Err(RecordError::TooFewFields {
                found: fields.len(),
            });
        }

        let ppb = fields[1]
            .parse::<i32>()
            .map_err(|_| RecordError::InvalidNumber {
                field: "ppb",
                value: fields[1].to_string(),
            })?;
        let temperature = fields[2]
            .parse::<i32>()
            .map_err(|_| RecordError::InvalidNumber {
                field: "temperature",
                value: fields[2].to_string(),
            })?;

        Ok(Self {
            species: GasSpecies::from_tag(fields[0]),
            ppb,
            temperature,
            phenomenon_time: fields[3].to_string(),
            serial: fields[4].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_record() {
        let record = SensorRecord::parse("O3,40,20,2024-01-01T00:00:00,SN123").unwrap();
        assert_eq!(record.species, GasSpecies::Ozone);
        assert_eq!(record.ppb, 40);
        assert_eq!(record.temperature, 20);
        assert_eq!(record.phenomenon_time, "2024-01-01T00:00:00");
        assert_eq!(record.serial, "SN123");
    }

    #[test]
    fn test_parse_negative_temperature() {
        let record = SensorRecord::parse("NO2,12,-7,t,SN9").unwrap();
        assert_eq!(record.temperature, -7);
    }

    #[test]
    fn test_unknown_species_is_accepted() {
        let record = SensorRecord::parse("XYZ,1,2,t,s").unwrap();
        assert_eq!(record.species, GasSpecies::Unknown);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let record = SensorRecord::parse("CO,5,10,t,SN1,padding,more").unwrap();
        assert_eq!(record.serial, "SN1");
    }

    #[test]
    fn test_too_few_fields() {
        assert_eq!(
            SensorRecord::parse("O3,40,20,t"),
            Err(RecordError::TooFewFields { found: 4 })
        );
        assert_eq!(
            SensorRecord::parse(""),
            Err(RecordError::TooFewFields { found: 1 })
        );
    }

    #[test]
    fn test_non_numeric_ppb() {
        assert_eq!(
            SensorRecord::parse("O3,forty,20,t,s"),
            Err(RecordError::InvalidNumber {
                field: "ppb",
                value: "forty".to_string()
            })
        );
    }

    #[test]
    fn test_fields_are_not_trimmed() {
        // a stray space makes the numeric field invalid, matching the
        // no-trimming contract
        assert!(SensorRecord::parse("O3, 40,20,t,s").is_err());
    }
}
