//! Outbound observation document assembly.
//!
//! Aggregated readings are published as an OGC SensorThings-style JSON
//! observation. The document is built fresh for every publish, serialized
//! once, and dropped.

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Format for the generation-time stamp on outbound documents.
const RESULT_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// A geographic position, defaulting to `(0.0, 0.0)` meaning "unset".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether a real fix has been received. The exact `(0.0, 0.0)`
    /// default is treated as unset.
    pub fn is_set(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }
}

/// The outbound observation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationDocument {
    #[serde(rename = "@iot.id")]
    pub iot_id: String,
    #[serde(rename = "@iot.selflink")]
    pub self_link: String,
    #[serde(rename = "FeatureOfInterest")]
    pub feature_of_interest: FeatureOfInterest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOfInterest {
    #[serde(rename = "iot.id")]
    pub iot_id: String,
    pub description: String,
    pub feature: Feature,
    #[serde(rename = "DataStream")]
    pub datastream: Datastream,
    #[serde(rename = "phenomenonTime")]
    pub phenomenon_time: String,
    #[serde(rename = "resultTime")]
    pub result_time: String,
    pub result: ObservationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[latitude, longitude]`
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datastream {
    #[serde(rename = "@iot.id")]
    pub iot_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationResult {
    #[serde(rename = "Value")]
    pub value: f64,
}

impl ObservationDocument {
    /// Assemble the outbound document for one aggregated value.
    ///
    /// `result_time` is stamped with the wall clock at invocation. No
    /// validation is performed on the coordinate or serial; building with
    /// an unset coordinate is legal and yields zero coordinates — the
    /// caller decides whether such a document should be published at all.
    pub fn build(
        mean_value: f64,
        coord: Coordinate,
        phenomenon_time: &str,
        serial: &str,
        base_url: &str,
        description: &str,
    ) -> Self {
        Self {
            iot_id: serial.to_string(),
            self_link: format!("{base_url}/Observations({serial})"),
            feature_of_interest: FeatureOfInterest {
                iot_id: serial.to_string(),
                description: description.to_string(),
                feature: Feature {
                    kind: "point".to_string(),
                    coordinates: [coord.latitude, coord.longitude],
                },
                datastream: Datastream {
                    iot_id: serial.to_string(),
                },
                phenomenon_time: phenomenon_time.to_string(),
                result_time: Local::now().format(RESULT_TIME_FORMAT).to_string(),
                result: ObservationResult { value: mean_value },
            },
        }
    }
}
