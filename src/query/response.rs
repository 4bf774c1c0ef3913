//! Decoding of instant query responses
//!
//! ```json
//! {"status": "success", "data": {"resultType": "vector", "result": [
//!     {"metric": {"__name__": "up", "job": "node"}, "value": [1700000000.123, "1"]}
//! ]}}
//! ```
//!
//! A `scalar` result is a bare `[timestamp, "value"]` pair and becomes a
//! single sample without labels.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{Labels, Sample, Vector};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed response body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response carries no data")]
    MissingData,

    #[error("unsupported result type {0:?}")]
    UnsupportedResultType(String),

    #[error("expected a [timestamp, value] pair, got {0}")]
    InvalidPoint(Value),

    #[error("invalid timestamp {0}")]
    InvalidTimestamp(Value),

    #[error("invalid sample value {0}")]
    InvalidValue(Value),
}

/// Response envelope shared by every API endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub status: String,

    #[serde(default)]
    pub data: Option<QueryData>,

    #[serde(default, rename = "errorType")]
    pub error_type: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: Value,
}

/// Decode the `result` of a successful instant query.
pub fn decode_instant_response(result_type: &str, result: &Value) -> Result<Vector, DecodeError> {
    match result_type {
        "vector" => {
            let samples: Vec<VectorSample> = serde_json::from_value(result.clone())?;
            samples
                .into_iter()
                .map(|sample| {
                    let (timestamp, value) = parse_point(&sample.value)?;
                    Ok(Sample {
                        metric: Labels::from_pairs(sample.metric),
                        timestamp,
                        value,
                    })
                })
                .collect()
        }
        "scalar" => {
            let (timestamp, value) = parse_point(result)?;
            Ok(vec![Sample {
                metric: Labels::default(),
                timestamp,
                value,
            }])
        }
        other => Err(DecodeError::UnsupportedResultType(other.to_string())),
    }
}

fn parse_point(point: &Value) -> Result<(DateTime<Utc>, f64), DecodeError> {
    let [timestamp, value] = point.as_array().map(Vec::as_slice).unwrap_or_default() else {
        return Err(DecodeError::InvalidPoint(point.clone()));
    };
    Ok((parse_timestamp(timestamp)?, parse_value(value)?))
}

/// Seconds since the epoch, as a JSON number or a string
fn parse_timestamp(raw: &Value) -> Result<DateTime<Utc>, DecodeError> {
    let seconds = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| DecodeError::InvalidTimestamp(raw.clone()))?;

    let millis = (seconds * 1000.0).round() as i64;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| DecodeError::InvalidTimestamp(raw.clone()))
}

fn parse_value(raw: &Value) -> Result<f64, DecodeError> {
    match raw {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
    .ok_or_else(|| DecodeError::InvalidValue(raw.clone()))
}
