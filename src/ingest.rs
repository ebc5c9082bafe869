//! Validation of raw readings before they reach the batcher.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::types::Sample;

// Largest magnitude that survives scaling without losing integer precision.
const MAX_READING: f64 = 1e13;

/// A reading as a device reports it: decimal degrees and percent, every field
/// optional until validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReading {
    pub shipment_id: Option<String>,
    pub batch_id: Option<String>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub rfid_tag: Option<String>,
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl TelemetryReading {
    pub fn from_json(input: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(input).map_err(|e| ValidationError::InvalidValue {
            field: "reading",
            reason: e.to_string(),
        })
    }

    /// Check required fields and scale readings to hundredths.
    pub fn into_sample(self) -> Result<Sample, ValidationError> {
        let shipment_id = required_text(self.shipment_id, "shipmentId")?;
        let batch_id = required_text(self.batch_id, "batchId")?;
        let temperature = scale(
            self.temperature
                .ok_or(ValidationError::MissingField("temperature"))?,
            "temperature",
        )?;
        let humidity = scale(
            self.humidity.ok_or(ValidationError::MissingField("humidity"))?,
            "humidity",
        )?;
        let humidity = u64::try_from(humidity).map_err(|_| ValidationError::InvalidValue {
            field: "humidity",
            reason: "must not be negative".into(),
        })?;

        let mut sample = Sample::new(shipment_id, batch_id, temperature, humidity);
        if let Some(tag) = self.rfid_tag.filter(|t| !t.trim().is_empty()) {
            sample = sample.with_tag(tag);
        }
        if let Some(metadata) = self.metadata.filter(|m| !m.is_empty()) {
            sample = sample.with_metadata(metadata);
        }
        Ok(sample)
    }
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

/// `x * 100` rounded half up.
pub fn scale(value: f64, field: &'static str) -> Result<i64, ValidationError> {
    if !value.is_finite() || value.abs() > MAX_READING {
        return Err(ValidationError::InvalidValue {
            field,
            reason: format!("{} is out of range", value),
        });
    }
    Ok((value * 100.0 + 0.5).floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading() -> TelemetryReading {
        TelemetryReading {
            shipment_id: Some("SHIP-1".into()),
            batch_id: Some("B-1".into()),
            temperature: Some(4.5),
            humidity: Some(65.25),
            ..Default::default()
        }
    }

    #[test]
    fn test_scales_and_rounds() {
        let sample = reading().into_sample().unwrap();
        assert_eq!(sample.temperature, 450);
        assert_eq!(sample.humidity, 6525);

        assert_eq!(scale(-1.234, "t").unwrap(), -123);
        assert_eq!(scale(0.125, "t").unwrap(), 13);
        assert_eq!(scale(-0.125, "t").unwrap(), -12);
    }

    #[test]
    fn test_missing_fields() {
        let mut r = reading();
        r.shipment_id = Some("  ".into());
        assert_eq!(r.into_sample(), Err(ValidationError::MissingField("shipmentId")));

        let mut r = reading();
        r.batch_id = None;
        assert_eq!(r.into_sample(), Err(ValidationError::MissingField("batchId")));

        let mut r = reading();
        r.humidity = None;
        assert_eq!(r.into_sample(), Err(ValidationError::MissingField("humidity")));
    }

    #[test]
    fn test_invalid_values() {
        let mut r = reading();
        r.humidity = Some(-3.0);
        assert!(matches!(
            r.into_sample(),
            Err(ValidationError::InvalidValue { field: "humidity", .. })
        ));

        let mut r = reading();
        r.temperature = Some(f64::NAN);
        assert!(matches!(
            r.into_sample(),
            Err(ValidationError::InvalidValue { field: "temperature", .. })
        ));
    }

    #[test]
    fn test_from_json_optional_fields() {
        let r = TelemetryReading::from_json(
            r#"{"shipmentId":"S","batchId":"B","temperature":-18.2,"humidity":40,"rfidTag":"","metadata":{"door":"closed"}}"#,
        )
        .unwrap();
        let sample = r.into_sample().unwrap();
        assert_eq!(sample.temperature, -1820);
        assert!(sample.tag.is_none());
        assert_eq!(sample.metadata.unwrap()["door"], "closed");

        assert!(TelemetryReading::from_json("{not json").is_err());
    }
}
