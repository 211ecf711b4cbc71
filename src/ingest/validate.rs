use crate::ingest::error::{IngestError, IngestResult};
use crate::storage::{SensorField, SensorFields};
use serde::{Deserialize, Serialize};

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const PERCENT_MIN: f64 = 0.0;
const PERCENT_MAX: f64 = 100.0;
const SOIL_RAW_MIN: f64 = 0.0;
const SOIL_RAW_MAX: f64 = 4095.0;
const SIGNAL_MIN: f64 = -150.0;
const SIGNAL_MAX: f64 = 150.0;

/// Sensor channels as they arrive on the wire, before validation.
///
/// Unknown fields are ignored by serde; `null` is the same as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChannels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil_moisture: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil_raw: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,
}

impl RawChannels {
    fn get(&self, field: SensorField) -> Option<f64> {
        match field {
            SensorField::Temperature => self.temperature,
            SensorField::Humidity => self.humidity,
            SensorField::SoilMoisture => self.soil_moisture,
            SensorField::SoilRaw => self.soil_raw,
            SensorField::BatteryLevel => self.battery_level,
            SensorField::SignalStrength => self.signal_strength,
        }
    }
}

impl From<SensorFields> for RawChannels {
    fn from(fields: SensorFields) -> Self {
        Self {
            temperature: fields.temperature,
            humidity: fields.humidity,
            soil_moisture: fields.soil_moisture,
            soil_raw: fields.soil_raw.map(|v| v as f64),
            battery_level: fields.battery_level,
            signal_strength: fields.signal_strength.map(|v| v as f64),
        }
    }
}

/// Inclusive domain of a channel
fn domain(field: SensorField) -> (f64, f64) {
    match field {
        SensorField::Temperature => (TEMP_MIN, TEMP_MAX),
        SensorField::Humidity | SensorField::SoilMoisture | SensorField::BatteryLevel => {
            (PERCENT_MIN, PERCENT_MAX)
        }
        SensorField::SoilRaw => (SOIL_RAW_MIN, SOIL_RAW_MAX),
        SensorField::SignalStrength => (SIGNAL_MIN, SIGNAL_MAX),
    }
}

fn check(field: SensorField, value: f64) -> IngestResult<f64> {
    if !value.is_finite() {
        return Err(IngestError::Validation(format!(
            "{} must be a finite number",
            field
        )));
    }

    let (min, max) = domain(field);
    if value < min || value > max {
        return Err(IngestError::Validation(format!(
            "{} {} out of range [{}, {}]",
            field, value, min, max
        )));
    }

    if field.is_integer() && value.fract() != 0.0 {
        return Err(IngestError::Validation(format!(
            "{} must be an integer, got {}",
            field, value
        )));
    }

    Ok(value)
}

/// Validates raw channels into typed sensor fields.
///
/// At least one channel must be present. Out-of-domain values are rejected,
/// never clamped.
pub fn validate(raw: &RawChannels) -> IngestResult<SensorFields> {
    let mut fields = SensorFields::default();
    let mut present = 0;

    for field in SensorField::ALL {
        let Some(value) = raw.get(field) else {
            continue;
        };
        let value = check(field, value)?;
        present += 1;

        match field {
            SensorField::Temperature => fields.temperature = Some(value),
            SensorField::Humidity => fields.humidity = Some(value),
            SensorField::SoilMoisture => fields.soil_moisture = Some(value),
            SensorField::SoilRaw => fields.soil_raw = Some(value as i64),
            SensorField::BatteryLevel => fields.battery_level = Some(value),
            SensorField::SignalStrength => fields.signal_strength = Some(value as i64),
        }
    }

    if present == 0 {
        return Err(IngestError::Validation(
            "At least one sensor reading is required".to_string(),
        ));
    }

    Ok(fields)
}
