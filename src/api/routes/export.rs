//! Export Routes
//!
//! History download for backup and offline analysis.
//!
//! - GET /api/v1/devices/:id/export?format=csv|json|ndjson&since=..&until=..

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;

use crate::api::dto::ExportParams;
use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{ApiPath, ApiQuery};
use crate::api::state::AppState;
use crate::storage::{SensorField, SensorReading};

/// Supported download formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Csv,
    Json,
    Ndjson,
}

impl ExportFormat {
    fn parse(s: &str) -> ApiResult<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            other => Err(ApiError::Validation(format!(
                "Unsupported export format '{}', expected csv, json or ndjson",
                other
            ))),
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
            Self::Ndjson => "application/x-ndjson",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Ndjson => "ndjson",
        }
    }
}

/// GET /api/v1/devices/:id/export
///
/// Readings in the window, oldest first. A window holding more than
/// `api.max_export_readings` is rejected rather than truncated.
pub async fn export_readings(
    State(state): State<Arc<AppState>>,
    ApiPath(device_id): ApiPath<String>,
    ApiQuery(params): ApiQuery<ExportParams>,
) -> ApiResult<Response> {
    let format = ExportFormat::parse(&params.format)?;
    let max_readings = state.config.max_export_readings;

    let readings = state
        .query
        .range(
            &device_id,
            params.since,
            params.until,
            Some(max_readings.saturating_add(1)),
        )
        .await?;

    if readings.len() > max_readings {
        tracing::warn!(device_id = %device_id, max_readings, "Export window too large");
        return Err(ApiError::Validation(format!(
            "Export window holds more than {} readings; narrow since/until",
            max_readings
        )));
    }

    let body = match format {
        ExportFormat::Csv => format_csv(&readings)?,
        ExportFormat::Json => format_json(&readings)?,
        ExportFormat::Ndjson => format_ndjson(&readings)?,
    };

    tracing::info!(
        device_id = %device_id,
        format = format.extension(),
        readings = readings.len(),
        "Exported readings"
    );

    let filename = format!(
        "{}_readings_{}.{}",
        sanitize_filename(&device_id),
        Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from(body),
    )
        .into_response())
}

/// One row per reading, one column per channel; absent channels are empty
fn format_csv(readings: &[SensorReading]) -> ApiResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["reading_id", "device_id", "timestamp"];
    header.extend(SensorField::ALL.iter().map(|f| f.name()));
    writer.write_record(&header).map_err(csv_error)?;

    for reading in readings {
        let mut record = vec![
            reading.id.to_string(),
            reading.device_id.clone(),
            reading
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        ];
        record.extend(SensorField::ALL.iter().map(|field| {
            match reading.fields.get(*field) {
                Some(v) if field.is_integer() => format!("{}", v as i64),
                Some(v) => v.to_string(),
                None => String::new(),
            }
        }));
        writer.write_record(&record).map_err(csv_error)?;
    }

    writer
        .into_inner()
        .map_err(|e| ApiError::Internal(format!("CSV export failed: {}", e)))
}

fn format_json(readings: &[SensorReading]) -> ApiResult<Vec<u8>> {
    serde_json::to_vec_pretty(readings)
        .map_err(|e| ApiError::Internal(format!("JSON export failed: {}", e)))
}

fn format_ndjson(readings: &[SensorReading]) -> ApiResult<Vec<u8>> {
    let mut out = Vec::new();
    for reading in readings {
        serde_json::to_writer(&mut out, reading)
            .map_err(|e| ApiError::Internal(format!("NDJSON export failed: {}", e)))?;
        out.push(b'\n');
    }
    Ok(out)
}

fn csv_error(e: csv::Error) -> ApiError {
    ApiError::Internal(format!("CSV export failed: {}", e))
}

fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SensorFields;
    use chrono::DateTime;

    fn sample() -> Vec<SensorReading> {
        vec![
            SensorReading {
                id: 1,
                device_id: "D1".to_string(),
                timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
                fields: SensorFields::default().temperature(21.5).soil_raw(1800),
            },
            SensorReading {
                id: 2,
                device_id: "D1".to_string(),
                timestamp: DateTime::from_timestamp_millis(1_700_000_060_000).unwrap(),
                fields: SensorFields::default().humidity(55.0),
            },
        ]
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("CSV").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::parse("jsonl").unwrap(), ExportFormat::Ndjson);
        assert!(ExportFormat::parse("xml").is_err());
    }

    #[test]
    fn test_csv_layout() {
        let csv = String::from_utf8(format_csv(&sample()).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(
            lines[0],
            "reading_id,device_id,timestamp,temperature,humidity,soil_moisture,soil_raw,battery_level,signal_strength"
        );
        assert_eq!(lines[1], "1,D1,2023-11-14T22:13:20.000Z,21.5,,,1800,,");
        assert_eq!(lines[2], "2,D1,2023-11-14T22:14:20.000Z,,55,,,,");
    }

    #[test]
    fn test_ndjson_one_line_per_reading() {
        let out = String::from_utf8(format_ndjson(&sample()).unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(first["soil_raw"], 1800);
        assert!(first.get("humidity").is_none());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("ESP32-001"), "ESP32-001");
        assert_eq!(sanitize_filename("bed 1/\"x\""), "bed_1__x_");
    }
}
