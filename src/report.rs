//! Validated sensor report extracted from a decoded multipart form.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::IngestError;
use crate::multipart::{FilePart, MultipartForm};

/// One report posted by a field device: sensor readings plus the detection
/// image captured for this sample.
#[derive(Debug, Clone)]
pub struct SensorReport {
    pub raspberry_id: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub detection_count: i64,
    pub temperature: f64,
    pub humidity: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub image: FilePart,
}

impl SensorReport {
    /// Extracts and coerces the report fields from a decoded form.
    ///
    /// `raspberry_id` and the `image` part are required. All other fields
    /// fall back to absent (`name`, `location`) or zero (the numeric
    /// readings); a numeric field that is present but unparseable fails the
    /// whole request.
    pub fn from_form(mut form: MultipartForm) -> Result<Self, IngestError> {
        let raspberry_id = form
            .fields
            .get("raspberry_id")
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| IngestError::Validation("raspberry_id is required".into()))?;

        let image = form
            .files
            .remove("image")
            .ok_or_else(|| IngestError::Validation("no image file provided".into()))?;

        Ok(Self {
            raspberry_id,
            name: form.fields.get("name").cloned(),
            location: form.fields.get("location").cloned(),
            detection_count: numeric_field(&form.fields, "detection_count", 0)?,
            temperature: numeric_field(&form.fields, "temperature", 0.0)?,
            humidity: numeric_field(&form.fields, "humidity", 0.0)?,
            latitude: numeric_field(&form.fields, "latitude", 0.0)?,
            longitude: numeric_field(&form.fields, "longitude", 0.0)?,
            image,
        })
    }
}

fn numeric_field<T: FromStr>(
    fields: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, IngestError> {
    match fields.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| IngestError::Validation(format!("invalid {name}: {raw:?}"))),
    }
}
