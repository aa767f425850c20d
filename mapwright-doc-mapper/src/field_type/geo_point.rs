// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde_json::{json, Value as JsonValue};

use super::{FieldType, FieldTypeKind, LeafContext, TextSearchInfo};
use crate::document::FieldValue;
use crate::mapper::field_params::GeoPointParams;
use crate::MappingError;

const LAT_DECODE: f64 = 180.0 / (1u64 << 32) as f64;
const LON_DECODE: f64 = 360.0 / (1u64 << 32) as f64;

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Packs the point into a single sortable long, latitude in the high bits.
    fn encode(self) -> i64 {
        let lat = (self.lat / LAT_DECODE).floor().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        let lon = (self.lon / LON_DECODE).floor().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        ((lat as i64) << 32) | (lon as u32 as i64)
    }
}

fn coordinate(value: &JsonValue, name: &str) -> Result<f64, String> {
    match value {
        JsonValue::Number(number) => number
            .as_f64()
            .ok_or_else(|| format!("[{name}] must be a number")),
        JsonValue::String(text) => text
            .trim()
            .parse()
            .map_err(|_| format!("[{name}] must be a valid double value")),
        _ => Err(format!("[{name}] must be a number")),
    }
}

fn check_z_value(z: Option<f64>, ignore_z_value: bool) -> Result<(), String> {
    match z {
        Some(z) if !ignore_z_value => Err(format!(
            "Exception parsing coordinates: found Z value [{z}] but [ignore_z_value] parameter \
             is [false]"
        )),
        _ => Ok(()),
    }
}

fn parse_point_string(text: &str, ignore_z_value: bool) -> Result<GeoPoint, String> {
    let trimmed = text.trim();
    if let Some(coordinates) = trimmed
        .strip_prefix("POINT")
        .map(str::trim)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<&str> = coordinates.split_whitespace().collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(format!("failed to parse WKT point [{text}]"));
        }
        let lon = coordinate(&JsonValue::String(parts[0].to_string()), "lon")?;
        let lat = coordinate(&JsonValue::String(parts[1].to_string()), "lat")?;
        let z = parts
            .get(2)
            .map(|z| coordinate(&JsonValue::String(z.to_string()), "z"))
            .transpose()?;
        check_z_value(z, ignore_z_value)?;
        return Ok(GeoPoint { lat, lon });
    }
    let parts: Vec<&str> = trimmed.split(',').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!(
            "failed to parse [{text}], expected \"lat,lon\" or a WKT point"
        ));
    }
    let lat = coordinate(&JsonValue::String(parts[0].to_string()), "lat")?;
    let lon = coordinate(&JsonValue::String(parts[1].to_string()), "lon")?;
    let z = parts
        .get(2)
        .map(|z| coordinate(&JsonValue::String(z.to_string()), "z"))
        .transpose()?;
    check_z_value(z, ignore_z_value)?;
    Ok(GeoPoint { lat, lon })
}

/// Parses one point: `{"lat", "lon"}`, `"lat,lon"`, `[lon, lat]` or a WKT `POINT`.
pub(crate) fn parse_geo_point(value: &JsonValue, ignore_z_value: bool) -> Result<GeoPoint, String> {
    let point = match value {
        JsonValue::Object(map) => {
            let unknown = map
                .keys()
                .find(|key| !["lat", "lon", "z"].contains(&key.as_str()));
            if let Some(unknown) = unknown {
                return Err(format!(
                    "field [{unknown}] not supported - must be one of: lon, lat, z"
                ));
            }
            let lat = map
                .get("lat")
                .ok_or_else(|| "field [lat] missing".to_string())
                .and_then(|lat| coordinate(lat, "lat"))?;
            let lon = map
                .get("lon")
                .ok_or_else(|| "field [lon] missing".to_string())
                .and_then(|lon| coordinate(lon, "lon"))?;
            let z = map.get("z").map(|z| coordinate(z, "z")).transpose()?;
            check_z_value(z, ignore_z_value)?;
            GeoPoint { lat, lon }
        }
        JsonValue::String(text) => parse_point_string(text, ignore_z_value)?,
        JsonValue::Array(elements) => {
            if elements.len() < 2 || elements.len() > 3 {
                return Err("geo_point expected [lon, lat] or [lon, lat, z]".to_string());
            }
            let lon = coordinate(&elements[0], "lon")?;
            let lat = coordinate(&elements[1], "lat")?;
            let z = elements.get(2).map(|z| coordinate(z, "z")).transpose()?;
            check_z_value(z, ignore_z_value)?;
            GeoPoint { lat, lon }
        }
        other => return Err(format!("geo_point expected, got [{other}]")),
    };
    if !(-90.0..=90.0).contains(&point.lat) {
        return Err(format!("illegal latitude value [{}]", point.lat));
    }
    if !(-180.0..=180.0).contains(&point.lon) {
        return Err(format!("illegal longitude value [{}]", point.lon));
    }
    Ok(point)
}

/// A geo_point array is either a single `[lon, lat]` pair or a list of points.
pub(crate) fn is_coordinate_array(value: &JsonValue) -> bool {
    match value {
        JsonValue::Array(elements) => elements.first().is_some_and(JsonValue::is_number),
        _ => false,
    }
}

pub(crate) fn build(name: &str, params: &GeoPointParams) -> Result<FieldType, MappingError> {
    if let Some(null_value) = &params.null_value {
        parse_geo_point(null_value, params.ignore_z_value)
            .map_err(|reason| MappingError::invalid_definition(name, reason))?;
    }
    Ok(FieldType {
        name: name.to_string(),
        is_indexed: params.index,
        is_stored: params.store,
        has_doc_values: params.doc_values,
        text_search_info: TextSearchInfo::none(),
        meta: params.meta.clone(),
        kind: FieldTypeKind::GeoPoint,
    })
}

pub(crate) fn index_value(
    field_type: &FieldType,
    params: &GeoPointParams,
    value: &JsonValue,
    ctx: &mut LeafContext,
) -> Result<(), String> {
    if let JsonValue::Array(elements) = value {
        if !is_coordinate_array(value) {
            for element in elements {
                index_value(field_type, params, element, ctx)?;
            }
            return Ok(());
        }
    }
    let point = parse_geo_point(value, params.ignore_z_value)?;
    if field_type.is_indexed {
        ctx.add(
            &field_type.name,
            FieldValue::LatLonPoint {
                lat: point.lat,
                lon: point.lon,
            },
        );
    }
    if field_type.has_doc_values {
        ctx.add(
            &field_type.name,
            FieldValue::SortedNumericDocValues(point.encode()),
        );
    }
    if field_type.is_stored {
        ctx.add(
            &field_type.name,
            FieldValue::Stored(json!({"lat": point.lat, "lon": point.lon})),
        );
    }
    Ok(())
}
