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

use std::collections::BTreeMap;

use mapwright_common::{is_false, is_true, true_fn};
use mapwright_datetime::{DateFormatter, DateResolution};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::field_type::{NumberType, Script};
use crate::{MappingError, MergeError};

/// Default `ignore_above`: nothing is ignored.
pub const IGNORE_ABOVE_DEFAULT: u32 = i32::MAX as u32;

fn ignore_above_default() -> u32 {
    IGNORE_ABOVE_DEFAULT
}

fn is_ignore_above_default(ignore_above: &u32) -> bool {
    *ignore_above == IGNORE_ABOVE_DEFAULT
}

/// Collects every illegal parameter transition of a field so that a merge reports all of them
/// at once.
#[derive(Debug)]
pub struct Conflicts {
    field: String,
    conflicts: Vec<String>,
}

/// Renders a parameter value the way it appears in conflict messages: strings unquoted.
fn display_param<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(JsonValue::String(text)) => text,
        Ok(other) => other.to_string(),
        Err(_) => "?".to_string(),
    }
}

impl Conflicts {
    pub fn new(field: &str) -> Conflicts {
        Conflicts {
            field: field.to_string(),
            conflicts: Vec::new(),
        }
    }

    pub fn add(&mut self, conflict: String) {
        self.conflicts.push(conflict);
    }

    /// Keeps the existing value, recording a conflict if the incoming one differs.
    pub fn immutable<T: Clone + PartialEq + Serialize>(
        &mut self,
        param: &str,
        existing: &T,
        incoming: &T,
    ) -> T {
        self.check(param, existing, incoming, existing == incoming)
    }

    /// Takes the incoming value if `allowed`, otherwise keeps the existing one and records a
    /// conflict.
    pub fn check<T: Clone + Serialize>(
        &mut self,
        param: &str,
        existing: &T,
        incoming: &T,
        allowed: bool,
    ) -> T {
        if allowed {
            return incoming.clone();
        }
        self.conflicts.push(format!(
            "Cannot update parameter [{param}] from [{}] to [{}]",
            display_param(existing),
            display_param(incoming)
        ));
        existing.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn into_result(self) -> Result<(), MergeError> {
        if self.conflicts.is_empty() {
            return Ok(());
        }
        Err(MergeError::Conflict {
            field: self.field,
            conflicts: self.conflicts,
        })
    }
}

/// What a failing index-time script does to the document.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnScriptError {
    #[default]
    Fail,
    /// The field is recorded as ignored and the rest of the document is indexed.
    Continue,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSeriesMetric {
    Gauge,
    Counter,
}

fn precludes(field: &str, param: &str, set: bool, other: &str) -> Result<(), MappingError> {
    if set {
        return Err(MappingError::invalid_definition(
            field,
            format!("Field [{param}] cannot be set in conjunction with field [{other}]"),
        ));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumberParams {
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub index: bool,
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub doc_values: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub store: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coerce: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_malformed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_value: Option<JsonValue>,
    /// Index-time script. The field then takes its values from the script, never from the
    /// document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_script_error: Option<OnScriptError>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub time_series_dimension: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_series_metric: Option<TimeSeriesMetric>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl NumberParams {
    /// Checks the combinations of parameters that cannot be expressed by their types alone.
    pub fn validate(&self, field: &str, number_type: NumberType) -> Result<(), MappingError> {
        if self.script.is_some() {
            precludes(field, "ignore_malformed", self.ignore_malformed.is_some(), "script")?;
            precludes(field, "coerce", self.coerce.is_some(), "script")?;
            precludes(field, "null_value", self.null_value.is_some(), "script")?;
            if !self.index && !self.doc_values {
                return Err(MappingError::invalid_definition(
                    field,
                    "Cannot define script on field with index:false and doc_values:false",
                ));
            }
        } else if self.on_script_error.is_some() {
            return Err(MappingError::invalid_definition(
                field,
                "Field [on_script_error] requires field [script] to be configured",
            ));
        }
        if self.time_series_dimension {
            if !number_type.is_integral() {
                return Err(MappingError::invalid_definition(
                    field,
                    format!(
                        "Parameter [time_series_dimension] cannot be set to numeric type [{}]",
                        number_type.type_name()
                    ),
                ));
            }
            if !self.index || !self.doc_values {
                return Err(MappingError::invalid_definition(
                    field,
                    "Field [time_series_dimension] requires that [index] and [doc_values] are true",
                ));
            }
        }
        if self.time_series_metric.is_some() {
            if !self.doc_values {
                return Err(MappingError::invalid_definition(
                    field,
                    "Field [time_series_metric] requires that [doc_values] is true",
                ));
            }
            precludes(
                field,
                "time_series_dimension",
                self.time_series_dimension,
                "time_series_metric",
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordParams {
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub index: bool,
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub doc_values: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub store: bool,
    #[serde(
        default = "ignore_above_default",
        skip_serializing_if = "is_ignore_above_default"
    )]
    pub ignore_above: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalizer: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOptions {
    Docs,
    Freqs,
    #[default]
    Positions,
    Offsets,
}

impl IndexOptions {
    fn is_default(&self) -> bool {
        *self == IndexOptions::default()
    }
}

fn min_chars_default() -> u32 {
    2
}

fn max_chars_default() -> u32 {
    5
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexPrefixes {
    #[serde(default = "min_chars_default")]
    pub min_chars: u32,
    #[serde(default = "max_chars_default")]
    pub max_chars: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermVector {
    #[default]
    No,
    Yes,
    WithPositions,
    WithOffsets,
    WithPositionsOffsets,
    WithPositionsPayloads,
    WithPositionsOffsetsPayloads,
}

impl TermVector {
    fn is_default(&self) -> bool {
        *self == TermVector::default()
    }

    pub fn stores_positions(self) -> bool {
        matches!(
            self,
            TermVector::WithPositions
                | TermVector::WithPositionsOffsets
                | TermVector::WithPositionsPayloads
                | TermVector::WithPositionsOffsetsPayloads
        )
    }

    pub fn stores_offsets(self) -> bool {
        matches!(
            self,
            TermVector::WithOffsets
                | TermVector::WithPositionsOffsets
                | TermVector::WithPositionsOffsetsPayloads
        )
    }
}

fn max_frequency_default() -> f64 {
    i32::MAX as f64
}

/// Restricts the terms loaded in fielddata to those whose document frequency is in
/// `[min, max]`, on segments of at least `min_segment_size` documents.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FielddataFrequencyFilter {
    #[serde(default)]
    pub min: f64,
    #[serde(default = "max_frequency_default")]
    pub max: f64,
    #[serde(default)]
    pub min_segment_size: u32,
}

impl Default for FielddataFrequencyFilter {
    fn default() -> Self {
        FielddataFrequencyFilter {
            min: 0.0,
            max: max_frequency_default(),
            min_segment_size: 0,
        }
    }
}

impl FielddataFrequencyFilter {
    fn is_default(&self) -> bool {
        *self == FielddataFrequencyFilter::default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextParams {
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub index: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub store: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub index_phrases: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_prefixes: Option<IndexPrefixes>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub fielddata: bool,
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub norms: bool,
    #[serde(default, skip_serializing_if = "IndexOptions::is_default")]
    pub index_options: IndexOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_increment_gap: Option<u32>,
    #[serde(default, skip_serializing_if = "TermVector::is_default")]
    pub term_vector: TermVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub eager_global_ordinals: bool,
    #[serde(default, skip_serializing_if = "FielddataFrequencyFilter::is_default")]
    pub fielddata_frequency_filter: FielddataFrequencyFilter,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BooleanParams {
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub index: bool,
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub doc_values: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub store: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_value: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateParams {
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub index: bool,
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub doc_values: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub store: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<DateFormatter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_malformed: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinaryParams {
    #[serde(default, skip_serializing_if = "is_false")]
    pub doc_values: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub store: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpParams {
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub index: bool,
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub doc_values: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub store: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_malformed: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoPointParams {
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub index: bool,
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub doc_values: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub store: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_malformed: Option<bool>,
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub ignore_z_value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_value: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

/// Default maximum nesting of a flattened object.
pub const FLATTENED_DEPTH_LIMIT_DEFAULT: u32 = 20;

fn flattened_depth_limit_default() -> u32 {
    FLATTENED_DEPTH_LIMIT_DEFAULT
}

fn is_flattened_depth_limit_default(depth_limit: &u32) -> bool {
    *depth_limit == FLATTENED_DEPTH_LIMIT_DEFAULT
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlattenedParams {
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub index: bool,
    #[serde(default = "true_fn", skip_serializing_if = "is_true")]
    pub doc_values: bool,
    #[serde(
        default = "flattened_depth_limit_default",
        skip_serializing_if = "is_flattened_depth_limit_default"
    )]
    pub depth_limit: u32,
    #[serde(
        default = "ignore_above_default",
        skip_serializing_if = "is_ignore_above_default"
    )]
    pub ignore_above: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_value: Option<String>,
}

/// Type specific parameters of a leaf field, as declared in the mapping.
#[derive(Clone, Debug, PartialEq)]
pub enum LeafParams {
    Number(NumberType, NumberParams),
    Keyword(KeywordParams),
    Text(TextParams),
    Boolean(BooleanParams),
    Date(DateResolution, DateParams),
    Binary(BinaryParams),
    Ip(IpParams),
    GeoPoint(GeoPointParams),
    Flattened(FlattenedParams),
}

fn deserialize_params<T: DeserializeOwned>(
    field: &str,
    params: JsonMap<String, JsonValue>,
) -> Result<T, MappingError> {
    serde_json::from_value(JsonValue::Object(params))
        .map_err(|error| MappingError::invalid_definition(field, error))
}

impl LeafParams {
    /// Every leaf type name this registry knows about.
    pub const TYPE_NAMES: [&'static str; 16] = [
        "byte",
        "short",
        "integer",
        "long",
        "half_float",
        "float",
        "double",
        "keyword",
        "text",
        "boolean",
        "date",
        "date_nanos",
        "binary",
        "ip",
        "geo_point",
        "flattened",
    ];

    /// Reads the parameters of a leaf field. `params` holds the field definition without
    /// `type`, `fields` and `copy_to`.
    pub fn from_json(
        type_name: &str,
        field: &str,
        params: JsonMap<String, JsonValue>,
    ) -> Result<LeafParams, MappingError> {
        if let Some(number_type) = NumberType::from_type_name(type_name) {
            return Ok(LeafParams::Number(
                number_type,
                deserialize_params(field, params)?,
            ));
        }
        let leaf_params = match type_name {
            "keyword" => LeafParams::Keyword(deserialize_params(field, params)?),
            "text" => LeafParams::Text(deserialize_params(field, params)?),
            "boolean" => LeafParams::Boolean(deserialize_params(field, params)?),
            "date" => LeafParams::Date(
                DateResolution::Milliseconds,
                deserialize_params(field, params)?,
            ),
            "date_nanos" => LeafParams::Date(
                DateResolution::Nanoseconds,
                deserialize_params(field, params)?,
            ),
            "binary" => LeafParams::Binary(deserialize_params(field, params)?),
            "ip" => LeafParams::Ip(deserialize_params(field, params)?),
            "geo_point" => LeafParams::GeoPoint(deserialize_params(field, params)?),
            "flattened" => LeafParams::Flattened(deserialize_params(field, params)?),
            _ => {
                return Err(MappingError::UnknownType {
                    field: field.to_string(),
                    type_name: type_name.to_string(),
                })
            }
        };
        Ok(leaf_params)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LeafParams::Number(number_type, _) => number_type.type_name(),
            LeafParams::Keyword(_) => "keyword",
            LeafParams::Text(_) => "text",
            LeafParams::Boolean(_) => "boolean",
            LeafParams::Date(resolution, _) => resolution.type_name(),
            LeafParams::Binary(_) => "binary",
            LeafParams::Ip(_) => "ip",
            LeafParams::GeoPoint(_) => "geo_point",
            LeafParams::Flattened(_) => "flattened",
        }
    }

    /// Serialized parameters, defaults omitted.
    pub fn to_json(&self) -> JsonMap<String, JsonValue> {
        let value = match self {
            LeafParams::Number(_, params) => serde_json::to_value(params),
            LeafParams::Keyword(params) => serde_json::to_value(params),
            LeafParams::Text(params) => serde_json::to_value(params),
            LeafParams::Boolean(params) => serde_json::to_value(params),
            LeafParams::Date(_, params) => serde_json::to_value(params),
            LeafParams::Binary(params) => serde_json::to_value(params),
            LeafParams::Ip(params) => serde_json::to_value(params),
            LeafParams::GeoPoint(params) => serde_json::to_value(params),
            LeafParams::Flattened(params) => serde_json::to_value(params),
        };
        match value {
            Ok(JsonValue::Object(map)) => map,
            _ => JsonMap::new(),
        }
    }

    /// Value indexed in place of an explicit `null`.
    pub fn null_value(&self) -> Option<JsonValue> {
        match self {
            LeafParams::Number(_, params) => params.null_value.clone(),
            LeafParams::Keyword(params) => params.null_value.clone().map(JsonValue::String),
            LeafParams::Boolean(params) => params.null_value.map(JsonValue::Bool),
            LeafParams::Date(_, params) => params.null_value.clone().map(JsonValue::String),
            LeafParams::Ip(params) => params.null_value.clone().map(JsonValue::String),
            LeafParams::GeoPoint(params) => params.null_value.clone(),
            // Applies to the leaves of the flattened object, not to the field itself.
            LeafParams::Flattened(_) | LeafParams::Text(_) | LeafParams::Binary(_) => None,
        }
    }

    /// `coerce` as declared on the field, `None` to inherit the index default.
    pub fn coerce(&self) -> Option<bool> {
        match self {
            LeafParams::Number(_, params) => params.coerce,
            _ => None,
        }
    }

    /// Index-time script of the field, numeric fields only.
    pub fn script(&self) -> Option<&Script> {
        match self {
            LeafParams::Number(_, params) => params.script.as_ref(),
            _ => None,
        }
    }

    pub fn on_script_error(&self) -> OnScriptError {
        match self {
            LeafParams::Number(_, params) => params.on_script_error.unwrap_or_default(),
            _ => OnScriptError::default(),
        }
    }

    pub fn is_time_series_dimension(&self) -> bool {
        match self {
            LeafParams::Number(_, params) => params.time_series_dimension,
            _ => false,
        }
    }

    /// Whether the type understands `coerce` at all.
    pub fn supports_coerce(&self) -> bool {
        matches!(self, LeafParams::Number(..))
    }

    /// `ignore_malformed` as declared on the field, `None` to inherit the index default.
    pub fn ignore_malformed(&self) -> Option<bool> {
        match self {
            LeafParams::Number(_, params) => params.ignore_malformed,
            LeafParams::Date(_, params) => params.ignore_malformed,
            LeafParams::Ip(params) => params.ignore_malformed,
            LeafParams::GeoPoint(params) => params.ignore_malformed,
            _ => None,
        }
    }

    pub fn supports_ignore_malformed(&self) -> bool {
        matches!(
            self,
            LeafParams::Number(..)
                | LeafParams::Date(..)
                | LeafParams::Ip(_)
                | LeafParams::GeoPoint(_)
        )
    }

    /// Merges the parameters of two definitions of the same type. Illegal transitions are
    /// recorded in `conflicts` and the existing value is kept.
    pub fn merge(&self, incoming: &LeafParams, conflicts: &mut Conflicts) -> LeafParams {
        match (self, incoming) {
            (LeafParams::Number(number_type, existing), LeafParams::Number(_, incoming)) => {
                LeafParams::Number(
                    *number_type,
                    NumberParams {
                        index: conflicts.immutable("index", &existing.index, &incoming.index),
                        doc_values: conflicts.immutable(
                            "doc_values",
                            &existing.doc_values,
                            &incoming.doc_values,
                        ),
                        store: conflicts.immutable("store", &existing.store, &incoming.store),
                        coerce: incoming.coerce,
                        ignore_malformed: incoming.ignore_malformed,
                        null_value: conflicts.immutable(
                            "null_value",
                            &existing.null_value,
                            &incoming.null_value,
                        ),
                        script: conflicts.immutable("script", &existing.script, &incoming.script),
                        on_script_error: incoming.on_script_error,
                        time_series_dimension: conflicts.immutable(
                            "time_series_dimension",
                            &existing.time_series_dimension,
                            &incoming.time_series_dimension,
                        ),
                        time_series_metric: conflicts.immutable(
                            "time_series_metric",
                            &existing.time_series_metric,
                            &incoming.time_series_metric,
                        ),
                        meta: incoming.meta.clone(),
                    },
                )
            }
            (LeafParams::Keyword(existing), LeafParams::Keyword(incoming)) => {
                LeafParams::Keyword(KeywordParams {
                    index: conflicts.immutable("index", &existing.index, &incoming.index),
                    doc_values: conflicts.immutable(
                        "doc_values",
                        &existing.doc_values,
                        &incoming.doc_values,
                    ),
                    store: conflicts.immutable("store", &existing.store, &incoming.store),
                    ignore_above: incoming.ignore_above,
                    null_value: conflicts.immutable(
                        "null_value",
                        &existing.null_value,
                        &incoming.null_value,
                    ),
                    normalizer: conflicts.immutable(
                        "normalizer",
                        &existing.normalizer,
                        &incoming.normalizer,
                    ),
                    meta: incoming.meta.clone(),
                })
            }
            (LeafParams::Text(existing), LeafParams::Text(incoming)) => {
                LeafParams::Text(merge_text_params(existing, incoming, conflicts))
            }
            (LeafParams::Boolean(existing), LeafParams::Boolean(incoming)) => {
                LeafParams::Boolean(BooleanParams {
                    index: conflicts.immutable("index", &existing.index, &incoming.index),
                    doc_values: conflicts.immutable(
                        "doc_values",
                        &existing.doc_values,
                        &incoming.doc_values,
                    ),
                    store: conflicts.immutable("store", &existing.store, &incoming.store),
                    null_value: conflicts.immutable(
                        "null_value",
                        &existing.null_value,
                        &incoming.null_value,
                    ),
                    meta: incoming.meta.clone(),
                })
            }
            (LeafParams::Date(resolution, existing), LeafParams::Date(_, incoming)) => {
                LeafParams::Date(
                    *resolution,
                    DateParams {
                        index: conflicts.immutable("index", &existing.index, &incoming.index),
                        doc_values: conflicts.immutable(
                            "doc_values",
                            &existing.doc_values,
                            &incoming.doc_values,
                        ),
                        store: conflicts.immutable("store", &existing.store, &incoming.store),
                        format: incoming.format.clone(),
                        null_value: conflicts.immutable(
                            "null_value",
                            &existing.null_value,
                            &incoming.null_value,
                        ),
                        ignore_malformed: incoming.ignore_malformed,
                        meta: incoming.meta.clone(),
                    },
                )
            }
            (LeafParams::Binary(existing), LeafParams::Binary(incoming)) => {
                LeafParams::Binary(BinaryParams {
                    doc_values: conflicts.immutable(
                        "doc_values",
                        &existing.doc_values,
                        &incoming.doc_values,
                    ),
                    store: conflicts.immutable("store", &existing.store, &incoming.store),
                    meta: incoming.meta.clone(),
                })
            }
            (LeafParams::Ip(existing), LeafParams::Ip(incoming)) => LeafParams::Ip(IpParams {
                index: conflicts.immutable("index", &existing.index, &incoming.index),
                doc_values: conflicts.immutable(
                    "doc_values",
                    &existing.doc_values,
                    &incoming.doc_values,
                ),
                store: conflicts.immutable("store", &existing.store, &incoming.store),
                null_value: conflicts.immutable(
                    "null_value",
                    &existing.null_value,
                    &incoming.null_value,
                ),
                ignore_malformed: incoming.ignore_malformed,
                meta: incoming.meta.clone(),
            }),
            (LeafParams::GeoPoint(existing), LeafParams::GeoPoint(incoming)) => {
                LeafParams::GeoPoint(GeoPointParams {
                    index: conflicts.immutable("index", &existing.index, &incoming.index),
                    doc_values: conflicts.immutable(
                        "doc_values",
                        &existing.doc_values,
                        &incoming.doc_values,
                    ),
                    store: conflicts.immutable("store", &existing.store, &incoming.store),
                    ignore_malformed: incoming.ignore_malformed,
                    ignore_z_value: incoming.ignore_z_value,
                    null_value: conflicts.immutable(
                        "null_value",
                        &existing.null_value,
                        &incoming.null_value,
                    ),
                    meta: incoming.meta.clone(),
                })
            }
            (LeafParams::Flattened(existing), LeafParams::Flattened(incoming)) => {
                LeafParams::Flattened(FlattenedParams {
                    index: conflicts.immutable("index", &existing.index, &incoming.index),
                    doc_values: conflicts.immutable(
                        "doc_values",
                        &existing.doc_values,
                        &incoming.doc_values,
                    ),
                    depth_limit: incoming.depth_limit,
                    ignore_above: incoming.ignore_above,
                    null_value: conflicts.immutable(
                        "null_value",
                        &existing.null_value,
                        &incoming.null_value,
                    ),
                })
            }
            // Callers compare type names before merging.
            (existing, incoming) => {
                conflicts.add(format!(
                    "cannot change type from [{}] to [{}]",
                    existing.type_name(),
                    incoming.type_name()
                ));
                existing.clone()
            }
        }
    }
}

fn merge_text_params(
    existing: &TextParams,
    incoming: &TextParams,
    conflicts: &mut Conflicts,
) -> TextParams {
    let analyzer = conflicts.immutable("analyzer", &existing.analyzer, &incoming.analyzer);
    // Norms can be disabled on an existing field, never re-enabled.
    let norms = conflicts.check(
        "norms",
        &existing.norms,
        &incoming.norms,
        existing.norms == incoming.norms || !incoming.norms,
    );
    TextParams {
        index: conflicts.immutable("index", &existing.index, &incoming.index),
        store: conflicts.immutable("store", &existing.store, &incoming.store),
        analyzer,
        search_analyzer: incoming.search_analyzer.clone(),
        index_phrases: conflicts.immutable(
            "index_phrases",
            &existing.index_phrases,
            &incoming.index_phrases,
        ),
        index_prefixes: conflicts.immutable(
            "index_prefixes",
            &existing.index_prefixes,
            &incoming.index_prefixes,
        ),
        fielddata: incoming.fielddata,
        norms,
        index_options: conflicts.immutable(
            "index_options",
            &existing.index_options,
            &incoming.index_options,
        ),
        position_increment_gap: conflicts.immutable(
            "position_increment_gap",
            &existing.position_increment_gap,
            &incoming.position_increment_gap,
        ),
        term_vector: conflicts.immutable(
            "term_vector",
            &existing.term_vector,
            &incoming.term_vector,
        ),
        similarity: conflicts.immutable("similarity", &existing.similarity, &incoming.similarity),
        eager_global_ordinals: incoming.eager_global_ordinals,
        fielddata_frequency_filter: incoming.fielddata_frequency_filter,
        meta: incoming.meta.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::field_type::FieldType;

    fn params(type_name: &str, definition: JsonValue) -> LeafParams {
        let JsonValue::Object(map) = definition else {
            panic!("expected an object");
        };
        LeafParams::from_json(type_name, "f", map).unwrap()
    }

    #[test]
    fn test_leaf_params_defaults_are_not_serialized() {
        let keyword = params("keyword", json!({}));
        assert!(keyword.to_json().is_empty());
        let keyword = params("keyword", json!({"ignore_above": 256, "store": true}));
        assert_eq!(
            JsonValue::Object(keyword.to_json()),
            json!({"ignore_above": 256, "store": true})
        );
        let date = params("date_nanos", json!({"format": "epoch_millis"}));
        assert_eq!(date.type_name(), "date_nanos");
        assert_eq!(
            JsonValue::Object(date.to_json()),
            json!({"format": "epoch_millis"})
        );
    }

    #[test]
    fn test_leaf_params_rejects_unknown_parameters() {
        let JsonValue::Object(map) = json!({"analyzer": "standard"}) else {
            unreachable!()
        };
        let error = LeafParams::from_json("long", "age", map).unwrap_err();
        assert!(matches!(error, MappingError::InvalidDefinition { .. }));
        assert!(error.to_string().contains("unknown field `analyzer`"));
        let error = LeafParams::from_json("strange", "age", JsonMap::new()).unwrap_err();
        assert_eq!(
            error.to_string(),
            "No handler for type [strange] declared on field [age]"
        );
    }

    #[test]
    fn test_merge_reports_every_conflict() {
        let existing = params("text", json!({"analyzer": "standard", "norms": false}));
        let incoming = params("text", json!({"analyzer": "whitespace", "norms": true}));
        let mut conflicts = Conflicts::new("body");
        existing.merge(&incoming, &mut conflicts);
        let error = conflicts.into_result().unwrap_err();
        let MergeError::Conflict { field, conflicts } = error else {
            panic!("expected a conflict");
        };
        assert_eq!(field, "body");
        assert_eq!(
            conflicts,
            [
                "Cannot update parameter [analyzer] from [standard] to [whitespace]",
                "Cannot update parameter [norms] from [false] to [true]",
            ]
        );
    }

    #[test]
    fn test_merge_accepts_updateable_parameters() {
        let existing = params("keyword", json!({"ignore_above": 10}));
        let incoming = params("keyword", json!({"ignore_above": 20, "meta": {"unit": "ms"}}));
        let mut conflicts = Conflicts::new("k");
        let merged = existing.merge(&incoming, &mut conflicts);
        assert!(conflicts.is_empty());
        assert_eq!(merged, incoming);
        let existing = params("text", json!({}));
        let incoming = params("text", json!({"norms": false}));
        let mut conflicts = Conflicts::new("t");
        assert_eq!(existing.merge(&incoming, &mut conflicts), incoming);
        assert!(conflicts.is_empty());
    }

    fn build_error(type_name: &str, definition: JsonValue) -> String {
        FieldType::build("f", &params(type_name, definition))
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn test_number_script_and_time_series_params() {
        let long = params(
            "long",
            json!({
                "script": "emit(params._source['price'])",
                "on_script_error": "continue",
                "time_series_dimension": true
            }),
        );
        assert_eq!(long.script(), Some(&Script::new("emit(params._source['price'])")));
        assert_eq!(long.on_script_error(), OnScriptError::Continue);
        assert!(long.is_time_series_dimension());
        assert_eq!(
            JsonValue::Object(long.to_json()),
            json!({
                "script": {"source": "emit(params._source['price'])"},
                "on_script_error": "continue",
                "time_series_dimension": true
            })
        );
        FieldType::build("f", &long).unwrap();
        let gauge = params("double", json!({"time_series_metric": "gauge"}));
        assert_eq!(
            JsonValue::Object(gauge.to_json()),
            json!({"time_series_metric": "gauge"})
        );
        assert_eq!(params("long", json!({})).on_script_error(), OnScriptError::Fail);
    }

    #[test]
    fn test_number_params_validation() {
        let script = "emit(params._source['price'])";
        assert!(build_error("long", json!({"script": script, "null_value": 1}))
            .ends_with("Field [null_value] cannot be set in conjunction with field [script]"));
        assert!(build_error("long", json!({"script": script, "coerce": false}))
            .ends_with("Field [coerce] cannot be set in conjunction with field [script]"));
        assert!(
            build_error("long", json!({"script": script, "index": false, "doc_values": false}))
                .ends_with("Cannot define script on field with index:false and doc_values:false")
        );
        assert!(build_error("long", json!({"on_script_error": "continue"}))
            .ends_with("Field [on_script_error] requires field [script] to be configured"));
        assert!(build_error("float", json!({"time_series_dimension": true}))
            .ends_with("Parameter [time_series_dimension] cannot be set to numeric type [float]"));
        assert!(
            build_error("long", json!({"time_series_dimension": true, "index": false}))
                .ends_with("requires that [index] and [doc_values] are true")
        );
        assert!(
            build_error("long", json!({"time_series_metric": "counter", "doc_values": false}))
                .ends_with("Field [time_series_metric] requires that [doc_values] is true")
        );
        assert!(build_error(
            "long",
            json!({"time_series_metric": "counter", "time_series_dimension": true})
        )
        .ends_with(
            "Field [time_series_dimension] cannot be set in conjunction with field \
             [time_series_metric]"
        ));
        let JsonValue::Object(map) = json!({"time_series_metric": "histogram"}) else {
            unreachable!()
        };
        assert!(LeafParams::from_json("long", "f", map).is_err());
    }

    #[test]
    fn test_number_params_merge() {
        let existing = params(
            "long",
            json!({"script": "emit(params._source['a'])", "time_series_metric": "gauge"}),
        );
        let incoming = params(
            "long",
            json!({
                "script": "emit(params._source['a'])",
                "time_series_metric": "gauge",
                "on_script_error": "continue"
            }),
        );
        let mut conflicts = Conflicts::new("n");
        assert_eq!(existing.merge(&incoming, &mut conflicts), incoming);
        assert!(conflicts.is_empty());

        let incoming = params(
            "long",
            json!({"script": "emit(params._source['b'])", "time_series_metric": "counter"}),
        );
        let mut conflicts = Conflicts::new("n");
        existing.merge(&incoming, &mut conflicts);
        let MergeError::Conflict { conflicts, .. } = conflicts.into_result().unwrap_err() else {
            panic!("expected a conflict");
        };
        assert_eq!(
            conflicts,
            [
                concat!(
                    "Cannot update parameter [script] from ",
                    r#"[{"source":"emit(params._source['a'])"}]"#,
                    r#" to [{"source":"emit(params._source['b'])"}]"#
                ),
                "Cannot update parameter [time_series_metric] from [gauge] to [counter]",
            ]
        );
    }

    #[test]
    fn test_text_params_round_trip() {
        let text = params(
            "text",
            json!({
                "term_vector": "with_positions_offsets",
                "similarity": "boolean",
                "eager_global_ordinals": true,
                "fielddata": true,
                "fielddata_frequency_filter": {"min": 0.001, "max": 0.1, "min_segment_size": 500}
            }),
        );
        assert_eq!(
            JsonValue::Object(text.to_json()),
            json!({
                "term_vector": "with_positions_offsets",
                "similarity": "boolean",
                "eager_global_ordinals": true,
                "fielddata": true,
                "fielddata_frequency_filter": {"min": 0.001, "max": 0.1, "min_segment_size": 500}
            })
        );
        let LeafParams::Text(text_params) = &text else {
            panic!("expected text parameters");
        };
        assert!(text_params.term_vector.stores_positions());
        assert!(text_params.term_vector.stores_offsets());
        let filter = params("text", json!({"fielddata_frequency_filter": {"min": 2}}));
        let LeafParams::Text(filter) = filter else {
            panic!("expected text parameters");
        };
        assert_eq!(filter.fielddata_frequency_filter.max, i32::MAX as f64);
        assert!(build_error("text", json!({"similarity": "classic"}))
            .ends_with("Unknown Similarity type [classic] for field [f]"));
        assert!(build_error("text", json!({"term_vector": "yes", "index": false}))
            .ends_with("Cannot set term_vector on unindexed field [f]"));
        let JsonValue::Object(map) = json!({"term_vector": "sometimes"}) else {
            unreachable!()
        };
        assert!(LeafParams::from_json("text", "f", map).is_err());
    }

    #[test]
    fn test_text_params_merge() {
        let existing = params("text", json!({"similarity": "BM25", "term_vector": "yes"}));
        let incoming = params(
            "text",
            json!({
                "similarity": "BM25",
                "term_vector": "yes",
                "eager_global_ordinals": true,
                "fielddata_frequency_filter": {"min": 1}
            }),
        );
        let mut conflicts = Conflicts::new("t");
        assert_eq!(existing.merge(&incoming, &mut conflicts), incoming);
        assert!(conflicts.is_empty());

        let incoming = params("text", json!({"similarity": "boolean", "term_vector": "no"}));
        let mut conflicts = Conflicts::new("t");
        existing.merge(&incoming, &mut conflicts);
        let MergeError::Conflict { conflicts, .. } = conflicts.into_result().unwrap_err() else {
            panic!("expected a conflict");
        };
        assert_eq!(
            conflicts,
            [
                "Cannot update parameter [term_vector] from [yes] to [no]",
                "Cannot update parameter [similarity] from [BM25] to [boolean]",
            ]
        );
    }
}
