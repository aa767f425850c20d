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
use std::sync::Arc;

use mapwright_common::rate_limited_warn;
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::field_params::{Conflicts, LeafParams, OnScriptError};
use super::{FieldAliasMapper, FieldDefaults, MappingParserContext, MergeReason, ObjectMapper};
use crate::field_type::{index_leaf_value, FieldType, LeafContext, LeafFactory, RuntimeKind};
use crate::token_stream::{split_and_validate_path, TokenLocation};
use crate::{DocParsingError, MappingError, MergeError};

/// A concrete leaf field: its declared parameters, the field type built from them, the
/// multi-fields indexed from the same value and the fields its value is copied to.
#[derive(Clone, Debug)]
pub struct FieldMapper {
    name: String,
    simple_name: String,
    params: LeafParams,
    defaults: FieldDefaults,
    field_type: Arc<FieldType>,
    multi_fields: BTreeMap<String, Arc<FieldMapper>>,
    copy_to: Vec<String>,
    index_script: Option<Arc<dyn LeafFactory>>,
}

fn parse_copy_to(name: &str, copy_to: Option<JsonValue>) -> Result<Vec<String>, MappingError> {
    let targets = match copy_to {
        None => return Ok(Vec::new()),
        Some(JsonValue::String(target)) => vec![target],
        Some(JsonValue::Array(targets)) => targets
            .into_iter()
            .map(|target| match target {
                JsonValue::String(target) => Ok(target),
                other => Err(MappingError::invalid_definition(
                    name,
                    format!("[copy_to] targets must be strings, got `{other}`"),
                )),
            })
            .collect::<Result<_, _>>()?,
        Some(other) => {
            return Err(MappingError::invalid_definition(
                name,
                format!("[copy_to] must be a string or an array of strings, got `{other}`"),
            ))
        }
    };
    for target in &targets {
        if target.trim().is_empty() {
            return Err(MappingError::invalid_definition(
                name,
                "[copy_to] targets cannot be empty",
            ));
        }
        split_and_validate_path(target).map_err(|error| match error {
            DocParsingError::Parse { reason, .. } => MappingError::invalid_definition(
                name,
                format!("invalid [copy_to] target [{target}]: {reason}"),
            ),
            other => MappingError::invalid_definition(name, other),
        })?;
    }
    Ok(targets)
}

impl FieldMapper {
    /// Parses a leaf definition. `definition` no longer holds `type`.
    pub(crate) fn parse(
        name: &str,
        simple_name: &str,
        type_name: &str,
        mut definition: JsonMap<String, JsonValue>,
        ctx: &MappingParserContext,
    ) -> Result<FieldMapper, MappingError> {
        let multi_field_definitions = definition.remove("fields");
        let copy_to = parse_copy_to(name, definition.remove("copy_to"))?;
        let params = LeafParams::from_json(type_name, name, definition)?;
        let mut multi_fields = BTreeMap::new();
        match multi_field_definitions {
            None => {}
            Some(JsonValue::Object(definitions)) => {
                for (sub_name, definition) in definitions {
                    let multi_field = Self::parse_multi_field(name, &sub_name, definition, ctx)?;
                    multi_fields.insert(sub_name, Arc::new(multi_field));
                }
            }
            Some(other) => {
                return Err(MappingError::invalid_definition(
                    name,
                    format!("[fields] must be an object, got `{other}`"),
                ))
            }
        }
        let index_script = match (&params, params.script()) {
            (LeafParams::Number(number_type, _), Some(script)) => {
                if !multi_fields.is_empty() {
                    return Err(MappingError::invalid_definition(
                        name,
                        "Cannot define multifields on a field with a script",
                    ));
                }
                if !copy_to.is_empty() {
                    return Err(MappingError::invalid_definition(
                        name,
                        "Cannot define copy_to parameter on a field with a script",
                    ));
                }
                let kind = if number_type.is_integral() {
                    RuntimeKind::Long
                } else {
                    RuntimeKind::Double
                };
                Some(ctx.script_compiler.compile(name, Some(script), kind)?)
            }
            _ => None,
        };
        let mut field_mapper =
            FieldMapper::build(name, simple_name, params, ctx.defaults, multi_fields, copy_to)?;
        field_mapper.index_script = index_script;
        Ok(field_mapper)
    }

    fn parse_multi_field(
        parent_name: &str,
        sub_name: &str,
        definition: JsonValue,
        ctx: &MappingParserContext,
    ) -> Result<FieldMapper, MappingError> {
        let name = format!("{parent_name}.{sub_name}");
        if sub_name.is_empty() || sub_name.contains('.') {
            return Err(MappingError::InvalidName(format!(
                "Field name [{sub_name}] which is a multi field of [{parent_name}] cannot be \
                 empty or contain '.'"
            )));
        }
        let JsonValue::Object(mut definition) = definition else {
            return Err(MappingError::invalid_definition(
                &name,
                format!("expected an object definition, got `{definition}`"),
            ));
        };
        let type_name = match definition.remove("type") {
            Some(JsonValue::String(type_name)) => type_name,
            Some(other) => {
                return Err(MappingError::invalid_definition(
                    &name,
                    format!("[type] must be a string, got `{other}`"),
                ))
            }
            None => {
                return Err(MappingError::Invalid(format!(
                    "No type specified for field [{name}]"
                )))
            }
        };
        if [
            ObjectMapper::CONTENT_TYPE,
            ObjectMapper::NESTED_CONTENT_TYPE,
            FieldAliasMapper::CONTENT_TYPE,
        ]
        .contains(&type_name.as_str())
        {
            return Err(MappingError::Invalid(format!(
                "Type [{type_name}] cannot be used in multi field"
            )));
        }
        if definition.contains_key("copy_to") {
            return Err(MappingError::Invalid(format!(
                "[copy_to] may not be used to copy from a multi-field: [{name}]"
            )));
        }
        FieldMapper::parse(&name, sub_name, &type_name, definition, ctx)
    }

    pub(crate) fn build(
        name: &str,
        simple_name: &str,
        params: LeafParams,
        defaults: FieldDefaults,
        multi_fields: BTreeMap<String, Arc<FieldMapper>>,
        copy_to: Vec<String>,
    ) -> Result<FieldMapper, MappingError> {
        let field_type = Arc::new(FieldType::build(name, &params)?);
        Ok(FieldMapper {
            name: name.to_string(),
            simple_name: simple_name.to_string(),
            params,
            defaults,
            field_type,
            multi_fields,
            copy_to,
            index_script: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn simple_name(&self) -> &str {
        &self.simple_name
    }

    pub fn type_name(&self) -> &'static str {
        self.params.type_name()
    }

    pub fn params(&self) -> &LeafParams {
        &self.params
    }

    pub fn field_type(&self) -> &Arc<FieldType> {
        &self.field_type
    }

    pub fn multi_fields(&self) -> impl Iterator<Item = &FieldMapper> {
        self.multi_fields.values().map(Arc::as_ref)
    }

    pub fn copy_to(&self) -> &[String] {
        &self.copy_to
    }

    /// Effective `coerce`, the index default when the field leaves it unset.
    pub fn coerce(&self) -> bool {
        self.params.supports_coerce() && self.params.coerce().unwrap_or(self.defaults.coerce)
    }

    /// Effective `ignore_malformed`, the index default when the field leaves it unset.
    pub fn ignore_malformed(&self) -> bool {
        self.params.supports_ignore_malformed()
            && self
                .params
                .ignore_malformed()
                .unwrap_or(self.defaults.ignore_malformed)
    }

    /// Whether the field takes its values from an index-time script.
    pub fn has_index_script(&self) -> bool {
        self.index_script.is_some()
    }

    /// Whether an array value is handed to the field as a whole rather than element by element.
    pub fn parses_arrays_natively(&self) -> bool {
        matches!(self.params, LeafParams::GeoPoint(_))
    }

    /// Whether an object value is a legitimate value of the field.
    pub fn parses_objects(&self) -> bool {
        matches!(
            self.params,
            LeafParams::GeoPoint(_) | LeafParams::Flattened(_)
        )
    }

    /// Indexes one value into this field and its multi-fields.
    pub(crate) fn index_value(
        &self,
        value: &JsonValue,
        ctx: &mut LeafContext,
    ) -> Result<(), DocParsingError> {
        if self.has_index_script() {
            return Err(DocParsingError::parse(
                TokenLocation::default(),
                "Cannot index data directly into a field with a [script] parameter",
            ));
        }
        if let Err(reason) =
            index_leaf_value(&self.field_type, &self.params, self.coerce(), value, ctx)
        {
            if !self.ignore_malformed() {
                return Err(DocParsingError::Malformed {
                    field: self.name.clone(),
                    field_type: self.type_name().to_string(),
                    reason,
                });
            }
            rate_limited_warn!(
                limit_per_min = 10,
                field = %self.name,
                "ignoring malformed value: {reason}"
            );
            ctx.ignore(&self.name);
        }
        for multi_field in self.multi_fields.values() {
            multi_field.index_value(value, ctx)?;
        }
        Ok(())
    }

    /// Runs the index-time script against the document source and indexes what it emits.
    pub(crate) fn index_script_values(
        &self,
        source: &JsonValue,
        ctx: &mut LeafContext,
    ) -> Result<(), DocParsingError> {
        let Some(index_script) = &self.index_script else {
            return Ok(());
        };
        let result = index_script
            .new_instance(0)
            .execute(source)
            .and_then(|values| {
                values.iter().try_for_each(|value| {
                    index_leaf_value(&self.field_type, &self.params, true, value, ctx)
                })
            });
        let Err(reason) = result else {
            return Ok(());
        };
        if self.params.on_script_error() == OnScriptError::Fail {
            return Err(DocParsingError::Script {
                field: self.name.clone(),
                reason,
            });
        }
        rate_limited_warn!(
            limit_per_min = 10,
            field = %self.name,
            "ignoring index-time script failure: {reason}"
        );
        ctx.ignore(&self.name);
        Ok(())
    }

    pub fn merge(
        &self,
        incoming: &FieldMapper,
        reason: MergeReason,
        ctx: &MappingParserContext,
    ) -> Result<FieldMapper, MergeError> {
        if reason == MergeReason::IndexTemplate {
            return Ok(incoming.clone());
        }
        if self.type_name() != incoming.type_name() {
            return Err(MergeError::TypeConflict {
                field: self.name.clone(),
                existing: self.type_name().to_string(),
                incoming: incoming.type_name().to_string(),
            });
        }
        let mut conflicts = Conflicts::new(&self.name);
        let params = self.params.merge(&incoming.params, &mut conflicts);
        conflicts.into_result()?;
        let mut multi_fields = self.multi_fields.clone();
        for (sub_name, incoming_multi_field) in &incoming.multi_fields {
            let multi_field = match self.multi_fields.get(sub_name) {
                Some(existing) => Arc::new(existing.merge(incoming_multi_field, reason, ctx)?),
                None => incoming_multi_field.clone(),
            };
            multi_fields.insert(sub_name.clone(), multi_field);
        }
        if params == self.params {
            return Ok(FieldMapper {
                multi_fields,
                copy_to: incoming.copy_to.clone(),
                ..self.clone()
            });
        }
        let mut merged = FieldMapper::build(
            &self.name,
            &self.simple_name,
            params,
            self.defaults,
            multi_fields,
            incoming.copy_to.clone(),
        )?;
        // `script` cannot change through a merge.
        merged.index_script = self.index_script.clone();
        Ok(merged)
    }

    pub fn to_json(&self) -> JsonMap<String, JsonValue> {
        let mut json = JsonMap::new();
        json.insert("type".to_string(), JsonValue::from(self.type_name()));
        json.extend(self.params.to_json());
        if !self.copy_to.is_empty() {
            json.insert("copy_to".to_string(), JsonValue::from(self.copy_to.clone()));
        }
        if !self.multi_fields.is_empty() {
            let fields = self
                .multi_fields
                .iter()
                .map(|(sub_name, multi_field)| {
                    (sub_name.clone(), JsonValue::Object(multi_field.to_json()))
                })
                .collect();
            json.insert("fields".to_string(), JsonValue::Object(fields));
        }
        json
    }
}
