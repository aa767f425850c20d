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

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use mapwright_datetime::{DateFormatter, DEFAULT_DYNAMIC_DATE_FORMATS};
use once_cell::sync::Lazy;
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{
    split_field_name, Dynamic, DynamicTemplate, Mapper, MappingParserContext, MergeReason,
    ObjectMapper,
};
use crate::field_type::{FieldType, RuntimeFieldDefinition, RuntimeFieldType};
use crate::{MappingError, MergeError};

pub const DEFAULT_DATE_DETECTION: bool = true;

pub const DEFAULT_NUMERIC_DETECTION: bool = false;

static DEFAULT_DYNAMIC_DATE_FORMATTERS: Lazy<Vec<DateFormatter>> = Lazy::new(|| {
    DEFAULT_DYNAMIC_DATE_FORMATS
        .iter()
        .filter_map(|pattern| DateFormatter::from_str(pattern).ok())
        .collect()
});

/// A field declared in the `runtime` section of the mapping.
#[derive(Clone, Debug)]
pub struct RuntimeField {
    name: String,
    definition: RuntimeFieldDefinition,
    field_type: Arc<FieldType>,
}

impl RuntimeField {
    pub fn build(
        name: &str,
        definition: RuntimeFieldDefinition,
        ctx: &MappingParserContext,
    ) -> Result<RuntimeField, MappingError> {
        split_field_name(name)?;
        let field_type =
            RuntimeFieldType::build(name, &definition, ctx.script_compiler.as_ref())?;
        Ok(RuntimeField {
            name: name.to_string(),
            definition,
            field_type: Arc::new(field_type),
        })
    }

    fn parse(
        name: &str,
        definition: &JsonValue,
        ctx: &MappingParserContext,
    ) -> Result<RuntimeField, MappingError> {
        let definition: RuntimeFieldDefinition = serde_json::from_value(definition.clone())
            .map_err(|error| MappingError::invalid_definition(name, error))?;
        RuntimeField::build(name, definition, ctx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &RuntimeFieldDefinition {
        &self.definition
    }

    pub fn field_type(&self) -> &Arc<FieldType> {
        &self.field_type
    }
}

/// The root of the mapping tree, with the settings that only exist at the root.
#[derive(Clone, Debug)]
pub struct RootObjectMapper {
    object: ObjectMapper,
    runtime_fields: BTreeMap<String, RuntimeField>,
    // Runtime fields an update sets to `null`.
    runtime_removals: BTreeSet<String>,
    dynamic_templates: Option<Vec<DynamicTemplate>>,
    date_detection: Option<bool>,
    dynamic_date_formats: Option<Vec<DateFormatter>>,
    numeric_detection: Option<bool>,
}

impl Default for RootObjectMapper {
    fn default() -> Self {
        RootObjectMapper::new(ObjectMapper::new("", ""))
    }
}

fn parse_bool(param: &str, value: &JsonValue) -> Result<bool, MappingError> {
    value.as_bool().ok_or_else(|| {
        MappingError::invalid_definition(param, format!("expected a boolean, got `{value}`"))
    })
}

impl RootObjectMapper {
    fn new(object: ObjectMapper) -> RootObjectMapper {
        RootObjectMapper {
            object,
            runtime_fields: BTreeMap::new(),
            runtime_removals: BTreeSet::new(),
            dynamic_templates: None,
            date_detection: None,
            dynamic_date_formats: None,
            numeric_detection: None,
        }
    }

    /// Parses the root of a mapping definition, metadata fields and `_meta` excluded.
    pub fn parse(
        mut definition: JsonMap<String, JsonValue>,
        ctx: &MappingParserContext,
    ) -> Result<RootObjectMapper, MappingError> {
        let runtime = definition.remove("runtime");
        let dynamic_templates = definition.remove("dynamic_templates");
        let date_detection = definition.remove("date_detection");
        let dynamic_date_formats = definition.remove("dynamic_date_formats");
        let numeric_detection = definition.remove("numeric_detection");
        let mut root = RootObjectMapper::new(ObjectMapper::parse("", "", false, definition, ctx)?);
        match runtime {
            None => {}
            Some(JsonValue::Object(runtime)) => {
                for (name, definition) in runtime {
                    if definition.is_null() {
                        root.runtime_removals.insert(name);
                        continue;
                    }
                    let runtime_field = RuntimeField::parse(&name, &definition, ctx)?;
                    root.runtime_fields.insert(name, runtime_field);
                }
            }
            Some(other) => {
                return Err(MappingError::invalid_definition(
                    "runtime",
                    format!("expected an object, got `{other}`"),
                ))
            }
        }
        if let Some(dynamic_templates) = dynamic_templates {
            root.dynamic_templates = Some(DynamicTemplate::parse_list(&dynamic_templates, ctx)?);
        }
        if let Some(date_detection) = date_detection {
            root.date_detection = Some(parse_bool("date_detection", &date_detection)?);
        }
        if let Some(numeric_detection) = numeric_detection {
            root.numeric_detection = Some(parse_bool("numeric_detection", &numeric_detection)?);
        }
        if let Some(formats) = dynamic_date_formats {
            let patterns = match formats {
                JsonValue::String(pattern) => vec![JsonValue::String(pattern)],
                JsonValue::Array(patterns) => patterns,
                other => {
                    return Err(MappingError::invalid_definition(
                        "dynamic_date_formats",
                        format!("expected an array of date formats, got `{other}`"),
                    ))
                }
            };
            let formatters = patterns
                .iter()
                .map(|pattern| {
                    let pattern = pattern.as_str().ok_or_else(|| {
                        MappingError::invalid_definition(
                            "dynamic_date_formats",
                            format!("expected a date format, got `{pattern}`"),
                        )
                    })?;
                    DateFormatter::from_str(pattern).map_err(|error| {
                        MappingError::invalid_definition("dynamic_date_formats", error)
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            root.dynamic_date_formats = Some(formatters);
        }
        Ok(root)
    }

    pub fn object(&self) -> &ObjectMapper {
        &self.object
    }

    /// The root policy for new fields, `true` unless declared otherwise.
    pub fn dynamic(&self) -> Dynamic {
        self.object.dynamic().unwrap_or(Dynamic::True)
    }

    pub fn runtime_fields(&self) -> impl Iterator<Item = &RuntimeField> {
        self.runtime_fields.values()
    }

    pub fn runtime_field(&self, name: &str) -> Option<&RuntimeField> {
        self.runtime_fields.get(name)
    }

    pub fn dynamic_templates(&self) -> &[DynamicTemplate] {
        self.dynamic_templates.as_deref().unwrap_or_default()
    }

    pub fn date_detection(&self) -> bool {
        self.date_detection.unwrap_or(DEFAULT_DATE_DETECTION)
    }

    pub fn dynamic_date_formats(&self) -> &[DateFormatter] {
        self.dynamic_date_formats
            .as_deref()
            .unwrap_or(&DEFAULT_DYNAMIC_DATE_FORMATTERS)
    }

    pub fn numeric_detection(&self) -> bool {
        self.numeric_detection.unwrap_or(DEFAULT_NUMERIC_DETECTION)
    }

    /// An update carrying new children and runtime fields, the root settings left unchanged.
    pub fn mapping_update(
        &self,
        children: impl IntoIterator<Item = Mapper>,
        runtime_fields: impl IntoIterator<Item = RuntimeField>,
    ) -> RootObjectMapper {
        let mut update = RootObjectMapper::new(self.object.mapping_update(children));
        update.runtime_fields = runtime_fields
            .into_iter()
            .map(|runtime_field| (runtime_field.name.clone(), runtime_field))
            .collect();
        update
    }

    pub fn merge(
        &self,
        incoming: &RootObjectMapper,
        reason: MergeReason,
        ctx: &MappingParserContext,
    ) -> Result<RootObjectMapper, MergeError> {
        let mut merged = RootObjectMapper::new(self.object.merge(&incoming.object, reason, ctx)?);
        merged.runtime_fields = self.runtime_fields.clone();
        for name in &incoming.runtime_removals {
            merged.runtime_fields.remove(name);
        }
        for (name, runtime_field) in &incoming.runtime_fields {
            merged
                .runtime_fields
                .insert(name.clone(), runtime_field.clone());
        }
        merged.dynamic_templates = match (&self.dynamic_templates, &incoming.dynamic_templates) {
            (existing, None) => existing.clone(),
            (Some(existing), Some(incoming)) if reason == MergeReason::IndexTemplate => {
                let mut templates = existing.clone();
                for template in incoming {
                    match templates
                        .iter_mut()
                        .find(|existing| existing.name() == template.name())
                    {
                        Some(existing) => *existing = template.clone(),
                        None => templates.push(template.clone()),
                    }
                }
                Some(templates)
            }
            (_, Some(incoming)) => Some(incoming.clone()),
        };
        merged.date_detection = incoming.date_detection.or(self.date_detection);
        merged.dynamic_date_formats = incoming
            .dynamic_date_formats
            .clone()
            .or_else(|| self.dynamic_date_formats.clone());
        merged.numeric_detection = incoming.numeric_detection.or(self.numeric_detection);
        Ok(merged)
    }

    pub fn to_json(&self) -> JsonMap<String, JsonValue> {
        let mut json = JsonMap::new();
        self.object.params_to_json(&mut json);
        if let Some(dynamic_templates) = &self.dynamic_templates {
            json.insert(
                "dynamic_templates".to_string(),
                JsonValue::Array(dynamic_templates.iter().map(DynamicTemplate::to_json).collect()),
            );
        }
        if let Some(date_detection) = self.date_detection {
            json.insert("date_detection".to_string(), JsonValue::Bool(date_detection));
        }
        if let Some(formats) = &self.dynamic_date_formats {
            json.insert(
                "dynamic_date_formats".to_string(),
                formats
                    .iter()
                    .map(|formatter| JsonValue::from(formatter.pattern()))
                    .collect(),
            );
        }
        if let Some(numeric_detection) = self.numeric_detection {
            json.insert(
                "numeric_detection".to_string(),
                JsonValue::Bool(numeric_detection),
            );
        }
        if !self.runtime_fields.is_empty() || !self.runtime_removals.is_empty() {
            let mut runtime: JsonMap<String, JsonValue> = self
                .runtime_fields
                .iter()
                .map(|(name, runtime_field)| {
                    let definition =
                        serde_json::to_value(&runtime_field.definition).unwrap_or_default();
                    (name.clone(), definition)
                })
                .collect();
            for name in &self.runtime_removals {
                runtime.insert(name.clone(), JsonValue::Null);
            }
            json.insert("runtime".to_string(), JsonValue::Object(runtime));
        }
        if self.object.num_children() > 0 {
            json.insert(
                "properties".to_string(),
                JsonValue::Object(self.object.properties_to_json()),
            );
        }
        json
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse_root(definition: JsonValue) -> Result<RootObjectMapper, MappingError> {
        let JsonValue::Object(definition) = definition else {
            panic!("expected an object");
        };
        RootObjectMapper::parse(definition, &MappingParserContext::default())
    }

    fn merge(existing: JsonValue, incoming: JsonValue, reason: MergeReason) -> RootObjectMapper {
        parse_root(existing)
            .unwrap()
            .merge(
                &parse_root(incoming).unwrap(),
                reason,
                &MappingParserContext::default(),
            )
            .unwrap()
    }

    #[test]
    fn test_root_defaults() {
        let root = parse_root(json!({})).unwrap();
        assert_eq!(root.dynamic(), Dynamic::True);
        assert!(root.date_detection());
        assert!(!root.numeric_detection());
        let patterns: Vec<&str> = root
            .dynamic_date_formats()
            .iter()
            .map(DateFormatter::pattern)
            .collect();
        assert_eq!(
            patterns,
            ["strict_date_optional_time", "yyyy/MM/dd HH:mm:ss||yyyy/MM/dd"]
        );
        assert!(root.to_json().is_empty());
    }

    #[test]
    fn test_root_serialization_round_trip() {
        let definition = json!({
            "dynamic": "strict",
            "date_detection": false,
            "dynamic_date_formats": ["yyyy-MM-dd"],
            "numeric_detection": true,
            "dynamic_templates": [
                {"strings": {"match_mapping_type": "string", "mapping": {"type": "keyword"}}}
            ],
            "runtime": {"day": {"type": "keyword"}},
            "properties": {"title": {"type": "text"}}
        });
        let root = parse_root(definition.clone()).unwrap();
        assert_eq!(JsonValue::Object(root.to_json()), definition);
    }

    #[test]
    fn test_runtime_fields_are_replaced_and_removed() {
        let merged = merge(
            json!({"runtime": {"a": {"type": "long"}, "b": {"type": "keyword"}}}),
            json!({"runtime": {"a": {"type": "double"}, "b": null}}),
            MergeReason::MappingUpdate,
        );
        assert_eq!(merged.runtime_field("a").unwrap().definition().type_name, "double");
        assert!(merged.runtime_field("b").is_none());
    }

    #[test]
    fn test_invalid_runtime_field() {
        let error = parse_root(json!({"runtime": {"a": {"type": "text"}}})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "No handler for type [text] declared on runtime field [a]"
        );
    }

    #[test]
    fn test_dynamic_templates_merge() {
        let existing = json!({"dynamic_templates": [
            {"a": {"match": "a*", "mapping": {"type": "keyword"}}},
            {"b": {"match": "b*", "mapping": {"type": "keyword"}}}
        ]});
        let incoming = json!({"dynamic_templates": [
            {"b": {"match": "b*", "mapping": {"type": "long"}}},
            {"c": {"match": "c*", "mapping": {"type": "long"}}}
        ]});
        let template_names = |root: &RootObjectMapper| -> Vec<String> {
            root.dynamic_templates()
                .iter()
                .map(|template| template.name().to_string())
                .collect()
        };
        let merged = merge(existing.clone(), incoming.clone(), MergeReason::IndexTemplate);
        assert_eq!(template_names(&merged), ["a", "b", "c"]);
        let merged = merge(existing.clone(), incoming, MergeReason::MappingUpdate);
        assert_eq!(template_names(&merged), ["b", "c"]);
        let merged = merge(existing, json!({"date_detection": false}), MergeReason::MappingUpdate);
        assert_eq!(merged.dynamic_templates().len(), 2);
        assert!(!merged.date_detection());
    }
}
