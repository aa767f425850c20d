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

use std::fmt;

use itertools::Itertools;
use regex::Regex;
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{Mapper, MappingParserContext};
use crate::field_type::{RuntimeFieldDefinition, RuntimeFieldType};
use crate::MappingError;

/// The kind of JSON value a new field was found with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum XContentFieldType {
    Object,
    String,
    Long,
    Double,
    Boolean,
    Date,
    Binary,
}

impl XContentFieldType {
    pub const ALL: [XContentFieldType; 7] = [
        XContentFieldType::Object,
        XContentFieldType::String,
        XContentFieldType::Long,
        XContentFieldType::Double,
        XContentFieldType::Boolean,
        XContentFieldType::Date,
        XContentFieldType::Binary,
    ];

    pub fn name(self) -> &'static str {
        match self {
            XContentFieldType::Object => "object",
            XContentFieldType::String => "string",
            XContentFieldType::Long => "long",
            XContentFieldType::Double => "double",
            XContentFieldType::Boolean => "boolean",
            XContentFieldType::Date => "date",
            XContentFieldType::Binary => "binary",
        }
    }

    pub fn from_name(name: &str) -> Option<XContentFieldType> {
        XContentFieldType::ALL
            .into_iter()
            .find(|field_type| field_type.name() == name)
    }

    /// Mapping type used by a template that does not declare one.
    pub fn default_mapping_type(self) -> &'static str {
        match self {
            XContentFieldType::Object => "object",
            XContentFieldType::String => "text",
            XContentFieldType::Long => "long",
            XContentFieldType::Double => "float",
            XContentFieldType::Boolean => "boolean",
            XContentFieldType::Date => "date",
            XContentFieldType::Binary => "binary",
        }
    }

    /// Runtime field type a value of this kind maps to, `None` when it cannot be a runtime field.
    pub fn default_runtime_type(self) -> Option<&'static str> {
        match self {
            XContentFieldType::String => Some("keyword"),
            XContentFieldType::Long => Some("long"),
            XContentFieldType::Double => Some("double"),
            XContentFieldType::Boolean => Some("boolean"),
            XContentFieldType::Date => Some("date"),
            XContentFieldType::Object | XContentFieldType::Binary => None,
        }
    }
}

impl fmt::Display for XContentFieldType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// How `match`, `unmatch`, `path_match` and `path_unmatch` patterns are interpreted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MatchType {
    /// `*` wildcards.
    #[default]
    Simple,
    Regex,
}

#[derive(Clone, Debug, Default)]
struct Patterns {
    path_match: Vec<Regex>,
    path_unmatch: Vec<Regex>,
    name_match: Vec<Regex>,
    name_unmatch: Vec<Regex>,
}

/// A rule applied to new fields before type inference kicks in.
#[derive(Clone, Debug)]
pub struct DynamicTemplate {
    name: String,
    match_type: MatchType,
    // Empty matches any kind of value.
    match_mapping_types: Vec<XContentFieldType>,
    patterns: Patterns,
    mapping: JsonMap<String, JsonValue>,
    runtime: bool,
    definition: JsonValue,
}

fn string_or_strings(
    template_name: &str,
    param: &str,
    value: &JsonValue,
) -> Result<Vec<String>, MappingError> {
    let invalid = || MappingError::InvalidDynamicTemplate {
        name: template_name.to_string(),
        reason: format!("[{param}] must be a string or an array of strings"),
    };
    match value {
        JsonValue::String(value) => Ok(vec![value.clone()]),
        JsonValue::Array(values) => values
            .iter()
            .map(|value| value.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

fn simple_pattern_to_regex(pattern: &str) -> String {
    format!(
        "^{}$",
        pattern.split('*').map(regex::escape).join(".*")
    )
}

fn substitute(value: &JsonValue, name: &str, dynamic_type: &str) -> JsonValue {
    let substitute_str =
        |text: &str| text.replace("{name}", name).replace("{dynamic_type}", dynamic_type);
    match value {
        JsonValue::String(text) => JsonValue::String(substitute_str(text)),
        JsonValue::Array(values) => JsonValue::Array(
            values
                .iter()
                .map(|value| substitute(value, name, dynamic_type))
                .collect(),
        ),
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(key, value)| (substitute_str(key), substitute(value, name, dynamic_type)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl DynamicTemplate {
    /// Parses the `dynamic_templates` array of a root mapping.
    pub fn parse_list(
        value: &JsonValue,
        ctx: &MappingParserContext,
    ) -> Result<Vec<DynamicTemplate>, MappingError> {
        let JsonValue::Array(entries) = value else {
            return Err(MappingError::DynamicTemplateSyntax);
        };
        entries
            .iter()
            .map(|entry| match entry {
                JsonValue::Object(entry) if entry.len() == 1 => {
                    let (name, definition) = entry
                        .iter()
                        .next()
                        .ok_or(MappingError::DynamicTemplateSyntax)?;
                    DynamicTemplate::parse(name, definition, ctx)
                }
                _ => Err(MappingError::DynamicTemplateSyntax),
            })
            .collect()
    }

    pub fn parse(
        name: &str,
        definition: &JsonValue,
        ctx: &MappingParserContext,
    ) -> Result<DynamicTemplate, MappingError> {
        let invalid = |reason: String| MappingError::InvalidDynamicTemplate {
            name: name.to_string(),
            reason,
        };
        let JsonValue::Object(params) = definition else {
            return Err(MappingError::DynamicTemplateSyntax);
        };
        let mut match_type = MatchType::Simple;
        let mut match_mapping_types = Vec::new();
        let mut raw_patterns: [(&str, Vec<String>); 4] = [
            ("path_match", Vec::new()),
            ("path_unmatch", Vec::new()),
            ("match", Vec::new()),
            ("unmatch", Vec::new()),
        ];
        let mut mapping = None;
        let mut runtime = None;
        for (param, value) in params {
            match param.as_str() {
                "match_pattern" => {
                    match_type = match value.as_str() {
                        Some("simple") => MatchType::Simple,
                        Some("regex") => MatchType::Regex,
                        _ => {
                            return Err(invalid(format!(
                                "No matching pattern matched on [{value}]"
                            )))
                        }
                    }
                }
                "match_mapping_type" => {
                    for type_name in string_or_strings(name, param, value)? {
                        if type_name == "*" {
                            continue;
                        }
                        let field_type =
                            XContentFieldType::from_name(&type_name).ok_or_else(|| {
                                invalid(format!(
                                    "No field type matched on [{type_name}], possible values are \
                                     [{}]",
                                    XContentFieldType::ALL.iter().join(", ")
                                ))
                            })?;
                        match_mapping_types.push(field_type);
                    }
                }
                "mapping" | "runtime" => {
                    let JsonValue::Object(map) = value else {
                        return Err(invalid(format!("[{param}] must be an object")));
                    };
                    if param == "mapping" {
                        mapping = Some(map.clone());
                    } else {
                        runtime = Some(map.clone());
                    }
                }
                other => {
                    let Some((_, patterns)) = raw_patterns
                        .iter_mut()
                        .find(|(pattern_param, _)| *pattern_param == other)
                    else {
                        return Err(invalid(format!(
                            "Illegal dynamic template parameter: [{other}]"
                        )));
                    };
                    *patterns = string_or_strings(name, param, value)?;
                }
            }
        }
        let (mapping, runtime) = match (mapping, runtime) {
            (Some(mapping), None) => (mapping, false),
            (None, Some(runtime)) => (runtime, true),
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "mapping and runtime cannot be both specified in the same dynamic template"
                        .to_string(),
                ))
            }
            (None, None) => {
                return Err(invalid("template must have mapping or runtime set".to_string()))
            }
        };
        if runtime {
            if let Some(unsupported) = match_mapping_types
                .iter()
                .find(|field_type| field_type.default_runtime_type().is_none())
            {
                return Err(invalid(format!(
                    "Dynamic template [{name}] defines a runtime field but type [{unsupported}] \
                     is not supported as runtime field"
                )));
            }
        }
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, MappingError> {
            patterns
                .iter()
                .map(|pattern| {
                    let regex = match match_type {
                        MatchType::Simple => simple_pattern_to_regex(pattern),
                        MatchType::Regex => pattern.clone(),
                    };
                    Regex::new(&regex).map_err(|error| invalid(error.to_string()))
                })
                .collect()
        };
        let [(_, path_match), (_, path_unmatch), (_, name_match), (_, name_unmatch)] =
            &raw_patterns;
        let patterns = Patterns {
            path_match: compile(path_match)?,
            path_unmatch: compile(path_unmatch)?,
            name_match: compile(name_match)?,
            name_unmatch: compile(name_unmatch)?,
        };
        let template = DynamicTemplate {
            name: name.to_string(),
            match_type,
            match_mapping_types,
            patterns,
            mapping,
            runtime,
            definition: definition.clone(),
        };
        template.validate(ctx).map_err(|error| invalid(error.to_string()))?;
        Ok(template)
    }

    /// Checks that the template mapping parses for at least one kind of value it can match.
    fn validate(&self, ctx: &MappingParserContext) -> Result<(), MappingError> {
        let candidates = if self.match_mapping_types.is_empty() {
            XContentFieldType::ALL.to_vec()
        } else {
            self.match_mapping_types.clone()
        };
        let mut last_error = None;
        for field_type in candidates {
            if self.runtime && field_type.default_runtime_type().is_none() {
                continue;
            }
            let result = if self.runtime {
                self.runtime_definition("__dynamic__", field_type)
                    .and_then(|definition| {
                        RuntimeFieldType::build(
                            "__dynamic__",
                            &definition,
                            ctx.script_compiler.as_ref(),
                        )
                    })
                    .map(|_| ())
            } else {
                let mapping = JsonValue::Object(self.mapping_for("__dynamic__", field_type));
                Mapper::parse("__dynamic__", "__dynamic__", &mapping, ctx).map(|_| ())
            };
            match result {
                Ok(()) => return Ok(()),
                Err(error) => last_error = Some(error),
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Whether the template creates runtime fields rather than concrete ones.
    pub fn is_runtime(&self) -> bool {
        self.runtime
    }

    pub fn matches(&self, full_path: &str, name: &str, field_type: XContentFieldType) -> bool {
        if !self.match_mapping_types.is_empty() && !self.match_mapping_types.contains(&field_type)
        {
            return false;
        }
        if self.runtime && field_type.default_runtime_type().is_none() {
            return false;
        }
        let any_match = |patterns: &[Regex], value: &str| {
            patterns.iter().any(|pattern| pattern.is_match(value))
        };
        let patterns = &self.patterns;
        if !patterns.path_match.is_empty() && !any_match(&patterns.path_match, full_path) {
            return false;
        }
        if any_match(&patterns.path_unmatch, full_path) {
            return false;
        }
        if !patterns.name_match.is_empty() && !any_match(&patterns.name_match, name) {
            return false;
        }
        !any_match(&patterns.name_unmatch, name)
    }

    /// The template mapping with its placeholders substituted. A mapping without `type` gets the
    /// default type of the value kind.
    pub fn mapping_for(
        &self,
        name: &str,
        field_type: XContentFieldType,
    ) -> JsonMap<String, JsonValue> {
        let JsonValue::Object(mut mapping) = substitute(
            &JsonValue::Object(self.mapping.clone()),
            name,
            field_type.name(),
        ) else {
            return JsonMap::new();
        };
        if !mapping.contains_key("type") {
            let type_name = if self.runtime {
                field_type.default_runtime_type().unwrap_or("keyword")
            } else {
                field_type.default_mapping_type()
            };
            mapping.insert("type".to_string(), JsonValue::from(type_name));
        }
        mapping
    }

    pub(crate) fn runtime_definition(
        &self,
        name: &str,
        field_type: XContentFieldType,
    ) -> Result<RuntimeFieldDefinition, MappingError> {
        serde_json::from_value(JsonValue::Object(self.mapping_for(name, field_type)))
            .map_err(|error| MappingError::invalid_definition(name, error))
    }

    pub fn to_json(&self) -> JsonValue {
        let mut json = JsonMap::new();
        json.insert(self.name.clone(), self.definition.clone());
        JsonValue::Object(json)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse_templates(value: JsonValue) -> Result<Vec<DynamicTemplate>, MappingError> {
        DynamicTemplate::parse_list(&value, &MappingParserContext::default())
    }

    fn parse_template(definition: JsonValue) -> Result<DynamicTemplate, MappingError> {
        DynamicTemplate::parse("tpl", &definition, &MappingParserContext::default())
    }

    #[test]
    fn test_template_syntax_errors() {
        let error = parse_templates(json!({"tpl": {}})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Dynamic template syntax error. An array of named objects is expected."
        );
        assert!(parse_templates(json!([{"a": {}, "b": {}}])).is_err());
        let error = parse_template(json!({"match": "*"})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "dynamic template [tpl] has invalid content [template must have mapping or runtime \
             set]"
        );
        let error = parse_template(json!({"foo": 1, "mapping": {}})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "dynamic template [tpl] has invalid content [Illegal dynamic template parameter: \
             [foo]]"
        );
    }

    #[test]
    fn test_template_mapping_is_validated() {
        let error =
            parse_template(json!({"match": "*_id", "mapping": {"type": "keyword", "foo": 1}}))
                .unwrap_err();
        assert!(matches!(error, MappingError::InvalidDynamicTemplate { .. }));
        let error = parse_template(json!({"match_mapping_type": "uuid", "mapping": {}}))
            .unwrap_err();
        assert!(error.to_string().contains("No field type matched on [uuid]"));
        let error = parse_template(json!({"match_mapping_type": "object", "runtime": {}}))
            .unwrap_err();
        assert!(error
            .to_string()
            .contains("type [object] is not supported as runtime field"));
    }

    #[test]
    fn test_simple_matching() {
        let template = parse_template(json!({
            "match_mapping_type": "string",
            "path_match": "user.*",
            "unmatch": "*_text",
            "mapping": {"type": "keyword"}
        }))
        .unwrap();
        assert!(template.matches("user.name", "name", XContentFieldType::String));
        assert!(!template.matches("user.name", "name", XContentFieldType::Long));
        assert!(!template.matches("author.name", "name", XContentFieldType::String));
        assert!(!template.matches("user.bio_text", "bio_text", XContentFieldType::String));
    }

    #[test]
    fn test_regex_matching() {
        let template = parse_template(json!({
            "match_pattern": "regex",
            "match": "^count_\\d+$",
            "mapping": {"type": "long"}
        }))
        .unwrap();
        assert_eq!(template.match_type(), MatchType::Regex);
        assert!(template.matches("count_12", "count_12", XContentFieldType::Long));
        assert!(!template.matches("count_x", "count_x", XContentFieldType::Long));
    }

    #[test]
    fn test_mapping_placeholders() {
        let template = parse_template(json!({
            "mapping": {"type": "{dynamic_type}", "meta": {"source": "{name}"}}
        }))
        .unwrap();
        assert_eq!(
            JsonValue::Object(template.mapping_for("count", XContentFieldType::Long)),
            json!({"type": "long", "meta": {"source": "count"}})
        );
        let template = parse_template(json!({"mapping": {"index": false}})).unwrap();
        assert_eq!(
            JsonValue::Object(template.mapping_for("msg", XContentFieldType::String)),
            json!({"type": "text", "index": false})
        );
    }

    #[test]
    fn test_runtime_template() {
        let template = parse_template(json!({"match_mapping_type": "string", "runtime": {}}))
            .unwrap();
        assert!(template.is_runtime());
        let definition = template
            .runtime_definition("tag", XContentFieldType::String)
            .unwrap();
        assert_eq!(definition.type_name, "keyword");
        assert_eq!(
            template.to_json(),
            json!({"tpl": {"match_mapping_type": "string", "runtime": {}}})
        );
    }
}
