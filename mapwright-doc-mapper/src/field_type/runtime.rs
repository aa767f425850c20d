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
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use mapwright_datetime::{DateFormatter, DateResolution};
use mapwright_query::{JsonLiteral, Query, QueryError, ScriptPredicate, SearchExecutionContext};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::boolean::parse_bool;
use super::date::DateKind;
use super::ip::{format_ip, parse_ip};
use super::{scalar_to_string, FieldType, FieldTypeKind, NumberType, NumberValue, TextSearchInfo};
use crate::MappingError;

const DEFAULT_SCRIPT_LANG: &str = "painless";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RuntimeKind {
    Keyword,
    Long,
    Double,
    Boolean,
    Ip,
    Date,
}

impl RuntimeKind {
    pub fn from_type_name(type_name: &str) -> Option<RuntimeKind> {
        let kind = match type_name {
            "keyword" => RuntimeKind::Keyword,
            "long" => RuntimeKind::Long,
            "double" => RuntimeKind::Double,
            "boolean" => RuntimeKind::Boolean,
            "ip" => RuntimeKind::Ip,
            "date" => RuntimeKind::Date,
            _ => return None,
        };
        Some(kind)
    }

    pub fn type_name(self) -> &'static str {
        match self {
            RuntimeKind::Keyword => "keyword",
            RuntimeKind::Long => "long",
            RuntimeKind::Double => "double",
            RuntimeKind::Boolean => "boolean",
            RuntimeKind::Ip => "ip",
            RuntimeKind::Date => "date",
        }
    }
}

fn is_default_lang(lang: &String) -> bool {
    lang == DEFAULT_SCRIPT_LANG
}

fn default_lang() -> String {
    DEFAULT_SCRIPT_LANG.to_string()
}

/// A script as written in a mapping, either `"source"` or `{"source": ..., "lang": ...}`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Script {
    pub source: String,
    #[serde(skip_serializing_if = "is_default_lang")]
    pub lang: String,
    #[serde(skip_serializing_if = "JsonMap::is_empty")]
    pub params: JsonMap<String, JsonValue>,
}

impl Script {
    pub fn new(source: &str) -> Script {
        Script {
            source: source.to_string(),
            lang: default_lang(),
            params: JsonMap::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptObject {
    source: String,
    #[serde(default = "default_lang")]
    lang: String,
    #[serde(default)]
    params: JsonMap<String, JsonValue>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptRepr {
    Source(String),
    Object(ScriptObject),
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: Deserializer<'de> {
        let script = match ScriptRepr::deserialize(deserializer)? {
            ScriptRepr::Source(source) => Script::new(&source),
            ScriptRepr::Object(object) => Script {
                source: object.source,
                lang: object.lang,
                params: object.params,
            },
        };
        Ok(script)
    }
}

/// Values emitted by a compiled script for the documents of one segment.
pub trait LeafValues {
    fn execute(&mut self, source: &JsonValue) -> Result<Vec<JsonValue>, String>;
}

/// A compiled script, instantiated once per segment.
pub trait LeafFactory: fmt::Debug + Send + Sync {
    fn new_instance(&self, segment_ord: u32) -> Box<dyn LeafValues>;
}

/// Turns the script of a runtime field into something that can run against documents.
pub trait ScriptCompiler: fmt::Debug + Send + Sync {
    fn compile(
        &self,
        field: &str,
        script: Option<&Script>,
        kind: RuntimeKind,
    ) -> Result<Arc<dyn LeafFactory>, MappingError>;
}

static EMIT_SOURCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*emit\(\s*params\._source\[\s*['"]([^'"]+)['"]\s*\]\s*\)\s*;?\s*$"#)
        .expect("the emit pattern should compile")
});

/// Compiler for runtime fields that read their value from `_source`: either the field without
/// a script, which reads the path of the field itself, or `emit(params._source['path'])`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceLookupCompiler;

impl ScriptCompiler for SourceLookupCompiler {
    fn compile(
        &self,
        field: &str,
        script: Option<&Script>,
        kind: RuntimeKind,
    ) -> Result<Arc<dyn LeafFactory>, MappingError> {
        let path = match script {
            None => field.to_string(),
            Some(script) => {
                if script.lang != DEFAULT_SCRIPT_LANG {
                    return Err(MappingError::invalid_definition(
                        field,
                        format!("script_lang not supported [{}]", script.lang),
                    ));
                }
                let captures = EMIT_SOURCE_RE.captures(&script.source).ok_or_else(|| {
                    MappingError::invalid_definition(
                        field,
                        format!(
                            "cannot compile script [{}]: only `emit(params._source['<path>'])` is \
                             supported",
                            script.source
                        ),
                    )
                })?;
                captures[1].to_string()
            }
        };
        Ok(Arc::new(SourceLookupFactory { path, kind }))
    }
}

#[derive(Debug)]
struct SourceLookupFactory {
    path: String,
    kind: RuntimeKind,
}

impl LeafFactory for SourceLookupFactory {
    fn new_instance(&self, _segment_ord: u32) -> Box<dyn LeafValues> {
        Box::new(SourceLookupValues {
            path: self.path.clone(),
            kind: self.kind,
            date_kind: DateKind {
                resolution: DateResolution::Milliseconds,
                formatter: DateFormatter::default(),
            },
        })
    }
}

struct SourceLookupValues {
    path: String,
    kind: RuntimeKind,
    date_kind: DateKind,
}

/// Collects the values found at `path`, whether the source nests objects or uses dotted keys.
fn collect_source_values<'a>(value: &'a JsonValue, path: &str, values: &mut Vec<&'a JsonValue>) {
    match value {
        JsonValue::Array(elements) => {
            for element in elements {
                collect_source_values(element, path, values);
            }
        }
        JsonValue::Object(map) if !path.is_empty() => {
            if let Some(child) = map.get(path) {
                collect_source_values(child, "", values);
            }
            for (dot_position, _) in path.match_indices('.') {
                if let Some(child) = map.get(&path[..dot_position]) {
                    collect_source_values(child, &path[dot_position + 1..], values);
                }
            }
        }
        JsonValue::Null => {}
        leaf if path.is_empty() => values.push(leaf),
        _ => {}
    }
}

impl SourceLookupValues {
    fn convert(&self, value: &JsonValue) -> Result<JsonValue, String> {
        convert_value(self.kind, &self.date_kind, value)
    }
}

impl LeafValues for SourceLookupValues {
    fn execute(&mut self, source: &JsonValue) -> Result<Vec<JsonValue>, String> {
        let mut raw_values = Vec::new();
        collect_source_values(source, &self.path, &mut raw_values);
        raw_values
            .into_iter()
            .map(|value| self.convert(value))
            .collect()
    }
}

/// Normalizes a value to what a runtime field of `kind` emits.
fn convert_value(
    kind: RuntimeKind,
    date_kind: &DateKind,
    value: &JsonValue,
) -> Result<JsonValue, String> {
    let converted = match kind {
        RuntimeKind::Keyword => JsonValue::String(scalar_to_string(value)?.into_owned()),
        RuntimeKind::Long => match NumberType::Long.parse(value, true)? {
            Some(NumberValue::Long(value)) => JsonValue::from(value),
            _ => return Err(format!("[{value}] is not a long")),
        },
        RuntimeKind::Double => match NumberType::Double.parse(value, true)? {
            Some(number) => number.to_json(),
            None => return Err(format!("[{value}] is not a double")),
        },
        RuntimeKind::Boolean => JsonValue::Bool(parse_bool(value)?),
        RuntimeKind::Ip => {
            let text = value
                .as_str()
                .ok_or_else(|| format!("'{value}' is not an IP string literal."))?;
            JsonValue::String(format_ip(parse_ip(text)?))
        }
        RuntimeKind::Date => JsonValue::from(date_kind.parse(value)?),
    };
    Ok(converted)
}

/// How a runtime field is declared in the `runtime` section of a mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeFieldDefinition {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<DateFormatter>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

/// A field computed at search time. It is never indexed and all its queries run the script on
/// every candidate document.
#[derive(Clone, Debug)]
pub struct RuntimeFieldType {
    kind: RuntimeKind,
    script: Option<Script>,
    date_kind: DateKind,
    factory: Arc<dyn LeafFactory>,
}

impl RuntimeFieldType {
    pub fn build(
        name: &str,
        definition: &RuntimeFieldDefinition,
        compiler: &dyn ScriptCompiler,
    ) -> Result<FieldType, MappingError> {
        let kind = RuntimeKind::from_type_name(&definition.type_name).ok_or_else(|| {
            MappingError::UnknownRuntimeType {
                field: name.to_string(),
                type_name: definition.type_name.clone(),
            }
        })?;
        if definition.format.is_some() && kind != RuntimeKind::Date {
            return Err(MappingError::invalid_definition(
                name,
                format!(
                    "unknown parameter [format] on runtime field [{name}] of type [{}]",
                    kind.type_name()
                ),
            ));
        }
        let factory = compiler.compile(name, definition.script.as_ref(), kind)?;
        Ok(FieldType {
            name: name.to_string(),
            is_indexed: false,
            is_stored: false,
            has_doc_values: true,
            text_search_info: if kind == RuntimeKind::Keyword {
                TextSearchInfo::keyword(None)
            } else {
                TextSearchInfo::none()
            },
            meta: definition.meta.clone(),
            kind: FieldTypeKind::Runtime(RuntimeFieldType {
                kind,
                script: definition.script.clone(),
                date_kind: DateKind {
                    resolution: DateResolution::Milliseconds,
                    formatter: definition.format.clone().unwrap_or_default(),
                },
                factory,
            }),
        })
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    /// Runs the script against one document source.
    pub fn values(&self, source: &JsonValue, segment_ord: u32) -> Result<Vec<JsonValue>, String> {
        self.factory.new_instance(segment_ord).execute(source)
    }

    fn script_query(
        &self,
        field_type: &FieldType,
        query_kind: &str,
        predicate: ScriptPredicate,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        ctx.check_expensive_query_allowed(query_kind, &field_type.name)?;
        let script = match &self.script {
            Some(script) => script.source.clone(),
            None => format!("params._source['{}']", field_type.name),
        };
        Ok(Query::Script {
            field: field_type.name.clone(),
            script,
            value_type: self.kind.type_name(),
            predicate,
        })
    }

    fn query_value(&self, field: &str, literal: &JsonLiteral) -> Result<JsonValue, QueryError> {
        let value = match literal {
            JsonLiteral::Number(number) => JsonValue::Number(number.clone()),
            JsonLiteral::String(text) => JsonValue::String(text.clone()),
            JsonLiteral::Bool(value) => JsonValue::Bool(*value),
        };
        convert_value(self.kind, &self.date_kind, &value)
            .map_err(|reason| QueryError::invalid_value(field, reason))
    }

    fn check_keyword(&self, field_type: &FieldType, query_kind: &str) -> Result<(), QueryError> {
        if self.kind != RuntimeKind::Keyword {
            return Err(QueryError::unsupported(
                &field_type.name,
                query_kind,
                self.kind.type_name(),
            ));
        }
        Ok(())
    }

    pub(crate) fn term_query(
        &self,
        field_type: &FieldType,
        value: &JsonLiteral,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        let value = self.query_value(&field_type.name, value)?;
        self.script_query(field_type, "term", ScriptPredicate::Terms(vec![value]), ctx)
    }

    pub(crate) fn terms_query(
        &self,
        field_type: &FieldType,
        values: &[JsonLiteral],
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        let values = values
            .iter()
            .map(|value| self.query_value(&field_type.name, value))
            .collect::<Result<Vec<JsonValue>, QueryError>>()?;
        self.script_query(field_type, "terms", ScriptPredicate::Terms(values), ctx)
    }

    pub(crate) fn range_query(
        &self,
        field_type: &FieldType,
        lower: Option<&JsonLiteral>,
        upper: Option<&JsonLiteral>,
        include_lower: bool,
        include_upper: bool,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        let bound = |value: Option<&JsonLiteral>,
                     inclusive: bool|
         -> Result<Bound<JsonValue>, QueryError> {
            let Some(value) = value else {
                return Ok(Bound::Unbounded);
            };
            let value = self.query_value(&field_type.name, value)?;
            Ok(if inclusive {
                Bound::Included(value)
            } else {
                Bound::Excluded(value)
            })
        };
        let predicate = ScriptPredicate::Range {
            lower: bound(lower, include_lower)?,
            upper: bound(upper, include_upper)?,
        };
        self.script_query(field_type, "range", predicate, ctx)
    }

    pub(crate) fn exists_query(
        &self,
        field_type: &FieldType,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.script_query(field_type, "exists", ScriptPredicate::Exists, ctx)
    }

    pub(crate) fn prefix_query(
        &self,
        field_type: &FieldType,
        prefix: &str,
        case_insensitive: bool,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_keyword(field_type, "prefix")?;
        let predicate = ScriptPredicate::Prefix {
            prefix: prefix.to_string(),
            case_insensitive,
        };
        self.script_query(field_type, "prefix", predicate, ctx)
    }

    pub(crate) fn wildcard_query(
        &self,
        field_type: &FieldType,
        pattern: &str,
        case_insensitive: bool,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_keyword(field_type, "wildcard")?;
        let predicate = ScriptPredicate::Wildcard {
            pattern: pattern.to_string(),
            case_insensitive,
        };
        self.script_query(field_type, "wildcard", predicate, ctx)
    }

    pub(crate) fn regexp_query(
        &self,
        field_type: &FieldType,
        pattern: &str,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_keyword(field_type, "regexp")?;
        let predicate = ScriptPredicate::Regexp {
            pattern: pattern.to_string(),
        };
        self.script_query(field_type, "regexp", predicate, ctx)
    }

    pub(crate) fn fuzzy_query(
        &self,
        field_type: &FieldType,
        value: &str,
        max_edits: u8,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_keyword(field_type, "fuzzy")?;
        let predicate = ScriptPredicate::Fuzzy {
            value: value.to_string(),
            max_edits,
        };
        self.script_query(field_type, "fuzzy", predicate, ctx)
    }
}
