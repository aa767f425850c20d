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

//! Mappers for fields the mapping does not know yet, inferred from the first value found.

use std::sync::Arc;

use mapwright_datetime::DateFormatter;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use super::context::ParseContext;
use crate::mapper::{
    child_path, Dynamic, DynamicTemplate, Mapper, ObjectMapper, RuntimeField, XContentFieldType,
};
use crate::{DocParsingError, MappingError};

/// Multi-field added under every dynamically mapped string.
const KEYWORD_MULTI_FIELD: &str = "keyword";

/// Longer strings are not indexed by the keyword multi-field of a dynamic string.
const KEYWORD_IGNORE_ABOVE: u64 = 256;

/// What an unmapped value turns into.
pub(super) enum DynamicField {
    Concrete(Arc<Mapper>),
    Runtime(RuntimeField),
}

/// The policy applying to new children of `object`: its own `dynamic`, else the one of its
/// closest ancestor that sets it, else the root default.
pub(super) fn dynamic_policy(ctx: &ParseContext, object: &ObjectMapper) -> Dynamic {
    if let Some(dynamic) = object.dynamic() {
        return dynamic;
    }
    let mut path = object.name();
    while let Some((parent_path, _)) = path.rsplit_once('.') {
        let parent = ctx
            .lookup
            .object_mapper_arc(parent_path)
            .or_else(|| ctx.dynamic_mapper(parent_path))
            .and_then(|mapper| mapper.as_object());
        if let Some(dynamic) = parent.and_then(ObjectMapper::dynamic) {
            return dynamic;
        }
        path = parent_path;
    }
    ctx.root().dynamic()
}

/// The kind of a scalar value, with the date format it was detected with.
fn detect_value_type<'a>(
    ctx: &ParseContext<'a>,
    value: &JsonValue,
) -> Option<(XContentFieldType, Option<&'a DateFormatter>)> {
    let root = ctx.root();
    let field_type = match value {
        JsonValue::String(text) => {
            if root.date_detection() {
                let detected = root
                    .dynamic_date_formats()
                    .iter()
                    .find(|formatter| formatter.parse(text).is_ok());
                if let Some(formatter) = detected {
                    return Some((XContentFieldType::Date, Some(formatter)));
                }
            }
            if root.numeric_detection() && text.parse::<i64>().is_ok() {
                XContentFieldType::Long
            } else if root.numeric_detection()
                && text.parse::<f64>().is_ok_and(|number| number.is_finite())
            {
                XContentFieldType::Double
            } else {
                XContentFieldType::String
            }
        }
        JsonValue::Number(number) if number.is_i64() => XContentFieldType::Long,
        // Unsigned values above `i64::MAX` do not fit a long.
        JsonValue::Number(_) => XContentFieldType::Double,
        JsonValue::Bool(_) => XContentFieldType::Boolean,
        JsonValue::Object(_) => XContentFieldType::Object,
        JsonValue::Null | JsonValue::Array(_) => return None,
    };
    Some((field_type, None))
}

fn find_template<'a>(
    ctx: &ParseContext<'a>,
    full_path: &str,
    name: &str,
    field_type: XContentFieldType,
) -> Option<&'a DynamicTemplate> {
    ctx.root()
        .dynamic_templates()
        .iter()
        .find(|template| template.matches(full_path, name, field_type))
}

fn default_mapping(
    field_type: XContentFieldType,
    date_format: Option<&DateFormatter>,
) -> JsonMap<String, JsonValue> {
    let mapping = match field_type {
        XContentFieldType::String => json!({
            "type": "text",
            "fields": {
                KEYWORD_MULTI_FIELD: {"type": "keyword", "ignore_above": KEYWORD_IGNORE_ABOVE}
            }
        }),
        other => json!({"type": other.default_mapping_type()}),
    };
    let JsonValue::Object(mut mapping) = mapping else {
        return JsonMap::new();
    };
    add_date_format(&mut mapping, date_format);
    mapping
}

/// A detected date keeps the format it was detected with, unless the template sets one.
fn add_date_format(mapping: &mut JsonMap<String, JsonValue>, date_format: Option<&DateFormatter>) {
    let Some(date_format) = date_format else {
        return;
    };
    let is_date = matches!(
        mapping.get("type").and_then(JsonValue::as_str),
        Some("date" | "date_nanos")
    );
    if is_date && !mapping.contains_key("format") {
        mapping.insert(
            "format".to_string(),
            JsonValue::from(date_format.pattern()),
        );
    }
}

fn build_mapper(
    ctx: &ParseContext,
    full_path: &str,
    name: &str,
    mapping: JsonMap<String, JsonValue>,
) -> Result<Arc<Mapper>, DocParsingError> {
    let mapper = Mapper::parse(full_path, name, &JsonValue::Object(mapping), ctx.mapping_ctx)?;
    Ok(Arc::new(mapper))
}

fn build_runtime_field(
    ctx: &ParseContext,
    full_path: &str,
    name: &str,
    mut mapping: JsonMap<String, JsonValue>,
) -> Result<RuntimeField, DocParsingError> {
    // Dynamic runtime fields read their value from `_source`.
    mapping.remove("script");
    let definition = serde_json::from_value(JsonValue::Object(mapping))
        .map_err(|error| MappingError::invalid_definition(name, error))?;
    Ok(RuntimeField::build(full_path, definition, ctx.mapping_ctx)?)
}

/// Builds the mapper of a scalar value found under `parent`, `None` for `null`.
pub(super) fn create_dynamic_field(
    ctx: &ParseContext,
    parent: &ObjectMapper,
    name: &str,
    value: &JsonValue,
    dynamic: Dynamic,
) -> Result<Option<DynamicField>, DocParsingError> {
    let Some((field_type, date_format)) = detect_value_type(ctx, value) else {
        return Ok(None);
    };
    let full_path = child_path(parent.name(), name);
    if let Some(template) = find_template(ctx, &full_path, name, field_type) {
        let mut mapping = template.mapping_for(name, field_type);
        add_date_format(&mut mapping, date_format);
        if template.is_runtime() {
            let runtime_field = build_runtime_field(ctx, &full_path, name, mapping)?;
            return Ok(Some(DynamicField::Runtime(runtime_field)));
        }
        let mapper = build_mapper(ctx, &full_path, name, mapping)?;
        return Ok(Some(DynamicField::Concrete(mapper)));
    }
    if dynamic == Dynamic::Runtime {
        if let Some(runtime_type) = field_type.default_runtime_type() {
            let mut mapping = JsonMap::new();
            mapping.insert("type".to_string(), JsonValue::from(runtime_type));
            add_date_format(&mut mapping, date_format);
            let runtime_field = build_runtime_field(ctx, &full_path, name, mapping)?;
            return Ok(Some(DynamicField::Runtime(runtime_field)));
        }
    }
    let mapper = build_mapper(
        ctx,
        &full_path,
        name,
        default_mapping(field_type, date_format),
    )?;
    Ok(Some(DynamicField::Concrete(mapper)))
}

/// Builds the mapper of an object value found under `parent`. Templates matching objects may
/// turn it into a leaf, a `flattened` field for instance.
pub(super) fn create_dynamic_object(
    ctx: &ParseContext,
    parent: &ObjectMapper,
    name: &str,
) -> Result<Arc<Mapper>, DocParsingError> {
    let full_path = child_path(parent.name(), name);
    match object_template_mapper(ctx, parent, name)? {
        Some(mapper) => Ok(mapper),
        None => Ok(Arc::new(Mapper::Object(ObjectMapper::new(&full_path, name)))),
    }
}

/// The mapper a template matching objects produces for `name`, if any.
pub(super) fn object_template_mapper(
    ctx: &ParseContext,
    parent: &ObjectMapper,
    name: &str,
) -> Result<Option<Arc<Mapper>>, DocParsingError> {
    let full_path = child_path(parent.name(), name);
    let Some(template) = find_template(ctx, &full_path, name, XContentFieldType::Object) else {
        return Ok(None);
    };
    let mapping = template.mapping_for(name, XContentFieldType::Object);
    build_mapper(ctx, &full_path, name, mapping).map(Some)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::lookup::MappingLookup;
    use crate::mapper::MappingParserContext;
    use crate::parser::context::ParseLimits;
    use crate::Mapping;

    fn lookup(mapping: JsonValue) -> MappingLookup {
        let mapping = Mapping::parse(&mapping, &MappingParserContext::default()).unwrap();
        MappingLookup::from_mapping(Arc::new(mapping)).unwrap()
    }

    fn create(lookup: &MappingLookup, name: &str, value: JsonValue) -> Option<DynamicField> {
        let mapping_ctx = MappingParserContext::default();
        let limits = ParseLimits {
            depth: 20,
            nested_objects: 100,
        };
        let ctx = ParseContext::new(lookup, &mapping_ctx, limits);
        let root = lookup.root().object();
        create_dynamic_field(&ctx, root, name, &value, ctx.root().dynamic()).unwrap()
    }

    fn concrete_json(field: Option<DynamicField>) -> JsonValue {
        match field {
            Some(DynamicField::Concrete(mapper)) => mapper.to_json(),
            _ => panic!("expected a concrete field"),
        }
    }

    #[test]
    fn test_default_dynamic_types() {
        let lookup = lookup(json!({}));
        assert_eq!(
            concrete_json(create(&lookup, "s", json!("hello"))),
            json!({
                "type": "text",
                "fields": {"keyword": {"type": "keyword", "ignore_above": 256}}
            })
        );
        assert_eq!(
            concrete_json(create(&lookup, "l", json!(42))),
            json!({"type": "long"})
        );
        assert_eq!(
            concrete_json(create(&lookup, "d", json!(1.5))),
            json!({"type": "float"})
        );
        assert_eq!(
            concrete_json(create(&lookup, "b", json!(true))),
            json!({"type": "boolean"})
        );
        assert_eq!(
            concrete_json(create(&lookup, "u", json!(u64::MAX))),
            json!({"type": "float"})
        );
        assert!(create(&lookup, "n", JsonValue::Null).is_none());
    }

    #[test]
    fn test_date_and_numeric_detection() {
        let lookup = lookup(json!({"numeric_detection": true}));
        let date = concrete_json(create(&lookup, "created", json!("2015-01-01T12:10:30Z")));
        assert_eq!(date["type"], "date");
        assert_eq!(date["format"], "strict_date_optional_time");
        assert_eq!(
            concrete_json(create(&lookup, "count", json!("12"))),
            json!({"type": "long"})
        );
        assert_eq!(
            concrete_json(create(&lookup, "ratio", json!("1.25"))),
            json!({"type": "float"})
        );
        let no_detection = self::lookup(json!({"date_detection": false}));
        let text = concrete_json(create(&no_detection, "created", json!("2015-01-01")));
        assert_eq!(text["type"], "text");
    }

    #[test]
    fn test_templates_take_precedence() {
        let lookup = lookup(json!({
            "dynamic_templates": [
                {"ids": {"match": "*_id", "mapping": {"type": "keyword"}}},
                {"strings": {"match_mapping_type": "string", "runtime": {}}}
            ]
        }));
        assert_eq!(
            concrete_json(create(&lookup, "user_id", json!("u1"))),
            json!({"type": "keyword"})
        );
        let Some(DynamicField::Runtime(runtime_field)) = create(&lookup, "title", json!("x"))
        else {
            panic!("expected a runtime field");
        };
        assert_eq!(runtime_field.name(), "title");
        assert_eq!(runtime_field.definition().type_name, "keyword");
    }

    #[test]
    fn test_runtime_dynamic_policy() {
        let lookup = lookup(json!({"dynamic": "runtime"}));
        let Some(DynamicField::Runtime(runtime_field)) = create(&lookup, "n", json!(1)) else {
            panic!("expected a runtime field");
        };
        assert_eq!(runtime_field.definition().type_name, "long");
        let Some(DynamicField::Runtime(date)) = create(&lookup, "d", json!("2020-01-01")) else {
            panic!("expected a runtime field");
        };
        assert_eq!(date.definition().type_name, "date");
        assert_eq!(
            date.definition().format.as_ref().map(DateFormatter::pattern),
            Some("strict_date_optional_time")
        );
    }

    #[test]
    fn test_dynamic_policy_is_inherited() {
        let lookup = lookup(json!({
            "dynamic": "strict",
            "properties": {
                "a": {"dynamic": false, "properties": {"b": {"properties": {}}}},
                "c": {"properties": {}}
            }
        }));
        let mapping_ctx = MappingParserContext::default();
        let limits = ParseLimits {
            depth: 20,
            nested_objects: 100,
        };
        let ctx = ParseContext::new(&lookup, &mapping_ctx, limits);
        let b = lookup.object_mapper("a.b").unwrap();
        assert_eq!(dynamic_policy(&ctx, b), Dynamic::False);
        let c = lookup.object_mapper("c").unwrap();
        assert_eq!(dynamic_policy(&ctx, c), Dynamic::Strict);
    }
}
