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

use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{child_path, split_field_name, Mapper, MappingParserContext, MergeReason};
use crate::token_stream::ExpansionScope;
use crate::{MappingError, MergeError};

/// What the parser does with a field that has no mapping yet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dynamic {
    /// Add a concrete field to the mapping.
    True,
    /// Keep the value in `_source` without indexing it.
    False,
    /// Reject the document.
    Strict,
    /// Add a runtime field to the mapping.
    Runtime,
}

impl Dynamic {
    pub fn parse(field: &str, value: &JsonValue) -> Result<Dynamic, MappingError> {
        let dynamic = match value {
            JsonValue::Bool(true) => Dynamic::True,
            JsonValue::Bool(false) => Dynamic::False,
            JsonValue::String(value) => match value.as_str() {
                "true" => Dynamic::True,
                "false" => Dynamic::False,
                "strict" => Dynamic::Strict,
                "runtime" => Dynamic::Runtime,
                _ => return Err(invalid_dynamic(field, value)),
            },
            other => return Err(invalid_dynamic(field, other)),
        };
        Ok(dynamic)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dynamic::True => "true",
            Dynamic::False => "false",
            Dynamic::Strict => "strict",
            Dynamic::Runtime => "runtime",
        }
    }
}

fn invalid_dynamic(field: &str, value: impl std::fmt::Display) -> MappingError {
    MappingError::invalid_definition(
        field,
        format!("[dynamic] must be one of [true, false, strict, runtime], got [{value}]"),
    )
}

/// Settings of an object indexed as separate documents.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Nested {
    pub include_in_parent: Option<bool>,
    pub include_in_root: Option<bool>,
}

impl Nested {
    pub fn include_in_parent(&self) -> bool {
        self.include_in_parent.unwrap_or(false)
    }

    pub fn include_in_root(&self) -> bool {
        self.include_in_root.unwrap_or(false)
    }
}

/// An object of the mapping tree. Children are keyed by simple name and shared with the mapping
/// versions that did not change them.
#[derive(Clone, Debug)]
pub struct ObjectMapper {
    name: String,
    simple_name: String,
    enabled: Option<bool>,
    dynamic: Option<Dynamic>,
    subobjects: Option<bool>,
    nested: Option<Nested>,
    children: BTreeMap<String, Arc<Mapper>>,
}

fn parse_bool_param(field: &str, param: &str, value: &JsonValue) -> Result<bool, MappingError> {
    match value {
        JsonValue::Bool(value) => Ok(*value),
        JsonValue::String(value) if value == "true" => Ok(true),
        JsonValue::String(value) if value == "false" => Ok(false),
        other => Err(MappingError::invalid_definition(
            field,
            format!("[{param}] must be a boolean, got [{other}]"),
        )),
    }
}

impl ObjectMapper {
    pub const CONTENT_TYPE: &'static str = "object";
    pub const NESTED_CONTENT_TYPE: &'static str = "nested";

    pub fn new(name: &str, simple_name: &str) -> ObjectMapper {
        ObjectMapper {
            name: name.to_string(),
            simple_name: simple_name.to_string(),
            enabled: None,
            dynamic: None,
            subobjects: None,
            nested: None,
            children: BTreeMap::new(),
        }
    }

    pub fn nested(name: &str, simple_name: &str, nested: Nested) -> ObjectMapper {
        ObjectMapper {
            nested: Some(nested),
            ..ObjectMapper::new(name, simple_name)
        }
    }

    /// Parses an object definition. `definition` no longer holds `type`.
    pub(crate) fn parse(
        name: &str,
        simple_name: &str,
        nested: bool,
        mut definition: JsonMap<String, JsonValue>,
        ctx: &MappingParserContext,
    ) -> Result<ObjectMapper, MappingError> {
        let mut mapper = if nested {
            ObjectMapper::nested(name, simple_name, Nested::default())
        } else {
            ObjectMapper::new(name, simple_name)
        };
        let properties = definition.remove("properties");
        for (param, value) in definition {
            match (param.as_str(), mapper.nested.as_mut()) {
                ("dynamic", _) => mapper.dynamic = Some(Dynamic::parse(name, &value)?),
                ("enabled", _) => mapper.enabled = Some(parse_bool_param(name, &param, &value)?),
                ("subobjects", None) => {
                    mapper.subobjects = Some(parse_bool_param(name, &param, &value)?)
                }
                ("include_in_parent", Some(nested)) => {
                    nested.include_in_parent = Some(parse_bool_param(name, &param, &value)?)
                }
                ("include_in_root", Some(nested)) => {
                    nested.include_in_root = Some(parse_bool_param(name, &param, &value)?)
                }
                _ => {
                    return Err(MappingError::Invalid(format!(
                        "Mapping definition for [{name}] has unsupported parameters:  [{param} : \
                         {value}]"
                    )))
                }
            }
        }
        match properties {
            None => {}
            Some(JsonValue::Object(properties)) => {
                for (property_name, definition) in properties {
                    let child = mapper.parse_property(&property_name, &definition, ctx)?;
                    mapper.insert_child(child, ctx)?;
                }
            }
            Some(other) => {
                return Err(MappingError::invalid_definition(
                    name,
                    format!("[properties] must be an object, got `{other}`"),
                ))
            }
        }
        Ok(mapper)
    }

    /// Parses one entry of `properties`. Dotted names expand into intermediate objects unless
    /// this object does not hold sub-objects.
    fn parse_property(
        &self,
        property_name: &str,
        definition: &JsonValue,
        ctx: &MappingParserContext,
    ) -> Result<Mapper, MappingError> {
        let parts = split_field_name(property_name)?;
        if !self.subobjects() {
            let full_name = child_path(&self.name, property_name);
            let child = Mapper::parse(&full_name, property_name, definition, ctx)?;
            if matches!(child, Mapper::Object(_)) {
                return Err(self.subobject_not_allowed(property_name));
            }
            return Ok(child);
        }
        let full_name = child_path(&self.name, property_name);
        let leaf_name = parts[parts.len() - 1];
        let mut mapper = Mapper::parse(&full_name, leaf_name, definition, ctx)?;
        for depth in (1..parts.len()).rev() {
            let object_name = child_path(&self.name, &parts[..depth].join("."));
            let mut object = ObjectMapper::new(&object_name, parts[depth - 1]);
            object.add_child(mapper);
            mapper = Mapper::Object(object);
        }
        Ok(mapper)
    }

    pub(crate) fn subobject_not_allowed(&self, child_name: &str) -> MappingError {
        MappingError::Invalid(format!(
            "Tried to add subobject [{child_name}] to object [{}] which does not support \
             subobjects",
            self.name
        ))
    }

    /// Inserts a child, merging it with an existing child of the same name.
    fn insert_child(
        &mut self,
        child: Mapper,
        ctx: &MappingParserContext,
    ) -> Result<(), MappingError> {
        let merged = match self.children.get(child.simple_name()) {
            Some(existing) => existing
                .merge(&child, MergeReason::MappingUpdate, ctx)
                .map_err(|error| MappingError::Invalid(error.to_string()))?,
            None => child,
        };
        self.add_child(merged);
        Ok(())
    }

    /// Adds or replaces a child.
    pub(crate) fn add_child(&mut self, child: Mapper) {
        self.children
            .insert(child.simple_name().to_string(), Arc::new(child));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn simple_name(&self) -> &str {
        &self.simple_name
    }

    pub fn type_name(&self) -> &'static str {
        if self.is_nested() {
            Self::NESTED_CONTENT_TYPE
        } else {
            Self::CONTENT_TYPE
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// `dynamic` as declared on this object. `None` inherits the parent's policy.
    pub fn dynamic(&self) -> Option<Dynamic> {
        self.dynamic
    }

    pub fn subobjects(&self) -> bool {
        self.subobjects.unwrap_or(true)
    }

    pub fn is_nested(&self) -> bool {
        self.nested.is_some()
    }

    pub fn nested_settings(&self) -> Option<Nested> {
        self.nested
    }

    pub fn child(&self, simple_name: &str) -> Option<&Mapper> {
        self.children.get(simple_name).map(Arc::as_ref)
    }

    pub fn children(&self) -> impl Iterator<Item = &Mapper> {
        self.children.values().map(Arc::as_ref)
    }

    pub(crate) fn child_arc(&self, simple_name: &str) -> Option<&Arc<Mapper>> {
        self.children.get(simple_name)
    }

    pub(crate) fn child_arcs(&self) -> impl Iterator<Item = &Arc<Mapper>> {
        self.children.values()
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// A copy of this object holding `children` only, used to carry new fields in a mapping
    /// update.
    pub fn mapping_update(&self, children: impl IntoIterator<Item = Mapper>) -> ObjectMapper {
        let mut update = ObjectMapper {
            children: BTreeMap::new(),
            ..self.clone()
        };
        for child in children {
            update.add_child(child);
        }
        update
    }

    pub fn merge(
        &self,
        incoming: &ObjectMapper,
        reason: MergeReason,
        ctx: &MappingParserContext,
    ) -> Result<ObjectMapper, MergeError> {
        let replace = reason == MergeReason::IndexTemplate;
        if self.is_nested() != incoming.is_nested() {
            if replace {
                return Ok(incoming.clone());
            }
            let transition = if self.is_nested() {
                "from nested to non-nested"
            } else {
                "from non-nested to nested"
            };
            return Err(MergeError::ObjectConflict(format!(
                "object mapping [{}] can't be changed {transition}",
                self.name
            )));
        }
        let mut merged = self.clone();
        if let Some(enabled) = incoming.enabled {
            if enabled != self.is_enabled() && !replace {
                return Err(MergeError::ObjectConflict(format!(
                    "the [enabled] parameter can't be updated for the object mapping [{}]",
                    self.name
                )));
            }
            merged.enabled = Some(enabled);
        }
        if let Some(subobjects) = incoming.subobjects {
            if subobjects != self.subobjects() && !replace {
                return Err(MergeError::ObjectConflict(format!(
                    "the [subobjects] parameter can't be updated for the object mapping [{}]",
                    self.name
                )));
            }
            merged.subobjects = Some(subobjects);
        }
        if incoming.dynamic.is_some() {
            merged.dynamic = incoming.dynamic;
        }
        if let (Some(existing), Some(incoming)) = (self.nested, incoming.nested) {
            let mut nested = existing;
            for (param, current, update, target) in [
                (
                    "include_in_parent",
                    existing.include_in_parent(),
                    incoming.include_in_parent,
                    &mut nested.include_in_parent,
                ),
                (
                    "include_in_root",
                    existing.include_in_root(),
                    incoming.include_in_root,
                    &mut nested.include_in_root,
                ),
            ] {
                let Some(update) = update else {
                    continue;
                };
                if update != current && !replace {
                    return Err(MergeError::ObjectConflict(format!(
                        "the [{param}] parameter can't be updated on a nested object mapping"
                    )));
                }
                *target = Some(update);
            }
            merged.nested = Some(nested);
        }
        for (simple_name, incoming_child) in &incoming.children {
            let child = match self.children.get(simple_name) {
                Some(existing) => Arc::new(existing.merge(incoming_child, reason, ctx)?),
                None => incoming_child.clone(),
            };
            merged.children.insert(simple_name.clone(), child);
        }
        Ok(merged)
    }

    /// How dotted names are expanded while reading this object's content.
    pub(crate) fn expansion_scope(&self) -> ExpansionScope {
        let mut flat_paths = Vec::new();
        self.collect_flat_paths("", &mut flat_paths);
        ExpansionScope {
            flat: !self.subobjects(),
            flat_paths,
        }
    }

    fn collect_flat_paths(&self, prefix: &str, flat_paths: &mut Vec<String>) {
        for (simple_name, child) in &self.children {
            let Mapper::Object(object) = child.as_ref() else {
                continue;
            };
            let path = child_path(prefix, simple_name);
            if object.subobjects() {
                object.collect_flat_paths(&path, flat_paths);
            } else {
                flat_paths.push(path);
            }
        }
    }

    /// Serializes the object settings, without `type` for plain objects that have properties.
    pub(crate) fn params_to_json(&self, json: &mut JsonMap<String, JsonValue>) {
        if self.is_nested() {
            json.insert("type".to_string(), JsonValue::from(Self::NESTED_CONTENT_TYPE));
        }
        if let Some(dynamic) = self.dynamic {
            json.insert("dynamic".to_string(), JsonValue::from(dynamic.as_str()));
        }
        if let Some(enabled) = self.enabled {
            json.insert("enabled".to_string(), JsonValue::Bool(enabled));
        }
        if let Some(subobjects) = self.subobjects {
            json.insert("subobjects".to_string(), JsonValue::Bool(subobjects));
        }
        if let Some(nested) = self.nested {
            if let Some(include_in_parent) = nested.include_in_parent {
                json.insert(
                    "include_in_parent".to_string(),
                    JsonValue::Bool(include_in_parent),
                );
            }
            if let Some(include_in_root) = nested.include_in_root {
                json.insert(
                    "include_in_root".to_string(),
                    JsonValue::Bool(include_in_root),
                );
            }
        }
    }

    pub(crate) fn properties_to_json(&self) -> JsonMap<String, JsonValue> {
        self.children
            .iter()
            .map(|(simple_name, child)| (simple_name.clone(), child.to_json()))
            .collect()
    }

    pub fn to_json(&self) -> JsonMap<String, JsonValue> {
        let mut json = JsonMap::new();
        self.params_to_json(&mut json);
        if self.children.is_empty() {
            if json.is_empty() {
                json.insert("type".to_string(), JsonValue::from(Self::CONTENT_TYPE));
            }
        } else {
            json.insert(
                "properties".to_string(),
                JsonValue::Object(self.properties_to_json()),
            );
        }
        json
    }
}
