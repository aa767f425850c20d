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

//! The mapping tree: objects, leaf fields, aliases and metadata fields, each parsed from its JSON
//! definition and merged with a newer definition of itself.

mod alias_mapper;
mod dynamic_template;
mod field_mapper;
pub(crate) mod field_params;
mod metadata_mapper;
mod object_mapper;
mod root_object_mapper;

use std::sync::Arc;

use mapwright_config::{IndexSettings, MappingSettings};
use serde_json::{Map as JsonMap, Value as JsonValue};

pub use self::alias_mapper::FieldAliasMapper;
pub use self::dynamic_template::{DynamicTemplate, MatchType, XContentFieldType};
pub use self::field_mapper::FieldMapper;
pub use self::field_params::{Conflicts, LeafParams};
pub use self::metadata_mapper::{MetadataFieldMapper, SourceConfig};
pub(crate) use self::metadata_mapper::MetadataContext;
pub use self::object_mapper::{Dynamic, Nested, ObjectMapper};
pub use self::root_object_mapper::{RootObjectMapper, RuntimeField};
use crate::field_type::{ScriptCompiler, SourceLookupCompiler};
use crate::{MappingError, MergeError};

/// Why two mappings are merged.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeReason {
    /// A user update or a dynamic update of a live index. Parameter transitions are checked.
    MappingUpdate,
    /// Composing index templates. Incoming definitions replace existing ones.
    IndexTemplate,
    /// Replaying a mapping that was already accepted. Limits are not checked.
    MappingRecovery,
}

/// Index wide defaults of the parameters a field may leave unset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FieldDefaults {
    pub coerce: bool,
    pub ignore_malformed: bool,
}

impl Default for FieldDefaults {
    fn default() -> Self {
        FieldDefaults {
            coerce: true,
            ignore_malformed: false,
        }
    }
}

impl FieldDefaults {
    pub fn from_settings(settings: &MappingSettings) -> FieldDefaults {
        FieldDefaults {
            coerce: settings.coerce,
            ignore_malformed: settings.ignore_malformed,
        }
    }
}

/// What mapping definitions are parsed against.
#[derive(Clone, Debug)]
pub struct MappingParserContext {
    pub(crate) defaults: FieldDefaults,
    pub(crate) script_compiler: Arc<dyn ScriptCompiler>,
}

impl Default for MappingParserContext {
    fn default() -> Self {
        MappingParserContext {
            defaults: FieldDefaults::default(),
            script_compiler: Arc::new(SourceLookupCompiler),
        }
    }
}

impl MappingParserContext {
    pub fn new(
        defaults: FieldDefaults,
        script_compiler: Arc<dyn ScriptCompiler>,
    ) -> MappingParserContext {
        MappingParserContext {
            defaults,
            script_compiler,
        }
    }

    pub fn from_settings(settings: &IndexSettings) -> MappingParserContext {
        MappingParserContext {
            defaults: FieldDefaults::from_settings(&settings.mapping),
            ..Default::default()
        }
    }

    pub fn defaults(&self) -> FieldDefaults {
        self.defaults
    }
}

/// A node of the mapping tree.
#[derive(Clone, Debug)]
pub enum Mapper {
    Object(ObjectMapper),
    Field(FieldMapper),
    Alias(FieldAliasMapper),
    Metadata(MetadataFieldMapper),
}

impl Mapper {
    /// Parses the definition of the property `simple_name`. `name` is its full path.
    pub fn parse(
        name: &str,
        simple_name: &str,
        definition: &JsonValue,
        ctx: &MappingParserContext,
    ) -> Result<Mapper, MappingError> {
        let JsonValue::Object(definition) = definition else {
            return Err(MappingError::invalid_definition(
                name,
                format!("expected an object definition, got `{definition}`"),
            ));
        };
        let mut definition = definition.clone();
        let type_name = match definition.remove("type") {
            None => None,
            Some(JsonValue::String(type_name)) => Some(type_name),
            Some(other) => {
                return Err(MappingError::invalid_definition(
                    name,
                    format!("[type] must be a string, got `{other}`"),
                ))
            }
        };
        match type_name.as_deref() {
            None | Some(ObjectMapper::CONTENT_TYPE) => {
                ObjectMapper::parse(name, simple_name, false, definition, ctx).map(Mapper::Object)
            }
            Some(ObjectMapper::NESTED_CONTENT_TYPE) => {
                ObjectMapper::parse(name, simple_name, true, definition, ctx).map(Mapper::Object)
            }
            Some(FieldAliasMapper::CONTENT_TYPE) => {
                FieldAliasMapper::parse(name, simple_name, definition).map(Mapper::Alias)
            }
            Some(type_name) => {
                FieldMapper::parse(name, simple_name, type_name, definition, ctx)
                    .map(Mapper::Field)
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Mapper::Object(mapper) => mapper.name(),
            Mapper::Field(mapper) => mapper.name(),
            Mapper::Alias(mapper) => mapper.name(),
            Mapper::Metadata(mapper) => mapper.name(),
        }
    }

    pub fn simple_name(&self) -> &str {
        match self {
            Mapper::Object(mapper) => mapper.simple_name(),
            Mapper::Field(mapper) => mapper.simple_name(),
            Mapper::Alias(mapper) => mapper.simple_name(),
            Mapper::Metadata(mapper) => mapper.name(),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Mapper::Object(mapper) => mapper.type_name(),
            Mapper::Field(mapper) => mapper.type_name(),
            Mapper::Alias(_) => FieldAliasMapper::CONTENT_TYPE,
            Mapper::Metadata(mapper) => mapper.name(),
        }
    }

    pub fn as_object(&self) -> Option<&ObjectMapper> {
        match self {
            Mapper::Object(mapper) => Some(mapper),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&FieldMapper> {
        match self {
            Mapper::Field(mapper) => Some(mapper),
            _ => None,
        }
    }

    /// Merges `incoming` into `self`, producing a new mapper. `self` is left untouched.
    pub fn merge(
        &self,
        incoming: &Mapper,
        reason: MergeReason,
        ctx: &MappingParserContext,
    ) -> Result<Mapper, MergeError> {
        let merged = match (self, incoming) {
            (Mapper::Object(existing), Mapper::Object(incoming)) => {
                Mapper::Object(existing.merge(incoming, reason, ctx)?)
            }
            (Mapper::Field(existing), Mapper::Field(incoming)) => {
                Mapper::Field(existing.merge(incoming, reason, ctx)?)
            }
            (Mapper::Alias(_), Mapper::Alias(incoming)) => Mapper::Alias(incoming.clone()),
            (Mapper::Metadata(existing), Mapper::Metadata(incoming)) => {
                Mapper::Metadata(existing.merge(incoming, reason)?)
            }
            (_, incoming) if reason == MergeReason::IndexTemplate => incoming.clone(),
            (Mapper::Object(_), _) | (_, Mapper::Object(_)) => {
                return Err(MergeError::KindConflict {
                    field: self.name().to_string(),
                })
            }
            (existing, incoming) => {
                return Err(MergeError::TypeConflict {
                    field: existing.name().to_string(),
                    existing: existing.type_name().to_string(),
                    incoming: incoming.type_name().to_string(),
                })
            }
        };
        Ok(merged)
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Mapper::Object(mapper) => JsonValue::Object(mapper.to_json()),
            Mapper::Field(mapper) => JsonValue::Object(mapper.to_json()),
            Mapper::Alias(mapper) => JsonValue::Object(mapper.to_json()),
            Mapper::Metadata(mapper) => mapper
                .to_json()
                .map(JsonValue::Object)
                .unwrap_or_else(|| JsonValue::Object(JsonMap::new())),
        }
    }
}

/// Checks a property name and splits it on dots.
pub(crate) fn split_field_name(name: &str) -> Result<Vec<&str>, MappingError> {
    if name.is_empty() {
        return Err(MappingError::InvalidName(
            "field name cannot be an empty string".to_string(),
        ));
    }
    if name.chars().all(|character| character == '.') {
        return Err(MappingError::InvalidName(format!(
            "field name cannot contain only dots: [{name}]"
        )));
    }
    let parts: Vec<&str> = name.split('.').collect();
    if parts.iter().any(|part| part.trim().is_empty()) {
        return Err(MappingError::InvalidName(format!(
            "field name [{name}] cannot contain empty or blank path segments"
        )));
    }
    Ok(parts)
}

/// Joins a parent path and a simple name.
pub(crate) fn child_path(parent: &str, simple_name: &str) -> String {
    if parent.is_empty() {
        simple_name.to_string()
    } else {
        format!("{parent}.{simple_name}")
    }
}
