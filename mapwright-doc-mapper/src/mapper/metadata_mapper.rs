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

use std::collections::BTreeSet;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use mapwright_query::TermValue;
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::field_params::Conflicts;
use super::{child_path, MergeReason};
use crate::document::{FieldValue, IndexDocument, SharedLong};
use crate::field_type::{FieldType, MetadataKind};
use crate::{DocParsingError, MappingError, MergeError};

/// `_source` settings: whether the source is stored and which paths of it.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    enabled: Option<bool>,
    includes: Vec<String>,
    excludes: Vec<String>,
    include_set: GlobSet,
    exclude_set: GlobSet,
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, MappingError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|error| {
            MappingError::invalid_definition(MetadataKind::Source.name(), error)
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|error| MappingError::invalid_definition(MetadataKind::Source.name(), error))
}

fn string_list(param: &str, value: JsonValue) -> Result<Vec<String>, MappingError> {
    let invalid = || {
        MappingError::invalid_definition(
            MetadataKind::Source.name(),
            format!("[{param}] must be an array of strings"),
        )
    };
    let JsonValue::Array(values) = value else {
        return Err(invalid());
    };
    values
        .into_iter()
        .map(|value| match value {
            JsonValue::String(value) => Ok(value),
            _ => Err(invalid()),
        })
        .collect()
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            enabled: None,
            includes: Vec::new(),
            excludes: Vec::new(),
            include_set: GlobSet::empty(),
            exclude_set: GlobSet::empty(),
        }
    }
}

impl SourceConfig {
    fn new(
        enabled: Option<bool>,
        includes: Vec<String>,
        excludes: Vec<String>,
    ) -> Result<SourceConfig, MappingError> {
        Ok(SourceConfig {
            include_set: build_glob_set(&includes)?,
            exclude_set: build_glob_set(&excludes)?,
            enabled,
            includes,
            excludes,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    fn is_filtered(&self) -> bool {
        !self.includes.is_empty() || !self.excludes.is_empty()
    }

    /// The part of `source` that is stored.
    pub fn filter(&self, source: &JsonValue) -> JsonValue {
        if !self.is_filtered() {
            return source.clone();
        }
        match source {
            JsonValue::Object(map) => JsonValue::Object(self.filter_object(map, "", false)),
            other => other.clone(),
        }
    }

    fn filter_object(
        &self,
        map: &JsonMap<String, JsonValue>,
        path: &str,
        parent_included: bool,
    ) -> JsonMap<String, JsonValue> {
        map.iter()
            .filter_map(|(key, value)| {
                let child_path = child_path(path, key);
                self.filter_value(value, &child_path, parent_included)
                    .map(|value| (key.clone(), value))
            })
            .collect()
    }

    fn filter_value(
        &self,
        value: &JsonValue,
        path: &str,
        parent_included: bool,
    ) -> Option<JsonValue> {
        if self.exclude_set.is_match(path) {
            return None;
        }
        let included =
            parent_included || self.includes.is_empty() || self.include_set.is_match(path);
        match value {
            JsonValue::Object(map) => {
                let filtered = self.filter_object(map, path, included);
                if filtered.is_empty() && !included {
                    return None;
                }
                Some(JsonValue::Object(filtered))
            }
            JsonValue::Array(values) => {
                let filtered: Vec<JsonValue> = values
                    .iter()
                    .filter_map(|value| self.filter_value(value, path, included))
                    .collect();
                if filtered.is_empty() && !included {
                    return None;
                }
                Some(JsonValue::Array(filtered))
            }
            scalar => included.then(|| scalar.clone()),
        }
    }
}

#[derive(Clone, Debug)]
enum MetadataConfig {
    Fixed,
    Source(SourceConfig),
    Routing { required: Option<bool> },
}

/// Everything the metadata hooks of one document read and write.
pub(crate) struct MetadataContext<'a> {
    pub id: Option<&'a str>,
    pub routing: Option<&'a str>,
    pub source: &'a JsonValue,
    /// Set by the `_source` hook.
    pub stored_source: Option<JsonValue>,
    /// Root document first.
    pub docs: &'a mut [IndexDocument],
    pub ignored_fields: &'a BTreeSet<String>,
    pub seq_no: &'a SharedLong,
    pub version: &'a SharedLong,
}

/// A field every document carries, `_id` or `_source` for instance.
#[derive(Clone, Debug)]
pub struct MetadataFieldMapper {
    kind: MetadataKind,
    field_type: Arc<FieldType>,
    config: MetadataConfig,
}

impl MetadataFieldMapper {
    pub fn default_for(kind: MetadataKind) -> MetadataFieldMapper {
        let config = match kind {
            MetadataKind::Source => MetadataConfig::Source(SourceConfig::default()),
            MetadataKind::Routing => MetadataConfig::Routing { required: None },
            _ => MetadataConfig::Fixed,
        };
        MetadataFieldMapper {
            kind,
            field_type: Arc::new(kind.field_type()),
            config,
        }
    }

    /// Parses the configuration found under the metadata field name at the mapping root.
    pub fn parse(
        kind: MetadataKind,
        definition: &JsonValue,
    ) -> Result<MetadataFieldMapper, MappingError> {
        let name = kind.name();
        if !kind.is_configurable() {
            return Err(MappingError::Invalid(format!(
                "[{name}] is a metadata field and cannot be configured in the mapping"
            )));
        }
        let JsonValue::Object(definition) = definition else {
            return Err(MappingError::invalid_definition(
                name,
                format!("expected an object definition, got `{definition}`"),
            ));
        };
        let unsupported = |param: &str, value: &JsonValue| {
            MappingError::Invalid(format!(
                "Mapping definition for [{name}] has unsupported parameters:  [{param} : {value}]"
            ))
        };
        let mut mapper = MetadataFieldMapper::default_for(kind);
        match &mut mapper.config {
            MetadataConfig::Source(config) => {
                let mut enabled = None;
                let mut includes = Vec::new();
                let mut excludes = Vec::new();
                for (param, value) in definition {
                    match (param.as_str(), value) {
                        ("enabled", JsonValue::Bool(value)) => enabled = Some(*value),
                        ("includes", value) => includes = string_list(param, value.clone())?,
                        ("excludes", value) => excludes = string_list(param, value.clone())?,
                        (param, value) => return Err(unsupported(param, value)),
                    }
                }
                *config = SourceConfig::new(enabled, includes, excludes)?;
            }
            MetadataConfig::Routing { required } => {
                for (param, value) in definition {
                    match (param.as_str(), value) {
                        ("required", JsonValue::Bool(value)) => *required = Some(*value),
                        (param, value) => return Err(unsupported(param, value)),
                    }
                }
            }
            MetadataConfig::Fixed => {}
        }
        Ok(mapper)
    }

    pub fn kind(&self) -> MetadataKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn field_type(&self) -> &Arc<FieldType> {
        &self.field_type
    }

    pub fn source_config(&self) -> Option<&SourceConfig> {
        match &self.config {
            MetadataConfig::Source(config) => Some(config),
            _ => None,
        }
    }

    pub fn routing_required(&self) -> bool {
        matches!(
            self.config,
            MetadataConfig::Routing {
                required: Some(true)
            }
        )
    }

    /// The non default part of the configuration, `None` when there is nothing to serialize.
    pub fn to_json(&self) -> Option<JsonMap<String, JsonValue>> {
        let mut json = JsonMap::new();
        match &self.config {
            MetadataConfig::Source(config) => {
                if let Some(enabled) = config.enabled {
                    json.insert("enabled".to_string(), JsonValue::Bool(enabled));
                }
                if !config.includes.is_empty() {
                    json.insert("includes".to_string(), JsonValue::from(config.includes.clone()));
                }
                if !config.excludes.is_empty() {
                    json.insert("excludes".to_string(), JsonValue::from(config.excludes.clone()));
                }
            }
            MetadataConfig::Routing { required } => {
                if let Some(required) = required {
                    json.insert("required".to_string(), JsonValue::Bool(*required));
                }
            }
            MetadataConfig::Fixed => {}
        }
        (!json.is_empty()).then_some(json)
    }

    pub fn merge(
        &self,
        incoming: &MetadataFieldMapper,
        reason: MergeReason,
    ) -> Result<MetadataFieldMapper, MergeError> {
        if reason == MergeReason::IndexTemplate {
            return Ok(incoming.clone());
        }
        let mut conflicts = Conflicts::new(self.name());
        match (&self.config, &incoming.config) {
            (MetadataConfig::Source(existing), MetadataConfig::Source(update)) => {
                conflicts.immutable("enabled", &existing.is_enabled(), &update.is_enabled());
                conflicts.immutable("includes", &existing.includes, &update.includes);
                conflicts.immutable("excludes", &existing.excludes, &update.excludes);
            }
            (
                MetadataConfig::Routing { required: existing },
                MetadataConfig::Routing { required: update },
            ) => {
                conflicts.immutable(
                    "required",
                    &existing.unwrap_or(false),
                    &update.unwrap_or(false),
                );
            }
            _ => {}
        }
        conflicts.into_result()?;
        Ok(incoming.clone())
    }

    /// Runs before the document content is parsed. Only the root document exists.
    pub(crate) fn pre_parse(&self, ctx: &mut MetadataContext) -> Result<(), DocParsingError> {
        let name = self.name();
        let Some(root) = ctx.docs.first_mut() else {
            return Err(DocParsingError::Internal(
                "metadata hooks ran without a root document".to_string(),
            ));
        };
        match (&self.config, self.kind) {
            (MetadataConfig::Fixed, MetadataKind::Id) => {
                if let Some(id) = ctx.id {
                    root.add(name, FieldValue::Term(TermValue::from(id)));
                    root.add(name, FieldValue::Stored(JsonValue::from(id)));
                }
            }
            (MetadataConfig::Routing { required }, _) => match ctx.routing {
                Some(routing) => {
                    root.add(name, FieldValue::Term(TermValue::from(routing)));
                    root.add(name, FieldValue::Stored(JsonValue::from(routing)));
                }
                None if required.unwrap_or(false) => {
                    return Err(DocParsingError::RoutingMissing {
                        id: ctx.id.unwrap_or_default().to_string(),
                    });
                }
                None => {}
            },
            (MetadataConfig::Source(config), _) => {
                if config.is_enabled() {
                    let stored_source = config.filter(ctx.source);
                    root.add(name, FieldValue::Stored(stored_source.clone()));
                    ctx.stored_source = Some(stored_source);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Runs once the whole document, nested documents included, has been parsed.
    pub(crate) fn post_parse(&self, ctx: &mut MetadataContext) -> Result<(), DocParsingError> {
        let name = self.name();
        let Some((root, nested_docs)) = ctx.docs.split_first_mut() else {
            return Err(DocParsingError::Internal(
                "metadata hooks ran without a root document".to_string(),
            ));
        };
        match self.kind {
            MetadataKind::Id if !nested_docs.is_empty() => {
                let Some(id) = ctx.id else {
                    return Err(DocParsingError::Malformed {
                        field: name.to_string(),
                        field_type: name.to_string(),
                        reason: "an id is required to index nested documents".to_string(),
                    });
                };
                for nested_doc in nested_docs {
                    nested_doc.add(name, FieldValue::Term(TermValue::from(id)));
                }
            }
            MetadataKind::Ignored => {
                for ignored_field in ctx.ignored_fields {
                    root.add(name, FieldValue::Term(TermValue::from(ignored_field.as_str())));
                    root.add(name, FieldValue::Stored(JsonValue::from(ignored_field.as_str())));
                }
            }
            MetadataKind::Version => {
                root.add(name, FieldValue::SharedDocValues(ctx.version.clone()));
                for nested_doc in nested_docs {
                    nested_doc.add(name, FieldValue::SortedNumericDocValues(1));
                }
            }
            MetadataKind::SeqNo => {
                root.add(name, FieldValue::SharedDocValues(ctx.seq_no.clone()));
                for nested_doc in nested_docs {
                    nested_doc.add(name, FieldValue::SharedDocValues(ctx.seq_no.clone()));
                }
            }
            MetadataKind::NestedPath => {
                for nested_doc in nested_docs {
                    if let Some(nested_path) = nested_doc.nested_path().map(str::to_string) {
                        let term = TermValue::Text(nested_path);
                        nested_doc.add(name, FieldValue::Term(term));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
