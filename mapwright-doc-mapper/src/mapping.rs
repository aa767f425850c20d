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

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::field_type::MetadataKind;
use crate::mapper::{
    MappingParserContext, MergeReason, MetadataFieldMapper, RootObjectMapper,
};
use crate::{MappingError, MergeError};

/// Name of the single document type a mapping describes.
pub const DOC_TYPE: &str = "_doc";

const META_KEY: &str = "_meta";

/// A whole mapping. A `Mapping` is never modified: merging produces a new one.
#[derive(Clone, Debug, Default)]
pub struct Mapping {
    root: RootObjectMapper,
    // Only the metadata fields configured explicitly. The others use their defaults.
    metadata_mappers: BTreeMap<MetadataKind, MetadataFieldMapper>,
    meta: Option<JsonMap<String, JsonValue>>,
}

impl Mapping {
    pub fn empty() -> Mapping {
        Mapping::default()
    }

    /// Parses a mapping definition, optionally wrapped in `{"_doc": ...}`.
    pub fn parse(
        definition: &JsonValue,
        ctx: &MappingParserContext,
    ) -> Result<Mapping, MappingError> {
        let JsonValue::Object(definition) = definition else {
            return Err(MappingError::Invalid(format!(
                "a mapping must be a JSON object, got `{definition}`"
            )));
        };
        let mut definition = match definition.get(DOC_TYPE) {
            Some(JsonValue::Object(inner)) if definition.len() == 1 => inner.clone(),
            _ => definition.clone(),
        };
        let meta = match definition.remove(META_KEY) {
            None => None,
            Some(JsonValue::Object(meta)) => Some(meta),
            Some(other) => {
                return Err(MappingError::invalid_definition(
                    META_KEY,
                    format!("expected an object, got `{other}`"),
                ))
            }
        };
        let mut metadata_mappers = BTreeMap::new();
        for kind in MetadataKind::ALL {
            if let Some(config) = definition.remove(kind.name()) {
                metadata_mappers.insert(kind, MetadataFieldMapper::parse(kind, &config)?);
            }
        }
        let root = RootObjectMapper::parse(definition, ctx)?;
        Ok(Mapping {
            root,
            metadata_mappers,
            meta,
        })
    }

    pub fn from_json_str(json: &str, ctx: &MappingParserContext) -> Result<Mapping, MappingError> {
        let definition: JsonValue = serde_json::from_str(json)
            .map_err(|error| MappingError::Invalid(format!("failed to parse mapping: {error}")))?;
        Mapping::parse(&definition, ctx)
    }

    /// A mapping holding only `root`, as produced by dynamic mapping.
    pub fn mapping_update(root: RootObjectMapper) -> Mapping {
        Mapping {
            root,
            ..Default::default()
        }
    }

    pub fn root(&self) -> &RootObjectMapper {
        &self.root
    }

    pub fn meta(&self) -> Option<&JsonMap<String, JsonValue>> {
        self.meta.as_ref()
    }

    /// The mapper of every metadata field, configured or not.
    pub fn metadata_mappers(&self) -> Vec<MetadataFieldMapper> {
        MetadataKind::ALL
            .into_iter()
            .map(|kind| {
                self.metadata_mappers
                    .get(&kind)
                    .cloned()
                    .unwrap_or_else(|| MetadataFieldMapper::default_for(kind))
            })
            .collect()
    }

    pub fn merge(
        &self,
        incoming: &Mapping,
        reason: MergeReason,
        ctx: &MappingParserContext,
    ) -> Result<Mapping, MergeError> {
        let root = self.root.merge(&incoming.root, reason, ctx)?;
        let mut metadata_mappers = self.metadata_mappers.clone();
        for (kind, incoming_mapper) in &incoming.metadata_mappers {
            let merged = match self.metadata_mappers.get(kind) {
                Some(existing) => existing.merge(incoming_mapper, reason)?,
                None => MetadataFieldMapper::default_for(*kind).merge(incoming_mapper, reason)?,
            };
            metadata_mappers.insert(*kind, merged);
        }
        let meta = match (&self.meta, &incoming.meta) {
            (existing, None) => existing.clone(),
            (Some(existing), Some(incoming)) if reason == MergeReason::IndexTemplate => {
                Some(merge_meta(existing, incoming))
            }
            (_, Some(incoming)) => Some(incoming.clone()),
        };
        Ok(Mapping {
            root,
            metadata_mappers,
            meta,
        })
    }

    pub fn to_json(&self) -> JsonValue {
        let mut json = self.root.to_json();
        for (kind, mapper) in &self.metadata_mappers {
            if let Some(config) = mapper.to_json() {
                json.insert(kind.name().to_string(), JsonValue::Object(config));
            }
        }
        if let Some(meta) = &self.meta {
            json.insert(META_KEY.to_string(), JsonValue::Object(meta.clone()));
        }
        let mut wrapped = JsonMap::new();
        wrapped.insert(DOC_TYPE.to_string(), JsonValue::Object(json));
        JsonValue::Object(wrapped)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}

/// Template `_meta` objects merge key by key, recursively.
fn merge_meta(
    existing: &JsonMap<String, JsonValue>,
    incoming: &JsonMap<String, JsonValue>,
) -> JsonMap<String, JsonValue> {
    let mut merged = existing.clone();
    for (key, value) in incoming {
        let merged_value = match (merged.get(key), value) {
            (Some(JsonValue::Object(existing)), JsonValue::Object(incoming)) => {
                JsonValue::Object(merge_meta(existing, incoming))
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), merged_value);
    }
    merged
}
