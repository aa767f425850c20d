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

//! Flat, name indexed views over a [`Mapping`], rebuilt whole every time the mapping changes.

mod field_type_lookup;

use std::collections::BTreeSet;
use std::sync::Arc;

use fnv::FnvHashMap;
use mapwright_config::IndexSettings;

pub use self::field_type_lookup::FieldTypeLookup;
use crate::field_type::{FieldType, MetadataKind};
use crate::mapper::{
    FieldAliasMapper, FieldMapper, Mapper, MetadataFieldMapper, ObjectMapper, RootObjectMapper,
    SourceConfig,
};
use crate::{LimitError, Mapping, MappingError};

/// An immutable index over one [`Mapping`]. A parse or a search captures one and never looks at
/// a newer one.
#[derive(Debug)]
pub struct MappingLookup {
    mapping: Arc<Mapping>,
    // The root object, shared so that parsers can hold it like any other object mapper.
    root_mapper: Arc<Mapper>,
    // Leaves, multi-fields and aliases, by full name.
    field_mappers: FnvHashMap<String, Arc<Mapper>>,
    object_mappers: FnvHashMap<String, Arc<Mapper>>,
    metadata_mappers: Vec<MetadataFieldMapper>,
    // Full paths of nested objects, sorted.
    nested_paths: Vec<String>,
    field_type_lookup: FieldTypeLookup,
    num_runtime_fields: usize,
    // Fields computed by an index-time script, sorted by name.
    index_time_script_fields: Vec<Arc<Mapper>>,
}

#[derive(Default)]
struct Collected {
    leaves: Vec<(FieldMapper, bool)>,
    aliases: Vec<FieldAliasMapper>,
    objects: Vec<Arc<Mapper>>,
}

fn collect(object: &ObjectMapper, collected: &mut Collected) {
    for child in object.child_arcs() {
        match child.as_ref() {
            Mapper::Object(child_object) => {
                collected.objects.push(child.clone());
                collect(child_object, collected);
            }
            Mapper::Field(field_mapper) => collect_leaf(field_mapper, false, collected),
            Mapper::Alias(alias) => collected.aliases.push(alias.clone()),
            Mapper::Metadata(_) => {}
        }
    }
}

fn collect_leaf(field_mapper: &FieldMapper, is_multi_field: bool, collected: &mut Collected) {
    collected.leaves.push((field_mapper.clone(), is_multi_field));
    for multi_field in field_mapper.multi_fields() {
        collect_leaf(multi_field, true, collected);
    }
}

/// Path of the innermost nested object holding `path`, if any.
fn nested_scope_of<'a>(nested_paths: &'a [String], path: &str) -> Option<&'a str> {
    nested_paths
        .iter()
        .filter(|nested_path| {
            path.strip_prefix(nested_path.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
        })
        .max_by_key(|nested_path| nested_path.len())
        .map(String::as_str)
}

impl MappingLookup {
    pub fn empty() -> MappingLookup {
        // An empty mapping has nothing that can fail validation.
        MappingLookup::build(Arc::new(Mapping::empty()))
    }

    /// Indexes `mapping` and validates the cross field rules: unique names, alias targets and
    /// `copy_to` nesting.
    pub fn from_mapping(mapping: Arc<Mapping>) -> Result<MappingLookup, MappingError> {
        let lookup = MappingLookup::build(mapping);
        lookup.validate()?;
        Ok(lookup)
    }

    fn build(mapping: Arc<Mapping>) -> MappingLookup {
        let mut collected = Collected::default();
        collect(mapping.root().object(), &mut collected);
        let metadata_mappers = mapping.metadata_mappers();
        let field_type_lookup = FieldTypeLookup::new(
            collected
                .leaves
                .iter()
                .filter(|(_, is_multi_field)| !is_multi_field)
                .map(|(field_mapper, _)| field_mapper),
            &collected.aliases,
            &metadata_mappers,
            mapping.root().runtime_fields(),
        );
        let mut field_mappers = FnvHashMap::default();
        for (field_mapper, _) in collected.leaves {
            field_mappers.insert(
                field_mapper.name().to_string(),
                Arc::new(Mapper::Field(field_mapper)),
            );
        }
        for alias in collected.aliases {
            // Name clashes with concrete fields are reported by `validate`.
            field_mappers
                .entry(alias.name().to_string())
                .or_insert_with(|| Arc::new(Mapper::Alias(alias)));
        }
        let mut index_time_script_fields: Vec<Arc<Mapper>> = field_mappers
            .values()
            .filter(|mapper| {
                matches!(mapper.as_ref(), Mapper::Field(field) if field.has_index_script())
            })
            .cloned()
            .collect();
        index_time_script_fields.sort_by(|left, right| left.name().cmp(right.name()));
        let mut nested_paths = Vec::new();
        let mut object_mappers = FnvHashMap::default();
        for object in collected.objects {
            if object.as_object().is_some_and(ObjectMapper::is_nested) {
                nested_paths.push(object.name().to_string());
            }
            object_mappers.insert(object.name().to_string(), object);
        }
        nested_paths.sort();
        let num_runtime_fields = mapping.root().runtime_fields().count();
        let root_mapper = Arc::new(Mapper::Object(mapping.root().object().clone()));
        MappingLookup {
            mapping,
            root_mapper,
            field_mappers,
            object_mappers,
            metadata_mappers,
            nested_paths,
            field_type_lookup,
            num_runtime_fields,
            index_time_script_fields,
        }
    }

    fn validate(&self) -> Result<(), MappingError> {
        let mut collected = Collected::default();
        collect(self.mapping.root().object(), &mut collected);
        let mut seen = BTreeSet::new();
        for (field_mapper, _) in &collected.leaves {
            let name = field_mapper.name();
            if self.object_mappers.contains_key(name) {
                return Err(MappingError::Invalid(format!(
                    "Field [{name}] is defined both as an object and a field"
                )));
            }
            if MetadataKind::from_name(name).is_some() {
                return Err(MappingError::Invalid(format!(
                    "Field [{name}] is defined both as a metadata field and a concrete field"
                )));
            }
            if !seen.insert(name) {
                return Err(MappingError::Invalid(format!(
                    "Field [{name}] is defined more than once"
                )));
            }
        }
        for alias in &collected.aliases {
            let name = alias.name();
            if self.object_mappers.contains_key(name) {
                return Err(MappingError::Invalid(format!(
                    "Alias [{name}] is defined both as an object and an alias"
                )));
            }
            if seen.contains(name) {
                return Err(MappingError::Invalid(format!(
                    "Alias [{name}] is defined both as an alias and a concrete field"
                )));
            }
            self.validate_alias(alias)?;
        }
        for (field_mapper, _) in &collected.leaves {
            self.validate_copy_to(field_mapper)?;
            if field_mapper.params().is_time_series_dimension()
                && self.nested_scope(field_mapper.name()).is_some()
            {
                return Err(MappingError::Invalid(format!(
                    "time_series_dimension can't be configured in nested field [{}]",
                    field_mapper.name()
                )));
            }
        }
        Ok(())
    }

    fn validate_alias(&self, alias: &FieldAliasMapper) -> Result<(), MappingError> {
        let path = alias.path();
        if path == alias.name() {
            return Err(alias.invalid_path("an alias cannot refer to itself."));
        }
        match self.field_mappers.get(path).map(Arc::as_ref) {
            Some(Mapper::Field(_)) => {}
            Some(Mapper::Alias(_)) => {
                return Err(alias.invalid_path("an alias cannot refer to another alias."))
            }
            _ => {
                return Err(
                    alias.invalid_path("an alias must refer to an existing field in the mappings.")
                )
            }
        }
        let alias_scope = self.nested_scope(alias.name());
        let path_scope = self.nested_scope(path);
        if alias_scope != path_scope {
            let alias_part = match alias_scope {
                Some(scope) => format!("The alias's nested scope is [{scope}]"),
                None => "The alias is not nested".to_string(),
            };
            let path_part = match path_scope {
                Some(scope) => format!("the target's nested scope is [{scope}]."),
                None => "the target is not nested.".to_string(),
            };
            return Err(alias.invalid_path(&format!(
                "an alias must have the same nested scope as its target. {alias_part}, but \
                 {path_part}"
            )));
        }
        Ok(())
    }

    fn validate_copy_to(&self, field_mapper: &FieldMapper) -> Result<(), MappingError> {
        let source_scope = self.nested_scope(field_mapper.name());
        for target in field_mapper.copy_to() {
            if self.object_mappers.contains_key(target) {
                return Err(MappingError::Invalid(format!(
                    "Cannot copy to field [{target}] since it is mapped as an object"
                )));
            }
            if let Some(Mapper::Alias(_)) = self.field_mappers.get(target).map(Arc::as_ref) {
                return Err(MappingError::Invalid(format!(
                    "Cannot copy to a field alias [{target}]."
                )));
            }
            let target_scope = self.nested_scope(target);
            let target_is_parent_of_source = match (source_scope, target_scope) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(source), Some(target)) => {
                    source == target
                        || source
                            .strip_prefix(target)
                            .is_some_and(|rest| rest.starts_with('.'))
                }
            };
            if !target_is_parent_of_source {
                return Err(MappingError::Invalid(format!(
                    "Illegal combination of [copy_to] and [nested] mappings: [copy_to] may only \
                     copy data to the current nested document or any of its parents, however \
                     one [copy_to] directive is trying to copy data from nested object [{}] to \
                     [{}]",
                    source_scope.unwrap_or("null"),
                    target_scope.unwrap_or("null"),
                )));
            }
        }
        Ok(())
    }

    /// Checks the mapping against the `mapping.*.limit` settings.
    pub fn check_limits(&self, settings: &IndexSettings) -> Result<(), LimitError> {
        let total_fields = self.num_fields() as u64;
        if total_fields > settings.total_fields_limit() {
            return Err(LimitError::TotalFields {
                limit: settings.total_fields_limit(),
            });
        }
        for object_path in self.object_mappers.keys() {
            // The root is level one.
            let depth = object_path.matches('.').count() as u64 + 2;
            if depth > settings.depth_limit() {
                return Err(LimitError::Depth {
                    limit: settings.depth_limit(),
                    path: object_path.clone(),
                });
            }
        }
        let name_length_limit = settings.field_name_length_limit();
        let simple_names = self
            .field_mappers
            .values()
            .chain(self.object_mappers.values())
            .map(|mapper| mapper.simple_name())
            .chain(
                self.mapping
                    .root()
                    .runtime_fields()
                    .map(|runtime_field| runtime_field.name()),
            );
        for name in simple_names {
            if name.chars().count() as u64 > name_length_limit {
                return Err(LimitError::FieldNameLength {
                    limit: name_length_limit,
                    name: name.to_string(),
                });
            }
        }
        if self.nested_paths.len() as u64 > settings.nested_fields_limit() {
            return Err(LimitError::NestedFields {
                limit: settings.nested_fields_limit(),
            });
        }
        Ok(())
    }

    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    pub fn root(&self) -> &RootObjectMapper {
        self.mapping.root()
    }

    /// Fields, multi-fields, aliases, objects and runtime fields. Metadata fields do not count.
    pub fn num_fields(&self) -> usize {
        self.field_mappers.len() + self.object_mappers.len() + self.num_runtime_fields
    }

    /// The leaf, multi-field or alias mapper named `name`.
    pub fn get_mapper(&self, name: &str) -> Option<&Mapper> {
        self.field_mappers.get(name).map(Arc::as_ref)
    }

    pub fn object_mapper(&self, path: &str) -> Option<&ObjectMapper> {
        self.object_mappers.get(path).and_then(|mapper| mapper.as_object())
    }

    pub(crate) fn object_mapper_arc(&self, path: &str) -> Option<&Arc<Mapper>> {
        self.object_mappers.get(path)
    }

    pub(crate) fn field_mapper_arc(&self, name: &str) -> Option<&Arc<Mapper>> {
        self.field_mappers.get(name)
    }

    /// The root object as a [`Mapper::Object`].
    pub(crate) fn root_mapper(&self) -> &Arc<Mapper> {
        &self.root_mapper
    }

    pub fn metadata_mapper(&self, name: &str) -> Option<&MetadataFieldMapper> {
        self.metadata_mappers
            .iter()
            .find(|metadata_mapper| metadata_mapper.name() == name)
    }

    pub fn metadata_mappers(&self) -> &[MetadataFieldMapper] {
        &self.metadata_mappers
    }

    pub fn source_config(&self) -> SourceConfig {
        self.metadata_mappers
            .iter()
            .find_map(MetadataFieldMapper::source_config)
            .cloned()
            .unwrap_or_default()
    }

    pub fn routing_required(&self) -> bool {
        self.metadata_mappers
            .iter()
            .any(MetadataFieldMapper::routing_required)
    }

    pub fn field_type(&self, name: &str) -> Option<Arc<FieldType>> {
        self.field_type_lookup.get(name)
    }

    pub fn field_type_lookup(&self) -> &FieldTypeLookup {
        &self.field_type_lookup
    }

    pub fn matching_field_names(&self, pattern: &str) -> Vec<String> {
        self.field_type_lookup.matching_field_names(pattern)
    }

    pub fn source_paths(&self, field: &str) -> BTreeSet<String> {
        self.field_type_lookup.source_paths(field)
    }

    pub fn is_multi_field(&self, name: &str) -> bool {
        self.field_type_lookup.is_multi_field(name)
    }

    /// Fields whose values come from an index-time script, in name order.
    pub(crate) fn index_time_script_fields(&self) -> impl Iterator<Item = &FieldMapper> {
        self.index_time_script_fields
            .iter()
            .filter_map(|mapper| match mapper.as_ref() {
                Mapper::Field(field) => Some(field),
                _ => None,
            })
    }

    pub fn has_nested_objects(&self) -> bool {
        !self.nested_paths.is_empty()
    }

    pub fn nested_paths(&self) -> &[String] {
        &self.nested_paths
    }

    /// Path of the innermost nested object holding `path`.
    pub fn nested_scope(&self, path: &str) -> Option<&str> {
        nested_scope_of(&self.nested_paths, path)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mapper::MappingParserContext;

    fn mapping_lookup(definition: serde_json::Value) -> Result<MappingLookup, MappingError> {
        let mapping = Mapping::parse(&definition, &MappingParserContext::default())?;
        MappingLookup::from_mapping(Arc::new(mapping))
    }

    #[test]
    fn test_lookup_indexes_every_field() {
        let lookup = mapping_lookup(json!({
            "properties": {
                "title": {"type": "text", "fields": {"raw": {"type": "keyword"}}},
                "user": {"properties": {"id": {"type": "keyword"}}},
                "comments": {"type": "nested", "properties": {"body": {"type": "text"}}},
                "author": {"type": "alias", "path": "user.id"}
            },
            "runtime": {"day": {"type": "keyword"}}
        }))
        .unwrap();
        assert_eq!(lookup.get_mapper("title.raw").unwrap().type_name(), "keyword");
        assert_eq!(lookup.get_mapper("author").unwrap().type_name(), "alias");
        assert!(lookup.get_mapper("user").is_none());
        assert!(lookup.object_mapper("user").is_some());
        assert_eq!(lookup.field_type("author").unwrap().name(), "user.id");
        assert_eq!(lookup.field_type("day").unwrap().type_name(), "keyword");
        assert_eq!(lookup.nested_paths(), ["comments"]);
        assert_eq!(lookup.nested_scope("comments.body"), Some("comments"));
        assert_eq!(lookup.nested_scope("comments"), None);
        assert!(lookup.is_multi_field("title.raw"));
        // title, title.raw, user.id, comments.body, author, user, comments, day
        assert_eq!(lookup.num_fields(), 8);
    }

    #[test]
    fn test_alias_validation() {
        let error = mapping_lookup(json!({"properties": {
            "a": {"type": "alias", "path": "a"}
        }}))
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid [path] value [a] for field alias [a]: an alias cannot refer to itself."
        );
        let error = mapping_lookup(json!({"properties": {
            "a": {"type": "alias", "path": "missing"}
        }}))
        .unwrap_err();
        assert!(error
            .to_string()
            .ends_with("an alias must refer to an existing field in the mappings."));
        let error = mapping_lookup(json!({"properties": {
            "f": {"type": "long"},
            "a": {"type": "alias", "path": "f"},
            "b": {"type": "alias", "path": "a"}
        }}))
        .unwrap_err();
        assert!(error.to_string().ends_with("an alias cannot refer to another alias."));
        let error = mapping_lookup(json!({"properties": {
            "n": {"type": "nested", "properties": {"f": {"type": "long"}}},
            "a": {"type": "alias", "path": "n.f"}
        }}))
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid [path] value [n.f] for field alias [a]: an alias must have the same nested \
             scope as its target. The alias is not nested, but the target's nested scope is [n]."
        );
    }

    #[test]
    fn test_copy_to_validation() {
        let error = mapping_lookup(json!({"properties": {
            "n": {"type": "nested", "properties": {"f": {"type": "keyword"}}},
            "f": {"type": "keyword", "copy_to": "n.g"}
        }}))
        .unwrap_err();
        assert!(error
            .to_string()
            .ends_with("trying to copy data from nested object [null] to [n]"));
        let error = mapping_lookup(json!({"properties": {
            "o": {"properties": {"f": {"type": "keyword"}}},
            "f": {"type": "keyword", "copy_to": "o"}
        }}))
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Cannot copy to field [o] since it is mapped as an object"
        );
        mapping_lookup(json!({"properties": {
            "n": {"type": "nested", "properties": {"f": {"type": "keyword", "copy_to": "g"}}},
            "g": {"type": "keyword"}
        }}))
        .unwrap();
    }

    #[test]
    fn test_duplicate_names() {
        let error = mapping_lookup(json!({
            "subobjects": false,
            "properties": {
                "a.b": {"type": "long"},
                "a": {"type": "keyword", "fields": {"b": {"type": "keyword"}}}
            }
        }))
        .unwrap_err();
        assert_eq!(error.to_string(), "Field [a.b] is defined more than once");
        let error =
            mapping_lookup(json!({"properties": {"_id": {"type": "keyword"}}})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Field [_id] is defined both as a metadata field and a concrete field"
        );
    }

    #[test]
    fn test_check_limits() {
        let lookup = mapping_lookup(json!({"properties": {
            "a": {"properties": {"b": {"properties": {"c": {"type": "long"}}}}},
            "n": {"type": "nested"},
            "long_field_name": {"type": "keyword"}
        }}))
        .unwrap();
        let mut settings = IndexSettings::default();
        lookup.check_limits(&settings).unwrap();

        settings.mapping.total_fields.limit = 4;
        assert_eq!(
            lookup.check_limits(&settings).unwrap_err(),
            LimitError::TotalFields { limit: 4 }
        );
        settings = IndexSettings::default();
        settings.mapping.depth.limit = 2;
        assert_eq!(
            lookup.check_limits(&settings).unwrap_err(),
            LimitError::Depth {
                limit: 2,
                path: "a.b".to_string()
            }
        );
        settings = IndexSettings::default();
        settings.mapping.field_name_length.limit = 10;
        assert_eq!(
            lookup.check_limits(&settings).unwrap_err(),
            LimitError::FieldNameLength {
                limit: 10,
                name: "long_field_name".to_string()
            }
        );
        settings = IndexSettings::default();
        settings.mapping.nested_fields.limit = 0;
        assert_eq!(
            lookup.check_limits(&settings).unwrap_err(),
            LimitError::NestedFields { limit: 0 }
        );
    }

    #[test]
    fn test_time_series_dimension_outside_nested_fields() {
        let lookup = mapping_lookup(json!({
            "properties": {
                "host": {"properties": {"id": {"type": "long", "time_series_dimension": true}}}
            }
        }))
        .unwrap();
        assert!(lookup.get_mapper("host.id").is_some());
        let error = mapping_lookup(json!({
            "properties": {
                "hosts": {
                    "type": "nested",
                    "properties": {"id": {"type": "long", "time_series_dimension": true}}
                }
            }
        }))
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "time_series_dimension can't be configured in nested field [hosts.id]"
        );
    }
}
