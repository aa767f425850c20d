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

use fnv::FnvHashMap;
use globset::GlobBuilder;
use tracing::debug;

use crate::field_type::{keyed_field_type, FieldType, FieldTypeKind};
use crate::mapper::{FieldAliasMapper, FieldMapper, MetadataFieldMapper, RuntimeField};

/// Resolves field names, as used by queries, to field types.
///
/// Names resolve in this order: runtime fields, concrete fields and their multi-fields, aliases,
/// metadata fields, then keys of flattened fields (`labels.release`).
#[derive(Clone, Debug, Default)]
pub struct FieldTypeLookup {
    full_name_to_field_type: FnvHashMap<String, Arc<FieldType>>,
    // Flattened fields, by full name.
    dynamic_key_field_types: FnvHashMap<String, Arc<FieldType>>,
    // Number of path segments of the longest flattened field name.
    max_key_depth: usize,
    multi_field_parents: FnvHashMap<String, String>,
    // copy_to destination -> fields copied into it.
    copied_from: FnvHashMap<String, BTreeSet<String>>,
    alias_paths: FnvHashMap<String, String>,
}

impl FieldTypeLookup {
    pub(crate) fn new<'a>(
        field_mappers: impl IntoIterator<Item = &'a FieldMapper>,
        aliases: impl IntoIterator<Item = &'a FieldAliasMapper>,
        metadata_mappers: &[MetadataFieldMapper],
        runtime_fields: impl IntoIterator<Item = &'a RuntimeField>,
    ) -> FieldTypeLookup {
        let mut lookup = FieldTypeLookup::default();
        for metadata_mapper in metadata_mappers {
            lookup.full_name_to_field_type.insert(
                metadata_mapper.name().to_string(),
                metadata_mapper.field_type().clone(),
            );
        }
        for field_mapper in field_mappers {
            lookup.add_field_mapper(field_mapper, None);
        }
        for alias in aliases {
            lookup
                .alias_paths
                .insert(alias.name().to_string(), alias.path().to_string());
            if let Some(target) = lookup.full_name_to_field_type.get(alias.path()).cloned() {
                lookup
                    .full_name_to_field_type
                    .insert(alias.name().to_string(), target);
            }
        }
        for runtime_field in runtime_fields {
            // Runtime fields shadow concrete fields of the same name.
            lookup.full_name_to_field_type.insert(
                runtime_field.name().to_string(),
                runtime_field.field_type().clone(),
            );
        }
        lookup
    }

    fn add_field_mapper(&mut self, field_mapper: &FieldMapper, parent: Option<&str>) {
        let name = field_mapper.name();
        let field_type = field_mapper.field_type();
        self.full_name_to_field_type
            .insert(name.to_string(), field_type.clone());
        if let FieldTypeKind::Flattened { key: None, .. } = field_type.kind() {
            let depth = name.split('.').count();
            self.max_key_depth = self.max_key_depth.max(depth);
            self.dynamic_key_field_types
                .insert(name.to_string(), field_type.clone());
        }
        if let Some(parent) = parent {
            self.multi_field_parents
                .insert(name.to_string(), parent.to_string());
        }
        for target in field_mapper.copy_to() {
            self.copied_from
                .entry(target.clone())
                .or_default()
                .insert(name.to_string());
        }
        for multi_field in field_mapper.multi_fields() {
            self.add_field_mapper(multi_field, Some(name));
        }
    }

    /// Returns the field type of `name`, following aliases and flattened keys.
    pub fn get(&self, name: &str) -> Option<Arc<FieldType>> {
        if let Some(field_type) = self.full_name_to_field_type.get(name) {
            return Some(field_type.clone());
        }
        self.get_dynamic_key_field_type(name)
    }

    /// Longest number of path segments a flattened field name spans.
    pub fn max_key_depth(&self) -> usize {
        self.max_key_depth
    }

    /// The `(root, key)` splits of `name` tried when looking up a flattened key. Only splits whose
    /// root spans at most `max_key_depth` segments are tried.
    pub(crate) fn dynamic_key_candidates<'a>(
        &self,
        name: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        name.match_indices('.')
            .take(self.max_key_depth)
            .map(move |(index, _)| (&name[..index], &name[index + 1..]))
    }

    fn get_dynamic_key_field_type(&self, name: &str) -> Option<Arc<FieldType>> {
        if self.dynamic_key_field_types.is_empty() {
            return None;
        }
        self.dynamic_key_candidates(name)
            .find_map(|(root_name, key)| {
                let root = self.dynamic_key_field_types.get(root_name)?;
                (!key.is_empty()).then(|| keyed_field_type(root, key))
            })
            .map(Arc::new)
    }

    /// Names of the fields matching `pattern`, which may hold `*` wildcards. Sorted.
    pub fn matching_field_names(&self, pattern: &str) -> Vec<String> {
        if !pattern.contains('*') {
            return if self.get(pattern).is_some() {
                vec![pattern.to_string()]
            } else {
                Vec::new()
            };
        }
        let escaped = pattern
            .split('*')
            .map(globset::escape)
            .collect::<Vec<_>>()
            .join("*");
        let matcher = match GlobBuilder::new(&escaped).literal_separator(false).build() {
            Ok(glob) => glob.compile_matcher(),
            Err(error) => {
                debug!(pattern, error = %error, "invalid field name pattern");
                return Vec::new();
            }
        };
        let matching: BTreeSet<&String> = self
            .full_name_to_field_type
            .keys()
            .filter(|name| matcher.is_match(name.as_str()))
            .collect();
        matching.into_iter().cloned().collect()
    }

    /// Paths of the `_source` values a field is built from.
    pub fn source_paths(&self, field: &str) -> BTreeSet<String> {
        let resolved = self
            .alias_paths
            .get(field)
            .map(String::as_str)
            .unwrap_or(field);
        if !self.full_name_to_field_type.contains_key(resolved) {
            if let Some(root_name) = self
                .dynamic_key_candidates(resolved)
                .map(|(root_name, _)| root_name)
                .find(|root_name| self.dynamic_key_field_types.contains_key(*root_name))
            {
                return BTreeSet::from([root_name.to_string()]);
            }
        }
        let source_of = |name: &str| {
            self.multi_field_parents
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string())
        };
        let mut paths = BTreeSet::from([source_of(resolved)]);
        if let Some(sources) = self.copied_from.get(resolved) {
            paths.extend(sources.iter().map(|source| source_of(source)));
        }
        paths
    }

    pub fn is_multi_field(&self, name: &str) -> bool {
        self.multi_field_parents.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::field_type::MetadataKind;
    use crate::mapper::{Mapper, MappingParserContext};

    fn field(name: &str, definition: serde_json::Value) -> FieldMapper {
        let simple_name = name.rsplit('.').next().unwrap_or(name);
        let mapper =
            Mapper::parse(name, simple_name, &definition, &MappingParserContext::default())
                .unwrap();
        mapper.as_field().unwrap().clone()
    }

    fn lookup(fields: &[FieldMapper]) -> FieldTypeLookup {
        let metadata_mappers: Vec<MetadataFieldMapper> = MetadataKind::ALL
            .into_iter()
            .map(MetadataFieldMapper::default_for)
            .collect();
        FieldTypeLookup::new(fields, [], &metadata_mappers, [])
    }

    #[test]
    fn test_exact_and_multi_field_lookup() {
        let fields = [
            field(
                "title",
                json!({"type": "text", "fields": {"raw": {"type": "keyword"}}}),
            ),
            field("count", json!({"type": "long"})),
        ];
        let lookup = lookup(&fields);
        assert_eq!(lookup.get("title").unwrap().type_name(), "text");
        assert_eq!(lookup.get("title.raw").unwrap().type_name(), "keyword");
        assert_eq!(lookup.get("_id").unwrap().name(), "_id");
        assert!(lookup.get("missing").is_none());
        assert!(lookup.is_multi_field("title.raw"));
        assert!(!lookup.is_multi_field("title"));
        assert_eq!(
            lookup.source_paths("title.raw"),
            BTreeSet::from(["title".to_string()])
        );
    }

    #[test]
    fn test_aliases_and_runtime_fields() {
        let ctx = MappingParserContext::default();
        let fields = [field("count", json!({"type": "long"}))];
        let alias = match Mapper::parse(
            "total",
            "total",
            &json!({"type": "alias", "path": "count"}),
            &ctx,
        )
        .unwrap()
        {
            Mapper::Alias(alias) => alias,
            _ => panic!("expected an alias"),
        };
        let runtime = RuntimeField::build(
            "count",
            serde_json::from_value(json!({"type": "keyword"})).unwrap(),
            &ctx,
        )
        .unwrap();
        let lookup = FieldTypeLookup::new(&fields, [&alias], &[], [&runtime]);
        // The alias was resolved before the runtime field shadowed its target.
        assert_eq!(lookup.get("total").unwrap().type_name(), "long");
        assert_eq!(lookup.get("count").unwrap().type_name(), "keyword");
        assert_eq!(
            lookup.source_paths("total"),
            BTreeSet::from(["count".to_string()])
        );
    }

    #[test]
    fn test_copy_to_source_paths() {
        let fields = [
            field("first", json!({"type": "text", "copy_to": ["full"]})),
            field("last", json!({"type": "text", "copy_to": ["full"]})),
            field("full", json!({"type": "text"})),
        ];
        let lookup = lookup(&fields);
        assert_eq!(
            lookup.source_paths("full"),
            BTreeSet::from(["first".to_string(), "full".to_string(), "last".to_string()])
        );
    }

    #[test]
    fn test_matching_field_names() {
        let fields = [
            field("user.name", json!({"type": "keyword"})),
            field("user.id", json!({"type": "keyword"})),
            field("user_agent", json!({"type": "keyword"})),
            field("weird[0]", json!({"type": "keyword"})),
        ];
        let lookup = lookup(&fields);
        assert_eq!(lookup.matching_field_names("user.*"), ["user.id", "user.name"]);
        assert_eq!(
            lookup.matching_field_names("user*"),
            ["user.id", "user.name", "user_agent"]
        );
        assert_eq!(lookup.matching_field_names("weird[*"), ["weird[0]"]);
        assert_eq!(lookup.matching_field_names("user.id"), ["user.id"]);
        assert!(lookup.matching_field_names("nope").is_empty());
    }

    #[test]
    fn test_flattened_keys() {
        let fields = [field("resource.labels", json!({"type": "flattened"}))];
        let lookup = lookup(&fields);
        assert_eq!(lookup.max_key_depth(), 2);
        let keyed = lookup.get("resource.labels.release.channel").unwrap();
        assert_eq!(keyed.name(), "resource.labels.release.channel");
        assert!(matches!(
            keyed.kind(),
            FieldTypeKind::Flattened { root_name, key: Some(key) }
                if root_name == "resource.labels" && key == "release.channel"
        ));
        assert!(lookup.get("resource.other.key").is_none());
        assert!(lookup.get("resource.labels.").is_none());
        assert_eq!(
            lookup.source_paths("resource.labels.release"),
            BTreeSet::from(["resource.labels".to_string()])
        );
    }

    proptest! {
        #[test]
        fn proptest_dynamic_key_lookup_is_bounded(
            root_segments in prop::collection::vec("[a-c]{1,2}", 1..4),
            extra_segments in prop::collection::vec("[a-c]{1,2}", 0..64),
        ) {
            let root_name = root_segments.join(".");
            let fields = [field(&root_name, json!({"type": "flattened"}))];
            let lookup = lookup(&fields);
            let mut segments = root_segments.clone();
            segments.extend(extra_segments.iter().cloned());
            let name = segments.join(".");
            let candidates: Vec<_> = lookup.dynamic_key_candidates(&name).collect();
            prop_assert!(candidates.len() <= lookup.max_key_depth());
            // Same answer as trying every split.
            let expected = (1..segments.len()).find_map(|split| {
                let candidate_root = segments[..split].join(".");
                (candidate_root == root_name).then(|| segments[split..].join("."))
            });
            let found = lookup.get(&name).and_then(|field_type| match field_type.kind() {
                FieldTypeKind::Flattened { key, .. } => key.clone(),
                _ => None,
            });
            prop_assert_eq!(found, expected);
        }
    }
}
