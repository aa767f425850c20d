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

use mapwright_config::IndexSettings;
use mapwright_doc_mapper::{
    LimitError, MapperService, MapperServiceError, Mapping, MappingParserContext, MergeError,
    MergeReason, SourceToParse,
};
use proptest::prelude::*;
use serde_json::json;

fn index(service: &MapperService, source: serde_json::Value) {
    service
        .index_document(SourceToParse::new(None, source.to_string()))
        .unwrap();
}

fn mapping_json(service: &MapperService) -> serde_json::Value {
    service.document_mapper().mapping().to_json()
}

#[test]
fn test_dynamic_updates_converge_whatever_the_order() {
    let documents = [
        json!({"a.b": 1}),
        json!({"a": {"c": "text"}}),
        json!({"a": {"d": {"e": true}}}),
    ];
    let forward = MapperService::new(IndexSettings::default());
    for document in &documents {
        index(&forward, document.clone());
    }
    let backward = MapperService::new(IndexSettings::default());
    for document in documents.iter().rev() {
        index(&backward, document.clone());
    }
    assert_eq!(mapping_json(&forward), mapping_json(&backward));
    let mapping = mapping_json(&forward);
    let a = &mapping["_doc"]["properties"]["a"]["properties"];
    assert_eq!(a["b"], json!({"type": "long"}));
    assert_eq!(a["d"]["properties"]["e"], json!({"type": "boolean"}));
}

#[test]
fn test_published_snapshot_is_immutable() {
    let service = MapperService::new(IndexSettings::default());
    index(&service, json!({"a": 1}));
    let snapshot = service.document_mapper();
    index(&service, json!({"b": 1}));
    assert!(snapshot.lookup().get_mapper("b").is_none());
    assert!(service.document_mapper().lookup().get_mapper("b").is_some());
    assert_eq!(snapshot.version() + 1, service.mapping_version());
}

#[test]
fn test_merge_conflict_lists_every_parameter() {
    let service = MapperService::new(IndexSettings::default());
    service
        .merge_json(
            r#"{"properties": {"t": {"type": "text", "analyzer": "standard", "norms": false}}}"#,
            MergeReason::MappingUpdate,
        )
        .unwrap();
    let error = service
        .merge_json(
            r#"{"properties": {"t": {"type": "text", "analyzer": "whitespace", "norms": true}}}"#,
            MergeReason::MappingUpdate,
        )
        .unwrap_err();
    let MapperServiceError::Merge(MergeError::Conflict { field, conflicts }) = error else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(field, "t");
    assert_eq!(conflicts.len(), 2);
}

#[test]
fn test_object_and_field_cannot_be_merged() {
    let service = MapperService::new(IndexSettings::default());
    index(&service, json!({"a": {"b": 1}}));
    let error = service
        .merge_json(
            r#"{"properties": {"a": {"type": "keyword"}}}"#,
            MergeReason::MappingUpdate,
        )
        .unwrap_err();
    assert!(matches!(error, MapperServiceError::Merge(_)));
    assert!(service.document_mapper().lookup().object_mapper("a").is_some());
}

#[test]
fn test_depth_limit_on_merge() {
    let settings: IndexSettings =
        serde_json::from_value(json!({"mapping": {"depth": {"limit": 2}}})).unwrap();
    let service = MapperService::new(settings);
    service
        .merge_json(
            r#"{"properties": {"a": {"properties": {"b": {"type": "long"}}}}}"#,
            MergeReason::MappingUpdate,
        )
        .unwrap();
    let error = service
        .merge_json(
            r#"{"properties": {"a.c.d": {"type": "long"}}}"#,
            MergeReason::MappingUpdate,
        )
        .unwrap_err();
    assert!(matches!(
        error,
        MapperServiceError::Merge(MergeError::LimitExceeded(LimitError::Depth { limit: 2, .. }))
    ));
}

#[test]
fn test_runtime_field_removal() {
    let service = MapperService::new(IndexSettings::default());
    service
        .merge_json(
            r#"{"runtime": {"day": {"type": "keyword"}}}"#,
            MergeReason::MappingUpdate,
        )
        .unwrap();
    assert!(service.document_mapper().lookup().field_type("day").is_some());
    service
        .merge_json(r#"{"runtime": {"day": null}}"#, MergeReason::MappingUpdate)
        .unwrap();
    assert!(service.document_mapper().lookup().field_type("day").is_none());
}

proptest! {
    #[test]
    fn proptest_merged_mapping_serialization_is_stable(
        fields in prop::collection::btree_map(
            "[a-c]{1,2}(\\.[a-c]{1,2}){0,2}",
            prop_oneof![Just("long"), Just("keyword"), Just("boolean")],
            1..6,
        )
    ) {
        let service = MapperService::new(IndexSettings::default());
        for (path, type_name) in &fields {
            let definition = json!({"properties": {path.as_str(): {"type": type_name}}});
            let Ok(incoming) = Mapping::parse(&definition, &MappingParserContext::default())
            else {
                continue;
            };
            // Paths may collide with each other, conflicting merges are simply rejected.
            let _ = service.merge(&incoming, MergeReason::MappingUpdate);
        }
        let serialized = mapping_json(&service);
        let reparsed = Mapping::parse(&serialized, &MappingParserContext::default()).unwrap();
        prop_assert_eq!(reparsed.to_json(), serialized);
    }
}
