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

use std::sync::Arc;

use mapwright_config::IndexSettings;
use mapwright_doc_mapper::{
    DocParsingError, DocumentParser, MapperService, Mapping, MappingLookup,
    MappingParserContext, MergeReason, ParsedDocument, SourceToParse,
};
use proptest::prelude::*;
use serde_json::{json, Value as JsonValue};

fn lookup(mapping: JsonValue) -> MappingLookup {
    let mapping = Mapping::parse(&mapping, &MappingParserContext::default()).unwrap();
    MappingLookup::from_mapping(Arc::new(mapping)).unwrap()
}

fn parse(lookup: &MappingLookup, source: &JsonValue) -> Result<ParsedDocument, DocParsingError> {
    DocumentParser::default().parse(lookup, SourceToParse::new(Some("1"), source.to_string()))
}

fn arbitrary_json() -> impl Strategy<Value = JsonValue> {
    let leaf = prop_oneof![
        Just(JsonValue::Null),
        any::<bool>().prop_map(JsonValue::from),
        any::<i64>().prop_map(JsonValue::from),
        (-1.0e6..1.0e6f64).prop_map(JsonValue::from),
        "[a-z0-9 ]{0,12}".prop_map(JsonValue::from),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(JsonValue::Array),
            prop::collection::btree_map("[a-z]{1,4}(\\.[a-z]{1,4})?", inner, 0..4)
                .prop_map(|entries| JsonValue::Object(entries.into_iter().collect())),
        ]
    })
}

#[test]
fn test_user_scenario_with_schema_update() {
    let service = MapperService::new(IndexSettings::default());
    service
        .merge_json(
            r#"{"properties": {"user": {"properties": {"id": {"type": "keyword"}}}}}"#,
            MergeReason::MappingUpdate,
        )
        .unwrap();

    let parsed = service
        .parse_document(SourceToParse::new(
            Some("1"),
            json!({"user": {"id": "u1", "age": 30}}).to_string(),
        ))
        .unwrap();
    assert_eq!(parsed.root_doc().terms("user.id"), ["u1"]);
    let update = parsed.dynamic_update.clone().unwrap();
    assert_eq!(
        update.to_json(),
        json!({"_doc": {"properties": {"user": {"properties": {"age": {"type": "long"}}}}}})
    );
    service.merge(&update, MergeReason::MappingUpdate).unwrap();

    let parsed = service
        .parse_document(SourceToParse::new(
            Some("2"),
            json!({"user": {"age": "31"}}).to_string(),
        ))
        .unwrap();
    assert!(parsed.dynamic_update.is_none());
    assert_eq!(parsed.root_doc().numeric_doc_values("user.age"), [31]);
}

#[test]
fn test_ignore_malformed_keeps_other_fields() {
    let lookup = lookup(json!({
        "properties": {
            "f": {"type": "integer", "ignore_malformed": true},
            "g": {"type": "integer"}
        }
    }));
    let parsed = parse(&lookup, &json!({"f": "not-a-number", "g": 1})).unwrap();
    assert_eq!(parsed.ignored_fields, ["f"]);
    assert!(!parsed.root_doc().has_field("f"));
    assert_eq!(parsed.root_doc().numeric_doc_values("g"), [1]);
}

#[test]
fn test_index_wide_ignore_malformed_default() {
    let settings: IndexSettings =
        serde_json::from_value(json!({"mapping": {"ignore_malformed": true}})).unwrap();
    let service = MapperService::new(settings);
    let mapping = Mapping::parse(
        &json!({"properties": {
            "n": {"type": "long"},
            "m": {"type": "long", "ignore_malformed": false}
        }}),
        service.mapping_parser_context(),
    )
    .unwrap();
    service.merge(&mapping, MergeReason::MappingUpdate).unwrap();
    let parsed = service
        .parse_document(SourceToParse::new(None, r#"{"n": "x"}"#))
        .unwrap();
    assert_eq!(parsed.ignored_fields, ["n"]);
    let error = service
        .parse_document(SourceToParse::new(None, r#"{"m": "x"}"#))
        .unwrap_err();
    assert!(matches!(error, DocParsingError::Malformed { .. }));
}

#[test]
fn test_nested_include_in_parent_and_copy_to() {
    let lookup = lookup(json!({
        "properties": {
            "order": {
                "type": "nested",
                "properties": {
                    "items": {
                        "type": "nested",
                        "include_in_parent": true,
                        "properties": {
                            "sku": {"type": "keyword", "copy_to": ["order.all_skus", "skus"]}
                        }
                    },
                    "all_skus": {"type": "keyword"}
                }
            },
            "skus": {"type": "keyword"}
        }
    }));
    let source = json!({"order": {"items": [{"sku": "a"}, {"sku": "b"}]}});
    let parsed = parse(&lookup, &source).unwrap();
    // Root, the order and its two items.
    assert_eq!(parsed.docs.len(), 4);
    let order_doc = &parsed.docs[1];
    assert_eq!(order_doc.nested_path(), Some("order"));
    assert_eq!(order_doc.parent(), Some(0));
    assert_eq!(order_doc.terms("order.all_skus"), ["a", "b"]);
    assert_eq!(order_doc.terms("order.items.sku"), ["a", "b"]);
    assert_eq!(parsed.docs[2].parent(), Some(1));
    assert_eq!(parsed.docs[2].terms("order.items.sku"), ["a"]);
    assert_eq!(parsed.root_doc().terms("skus"), ["a", "b"]);
    assert!(parsed.root_doc().terms("order.items.sku").is_empty());
}

#[test]
fn test_nested_objects_limit() {
    let settings: IndexSettings =
        serde_json::from_value(json!({"mapping": {"nested_objects": {"limit": 2}}})).unwrap();
    let lookup = lookup(json!({"properties": {"n": {"type": "nested"}}}));
    let parser = DocumentParser::new(&settings, MappingParserContext::default());
    let source = json!({"n": [{"a": 1}, {"a": 2}, {"a": 3}]}).to_string();
    let error = parser
        .parse(&lookup, SourceToParse::new(Some("1"), source))
        .unwrap_err();
    assert!(matches!(error, DocParsingError::NestedObjectsLimit { limit: 2 }));
}

#[test]
fn test_dynamic_templates() {
    let lookup = lookup(json!({
        "dynamic_templates": [
            {"ids": {"match": "*_id", "mapping": {"type": "keyword"}}},
            {"counts": {"match_mapping_type": "long", "mapping": {"type": "integer"}}}
        ]
    }));
    let parsed = parse(&lookup, &json!({"user_id": "U1", "hits": 3})).unwrap();
    let update = parsed.dynamic_update.as_ref().unwrap().to_json();
    assert_eq!(update["_doc"]["properties"]["user_id"], json!({"type": "keyword"}));
    assert_eq!(update["_doc"]["properties"]["hits"], json!({"type": "integer"}));
    assert_eq!(parsed.root_doc().terms("user_id"), ["U1"]);
}

#[test]
fn test_date_detection() {
    let lookup = lookup(json!({}));
    let parsed = parse(&lookup, &json!({"created": "2015-01-01", "day": "monday"})).unwrap();
    let update = parsed.dynamic_update.as_ref().unwrap().to_json();
    assert_eq!(update["_doc"]["properties"]["created"]["type"], json!("date"));
    assert_eq!(update["_doc"]["properties"]["day"]["type"], json!("text"));
}

#[test]
fn test_source_filtering() {
    let lookup = lookup(json!({
        "_source": {"excludes": ["secret*"]},
        "properties": {"secret_token": {"type": "keyword"}}
    }));
    let parsed = parse(&lookup, &json!({"secret_token": "t", "name": "n"})).unwrap();
    assert_eq!(parsed.source, Some(json!({"name": "n"})));
    assert_eq!(parsed.root_doc().terms("secret_token"), ["t"]);
}

#[test]
fn test_routing_required() {
    let lookup = lookup(json!({"_routing": {"required": true}}));
    let error = parse(&lookup, &json!({"a": 1})).unwrap_err();
    assert!(matches!(error, DocParsingError::RoutingMissing { .. }));
    let source = SourceToParse::new(Some("1"), r#"{"a": 1}"#).with_routing("shard-a");
    let parsed = DocumentParser::default().parse(&lookup, source).unwrap();
    assert_eq!(parsed.routing.as_deref(), Some("shard-a"));
}

#[test]
fn test_seq_no_is_shared_by_nested_documents() {
    let lookup = lookup(json!({"properties": {"n": {"type": "nested"}}}));
    let parsed = parse(&lookup, &json!({"n": [{"a": 1}, {"a": 2}]})).unwrap();
    parsed.update_seq_no(17);
    for doc in &parsed.docs {
        assert_eq!(doc.numeric_doc_values("_seq_no"), [17]);
    }
    assert_eq!(parsed.seq_no(), 17);
}

#[test]
fn test_copy_to_dynamic_target_round_trips() {
    let service = MapperService::new(IndexSettings::default());
    service
        .merge_json(
            r#"{"properties": {"f": {"type": "keyword", "copy_to": ["a.b"]}}}"#,
            MergeReason::MappingUpdate,
        )
        .unwrap();
    let parsed = service
        .index_document(SourceToParse::new(Some("1"), r#"{"f": "v"}"#))
        .unwrap();
    assert_eq!(parsed.root_doc().terms("a.b"), ["v"]);
    let published = service.document_mapper().mapping().to_json_string();
    let reparsed =
        Mapping::from_json_str(&published, service.mapping_parser_context()).unwrap();
    assert_eq!(reparsed.to_json_string(), published);

    let error = service
        .merge_json(
            r#"{"properties": {"g": {"type": "keyword", "copy_to": ["a..b"]}}}"#,
            MergeReason::MappingUpdate,
        )
        .unwrap_err();
    assert!(error.to_string().contains("invalid [copy_to] target [a..b]"));
}

proptest! {
    #[test]
    fn proptest_strict_rejects_any_unmapped_value(value in arbitrary_json()) {
        let lookup = lookup(json!({
            "properties": {
                "a": {
                    "dynamic": "strict",
                    "properties": {"b": {"properties": {"known": {"type": "keyword"}}}}
                }
            }
        }));
        let document = json!({"a": {"b": {"unmapped": value}}});
        let error = parse(&lookup, &document).unwrap_err();
        prop_assert!(
            matches!(error, DocParsingError::StrictDynamicMapping { ref path, ref field }
                if path == "a.b" && field == "unmapped"),
            "unexpected error: {}", error
        );
    }

    #[test]
    fn proptest_disabled_object_creates_no_mapper(value in arbitrary_json()) {
        let lookup = lookup(json!({
            "properties": {"o": {"type": "object", "enabled": false}}
        }));
        let parsed = parse(&lookup, &json!({"o": value})).unwrap();
        prop_assert!(parsed.dynamic_update.is_none());
        prop_assert!(parsed
            .root_doc()
            .fields()
            .iter()
            .all(|field| !field.name.starts_with("o.")));
    }
}
