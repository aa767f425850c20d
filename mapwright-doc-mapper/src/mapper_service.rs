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

use arc_swap::ArcSwap;
use mapwright_config::IndexSettings;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::document_mapper::DocumentMapper;
use crate::field_type::ScriptCompiler;
use crate::lookup::MappingLookup;
use crate::mapper::{FieldDefaults, MappingParserContext, MergeReason};
use crate::parser::DocumentParser;
use crate::{DocParsingError, Mapping, MapperServiceError, ParsedDocument, SourceToParse};

/// A document whose dynamic update keeps conflicting with concurrent updates is rejected after
/// this many parses.
const MAX_INDEX_ATTEMPTS: usize = 4;

/// Owns the mapping of one index.
///
/// Readers take a [`DocumentMapper`] snapshot and use it for a whole operation. Mapping changes
/// go through a single writer: merge, rebuild the lookup, check the limits, publish. A failed
/// change leaves the published mapping untouched.
pub struct MapperService {
    settings: IndexSettings,
    mapping_ctx: MappingParserContext,
    parser: Arc<DocumentParser>,
    document_mapper: ArcSwap<DocumentMapper>,
    write_lock: Mutex<()>,
}

impl MapperService {
    pub fn new(settings: IndexSettings) -> MapperService {
        let mapping_ctx = MappingParserContext::from_settings(&settings);
        MapperService::with_context(settings, mapping_ctx)
    }

    /// Creates a service whose runtime field scripts are compiled by `script_compiler`.
    pub fn with_script_compiler(
        settings: IndexSettings,
        script_compiler: Arc<dyn ScriptCompiler>,
    ) -> MapperService {
        let defaults = FieldDefaults::from_settings(&settings.mapping);
        let mapping_ctx = MappingParserContext::new(defaults, script_compiler);
        MapperService::with_context(settings, mapping_ctx)
    }

    fn with_context(settings: IndexSettings, mapping_ctx: MappingParserContext) -> MapperService {
        let parser = Arc::new(DocumentParser::new(&settings, mapping_ctx.clone()));
        let document_mapper = DocumentMapper::new(MappingLookup::empty(), parser.clone(), 0);
        MapperService {
            settings,
            mapping_ctx,
            parser,
            document_mapper: ArcSwap::from_pointee(document_mapper),
            write_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn mapping_parser_context(&self) -> &MappingParserContext {
        &self.mapping_ctx
    }

    /// The currently published mapping.
    pub fn document_mapper(&self) -> Arc<DocumentMapper> {
        self.document_mapper.load_full()
    }

    pub fn mapping_version(&self) -> u64 {
        self.document_mapper.load().version()
    }

    /// Merges `incoming` into the published mapping and publishes the result.
    pub fn merge(
        &self,
        incoming: &Mapping,
        reason: MergeReason,
    ) -> Result<Arc<DocumentMapper>, MapperServiceError> {
        let _write_guard = self.write_lock.lock();
        let current = self.document_mapper.load_full();
        let next = match self.build_next(&current, incoming, reason) {
            Ok(Some(next)) => next,
            Ok(None) => {
                debug!(version = current.version(), "mapping unchanged");
                return Ok(current);
            }
            Err(error) => {
                warn!(version = current.version(), error = %error, "mapping update rejected");
                return Err(error);
            }
        };
        let next = Arc::new(next);
        self.document_mapper.store(next.clone());
        info!(
            version = next.version(),
            num_fields = next.lookup().num_fields(),
            reason = ?reason,
            "published mapping"
        );
        Ok(next)
    }

    /// Parses `mapping_json` then merges it, see [`MapperService::merge`].
    pub fn merge_json(
        &self,
        mapping_json: &str,
        reason: MergeReason,
    ) -> Result<Arc<DocumentMapper>, MapperServiceError> {
        let incoming = Mapping::from_json_str(mapping_json, &self.mapping_ctx)?;
        self.merge(&incoming, reason)
    }

    /// Returns `None` when merging does not change the mapping.
    fn build_next(
        &self,
        current: &DocumentMapper,
        incoming: &Mapping,
        reason: MergeReason,
    ) -> Result<Option<DocumentMapper>, MapperServiceError> {
        let merged = current.mapping().merge(incoming, reason, &self.mapping_ctx)?;
        if merged.to_json() == current.mapping().to_json() {
            return Ok(None);
        }
        let lookup = MappingLookup::from_mapping(Arc::new(merged))?;
        if reason != MergeReason::MappingRecovery {
            lookup.check_limits(&self.settings)?;
        }
        let version = current.version() + 1;
        Ok(Some(DocumentMapper::new(lookup, self.parser.clone(), version)))
    }

    /// Parses a document against the published mapping. The dynamic update, if any, is returned
    /// to the caller and not applied.
    pub fn parse_document(
        &self,
        source: SourceToParse,
    ) -> Result<ParsedDocument, DocParsingError> {
        self.document_mapper.load().parse(source)
    }

    /// Parses a document, applies its dynamic update and parses it again against the mapping
    /// that now holds every field of the document. The returned document carries no update.
    pub fn index_document(
        &self,
        source: SourceToParse,
    ) -> Result<ParsedDocument, MapperServiceError> {
        let mut document_mapper = self.document_mapper();
        for _ in 0..MAX_INDEX_ATTEMPTS {
            let parsed = document_mapper.parse(source.clone())?;
            let Some(dynamic_update) = &parsed.dynamic_update else {
                return Ok(parsed);
            };
            document_mapper = self.merge(dynamic_update, MergeReason::MappingUpdate)?;
            debug!(
                version = document_mapper.version(),
                id = ?source.id,
                "applied dynamic mapping update"
            );
        }
        Err(DocParsingError::Internal(format!(
            "dynamic mapping update did not settle after {MAX_INDEX_ATTEMPTS} attempts"
        ))
        .into())
    }
}

#[cfg(test)]
mod tests {
    use mapwright_common::setup_logging_for_tests;
    use serde_json::json;

    use super::*;
    use crate::{LimitError, MergeError};

    fn source(json: serde_json::Value) -> SourceToParse {
        SourceToParse::new(Some("1"), json.to_string())
    }

    #[test]
    fn test_merge_publishes_new_version() {
        setup_logging_for_tests();
        let service = MapperService::new(IndexSettings::default());
        assert_eq!(service.mapping_version(), 0);
        let published = service
            .merge_json(
                r#"{"properties": {"name": {"type": "keyword"}}}"#,
                MergeReason::MappingUpdate,
            )
            .unwrap();
        assert_eq!(published.version(), 1);
        assert!(service.document_mapper().lookup().get_mapper("name").is_some());
        // Same mapping again: nothing to publish.
        service
            .merge_json(
                r#"{"properties": {"name": {"type": "keyword"}}}"#,
                MergeReason::MappingUpdate,
            )
            .unwrap();
        assert_eq!(service.mapping_version(), 1);
    }

    #[test]
    fn test_rejected_merge_keeps_published_mapping() {
        let service = MapperService::new(IndexSettings::default());
        service
            .merge_json(
                r#"{"properties": {"name": {"type": "keyword"}}}"#,
                MergeReason::MappingUpdate,
            )
            .unwrap();
        let snapshot = service.document_mapper();
        let error = service
            .merge_json(
                r#"{"properties": {"name": {"type": "long"}}}"#,
                MergeReason::MappingUpdate,
            )
            .unwrap_err();
        assert!(matches!(
            error,
            MapperServiceError::Merge(MergeError::TypeConflict { .. })
        ));
        assert!(Arc::ptr_eq(&snapshot, &service.document_mapper()));
    }

    #[test]
    fn test_limits_are_checked_except_on_recovery() {
        let settings: IndexSettings =
            serde_json::from_value(json!({"mapping": {"total_fields": {"limit": 1}}})).unwrap();
        let service = MapperService::new(settings);
        let mapping = r#"{"properties": {"a": {"type": "long"}, "b": {"type": "long"}}}"#;
        let error = service
            .merge_json(mapping, MergeReason::MappingUpdate)
            .unwrap_err();
        assert!(matches!(
            error,
            MapperServiceError::Merge(MergeError::LimitExceeded(LimitError::TotalFields {
                limit: 1
            }))
        ));
        assert_eq!(service.mapping_version(), 0);
        service
            .merge_json(mapping, MergeReason::MappingRecovery)
            .unwrap();
        assert_eq!(service.mapping_version(), 1);
    }

    #[test]
    fn test_index_document_applies_dynamic_update() {
        let service = MapperService::new(IndexSettings::default());
        let parsed = service
            .index_document(source(json!({"user": {"id": "u1", "age": 3}})))
            .unwrap();
        assert!(parsed.dynamic_update.is_none());
        assert_eq!(parsed.root_doc().terms("user.id.keyword"), ["u1"]);
        assert_eq!(service.mapping_version(), 1);
        let lookup = service.document_mapper().lookup().clone();
        assert_eq!(lookup.field_type("user.age").unwrap().type_name(), "long");
        // Known fields only: no new version.
        service
            .index_document(source(json!({"user": {"age": 4}})))
            .unwrap();
        assert_eq!(service.mapping_version(), 1);
    }

    #[test]
    fn test_parse_document_does_not_publish() {
        let service = MapperService::new(IndexSettings::default());
        let parsed = service.parse_document(source(json!({"a": 1}))).unwrap();
        assert!(parsed.dynamic_update.is_some());
        assert_eq!(service.mapping_version(), 0);
    }

    #[test]
    fn test_dynamic_update_over_limit_is_rejected() {
        let settings: IndexSettings =
            serde_json::from_value(json!({"mapping": {"total_fields": {"limit": 2}}})).unwrap();
        let service = MapperService::new(settings);
        let error = service
            .index_document(source(json!({"a": 1, "b": 2, "c": 3})))
            .unwrap_err();
        assert!(matches!(
            error,
            MapperServiceError::Merge(MergeError::LimitExceeded(_))
        ));
        assert_eq!(service.mapping_version(), 0);
    }

    #[test]
    fn test_concurrent_dynamic_updates() {
        let service = MapperService::new(IndexSettings::default());
        std::thread::scope(|scope| {
            for thread_id in 0..8 {
                let service = &service;
                scope.spawn(move || {
                    for doc_id in 0..10 {
                        let field = format!("field_{thread_id}_{}", doc_id % 3);
                        let parsed = service
                            .index_document(source(json!({ field: doc_id, "shared": "x" })))
                            .unwrap();
                        assert!(parsed.dynamic_update.is_none());
                        // A snapshot never goes backward.
                        let snapshot = service.document_mapper();
                        assert!(snapshot.lookup().get_mapper("shared").is_some());
                    }
                });
            }
        });
        let lookup = service.document_mapper().lookup().clone();
        for thread_id in 0..8 {
            for field_id in 0..3 {
                let field = format!("field_{thread_id}_{field_id}");
                assert_eq!(lookup.field_type(&field).unwrap().type_name(), "long");
            }
        }
        assert!(service.mapping_version() <= 8 * 3 + 1);
    }
}
