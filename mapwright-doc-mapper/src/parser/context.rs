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

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use fnv::FnvHashMap;

use crate::document::IndexDocument;
use crate::field_type::LeafContext;
use crate::lookup::MappingLookup;
use crate::mapper::{Mapper, MappingParserContext, Nested, RootObjectMapper, RuntimeField};
use crate::DocParsingError;

#[derive(Clone, Copy, Debug)]
pub(super) struct ParseLimits {
    pub depth: u64,
    pub nested_objects: u64,
}

/// State of one document parse. It is dropped once the [`crate::ParsedDocument`] is built, so
/// nothing leaks from one document to the next.
pub(super) struct ParseContext<'a> {
    pub lookup: &'a MappingLookup,
    pub mapping_ctx: &'a MappingParserContext,
    limits: ParseLimits,
    /// Root document first.
    pub docs: Vec<IndexDocument>,
    pub current_doc: usize,
    pub ignored_fields: BTreeSet<String>,
    dynamic_mappers: Vec<Arc<Mapper>>,
    dynamic_mappers_by_name: FnvHashMap<String, Arc<Mapper>>,
    dynamic_runtime_fields: BTreeMap<String, RuntimeField>,
    /// Set while the value of a `copy_to` target is indexed. Copies are never chained.
    pub within_copy_to: bool,
    // The root object counts as one.
    object_depth: u64,
    num_nested_docs: u64,
}

impl<'a> ParseContext<'a> {
    pub fn new(
        lookup: &'a MappingLookup,
        mapping_ctx: &'a MappingParserContext,
        limits: ParseLimits,
    ) -> ParseContext<'a> {
        ParseContext {
            lookup,
            mapping_ctx,
            limits,
            docs: vec![IndexDocument::root()],
            current_doc: 0,
            ignored_fields: BTreeSet::new(),
            dynamic_mappers: Vec::new(),
            dynamic_mappers_by_name: FnvHashMap::default(),
            dynamic_runtime_fields: BTreeMap::new(),
            within_copy_to: false,
            object_depth: 1,
            num_nested_docs: 0,
        }
    }

    pub fn root(&self) -> &'a RootObjectMapper {
        self.lookup.root()
    }

    pub fn leaf_context(&mut self) -> LeafContext<'_> {
        LeafContext::new(&mut self.docs[self.current_doc], &mut self.ignored_fields)
    }

    /// Registers a mapper created for a field the mapping does not know yet. Later values of the
    /// same field in this document reuse it.
    pub fn add_dynamic_mapper(&mut self, mapper: Arc<Mapper>) {
        self.dynamic_mappers_by_name
            .insert(mapper.name().to_string(), mapper.clone());
        self.dynamic_mappers.push(mapper);
    }

    pub fn dynamic_mapper(&self, name: &str) -> Option<&Arc<Mapper>> {
        self.dynamic_mappers_by_name.get(name)
    }

    pub fn add_dynamic_runtime_field(&mut self, runtime_field: RuntimeField) {
        self.dynamic_runtime_fields
            .insert(runtime_field.name().to_string(), runtime_field);
    }

    pub fn has_dynamic_runtime_field(&self, name: &str) -> bool {
        self.dynamic_runtime_fields.contains_key(name)
    }

    pub fn enter_object(&mut self) -> Result<(), DocParsingError> {
        self.object_depth += 1;
        if self.object_depth > self.limits.depth {
            return Err(DocParsingError::DepthLimit {
                limit: self.limits.depth,
            });
        }
        Ok(())
    }

    pub fn exit_object(&mut self) {
        self.object_depth -= 1;
    }

    /// Opens the document of one nested object and makes it current. Returns the document that
    /// was current before.
    pub fn open_nested_doc(&mut self, nested_path: &str) -> Result<usize, DocParsingError> {
        self.num_nested_docs += 1;
        if self.num_nested_docs > self.limits.nested_objects {
            return Err(DocParsingError::NestedObjectsLimit {
                limit: self.limits.nested_objects,
            });
        }
        let parent = self.current_doc;
        self.docs.push(IndexDocument::nested(nested_path, parent));
        self.current_doc = self.docs.len() - 1;
        Ok(parent)
    }

    /// Closes the current nested document, copying its fields up as `include_in_parent` and
    /// `include_in_root` ask.
    pub fn close_nested_doc(&mut self, parent: usize, nested: Nested) {
        let nested_doc = self.current_doc;
        self.current_doc = parent;
        if nested.include_in_parent() {
            let fields = self.docs[nested_doc].fields().to_vec();
            self.docs[parent].extend(fields);
        }
        // The root already got the fields when it is the parent.
        if nested.include_in_root() && !(nested.include_in_parent() && parent == 0) {
            let fields = self.docs[nested_doc].fields().to_vec();
            self.docs[0].extend(fields);
        }
    }

    /// The document a `copy_to` target is written to: the closest enclosing document whose
    /// nested scope holds the target.
    pub fn doc_for_copy_target(&self, target: &str) -> usize {
        let mut doc_index = self.current_doc;
        loop {
            let doc = &self.docs[doc_index];
            let (Some(nested_path), Some(parent)) = (doc.nested_path(), doc.parent()) else {
                return doc_index;
            };
            let in_scope = target
                .strip_prefix(nested_path)
                .is_some_and(|rest| rest.starts_with('.'));
            if in_scope {
                return doc_index;
            }
            doc_index = parent;
        }
    }

    pub fn into_parts(self) -> ParseOutput {
        ParseOutput {
            docs: self.docs,
            ignored_fields: self.ignored_fields,
            dynamic_mappers: self.dynamic_mappers,
            dynamic_runtime_fields: self.dynamic_runtime_fields.into_values().collect(),
        }
    }
}

pub(super) struct ParseOutput {
    pub docs: Vec<IndexDocument>,
    pub ignored_fields: BTreeSet<String>,
    pub dynamic_mappers: Vec<Arc<Mapper>>,
    pub dynamic_runtime_fields: Vec<RuntimeField>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FieldValue;

    fn limits() -> ParseLimits {
        ParseLimits {
            depth: 3,
            nested_objects: 2,
        }
    }

    #[test]
    fn test_depth_limit() {
        let lookup = MappingLookup::empty();
        let mapping_ctx = MappingParserContext::default();
        let mut ctx = ParseContext::new(&lookup, &mapping_ctx, limits());
        ctx.enter_object().unwrap();
        ctx.enter_object().unwrap();
        assert_eq!(
            ctx.enter_object().unwrap_err(),
            DocParsingError::DepthLimit { limit: 3 }
        );
    }

    #[test]
    fn test_nested_docs_limit_and_copy_target() {
        let lookup = MappingLookup::empty();
        let mapping_ctx = MappingParserContext::default();
        let mut ctx = ParseContext::new(&lookup, &mapping_ctx, limits());
        let root = ctx.open_nested_doc("a").unwrap();
        assert_eq!(root, 0);
        let outer = ctx.open_nested_doc("a.b").unwrap();
        assert_eq!(outer, 1);
        assert_eq!(ctx.doc_for_copy_target("a.b.c"), 2);
        assert_eq!(ctx.doc_for_copy_target("a.x"), 1);
        assert_eq!(ctx.doc_for_copy_target("ab"), 0);
        assert_eq!(
            ctx.open_nested_doc("a.c").unwrap_err(),
            DocParsingError::NestedObjectsLimit { limit: 2 }
        );
    }

    #[test]
    fn test_close_nested_doc_copies_fields_once_into_root() {
        let lookup = MappingLookup::empty();
        let mapping_ctx = MappingParserContext::default();
        let mut ctx = ParseContext::new(&lookup, &mapping_ctx, limits());
        let parent = ctx.open_nested_doc("a").unwrap();
        ctx.leaf_context()
            .add("a.x", FieldValue::SortedNumericDocValues(1));
        let nested = Nested {
            include_in_parent: Some(true),
            include_in_root: Some(true),
        };
        ctx.close_nested_doc(parent, nested);
        assert_eq!(ctx.current_doc, 0);
        assert_eq!(ctx.docs[0].numeric_doc_values("a.x"), [1]);
    }
}
