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

//! Field types: how a leaf value is indexed and how queries on it are built.

mod binary;
mod boolean;
mod date;
mod flattened;
mod geo_point;
mod ip;
mod keyword;
mod metadata;
mod number;
mod runtime;
mod text;

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use mapwright_query::{JsonLiteral, Query, QueryError, SearchExecutionContext, TermValue};
use serde_json::Value as JsonValue;

pub use self::date::DateKind;
pub use self::flattened::{keyed_field_name, KEYED_FIELD_SUFFIX};
pub use self::metadata::MetadataKind;
pub use self::number::{NumberType, NumberValue};
pub use self::runtime::{
    LeafFactory, LeafValues, RuntimeFieldDefinition, RuntimeFieldType, RuntimeKind, Script,
    ScriptCompiler, SourceLookupCompiler,
};
pub use self::text::{TextKind, INDEX_PHRASE_SUFFIX, INDEX_PREFIX_SUFFIX};
use crate::analysis::get_analyzer_registry;
use crate::document::{FieldValue, IndexDocument};
use crate::mapper::field_params::LeafParams;
use crate::MappingError;

pub(crate) use self::flattened::keyed_field_type;
pub(crate) use self::geo_point::is_coordinate_array;

/// How a field takes part in full text search.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TextSearchInfo {
    pub tokenized: bool,
    pub has_positions: bool,
    pub search_analyzer: Option<String>,
}

impl TextSearchInfo {
    pub fn none() -> TextSearchInfo {
        TextSearchInfo::default()
    }

    /// Untokenized terms, optionally normalized.
    pub fn keyword(normalizer: Option<&str>) -> TextSearchInfo {
        TextSearchInfo {
            tokenized: false,
            has_positions: false,
            search_analyzer: normalizer.map(str::to_string),
        }
    }
}

#[derive(Clone, Debug)]
pub enum FieldTypeKind {
    Number(NumberType),
    Keyword { normalizer: Option<String> },
    Text(TextKind),
    Boolean,
    Date(DateKind),
    Binary,
    Ip,
    GeoPoint,
    /// The root of a flattened field when `key` is `None`, one of its keys otherwise.
    Flattened {
        root_name: String,
        key: Option<String>,
    },
    Runtime(RuntimeFieldType),
    Metadata(MetadataKind),
}

/// The search-time view of a field. Field types are immutable and shared between the mapping
/// versions that did not change them.
#[derive(Clone, Debug)]
pub struct FieldType {
    pub(crate) name: String,
    pub(crate) is_indexed: bool,
    pub(crate) is_stored: bool,
    pub(crate) has_doc_values: bool,
    pub(crate) text_search_info: TextSearchInfo,
    pub(crate) meta: BTreeMap<String, String>,
    pub(crate) kind: FieldTypeKind,
}

/// What a leaf field writes into while a document is parsed.
pub(crate) struct LeafContext<'a> {
    doc: &'a mut IndexDocument,
    ignored_fields: &'a mut BTreeSet<String>,
}

impl<'a> LeafContext<'a> {
    pub fn new(
        doc: &'a mut IndexDocument,
        ignored_fields: &'a mut BTreeSet<String>,
    ) -> LeafContext<'a> {
        LeafContext {
            doc,
            ignored_fields,
        }
    }

    pub fn add(&mut self, name: &str, value: FieldValue) {
        self.doc.add(name, value);
    }

    /// Records that a value of `name` was skipped.
    pub fn ignore(&mut self, name: &str) {
        self.ignored_fields.insert(name.to_string());
    }

    pub fn doc(&self) -> &IndexDocument {
        self.doc
    }
}

/// Renders a scalar as the string a term based field indexes.
pub(crate) fn scalar_to_string(value: &JsonValue) -> Result<Cow<'_, str>, String> {
    match value {
        JsonValue::String(text) => Ok(Cow::Borrowed(text)),
        JsonValue::Number(number) => Ok(Cow::Owned(number.to_string())),
        JsonValue::Bool(value) => Ok(Cow::Owned(value.to_string())),
        JsonValue::Null => Ok(Cow::Borrowed("null")),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            Err("expected a string, got an object".to_string())
        }
    }
}

impl FieldType {
    /// Builds the field type of a concrete leaf field, validating its parameters.
    pub fn build(name: &str, params: &LeafParams) -> Result<FieldType, MappingError> {
        match params {
            LeafParams::Number(number_type, params) => number::build(name, *number_type, params),
            LeafParams::Keyword(params) => keyword::build(name, params),
            LeafParams::Text(params) => text::build(name, params),
            LeafParams::Boolean(params) => boolean::build(name, params),
            LeafParams::Date(resolution, params) => date::build(name, *resolution, params),
            LeafParams::Binary(params) => binary::build(name, params),
            LeafParams::Ip(params) => ip::build(name, params),
            LeafParams::GeoPoint(params) => geo_point::build(name, params),
            LeafParams::Flattened(params) => flattened::build(name, params),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldTypeKind {
        &self.kind
    }

    pub fn is_indexed(&self) -> bool {
        self.is_indexed
    }

    pub fn is_stored(&self) -> bool {
        self.is_stored
    }

    pub fn has_doc_values(&self) -> bool {
        self.has_doc_values
    }

    pub fn is_searchable(&self) -> bool {
        self.is_indexed || self.has_doc_values
    }

    pub fn is_aggregatable(&self) -> bool {
        match &self.kind {
            FieldTypeKind::Text(text) => text.fielddata,
            _ => self.has_doc_values,
        }
    }

    pub fn text_search_info(&self) -> &TextSearchInfo {
        &self.text_search_info
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self.kind, FieldTypeKind::Runtime(_))
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            FieldTypeKind::Number(number_type) => number_type.type_name(),
            FieldTypeKind::Keyword { .. } => "keyword",
            FieldTypeKind::Text(_) => "text",
            FieldTypeKind::Boolean => "boolean",
            FieldTypeKind::Date(date) => date.resolution.type_name(),
            FieldTypeKind::Binary => "binary",
            FieldTypeKind::Ip => "ip",
            FieldTypeKind::GeoPoint => "geo_point",
            FieldTypeKind::Flattened { .. } => "flattened",
            FieldTypeKind::Runtime(runtime) => runtime.kind().type_name(),
            FieldTypeKind::Metadata(metadata) => metadata.name(),
        }
    }

    /// Converts a stored or doc value back to what a user would have written.
    pub fn value_for_display(&self, value: &JsonValue) -> JsonValue {
        match &self.kind {
            FieldTypeKind::Date(date) => date.value_for_display(value),
            FieldTypeKind::Boolean => boolean::value_for_display(value),
            _ => value.clone(),
        }
    }

    fn is_term_based(&self) -> bool {
        match &self.kind {
            FieldTypeKind::Keyword { .. }
            | FieldTypeKind::Text(_)
            | FieldTypeKind::Flattened { .. } => true,
            FieldTypeKind::Metadata(metadata) => metadata.is_term_based(),
            _ => false,
        }
    }

    /// Name of the index field that holds the terms of this field.
    fn search_field(&self) -> String {
        match &self.kind {
            FieldTypeKind::Flattened {
                root_name,
                key: Some(_),
            } => keyed_field_name(root_name),
            _ => self.name.clone(),
        }
    }

    /// The term this field would index for `value`.
    fn term_string(&self, value: &str) -> String {
        match &self.kind {
            FieldTypeKind::Keyword {
                normalizer: Some(normalizer),
            } => get_analyzer_registry().normalize(normalizer, value),
            FieldTypeKind::Flattened { key: Some(key), .. } => flattened::keyed_term(key, value),
            _ => value.to_string(),
        }
    }

    /// Errors of field types that can never serve exact value queries.
    fn check_exact_queryable(&self) -> Result<(), QueryError> {
        let reason = match &self.kind {
            FieldTypeKind::Binary => "Binary fields do not support searching".to_string(),
            FieldTypeKind::GeoPoint => format!(
                "Geometry fields do not support exact searching, use dedicated geometry queries \
                 instead: [{}]",
                self.name
            ),
            FieldTypeKind::Metadata(MetadataKind::Source) => {
                "The _source field is not searchable".to_string()
            }
            _ => {
                if !self.is_searchable() {
                    return Err(QueryError::not_searchable(&self.name));
                }
                return Ok(());
            }
        };
        Err(QueryError::UnsupportedQuery {
            field: self.name.clone(),
            reason,
        })
    }

    fn check_term_based(&self, query_kind: &str) -> Result<(), QueryError> {
        if !self.is_term_based() {
            return Err(QueryError::unsupported(
                &self.name,
                query_kind,
                self.type_name(),
            ));
        }
        if !self.is_indexed {
            return Err(QueryError::not_indexed(&self.name));
        }
        Ok(())
    }

    fn string_terms_query(&self, values: &[JsonLiteral]) -> Query {
        let field = self.search_field();
        let mut terms: Vec<TermValue> = values
            .iter()
            .map(|value| TermValue::Text(self.term_string(&value.to_string())))
            .collect();
        if !self.is_indexed {
            return Query::DocValuesTerms { field, terms };
        }
        if terms.len() == 1 {
            if let Some(term) = terms.pop() {
                return Query::Term { field, term };
            }
        }
        Query::Terms { field, terms }
    }

    pub fn term_query(
        &self,
        value: &JsonLiteral,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        if let FieldTypeKind::Runtime(runtime) = &self.kind {
            return runtime.term_query(self, value, ctx);
        }
        self.check_exact_queryable()?;
        match &self.kind {
            FieldTypeKind::Number(number_type) => number_type.term_query(self, value),
            FieldTypeKind::Boolean => boolean::term_query(self, value),
            FieldTypeKind::Date(date) => date.term_query(self, value),
            FieldTypeKind::Ip => ip::term_query(self, value),
            FieldTypeKind::Metadata(metadata) if metadata.number_type().is_some() => {
                NumberType::Long.term_query(self, value)
            }
            _ => Ok(self.string_terms_query(std::slice::from_ref(value))),
        }
    }

    pub fn terms_query(
        &self,
        values: &[JsonLiteral],
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        if let FieldTypeKind::Runtime(runtime) = &self.kind {
            return runtime.terms_query(self, values, ctx);
        }
        self.check_exact_queryable()?;
        match &self.kind {
            FieldTypeKind::Number(number_type) => number_type.terms_query(self, values),
            FieldTypeKind::Boolean => boolean::terms_query(self, values),
            FieldTypeKind::Date(date) => date.terms_query(self, values),
            FieldTypeKind::Ip => ip::terms_query(self, values),
            FieldTypeKind::Metadata(metadata) if metadata.number_type().is_some() => {
                NumberType::Long.terms_query(self, values)
            }
            _ => Ok(self.string_terms_query(values)),
        }
    }

    /// Range query. Missing bounds are unbounded.
    pub fn range_query(
        &self,
        lower: Option<&JsonLiteral>,
        upper: Option<&JsonLiteral>,
        include_lower: bool,
        include_upper: bool,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        if let FieldTypeKind::Runtime(runtime) = &self.kind {
            return runtime.range_query(self, lower, upper, include_lower, include_upper, ctx);
        }
        self.check_exact_queryable()?;
        match &self.kind {
            FieldTypeKind::Number(number_type) => {
                number_type.range_query(self, lower, upper, include_lower, include_upper)
            }
            FieldTypeKind::Date(date) => {
                date.range_query(self, lower, upper, include_lower, include_upper)
            }
            FieldTypeKind::Ip => ip::range_query(self, lower, upper, include_lower, include_upper),
            FieldTypeKind::Boolean => {
                boolean::range_query(self, lower, upper, include_lower, include_upper)
            }
            FieldTypeKind::Metadata(metadata) if metadata.number_type().is_some() => {
                NumberType::Long.range_query(self, lower, upper, include_lower, include_upper)
            }
            _ => {
                let bound = |value: Option<&JsonLiteral>, inclusive: bool| match value {
                    None => Bound::Unbounded,
                    Some(value) if inclusive => {
                        Bound::Included(self.term_string(&value.to_string()))
                    }
                    Some(value) => Bound::Excluded(self.term_string(&value.to_string())),
                };
                Ok(Query::TermRange {
                    field: self.search_field(),
                    lower: bound(lower, include_lower),
                    upper: bound(upper, include_upper),
                })
            }
        }
    }

    pub fn exists_query(&self, ctx: &SearchExecutionContext) -> Result<Query, QueryError> {
        if let FieldTypeKind::Runtime(runtime) = &self.kind {
            return runtime.exists_query(self, ctx);
        }
        if let FieldTypeKind::Metadata(MetadataKind::Source) = &self.kind {
            self.check_exact_queryable()?;
        }
        if let FieldTypeKind::Flattened {
            root_name,
            key: Some(key),
        } = &self.kind
        {
            return Ok(Query::Prefix {
                field: keyed_field_name(root_name),
                prefix: flattened::keyed_term(key, ""),
                case_insensitive: false,
            });
        }
        if !self.is_searchable() && !self.is_stored {
            return Err(QueryError::not_searchable(&self.name));
        }
        Ok(Query::Exists {
            field: self.name.clone(),
        })
    }

    pub fn prefix_query(
        &self,
        prefix: &str,
        case_insensitive: bool,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        if let FieldTypeKind::Runtime(runtime) = &self.kind {
            return runtime.prefix_query(self, prefix, case_insensitive, ctx);
        }
        self.check_term_based("prefix")?;
        if let FieldTypeKind::Text(text) = &self.kind {
            if let Some(query) = text.index_prefix_query(self, prefix, case_insensitive) {
                return Ok(query);
            }
        }
        Ok(Query::Prefix {
            field: self.search_field(),
            prefix: self.term_string(prefix),
            case_insensitive,
        })
    }

    pub fn wildcard_query(
        &self,
        pattern: &str,
        case_insensitive: bool,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        if let FieldTypeKind::Runtime(runtime) = &self.kind {
            return runtime.wildcard_query(self, pattern, case_insensitive, ctx);
        }
        self.check_term_based("wildcard")?;
        Ok(Query::Wildcard {
            field: self.search_field(),
            pattern: self.term_string(pattern),
            case_insensitive,
        })
    }

    pub fn regexp_query(
        &self,
        pattern: &str,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        if let FieldTypeKind::Runtime(runtime) = &self.kind {
            return runtime.regexp_query(self, pattern, ctx);
        }
        self.check_term_based("regexp")?;
        regex::Regex::new(pattern)
            .map_err(|error| QueryError::invalid_value(&self.name, error.to_string()))?;
        let pattern = match &self.kind {
            FieldTypeKind::Flattened { key: Some(key), .. } => {
                flattened::keyed_term(&regex::escape(key), pattern)
            }
            _ => pattern.to_string(),
        };
        Ok(Query::Regexp {
            field: self.search_field(),
            pattern,
        })
    }

    pub fn fuzzy_query(
        &self,
        value: &str,
        max_edits: u8,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        if max_edits > 2 {
            return Err(QueryError::invalid_value(
                &self.name,
                format!("Valid edit distances are [0, 1, 2] but was [{max_edits}]"),
            ));
        }
        if let FieldTypeKind::Runtime(runtime) = &self.kind {
            return runtime.fuzzy_query(self, value, max_edits, ctx);
        }
        self.check_term_based("fuzzy")?;
        Ok(Query::Fuzzy {
            field: self.search_field(),
            value: self.term_string(value),
            max_edits,
        })
    }

    /// Phrase query over analyzed text.
    pub fn phrase_query(
        &self,
        text: &str,
        _ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        match &self.kind {
            FieldTypeKind::Text(text_kind) => text_kind.phrase_query(self, text),
            _ => Err(QueryError::text_only(&self.name, "phrase", self.type_name())),
        }
    }
}

/// Indexes one value of a concrete leaf field. `null` is replaced by the field's `null_value`
/// or skipped.
pub(crate) fn index_leaf_value(
    field_type: &FieldType,
    params: &LeafParams,
    coerce: bool,
    value: &JsonValue,
    ctx: &mut LeafContext,
) -> Result<(), String> {
    let (value, coerce) = if value.is_null() {
        match params.null_value() {
            Some(null_value) => (Cow::Owned(null_value), true),
            None => return Ok(()),
        }
    } else {
        (Cow::Borrowed(value), coerce)
    };
    let value = value.as_ref();
    match params {
        LeafParams::Number(number_type, _) => {
            number::index_value(field_type, *number_type, coerce, value, ctx)
        }
        LeafParams::Keyword(params) => keyword::index_value(field_type, params, value, ctx),
        LeafParams::Text(_) => text::index_value(field_type, value, ctx),
        LeafParams::Boolean(_) => boolean::index_value(field_type, value, ctx),
        LeafParams::Date(..) => date::index_value(field_type, value, ctx),
        LeafParams::Binary(_) => binary::index_value(field_type, value, ctx),
        LeafParams::Ip(_) => ip::index_value(field_type, value, ctx),
        LeafParams::GeoPoint(params) => geo_point::index_value(field_type, params, value, ctx),
        LeafParams::Flattened(params) => flattened::index_value(field_type, params, value, ctx),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn field_type(name: &str, type_name: &str, definition: JsonValue) -> FieldType {
        let JsonValue::Object(map) = definition else {
            panic!("expected an object");
        };
        let params = LeafParams::from_json(type_name, name, map).unwrap();
        FieldType::build(name, &params).unwrap()
    }

    #[test]
    fn test_term_based_queries_reject_other_types() {
        let ctx = SearchExecutionContext::default();
        let long = field_type("n", "long", json!({}));
        let error = long.fuzzy_query("1", 1, &ctx).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Can only use fuzzy queries on keyword and text fields - not on [n] which is of type \
             [long]"
        );
        let keyword = field_type("k", "keyword", json!({}));
        let error = keyword.phrase_query("a b", &ctx).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Can only use phrase queries on text fields - not on [k] which is of type [keyword]"
        );
        let error = keyword.fuzzy_query("a", 3, &ctx).unwrap_err();
        assert!(error.to_string().contains("Valid edit distances are [0, 1, 2] but was [3]"));
    }

    #[test]
    fn test_unsearchable_fields() {
        let ctx = SearchExecutionContext::default();
        let hidden = field_type("h", "long", json!({"index": false, "doc_values": false}));
        assert_eq!(
            hidden.term_query(&JsonLiteral::from(1), &ctx).unwrap_err(),
            QueryError::not_searchable("h")
        );
        let binary = field_type("b", "binary", json!({}));
        assert_eq!(
            binary
                .term_query(&JsonLiteral::from("AAEC"), &ctx)
                .unwrap_err()
                .to_string(),
            "Binary fields do not support searching"
        );
        let geo = field_type("location", "geo_point", json!({}));
        assert!(geo
            .term_query(&JsonLiteral::from("1,2"), &ctx)
            .unwrap_err()
            .to_string()
            .starts_with("Geometry fields do not support exact searching"));
        let unindexed = field_type("k", "keyword", json!({"index": false}));
        assert_eq!(
            unindexed.prefix_query("a", false, &ctx).unwrap_err(),
            QueryError::not_indexed("k")
        );
    }

    #[test]
    fn test_keyword_queries() {
        let ctx = SearchExecutionContext::default();
        let keyword = field_type("k", "keyword", json!({"normalizer": "lowercase"}));
        assert_eq!(
            keyword.term_query(&JsonLiteral::from("FoO"), &ctx).unwrap(),
            Query::Term {
                field: "k".to_string(),
                term: TermValue::from("foo"),
            }
        );
        let query = keyword
            .range_query(
                Some(&JsonLiteral::from("A")),
                None,
                false,
                true,
                &ctx,
            )
            .unwrap();
        assert_eq!(query.to_string(), "k:{a TO *}");
        let doc_values_only = field_type("k", "keyword", json!({"index": false}));
        let query = doc_values_only
            .terms_query(&[JsonLiteral::from("a"), JsonLiteral::from("b")], &ctx)
            .unwrap();
        assert_eq!(query.to_string(), "k:dv(a b)");
        assert_eq!(
            keyword.exists_query(&ctx).unwrap(),
            Query::Exists {
                field: "k".to_string()
            }
        );
    }

    #[test]
    fn test_null_value_replaces_null() {
        let params = LeafParams::from_json(
            "keyword",
            "k",
            serde_json::from_value(json!({"null_value": "NULL"})).unwrap(),
        )
        .unwrap();
        let field_type = FieldType::build("k", &params).unwrap();
        let mut doc = IndexDocument::root();
        let mut ignored = BTreeSet::new();
        let mut ctx = LeafContext::new(&mut doc, &mut ignored);
        index_leaf_value(&field_type, &params, false, &JsonValue::Null, &mut ctx).unwrap();
        assert_eq!(doc.terms("k"), ["NULL"]);
        let params = LeafParams::from_json("long", "n", serde_json::Map::new()).unwrap();
        let field_type = FieldType::build("n", &params).unwrap();
        let mut doc = IndexDocument::root();
        let mut ctx = LeafContext::new(&mut doc, &mut ignored);
        index_leaf_value(&field_type, &params, false, &JsonValue::Null, &mut ctx).unwrap();
        assert!(doc.fields().is_empty());
    }
}
