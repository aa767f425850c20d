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

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use mapwright_query::{PointValue, TermValue};
use serde_json::Value as JsonValue;

use crate::Mapping;

/// Sequence number of a document that has not been assigned one yet.
pub const UNASSIGNED_SEQ_NO: i64 = -2;

/// Version of a document that has not been assigned one yet.
pub const UNSET_VERSION: i64 = -1;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TextToken {
    pub text: String,
    pub position: usize,
}

/// A numeric value shared by the root document and all its nested documents. The storage
/// layer assigns it once the document has been parsed.
#[derive(Clone, Default)]
pub struct SharedLong(Arc<AtomicI64>);

impl SharedLong {
    pub fn new(value: i64) -> SharedLong {
        SharedLong(Arc::new(AtomicI64::new(value)))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed)
    }
}

impl fmt::Debug for SharedLong {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "SharedLong({})", self.get())
    }
}

impl PartialEq for SharedLong {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

/// What a field type hands over to the indexing engine for one value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Single indexed term.
    Term(TermValue),
    /// Analyzed text.
    Text(Vec<TextToken>),
    Point(PointValue),
    LatLonPoint { lat: f64, lon: f64 },
    SortedNumericDocValues(i64),
    SortedSetDocValues(TermValue),
    BinaryDocValues(Vec<u8>),
    SharedDocValues(SharedLong),
    Stored(JsonValue),
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexableField {
    pub name: String,
    pub value: FieldValue,
}

/// One document of the inverted index. A source document produces a root document and one
/// document per nested object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexDocument {
    nested_path: Option<String>,
    parent: Option<usize>,
    fields: Vec<IndexableField>,
}

impl IndexDocument {
    pub(crate) fn root() -> IndexDocument {
        IndexDocument::default()
    }

    pub(crate) fn nested(nested_path: &str, parent: usize) -> IndexDocument {
        IndexDocument {
            nested_path: Some(nested_path.to_string()),
            parent: Some(parent),
            fields: Vec::new(),
        }
    }

    /// Path of the nested object this document was created for, `None` for the root document.
    pub fn nested_path(&self) -> Option<&str> {
        self.nested_path.as_deref()
    }

    /// Index of the parent document in [`ParsedDocument::docs`].
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn add(&mut self, name: &str, value: FieldValue) {
        self.fields.push(IndexableField {
            name: name.to_string(),
            value,
        });
    }

    pub fn fields(&self) -> &[IndexableField] {
        &self.fields
    }

    pub fn get_fields<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldValue> + 'a {
        self.fields
            .iter()
            .filter(move |field| field.name == name)
            .map(|field| &field.value)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }

    /// Indexed text terms of a field, analyzed or not.
    pub fn terms(&self, name: &str) -> Vec<String> {
        let mut terms = Vec::new();
        for value in self.get_fields(name) {
            match value {
                FieldValue::Term(TermValue::Text(text)) => terms.push(text.clone()),
                FieldValue::Text(tokens) => {
                    terms.extend(tokens.iter().map(|token| token.text.clone()))
                }
                _ => {}
            }
        }
        terms
    }

    pub fn points(&self, name: &str) -> Vec<PointValue> {
        self.get_fields(name)
            .filter_map(|value| match value {
                FieldValue::Point(point) => Some(*point),
                _ => None,
            })
            .collect()
    }

    pub fn numeric_doc_values(&self, name: &str) -> Vec<i64> {
        self.get_fields(name)
            .filter_map(|value| match value {
                FieldValue::SortedNumericDocValues(value) => Some(*value),
                FieldValue::SharedDocValues(value) => Some(value.get()),
                _ => None,
            })
            .collect()
    }

    pub fn stored_values<'a>(&'a self, name: &'a str) -> Vec<&'a JsonValue> {
        self.get_fields(name)
            .filter_map(|value| match value {
                FieldValue::Stored(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Position the next text value of `name` starts at, given the configured gap.
    pub(crate) fn next_position(&self, name: &str, position_increment_gap: usize) -> usize {
        self.get_fields(name)
            .filter_map(|value| match value {
                FieldValue::Text(tokens) => tokens.last().map(|token| token.position),
                _ => None,
            })
            .max()
            .map_or(0, |last_position| {
                last_position + position_increment_gap + 1
            })
    }

    pub(crate) fn extend(&mut self, fields: impl IntoIterator<Item = IndexableField>) {
        self.fields.extend(fields);
    }
}

/// Input of the document parser.
#[derive(Clone, Debug)]
pub struct SourceToParse {
    pub id: Option<String>,
    pub source: String,
    pub routing: Option<String>,
}

impl SourceToParse {
    pub fn new(id: Option<&str>, source: impl Into<String>) -> SourceToParse {
        SourceToParse {
            id: id.map(str::to_string),
            source: source.into(),
            routing: None,
        }
    }

    pub fn with_routing(mut self, routing: &str) -> SourceToParse {
        self.routing = Some(routing.to_string());
        self
    }
}

/// Output of the document parser.
#[derive(Clone, Debug)]
pub struct ParsedDocument {
    pub id: Option<String>,
    pub routing: Option<String>,
    /// Root document first, then nested documents in the order they were opened.
    pub docs: Vec<IndexDocument>,
    /// The source as stored, after `_source` filtering. `None` when `_source` is disabled.
    pub source: Option<JsonValue>,
    /// New fields discovered while parsing, to be merged into the mapping.
    pub dynamic_update: Option<Mapping>,
    pub ignored_fields: Vec<String>,
    pub(crate) seq_no: SharedLong,
    pub(crate) version: SharedLong,
}

impl ParsedDocument {
    pub fn root_doc(&self) -> &IndexDocument {
        &self.docs[0]
    }

    pub fn nested_docs(&self) -> &[IndexDocument] {
        &self.docs[1..]
    }

    /// Assigns the sequence number to the root document and every nested document at once.
    pub fn update_seq_no(&self, seq_no: i64) {
        self.seq_no.set(seq_no);
    }

    pub fn set_version(&self, version: i64) {
        self.version.set(version);
    }

    pub fn seq_no(&self) -> i64 {
        self.seq_no.get()
    }

    pub fn version(&self) -> i64 {
        self.version.get()
    }
}
