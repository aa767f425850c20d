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
use std::ops::Bound;

use base64::prelude::{Engine, BASE64_STANDARD};
use itertools::Itertools;
use serde_json::Value as JsonValue;

/// A term of the inverted index.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum TermValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&str> for TermValue {
    fn from(text: &str) -> Self {
        TermValue::Text(text.to_string())
    }
}

impl fmt::Display for TermValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermValue::Text(text) => formatter.write_str(text),
            TermValue::Bytes(bytes) => formatter.write_str(&BASE64_STANDARD.encode(bytes)),
        }
    }
}

/// A value of the points (BKD) index. Floating point kinds keep their own precision so that
/// bounds stay comparable with what was indexed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointValue {
    Long(i64),
    Double(f64),
    Float(f32),
    HalfFloat(f32),
    Ip(u128),
}

impl fmt::Display for PointValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Long(value) => value.fmt(formatter),
            PointValue::Double(value) => value.fmt(formatter),
            PointValue::Float(value) | PointValue::HalfFloat(value) => value.fmt(formatter),
            PointValue::Ip(value) => std::net::Ipv6Addr::from(*value).fmt(formatter),
        }
    }
}

/// What a runtime field query checks on the values emitted by its script.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptPredicate {
    Terms(Vec<JsonValue>),
    Range {
        lower: Bound<JsonValue>,
        upper: Bound<JsonValue>,
    },
    Exists,
    Prefix {
        prefix: String,
        case_insensitive: bool,
    },
    Wildcard {
        pattern: String,
        case_insensitive: bool,
    },
    Regexp {
        pattern: String,
    },
    Fuzzy {
        value: String,
        max_edits: u8,
    },
}

/// Query produced by a field type, handed over to the query execution engine.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    MatchAll,
    MatchNone {
        reason: String,
    },
    Term {
        field: String,
        term: TermValue,
    },
    Terms {
        field: String,
        terms: Vec<TermValue>,
    },
    /// Inclusive range over the points index.
    PointRange {
        field: String,
        lower: PointValue,
        upper: PointValue,
    },
    PointSet {
        field: String,
        points: Vec<PointValue>,
    },
    /// Inclusive range over sortable-encoded numeric doc values.
    DocValuesRange {
        field: String,
        lower: i64,
        upper: i64,
    },
    DocValuesSet {
        field: String,
        values: Vec<i64>,
    },
    DocValuesTerms {
        field: String,
        terms: Vec<TermValue>,
    },
    /// Lets the execution engine pick whichever side is cheaper for the segment at hand.
    IndexOrDocValues {
        index: Box<Query>,
        doc_values: Box<Query>,
    },
    TermRange {
        field: String,
        lower: Bound<String>,
        upper: Bound<String>,
    },
    Prefix {
        field: String,
        prefix: String,
        case_insensitive: bool,
    },
    Wildcard {
        field: String,
        pattern: String,
        case_insensitive: bool,
    },
    Regexp {
        field: String,
        pattern: String,
    },
    Fuzzy {
        field: String,
        value: String,
        max_edits: u8,
    },
    /// Terms with their positions, relative to the first one.
    Phrase {
        field: String,
        terms: Vec<(usize, String)>,
    },
    Exists {
        field: String,
    },
    Script {
        field: String,
        script: String,
        value_type: &'static str,
        predicate: ScriptPredicate,
    },
}

impl Query {
    pub fn match_none(reason: impl Into<String>) -> Query {
        Query::MatchNone {
            reason: reason.into(),
        }
    }

    pub fn is_match_none(&self) -> bool {
        matches!(self, Query::MatchNone { .. })
    }

    /// Field targeted by the query, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Query::MatchAll | Query::MatchNone { .. } => None,
            Query::IndexOrDocValues { index, .. } => index.field(),
            Query::Term { field, .. }
            | Query::Terms { field, .. }
            | Query::PointRange { field, .. }
            | Query::PointSet { field, .. }
            | Query::DocValuesRange { field, .. }
            | Query::DocValuesSet { field, .. }
            | Query::DocValuesTerms { field, .. }
            | Query::TermRange { field, .. }
            | Query::Prefix { field, .. }
            | Query::Wildcard { field, .. }
            | Query::Regexp { field, .. }
            | Query::Fuzzy { field, .. }
            | Query::Phrase { field, .. }
            | Query::Exists { field }
            | Query::Script { field, .. } => Some(field),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::MatchAll => write!(formatter, "*:*"),
            Query::MatchNone { reason } => write!(formatter, "MatchNoDocsQuery(\"{reason}\")"),
            Query::Term { field, term } => write!(formatter, "{field}:{term}"),
            Query::Terms { field, terms } => {
                write!(formatter, "{field}:({})", terms.iter().join(" "))
            }
            Query::PointRange {
                field,
                lower,
                upper,
            } => write!(formatter, "{field}:[{lower} TO {upper}]"),
            Query::PointSet { field, points } => {
                write!(formatter, "{field}:{{{}}}", points.iter().join(" "))
            }
            Query::DocValuesRange {
                field,
                lower,
                upper,
            } => write!(formatter, "{field}:dv[{lower} TO {upper}]"),
            Query::DocValuesSet { field, values } => {
                write!(formatter, "{field}:dv{{{}}}", values.iter().join(" "))
            }
            Query::DocValuesTerms { field, terms } => {
                write!(formatter, "{field}:dv({})", terms.iter().join(" "))
            }
            Query::IndexOrDocValues { index, .. } => write!(formatter, "{index}"),
            Query::TermRange {
                field,
                lower,
                upper,
            } => {
                let (open, lower) = match lower {
                    Bound::Included(value) => ("[", value.as_str()),
                    Bound::Excluded(value) => ("{", value.as_str()),
                    Bound::Unbounded => ("{", "*"),
                };
                let (upper, close) = match upper {
                    Bound::Included(value) => (value.as_str(), "]"),
                    Bound::Excluded(value) => (value.as_str(), "}"),
                    Bound::Unbounded => ("*", "}"),
                };
                write!(formatter, "{field}:{open}{lower} TO {upper}{close}")
            }
            Query::Prefix { field, prefix, .. } => write!(formatter, "{field}:{prefix}*"),
            Query::Wildcard { field, pattern, .. } => write!(formatter, "{field}:{pattern}"),
            Query::Regexp { field, pattern } => write!(formatter, "{field}:/{pattern}/"),
            Query::Fuzzy {
                field,
                value,
                max_edits,
            } => write!(formatter, "{field}:{value}~{max_edits}"),
            Query::Phrase { field, terms } => write!(
                formatter,
                "{field}:\"{}\"",
                terms.iter().map(|(_, term)| term).join(" ")
            ),
            Query::Exists { field } => write!(formatter, "FieldExistsQuery [field={field}]"),
            Query::Script { field, script, .. } => {
                write!(formatter, "{field}:script({script})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_display() {
        let query = Query::IndexOrDocValues {
            index: Box::new(Query::PointRange {
                field: "f".to_string(),
                lower: PointValue::Long(1),
                upper: PointValue::Long(5),
            }),
            doc_values: Box::new(Query::DocValuesRange {
                field: "f".to_string(),
                lower: 1,
                upper: 5,
            }),
        };
        assert_eq!(query.to_string(), "f:[1 TO 5]");
        assert_eq!(query.field(), Some("f"));
        let term_range = Query::TermRange {
            field: "k".to_string(),
            lower: Bound::Excluded("a".to_string()),
            upper: Bound::Unbounded,
        };
        assert_eq!(term_range.to_string(), "k:{a TO *}");
        assert!(Query::match_none("nothing").is_match_none());
        assert_eq!(
            TermValue::Bytes(vec![0, 1, 2]).to_string(),
            BASE64_STANDARD.encode([0u8, 1, 2])
        );
    }
}
