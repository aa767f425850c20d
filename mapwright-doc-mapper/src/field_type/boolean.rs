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

use std::ops::Bound;

use mapwright_query::{InterpretUserInput, JsonLiteral, Query, QueryError, TermValue};
use serde_json::Value as JsonValue;

use super::{FieldType, FieldTypeKind, LeafContext, TextSearchInfo};
use crate::document::FieldValue;
use crate::mapper::field_params::BooleanParams;
use crate::MappingError;

const TRUE_TERM: &str = "T";
const FALSE_TERM: &str = "F";

fn term(value: bool) -> &'static str {
    if value {
        TRUE_TERM
    } else {
        FALSE_TERM
    }
}

pub(crate) fn parse_bool(value: &JsonValue) -> Result<bool, String> {
    match value {
        JsonValue::Bool(value) => Ok(*value),
        JsonValue::String(text) => match text.as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            _ => Err(format!(
                "Failed to parse value [{text}] as only [true] or [false] are allowed."
            )),
        },
        other => Err(format!(
            "Failed to parse value [{other}] as only [true] or [false] are allowed."
        )),
    }
}

pub(crate) fn build(name: &str, params: &BooleanParams) -> Result<FieldType, MappingError> {
    Ok(FieldType {
        name: name.to_string(),
        is_indexed: params.index,
        is_stored: params.store,
        has_doc_values: params.doc_values,
        text_search_info: TextSearchInfo::none(),
        meta: params.meta.clone(),
        kind: FieldTypeKind::Boolean,
    })
}

pub(crate) fn index_value(
    field_type: &FieldType,
    value: &JsonValue,
    ctx: &mut LeafContext,
) -> Result<(), String> {
    let value = parse_bool(value)?;
    if field_type.is_indexed {
        ctx.add(&field_type.name, FieldValue::Term(TermValue::from(term(value))));
    }
    if field_type.has_doc_values {
        ctx.add(
            &field_type.name,
            FieldValue::SortedNumericDocValues(value as i64),
        );
    }
    if field_type.is_stored {
        ctx.add(&field_type.name, FieldValue::Stored(JsonValue::Bool(value)));
    }
    Ok(())
}

pub(crate) fn value_for_display(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(text) if text == TRUE_TERM => JsonValue::Bool(true),
        JsonValue::String(text) if text == FALSE_TERM => JsonValue::Bool(false),
        JsonValue::Number(number) => JsonValue::Bool(number.as_i64() == Some(1)),
        other => other.clone(),
    }
}

fn query_value(field_type: &FieldType, value: &JsonLiteral) -> Result<bool, QueryError> {
    bool::interpret_json(value).ok_or_else(|| {
        QueryError::invalid_value(
            &field_type.name,
            format!("Failed to parse value [{value}] as only [true] or [false] are allowed."),
        )
    })
}

pub(crate) fn term_query(field_type: &FieldType, value: &JsonLiteral) -> Result<Query, QueryError> {
    terms_query(field_type, std::slice::from_ref(value))
}

pub(crate) fn terms_query(
    field_type: &FieldType,
    values: &[JsonLiteral],
) -> Result<Query, QueryError> {
    let mut parsed = Vec::with_capacity(values.len());
    for value in values {
        let value = query_value(field_type, value)?;
        if !parsed.contains(&value) {
            parsed.push(value);
        }
    }
    let field = field_type.name.clone();
    if !field_type.is_indexed {
        return Ok(Query::DocValuesSet {
            field,
            values: parsed.into_iter().map(|value| value as i64).collect(),
        });
    }
    let mut terms: Vec<TermValue> = parsed
        .into_iter()
        .map(|value| TermValue::from(term(value)))
        .collect();
    if terms.len() == 1 {
        if let Some(term) = terms.pop() {
            return Ok(Query::Term { field, term });
        }
    }
    Ok(Query::Terms { field, terms })
}

pub(crate) fn range_query(
    field_type: &FieldType,
    lower: Option<&JsonLiteral>,
    upper: Option<&JsonLiteral>,
    include_lower: bool,
    include_upper: bool,
) -> Result<Query, QueryError> {
    let bound = |value: Option<&JsonLiteral>,
                 inclusive: bool|
     -> Result<Bound<String>, QueryError> {
        let Some(value) = value else {
            return Ok(Bound::Unbounded);
        };
        let indexed_term = term(query_value(field_type, value)?).to_string();
        Ok(if inclusive {
            Bound::Included(indexed_term)
        } else {
            Bound::Excluded(indexed_term)
        })
    };
    Ok(Query::TermRange {
        field: field_type.name.clone(),
        lower: bound(lower, include_lower)?,
        upper: bound(upper, include_upper)?,
    })
}
