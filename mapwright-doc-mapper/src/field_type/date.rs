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

use mapwright_datetime::{DateFormatter, DateResolution};
use mapwright_query::{JsonLiteral, PointValue, Query, QueryError};
use serde_json::Value as JsonValue;

use super::{FieldType, FieldTypeKind, LeafContext, TextSearchInfo};
use crate::document::FieldValue;
use crate::mapper::field_params::DateParams;
use crate::MappingError;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DateKind {
    pub resolution: DateResolution,
    pub formatter: DateFormatter,
}

impl DateKind {
    /// Parses a date given as a string or a number into its indexed long.
    pub fn parse(&self, value: &JsonValue) -> Result<i64, String> {
        let text = match value {
            JsonValue::String(text) => text.clone(),
            JsonValue::Number(number) => number.to_string(),
            other => return Err(format!("failed to parse date field [{other}]")),
        };
        let date_time = self.formatter.parse(&text)?;
        self.resolution.convert(date_time)
    }

    pub fn format(&self, value: i64) -> Result<String, String> {
        let date_time = self.resolution.to_date_time(value)?;
        Ok(self.formatter.format(date_time, self.resolution))
    }

    pub(crate) fn value_for_display(&self, value: &JsonValue) -> JsonValue {
        match value.as_i64().map(|value| self.format(value)) {
            Some(Ok(formatted)) => JsonValue::String(formatted),
            _ => value.clone(),
        }
    }

    fn query_value(&self, field: &str, literal: &JsonLiteral) -> Result<i64, QueryError> {
        let value = match literal {
            JsonLiteral::Number(number) => JsonValue::Number(number.clone()),
            JsonLiteral::String(text) => JsonValue::String(text.clone()),
            JsonLiteral::Bool(value) => JsonValue::Bool(*value),
        };
        self.parse(&value)
            .map_err(|reason| QueryError::invalid_value(field, reason))
    }

    fn long_range(&self, field_type: &FieldType, lower: i64, upper: i64) -> Query {
        let index_query = Query::PointRange {
            field: field_type.name.clone(),
            lower: PointValue::Long(lower),
            upper: PointValue::Long(upper),
        };
        let doc_values_query = Query::DocValuesRange {
            field: field_type.name.clone(),
            lower,
            upper,
        };
        match (field_type.is_indexed, field_type.has_doc_values) {
            (true, true) => Query::IndexOrDocValues {
                index: Box::new(index_query),
                doc_values: Box::new(doc_values_query),
            },
            (true, false) => index_query,
            _ => doc_values_query,
        }
    }

    pub(crate) fn term_query(
        &self,
        field_type: &FieldType,
        value: &JsonLiteral,
    ) -> Result<Query, QueryError> {
        let value = self.query_value(&field_type.name, value)?;
        Ok(self.long_range(field_type, value, value))
    }

    pub(crate) fn terms_query(
        &self,
        field_type: &FieldType,
        values: &[JsonLiteral],
    ) -> Result<Query, QueryError> {
        let mut parsed = values
            .iter()
            .map(|value| self.query_value(&field_type.name, value))
            .collect::<Result<Vec<i64>, QueryError>>()?;
        parsed.sort_unstable();
        parsed.dedup();
        if field_type.is_indexed {
            return Ok(Query::PointSet {
                field: field_type.name.clone(),
                points: parsed.into_iter().map(PointValue::Long).collect(),
            });
        }
        Ok(Query::DocValuesSet {
            field: field_type.name.clone(),
            values: parsed,
        })
    }

    pub(crate) fn range_query(
        &self,
        field_type: &FieldType,
        lower: Option<&JsonLiteral>,
        upper: Option<&JsonLiteral>,
        include_lower: bool,
        include_upper: bool,
    ) -> Result<Query, QueryError> {
        let lower_value = match lower {
            Some(lower) => {
                let value = self.query_value(&field_type.name, lower)?;
                if include_lower {
                    Some(value)
                } else {
                    value.checked_add(1)
                }
            }
            None => Some(i64::MIN),
        };
        let upper_value = match upper {
            Some(upper) => {
                let value = self.query_value(&field_type.name, upper)?;
                if include_upper {
                    Some(value)
                } else {
                    value.checked_sub(1)
                }
            }
            None => Some(i64::MAX),
        };
        match (lower_value, upper_value) {
            (Some(lower_value), Some(upper_value)) if lower_value <= upper_value => {
                Ok(self.long_range(field_type, lower_value, upper_value))
            }
            _ => Ok(Query::match_none(format!(
                "empty date range on field [{}]",
                field_type.name
            ))),
        }
    }
}

pub(crate) fn build(
    name: &str,
    resolution: DateResolution,
    params: &DateParams,
) -> Result<FieldType, MappingError> {
    let kind = DateKind {
        resolution,
        formatter: params.format.clone().unwrap_or_default(),
    };
    if let Some(null_value) = &params.null_value {
        kind.parse(&JsonValue::String(null_value.clone()))
            .map_err(|reason| {
                MappingError::invalid_definition(
                    name,
                    format!("Error parsing [null_value] on field [{name}]: {reason}"),
                )
            })?;
    }
    Ok(FieldType {
        name: name.to_string(),
        is_indexed: params.index,
        is_stored: params.store,
        has_doc_values: params.doc_values,
        text_search_info: TextSearchInfo::none(),
        meta: params.meta.clone(),
        kind: FieldTypeKind::Date(kind),
    })
}

pub(crate) fn index_value(
    field_type: &FieldType,
    value: &JsonValue,
    ctx: &mut LeafContext,
) -> Result<(), String> {
    let FieldTypeKind::Date(kind) = &field_type.kind else {
        return Err(format!("field [{}] is not a date field", field_type.name));
    };
    let timestamp = kind.parse(value)?;
    if field_type.is_indexed {
        ctx.add(&field_type.name, FieldValue::Point(PointValue::Long(timestamp)));
    }
    if field_type.has_doc_values {
        ctx.add(&field_type.name, FieldValue::SortedNumericDocValues(timestamp));
    }
    if field_type.is_stored {
        ctx.add(
            &field_type.name,
            FieldValue::Stored(JsonValue::String(kind.format(timestamp)?)),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::document::IndexDocument;

    fn date_field(resolution: DateResolution, definition: JsonValue) -> FieldType {
        let params: DateParams = serde_json::from_value(definition).unwrap();
        build("ts", resolution, &params).unwrap()
    }

    #[test]
    fn test_date_indexing() {
        let field_type = date_field(DateResolution::Milliseconds, json!({"store": true}));
        let mut doc = IndexDocument::root();
        let mut ignored = BTreeSet::new();
        let mut ctx = LeafContext::new(&mut doc, &mut ignored);
        index_value(&field_type, &json!("2015-01-01T12:10:30Z"), &mut ctx).unwrap();
        index_value(&field_type, &json!(1420070400001i64), &mut ctx).unwrap();
        assert!(index_value(&field_type, &json!("yesterday"), &mut ctx).is_err());
        assert_eq!(
            doc.numeric_doc_values("ts"),
            [1420114230000, 1420070400001]
        );
        assert_eq!(doc.stored_values("ts").len(), 2);
    }

    #[test]
    fn test_date_nanos_resolution() {
        let field_type = date_field(DateResolution::Nanoseconds, json!({}));
        let mut doc = IndexDocument::root();
        let mut ignored = BTreeSet::new();
        let mut ctx = LeafContext::new(&mut doc, &mut ignored);
        index_value(&field_type, &json!("2015-01-01T00:00:00.000000001Z"), &mut ctx).unwrap();
        assert_eq!(doc.numeric_doc_values("ts"), [1420070400000000001]);
    }

    #[test]
    fn test_date_range_query() {
        let field_type = date_field(DateResolution::Milliseconds, json!({}));
        let FieldTypeKind::Date(kind) = &field_type.kind else {
            unreachable!()
        };
        let query = kind
            .range_query(
                &field_type,
                Some(&JsonLiteral::from("2015-01-01T00:00:00Z")),
                Some(&JsonLiteral::from(1420070400000i64)),
                false,
                true,
            )
            .unwrap();
        assert!(query.is_match_none());
        let query = kind
            .range_query(
                &field_type,
                Some(&JsonLiteral::from(1000i64)),
                None,
                false,
                true,
            )
            .unwrap();
        // Four digit numbers are years under `strict_date_optional_time`.
        assert_eq!(
            query.to_string(),
            format!("ts:[-30610223999999 TO {}]", i64::MAX)
        );
        let query = kind
            .range_query(
                &field_type,
                Some(&JsonLiteral::from(1420070400000i64)),
                None,
                false,
                true,
            )
            .unwrap();
        assert_eq!(query.to_string(), format!("ts:[1420070400001 TO {}]", i64::MAX));
    }

    #[test]
    fn test_numbers_go_through_the_date_formats() {
        let field_type = date_field(DateResolution::Milliseconds, json!({}));
        let FieldTypeKind::Date(kind) = &field_type.kind else {
            unreachable!()
        };
        assert_eq!(kind.parse(&json!(1000)), Ok(-30610224000000));
        assert_eq!(kind.parse(&json!("1000")), Ok(-30610224000000));
        assert_eq!(kind.parse(&json!(99999)), Ok(99999));
        assert_eq!(kind.parse(&json!(1420070400000i64)), Ok(1420070400000));

        let mut doc = IndexDocument::root();
        let mut ignored = BTreeSet::new();
        let mut ctx = LeafContext::new(&mut doc, &mut ignored);
        index_value(&field_type, &json!(1000), &mut ctx).unwrap();
        assert_eq!(doc.numeric_doc_values("ts"), [-30610224000000]);

        let field_type = date_field(
            DateResolution::Milliseconds,
            json!({"format": "epoch_millis"}),
        );
        let FieldTypeKind::Date(kind) = &field_type.kind else {
            unreachable!()
        };
        assert_eq!(kind.parse(&json!(1000)), Ok(1000));
        let query = kind
            .range_query(
                &field_type,
                Some(&JsonLiteral::from(1000i64)),
                None,
                false,
                true,
            )
            .unwrap();
        assert_eq!(query.to_string(), format!("ts:[1001 TO {}]", i64::MAX));
    }

    #[test]
    fn test_invalid_null_value() {
        let params: DateParams = serde_json::from_value(json!({"null_value": "never"})).unwrap();
        let error = build("ts", DateResolution::Milliseconds, &params).unwrap_err();
        assert!(error
            .to_string()
            .contains("Error parsing [null_value] on field [ts]"));
    }
}
