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

use half::f16;
use mapwright_query::{JsonLiteral, PointValue, Query, QueryError};
use serde_json::Value as JsonValue;

use super::{FieldType, FieldTypeKind, LeafContext, TextSearchInfo};
use crate::document::FieldValue;
use crate::mapper::field_params::NumberParams;
use crate::MappingError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NumberType {
    Byte,
    Short,
    Integer,
    Long,
    HalfFloat,
    Float,
    Double,
}

/// A parsed number, already rounded to the precision of its type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NumberValue {
    Long(i64),
    Double(f64),
}

impl NumberValue {
    pub fn to_json(self) -> JsonValue {
        match self {
            NumberValue::Long(value) => JsonValue::from(value),
            NumberValue::Double(value) => JsonValue::from(value),
        }
    }
}

pub fn double_to_sortable_long(value: f64) -> i64 {
    let bits = value.to_bits() as i64;
    bits ^ ((bits >> 63) & i64::MAX)
}

pub fn sortable_long_to_double(sortable: i64) -> f64 {
    f64::from_bits((sortable ^ ((sortable >> 63) & i64::MAX)) as u64)
}

pub fn float_to_sortable_int(value: f32) -> i32 {
    let bits = value.to_bits() as i32;
    bits ^ ((bits >> 31) & i32::MAX)
}

pub fn sortable_int_to_float(sortable: i32) -> f32 {
    f32::from_bits((sortable ^ ((sortable >> 31) & i32::MAX)) as u32)
}

pub fn half_float_to_sortable_short(value: f32) -> i16 {
    let bits = f16::from_f32(value).to_bits() as i16;
    bits ^ ((bits >> 15) & i16::MAX)
}

pub fn sortable_short_to_half_float(sortable: i16) -> f32 {
    f16::from_bits((sortable ^ ((sortable >> 15) & i16::MAX)) as u16).to_f32()
}

fn next_up_f64(value: f64) -> f64 {
    if value.is_nan() || value == f64::INFINITY {
        return value;
    }
    sortable_long_to_double(double_to_sortable_long(value) + 1)
}

fn next_down_f64(value: f64) -> f64 {
    if value.is_nan() || value == f64::NEG_INFINITY {
        return value;
    }
    sortable_long_to_double(double_to_sortable_long(value) - 1)
}

fn next_up_f32(value: f32) -> f32 {
    if value.is_nan() || value == f32::INFINITY {
        return value;
    }
    sortable_int_to_float(float_to_sortable_int(value) + 1)
}

fn next_down_f32(value: f32) -> f32 {
    if value.is_nan() || value == f32::NEG_INFINITY {
        return value;
    }
    sortable_int_to_float(float_to_sortable_int(value) - 1)
}

/// Smallest half float strictly greater than `value`, which may not be a half float itself.
fn half_float_next_up(value: f32) -> f32 {
    if value.is_nan() || value == f32::INFINITY {
        return value;
    }
    let sortable = half_float_to_sortable_short(value);
    if sortable_short_to_half_float(sortable) <= value {
        return sortable_short_to_half_float(sortable.wrapping_add(1));
    }
    sortable_short_to_half_float(sortable)
}

/// Largest half float strictly smaller than `value`.
fn half_float_next_down(value: f32) -> f32 {
    if value.is_nan() || value == f32::NEG_INFINITY {
        return value;
    }
    let sortable = half_float_to_sortable_short(value);
    if sortable_short_to_half_float(sortable) >= value {
        return sortable_short_to_half_float(sortable.wrapping_sub(1));
    }
    sortable_short_to_half_float(sortable)
}

fn has_decimal_part(value: &JsonValue) -> bool {
    match value {
        JsonValue::Number(number) if number.is_f64() => {
            number.as_f64().is_some_and(|value| value.fract() != 0.0)
        }
        JsonValue::String(text) => {
            let text = text.trim();
            text.parse::<i64>().is_err()
                && text
                    .parse::<f64>()
                    .is_ok_and(|value| value.is_finite() && value.fract() != 0.0)
        }
        _ => false,
    }
}

fn signum(value: &JsonValue) -> f64 {
    let number = match value {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.map_or(0.0, |number| {
        if number == 0.0 {
            0.0
        } else {
            number.signum()
        }
    })
}

fn literal_to_json(literal: &JsonLiteral) -> JsonValue {
    match literal {
        JsonLiteral::Number(number) => JsonValue::Number(number.clone()),
        JsonLiteral::String(text) => JsonValue::String(text.clone()),
        JsonLiteral::Bool(value) => JsonValue::Bool(*value),
    }
}

impl NumberType {
    pub const ALL: [NumberType; 7] = [
        NumberType::Byte,
        NumberType::Short,
        NumberType::Integer,
        NumberType::Long,
        NumberType::HalfFloat,
        NumberType::Float,
        NumberType::Double,
    ];

    pub fn from_type_name(type_name: &str) -> Option<NumberType> {
        NumberType::ALL
            .into_iter()
            .find(|number_type| number_type.type_name() == type_name)
    }

    pub fn type_name(self) -> &'static str {
        match self {
            NumberType::Byte => "byte",
            NumberType::Short => "short",
            NumberType::Integer => "integer",
            NumberType::Long => "long",
            NumberType::HalfFloat => "half_float",
            NumberType::Float => "float",
            NumberType::Double => "double",
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            NumberType::Byte | NumberType::Short | NumberType::Integer | NumberType::Long
        )
    }

    fn integer_bounds(self) -> (i64, i64) {
        match self {
            NumberType::Byte => (i8::MIN as i64, i8::MAX as i64),
            NumberType::Short => (i16::MIN as i64, i16::MAX as i64),
            NumberType::Integer => (i32::MIN as i64, i32::MAX as i64),
            _ => (i64::MIN, i64::MAX),
        }
    }

    fn out_of_range(self, text: &str) -> String {
        let article = match self {
            NumberType::Integer => "an",
            _ => "a",
        };
        format!("Value [{text}] is out of range for {article} {}", self.type_name())
    }

    /// Parses a value of a source document. `Ok(None)` means the value is to be treated as
    /// `null`.
    pub fn parse(self, value: &JsonValue, coerce: bool) -> Result<Option<NumberValue>, String> {
        match value {
            JsonValue::Null => Ok(None),
            JsonValue::Number(number) => self.parse_number(number, coerce).map(Some),
            JsonValue::String(text) => {
                if !coerce {
                    return Err(format!(
                        "expected JSON number, got string `\"{text}\"`. enable coercion to {} \
                         with the `coerce` parameter in the field mapping",
                        self.type_name()
                    ));
                }
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                self.parse_str(trimmed).map(Some)
            }
            JsonValue::Bool(value) => Err(format!("expected JSON number, got boolean `{value}`")),
            JsonValue::Array(_) => Err("expected JSON number, got array".to_string()),
            JsonValue::Object(_) => Err("expected JSON number, got object".to_string()),
        }
    }

    fn parse_number(
        self,
        number: &serde_json::Number,
        coerce: bool,
    ) -> Result<NumberValue, String> {
        if !self.is_integral() {
            let value = number
                .as_f64()
                .ok_or_else(|| format!("failed to parse [{number}] as a number"))?;
            return self.round_float(value, &number.to_string());
        }
        if let Some(value) = number.as_i64() {
            return self.check_integer(value, &number.to_string());
        }
        if number.is_u64() {
            return Err(self.out_of_range(&number.to_string()));
        }
        let value = number
            .as_f64()
            .ok_or_else(|| format!("failed to parse [{number}] as a number"))?;
        self.truncate_float(value, &number.to_string(), coerce)
    }

    fn parse_str(self, text: &str) -> Result<NumberValue, String> {
        if self.is_integral() {
            if let Ok(value) = text.parse::<i64>() {
                return self.check_integer(value, text);
            }
            if text.parse::<i128>().is_ok() {
                return Err(self.out_of_range(text));
            }
        }
        let value = text.parse::<f64>().map_err(|_| {
            format!(
                "failed to coerce JSON string `\"{text}\"` to {}",
                self.type_name()
            )
        })?;
        if self.is_integral() {
            return self.truncate_float(value, text, true);
        }
        self.round_float(value, text)
    }

    fn check_integer(self, value: i64, text: &str) -> Result<NumberValue, String> {
        let (min, max) = self.integer_bounds();
        if value < min || value > max {
            return Err(self.out_of_range(text));
        }
        Ok(NumberValue::Long(value))
    }

    fn truncate_float(self, value: f64, text: &str, coerce: bool) -> Result<NumberValue, String> {
        if !value.is_finite() {
            return Err(self.out_of_range(text));
        }
        if value.fract() != 0.0 && !coerce {
            return Err(format!("Value [{text}] has a decimal part"));
        }
        let (min, max) = self.integer_bounds();
        // `max as f64` rounds up for longs, hence the strict comparison.
        if value < min as f64 || value >= (max as f64) + 1.0 {
            return Err(self.out_of_range(text));
        }
        Ok(NumberValue::Long(value.trunc() as i64))
    }

    fn round_float(self, value: f64, text: &str) -> Result<NumberValue, String> {
        let rounded = match self {
            NumberType::HalfFloat => f16::from_f32(value as f32).to_f64(),
            NumberType::Float => value as f32 as f64,
            _ => value,
        };
        if !rounded.is_finite() {
            return Err(format!(
                "[{}] supports only finite values, but got [{text}]",
                self.type_name()
            ));
        }
        Ok(NumberValue::Double(rounded))
    }

    pub fn point(self, value: NumberValue) -> PointValue {
        match (self, value) {
            (_, NumberValue::Long(value)) => PointValue::Long(value),
            (NumberType::HalfFloat, NumberValue::Double(value)) => {
                PointValue::HalfFloat(value as f32)
            }
            (NumberType::Float, NumberValue::Double(value)) => PointValue::Float(value as f32),
            (_, NumberValue::Double(value)) => PointValue::Double(value),
        }
    }

    /// Encoding of the value in numeric doc values, ordered like the numbers themselves.
    pub fn sortable(self, value: NumberValue) -> i64 {
        match (self, value) {
            (_, NumberValue::Long(value)) => value,
            (NumberType::HalfFloat, NumberValue::Double(value)) => {
                half_float_to_sortable_short(value as f32) as i64
            }
            (NumberType::Float, NumberValue::Double(value)) => {
                float_to_sortable_int(value as f32) as i64
            }
            (_, NumberValue::Double(value)) => double_to_sortable_long(value),
        }
    }

    pub fn from_sortable(self, sortable: i64) -> NumberValue {
        match self {
            NumberType::HalfFloat => {
                NumberValue::Double(sortable_short_to_half_float(sortable as i16) as f64)
            }
            NumberType::Float => NumberValue::Double(sortable_int_to_float(sortable as i32) as f64),
            NumberType::Double => NumberValue::Double(sortable_long_to_double(sortable)),
            _ => NumberValue::Long(sortable),
        }
    }

    pub(crate) fn add_fields(
        self,
        field_type: &FieldType,
        value: NumberValue,
        ctx: &mut LeafContext,
    ) {
        if field_type.is_indexed {
            ctx.add(&field_type.name, FieldValue::Point(self.point(value)));
        }
        if field_type.has_doc_values {
            ctx.add(
                &field_type.name,
                FieldValue::SortedNumericDocValues(self.sortable(value)),
            );
        }
        if field_type.is_stored {
            ctx.add(&field_type.name, FieldValue::Stored(value.to_json()));
        }
    }

    fn parse_query_value(self, field: &str, value: &JsonValue) -> Result<NumberValue, QueryError> {
        match self.parse(value, true) {
            Ok(Some(number)) => Ok(number),
            Ok(None) => Err(QueryError::invalid_value(
                field,
                format!("[{value}] is not a valid {} value", self.type_name()),
            )),
            Err(reason) => Err(QueryError::invalid_value(field, reason)),
        }
    }

    /// Values matching none of the field's possible values yield `Ok(None)`.
    fn term_value(
        self,
        field: &str,
        literal: &JsonLiteral,
    ) -> Result<Option<NumberValue>, QueryError> {
        let value = literal_to_json(literal);
        if self.is_integral() {
            if has_decimal_part(&value) {
                return Ok(None);
            }
            if let Err(reason) = self.parse(&value, true) {
                if reason.contains("out of range") {
                    return Ok(None);
                }
            }
        }
        self.parse_query_value(field, &value).map(Some)
    }

    fn exact_query(self, field_type: &FieldType, values: Vec<NumberValue>) -> Query {
        if field_type.is_indexed {
            if let [value] = values[..] {
                let point = self.point(value);
                return Query::PointRange {
                    field: field_type.name.clone(),
                    lower: point,
                    upper: point,
                };
            }
            return Query::PointSet {
                field: field_type.name.clone(),
                points: values.into_iter().map(|value| self.point(value)).collect(),
            };
        }
        Query::DocValuesSet {
            field: field_type.name.clone(),
            values: values.into_iter().map(|value| self.sortable(value)).collect(),
        }
    }

    pub fn term_query(
        self,
        field_type: &FieldType,
        value: &JsonLiteral,
    ) -> Result<Query, QueryError> {
        match self.term_value(&field_type.name, value)? {
            Some(number) => Ok(self.exact_query(field_type, vec![number])),
            None => Ok(Query::match_none(format!(
                "Value [{value}] has a decimal part or is out of range for field [{}]",
                field_type.name
            ))),
        }
    }

    pub fn terms_query(
        self,
        field_type: &FieldType,
        values: &[JsonLiteral],
    ) -> Result<Query, QueryError> {
        let mut numbers = Vec::with_capacity(values.len());
        for value in values {
            if let Some(number) = self.term_value(&field_type.name, value)? {
                numbers.push(number);
            }
        }
        if numbers.is_empty() {
            return Ok(Query::match_none("All values have a decimal part"));
        }
        numbers.dedup();
        Ok(self.exact_query(field_type, numbers))
    }

    /// Converts a bound to an integral value. Decimal bounds round towards the interior of the
    /// range.
    fn integral_bound(
        self,
        field: &str,
        bound: &JsonValue,
        inclusive: bool,
        is_lower: bool,
    ) -> Result<Option<i64>, QueryError> {
        // Small integral types accept any int bound, as they are compared as ints.
        let parse_as = if self == NumberType::Long {
            NumberType::Long
        } else {
            NumberType::Integer
        };
        let (min, max) = parse_as.integer_bounds();
        let NumberValue::Long(mut value) = parse_as.parse_query_value(field, bound)? else {
            return Err(QueryError::invalid_value(field, "expected an integral bound"));
        };
        let decimal = has_decimal_part(bound);
        if is_lower {
            if (!decimal && !inclusive) || (decimal && signum(bound) > 0.0) {
                if value == max {
                    return Ok(None);
                }
                value += 1;
            }
        } else if (!decimal && !inclusive) || (decimal && signum(bound) < 0.0) {
            if value == min {
                return Ok(None);
            }
            value -= 1;
        }
        Ok(Some(value))
    }

    fn float_bound(
        self,
        field: &str,
        bound: &JsonValue,
        inclusive: bool,
        is_lower: bool,
    ) -> Result<f64, QueryError> {
        // Bounds keep their full precision, only stepping happens in the field's precision.
        let NumberValue::Double(value) =
            NumberType::Double.parse_query_value(field, bound)?
        else {
            return Err(QueryError::invalid_value(field, "expected a floating point bound"));
        };
        let stepped = match (self, is_lower) {
            (NumberType::HalfFloat, true) => {
                let value = value as f32;
                let value = if inclusive {
                    half_float_next_down(value)
                } else {
                    value
                };
                half_float_next_up(value) as f64
            }
            (NumberType::HalfFloat, false) => {
                let value = value as f32;
                let value = if inclusive {
                    half_float_next_up(value)
                } else {
                    value
                };
                half_float_next_down(value) as f64
            }
            (NumberType::Float, true) if !inclusive => next_up_f32(value as f32) as f64,
            (NumberType::Float, false) if !inclusive => next_down_f32(value as f32) as f64,
            (NumberType::Float, _) => value as f32 as f64,
            (_, true) if !inclusive => next_up_f64(value),
            (_, false) if !inclusive => next_down_f64(value),
            _ => value,
        };
        Ok(stepped)
    }

    pub fn range_query(
        self,
        field_type: &FieldType,
        lower: Option<&JsonLiteral>,
        upper: Option<&JsonLiteral>,
        include_lower: bool,
        include_upper: bool,
    ) -> Result<Query, QueryError> {
        let field = &field_type.name;
        let lower = lower.map(literal_to_json);
        let upper = upper.map(literal_to_json);
        let (lower_value, upper_value) = if self.is_integral() {
            let (min, max) = if self == NumberType::Long {
                NumberType::Long.integer_bounds()
            } else {
                NumberType::Integer.integer_bounds()
            };
            let lower_value = match &lower {
                Some(bound) => self.integral_bound(field, bound, include_lower, true)?,
                None => Some(min),
            };
            let upper_value = match &upper {
                Some(bound) => self.integral_bound(field, bound, include_upper, false)?,
                None => Some(max),
            };
            let (Some(lower_value), Some(upper_value)) = (lower_value, upper_value) else {
                return Ok(Query::match_none(format!(
                    "range bounds of field [{field}] overflow"
                )));
            };
            if lower_value > upper_value {
                return Ok(Query::match_none(format!("empty range on field [{field}]")));
            }
            (
                NumberValue::Long(lower_value),
                NumberValue::Long(upper_value),
            )
        } else {
            let lower_value = match &lower {
                Some(bound) => self.float_bound(field, bound, include_lower, true)?,
                None => f64::NEG_INFINITY,
            };
            let upper_value = match &upper {
                Some(bound) => self.float_bound(field, bound, include_upper, false)?,
                None => f64::INFINITY,
            };
            if lower_value > upper_value {
                return Ok(Query::match_none(format!("empty range on field [{field}]")));
            }
            (
                NumberValue::Double(lower_value),
                NumberValue::Double(upper_value),
            )
        };
        let index_query = Query::PointRange {
            field: field.clone(),
            lower: self.point(lower_value),
            upper: self.point(upper_value),
        };
        let doc_values_query = Query::DocValuesRange {
            field: field.clone(),
            lower: self.sortable(lower_value),
            upper: self.sortable(upper_value),
        };
        let query = match (field_type.is_indexed, field_type.has_doc_values) {
            (true, true) => Query::IndexOrDocValues {
                index: Box::new(index_query),
                doc_values: Box::new(doc_values_query),
            },
            (true, false) => index_query,
            _ => doc_values_query,
        };
        Ok(query)
    }
}

pub(crate) fn build(
    name: &str,
    number_type: NumberType,
    params: &NumberParams,
) -> Result<FieldType, MappingError> {
    params.validate(name, number_type)?;
    if let Some(null_value) = &params.null_value {
        number_type
            .parse(null_value, true)
            .map_err(|reason| MappingError::invalid_definition(name, reason))?;
    }
    Ok(FieldType {
        name: name.to_string(),
        is_indexed: params.index,
        is_stored: params.store,
        has_doc_values: params.doc_values,
        text_search_info: TextSearchInfo::none(),
        meta: params.meta.clone(),
        kind: FieldTypeKind::Number(number_type),
    })
}

pub(crate) fn index_value(
    field_type: &FieldType,
    number_type: NumberType,
    coerce: bool,
    value: &JsonValue,
    ctx: &mut LeafContext,
) -> Result<(), String> {
    if let Some(number) = number_type.parse(value, coerce)? {
        number_type.add_fields(field_type, number, ctx);
    }
    Ok(())
}
