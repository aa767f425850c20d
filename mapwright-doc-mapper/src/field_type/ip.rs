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

use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use mapwright_query::{JsonLiteral, PointValue, Query, QueryError, TermValue};
use serde_json::Value as JsonValue;

use super::{FieldType, FieldTypeKind, LeafContext, TextSearchInfo};
use crate::document::FieldValue;
use crate::mapper::field_params::IpParams;
use crate::MappingError;

/// Parses an IPv4 or IPv6 address into its IPv6 representation.
pub(crate) fn parse_ip(text: &str) -> Result<u128, String> {
    let ip_addr = IpAddr::from_str(text.trim())
        .map_err(|_| format!("'{text}' is not an IP string literal."))?;
    let ipv6 = match ip_addr {
        IpAddr::V4(ipv4) => ipv4.to_ipv6_mapped(),
        IpAddr::V6(ipv6) => ipv6,
    };
    Ok(u128::from(ipv6))
}

pub(crate) fn format_ip(ip: u128) -> String {
    let ipv6 = Ipv6Addr::from(ip);
    match ipv6.to_ipv4_mapped() {
        Some(ipv4) => ipv4.to_string(),
        None => ipv6.to_string(),
    }
}

/// Inclusive bounds of a CIDR block such as `192.168.0.0/16`.
fn parse_cidr(text: &str) -> Result<(u128, u128), String> {
    let (address, prefix_len) = text
        .split_once('/')
        .ok_or_else(|| format!("Expected [ip/prefix] but was [{text}]"))?;
    let prefix_len: u32 = prefix_len
        .parse()
        .map_err(|_| format!("Expected [ip/prefix] but was [{text}]"))?;
    let is_ipv4 = IpAddr::from_str(address).is_ok_and(|ip| ip.is_ipv4());
    let max_prefix_len = if is_ipv4 { 32 } else { 128 };
    if prefix_len > max_prefix_len {
        return Err(format!(
            "Illegal prefix length [{prefix_len}] in [{text}]. Must be 0-{max_prefix_len}"
        ));
    }
    let prefix_len = if is_ipv4 { prefix_len + 96 } else { prefix_len };
    let address = parse_ip(address)?;
    let host_mask = u128::MAX.checked_shr(prefix_len).unwrap_or(0);
    Ok((address & !host_mask, address | host_mask))
}

fn ip_literal<'a>(field: &str, value: &'a JsonLiteral) -> Result<&'a str, QueryError> {
    value
        .as_str()
        .ok_or_else(|| QueryError::invalid_value(field, format!("[{value}] is not an IP string")))
}

fn ip_term(ip: u128) -> TermValue {
    TermValue::Bytes(ip.to_be_bytes().to_vec())
}

pub(crate) fn build(name: &str, params: &IpParams) -> Result<FieldType, MappingError> {
    if let Some(null_value) = &params.null_value {
        parse_ip(null_value).map_err(|reason| MappingError::invalid_definition(name, reason))?;
    }
    Ok(FieldType {
        name: name.to_string(),
        is_indexed: params.index,
        is_stored: params.store,
        has_doc_values: params.doc_values,
        text_search_info: TextSearchInfo::none(),
        meta: params.meta.clone(),
        kind: FieldTypeKind::Ip,
    })
}

pub(crate) fn index_value(
    field_type: &FieldType,
    value: &JsonValue,
    ctx: &mut LeafContext,
) -> Result<(), String> {
    let JsonValue::String(text) = value else {
        return Err(format!("'{value}' is not an IP string literal."));
    };
    let ip = parse_ip(text)?;
    if field_type.is_indexed {
        ctx.add(&field_type.name, FieldValue::Point(PointValue::Ip(ip)));
    }
    if field_type.has_doc_values {
        ctx.add(&field_type.name, FieldValue::SortedSetDocValues(ip_term(ip)));
    }
    if field_type.is_stored {
        ctx.add(
            &field_type.name,
            FieldValue::Stored(JsonValue::String(format_ip(ip))),
        );
    }
    Ok(())
}

pub(crate) fn term_query(field_type: &FieldType, value: &JsonLiteral) -> Result<Query, QueryError> {
    let field = &field_type.name;
    let text = ip_literal(field, value)?;
    if text.contains('/') {
        if !field_type.is_indexed {
            return Err(QueryError::not_indexed(field));
        }
        let (lower, upper) =
            parse_cidr(text).map_err(|reason| QueryError::invalid_value(field, reason))?;
        return Ok(Query::PointRange {
            field: field.clone(),
            lower: PointValue::Ip(lower),
            upper: PointValue::Ip(upper),
        });
    }
    let ip = parse_ip(text).map_err(|reason| QueryError::invalid_value(field, reason))?;
    if field_type.is_indexed {
        return Ok(Query::PointRange {
            field: field.clone(),
            lower: PointValue::Ip(ip),
            upper: PointValue::Ip(ip),
        });
    }
    Ok(Query::DocValuesTerms {
        field: field.clone(),
        terms: vec![ip_term(ip)],
    })
}

pub(crate) fn terms_query(
    field_type: &FieldType,
    values: &[JsonLiteral],
) -> Result<Query, QueryError> {
    let field = &field_type.name;
    if let [value] = values {
        return term_query(field_type, value);
    }
    let mut ips = Vec::with_capacity(values.len());
    for value in values {
        let text = ip_literal(field, value)?;
        if text.contains('/') {
            return Err(QueryError::invalid_value(
                field,
                format!("CIDR block [{text}] can only be used in a term query"),
            ));
        }
        ips.push(parse_ip(text).map_err(|reason| QueryError::invalid_value(field, reason))?);
    }
    ips.sort_unstable();
    ips.dedup();
    if field_type.is_indexed {
        return Ok(Query::PointSet {
            field: field.clone(),
            points: ips.into_iter().map(PointValue::Ip).collect(),
        });
    }
    Ok(Query::DocValuesTerms {
        field: field.clone(),
        terms: ips.into_iter().map(ip_term).collect(),
    })
}

pub(crate) fn range_query(
    field_type: &FieldType,
    lower: Option<&JsonLiteral>,
    upper: Option<&JsonLiteral>,
    include_lower: bool,
    include_upper: bool,
) -> Result<Query, QueryError> {
    let field = &field_type.name;
    let parse_bound = |value: &JsonLiteral| -> Result<u128, QueryError> {
        parse_ip(ip_literal(field, value)?)
            .map_err(|reason| QueryError::invalid_value(field, reason))
    };
    let lower_value = match lower {
        Some(lower) if include_lower => Some(parse_bound(lower)?),
        Some(lower) => parse_bound(lower)?.checked_add(1),
        None => Some(u128::MIN),
    };
    let upper_value = match upper {
        Some(upper) if include_upper => Some(parse_bound(upper)?),
        Some(upper) => parse_bound(upper)?.checked_sub(1),
        None => Some(u128::MAX),
    };
    match (lower_value, upper_value) {
        (Some(lower_value), Some(upper_value)) if lower_value <= upper_value => {
            Ok(Query::PointRange {
                field: field.clone(),
                lower: PointValue::Ip(lower_value),
                upper: PointValue::Ip(upper_value),
            })
        }
        _ => Ok(Query::match_none(format!("empty ip range on field [{field}]"))),
    }
}
