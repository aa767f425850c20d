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

use mapwright_query::TermValue;
use serde_json::Value as JsonValue;

use super::{scalar_to_string, FieldType, FieldTypeKind, LeafContext, TextSearchInfo};
use crate::analysis::get_analyzer_registry;
use crate::document::FieldValue;
use crate::mapper::field_params::KeywordParams;
use crate::MappingError;

pub(crate) fn build(name: &str, params: &KeywordParams) -> Result<FieldType, MappingError> {
    if let Some(normalizer) = &params.normalizer {
        get_analyzer_registry()
            .validate_normalizer(normalizer)
            .map_err(|error| MappingError::invalid_definition(name, error))?;
    }
    Ok(FieldType {
        name: name.to_string(),
        is_indexed: params.index,
        is_stored: params.store,
        has_doc_values: params.doc_values,
        text_search_info: TextSearchInfo::keyword(params.normalizer.as_deref()),
        meta: params.meta.clone(),
        kind: FieldTypeKind::Keyword {
            normalizer: params.normalizer.clone(),
        },
    })
}

pub(crate) fn index_value(
    field_type: &FieldType,
    params: &KeywordParams,
    value: &JsonValue,
    ctx: &mut LeafContext,
) -> Result<(), String> {
    let text = scalar_to_string(value)?;
    if text.chars().count() > params.ignore_above as usize {
        ctx.ignore(&field_type.name);
        return Ok(());
    }
    let term = match &params.normalizer {
        Some(normalizer) => get_analyzer_registry().normalize(normalizer, &text),
        None => text.into_owned(),
    };
    if field_type.is_indexed {
        ctx.add(
            &field_type.name,
            FieldValue::Term(TermValue::Text(term.clone())),
        );
    }
    if field_type.has_doc_values {
        ctx.add(
            &field_type.name,
            FieldValue::SortedSetDocValues(TermValue::Text(term.clone())),
        );
    }
    if field_type.is_stored {
        ctx.add(&field_type.name, FieldValue::Stored(JsonValue::String(term)));
    }
    Ok(())
}
