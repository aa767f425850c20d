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
use crate::document::FieldValue;
use crate::mapper::field_params::FlattenedParams;
use crate::MappingError;

/// Suffix of the index field holding `key\0value` terms.
pub const KEYED_FIELD_SUFFIX: &str = "._keyed";

const KEY_SEPARATOR: char = '\0';

pub fn keyed_field_name(root_name: &str) -> String {
    format!("{root_name}{KEYED_FIELD_SUFFIX}")
}

pub(crate) fn keyed_term(key: &str, value: &str) -> String {
    format!("{key}{KEY_SEPARATOR}{value}")
}

pub(crate) fn build(name: &str, params: &FlattenedParams) -> Result<FieldType, MappingError> {
    Ok(FieldType {
        name: name.to_string(),
        is_indexed: params.index,
        is_stored: false,
        has_doc_values: params.doc_values,
        text_search_info: TextSearchInfo::keyword(None),
        meta: Default::default(),
        kind: FieldTypeKind::Flattened {
            root_name: name.to_string(),
            key: None,
        },
    })
}

/// Field type of one key of a flattened field, e.g. `labels.release` for the key `release`.
pub(crate) fn keyed_field_type(root: &FieldType, key: &str) -> FieldType {
    FieldType {
        name: format!("{}.{key}", root.name),
        is_indexed: root.is_indexed,
        is_stored: false,
        has_doc_values: root.has_doc_values,
        text_search_info: TextSearchInfo::keyword(None),
        meta: root.meta.clone(),
        kind: FieldTypeKind::Flattened {
            root_name: root.name.clone(),
            key: Some(key.to_string()),
        },
    }
}

struct FlattenedWriter<'a, 'b, 'c> {
    field_type: &'a FieldType,
    params: &'a FlattenedParams,
    keyed_field: String,
    ctx: &'b mut LeafContext<'c>,
}

impl FlattenedWriter<'_, '_, '_> {
    fn add_leaf(&mut self, key: &str, value: &JsonValue) -> Result<(), String> {
        let value = match value {
            JsonValue::Null => match &self.params.null_value {
                Some(null_value) => JsonValue::String(null_value.clone()),
                None => return Ok(()),
            },
            other => other.clone(),
        };
        let text = scalar_to_string(&value)?;
        if text.chars().count() > self.params.ignore_above as usize {
            self.ctx.ignore(&self.field_type.name);
            return Ok(());
        }
        let keyed = keyed_term(key, &text);
        let name = &self.field_type.name;
        if self.field_type.is_indexed {
            self.ctx
                .add(name, FieldValue::Term(TermValue::Text(text.to_string())));
            self.ctx.add(
                &self.keyed_field,
                FieldValue::Term(TermValue::Text(keyed.clone())),
            );
        }
        if self.field_type.has_doc_values {
            self.ctx.add(
                name,
                FieldValue::SortedSetDocValues(TermValue::Text(text.to_string())),
            );
            self.ctx.add(
                &self.keyed_field,
                FieldValue::SortedSetDocValues(TermValue::Text(keyed)),
            );
        }
        Ok(())
    }

    fn walk(&mut self, key: &str, value: &JsonValue, depth: u32) -> Result<(), String> {
        match value {
            JsonValue::Object(map) => {
                if depth > self.params.depth_limit {
                    return Err(format!(
                        "the provided [flattened] field [{}] exceeds the maximum depth limit of \
                         [{}]",
                        self.field_type.name, self.params.depth_limit
                    ));
                }
                for (name, child) in map {
                    let child_key = if key.is_empty() {
                        name.clone()
                    } else {
                        format!("{key}.{name}")
                    };
                    self.walk(&child_key, child, depth + 1)?;
                }
                Ok(())
            }
            JsonValue::Array(elements) => {
                for element in elements {
                    self.walk(key, element, depth)?;
                }
                Ok(())
            }
            scalar => self.add_leaf(key, scalar),
        }
    }
}

pub(crate) fn index_value(
    field_type: &FieldType,
    params: &FlattenedParams,
    value: &JsonValue,
    ctx: &mut LeafContext,
) -> Result<(), String> {
    if !value.is_object() {
        return Err(format!(
            "the [flattened] field [{}] expects an object, got [{value}]",
            field_type.name
        ));
    }
    let mut writer = FlattenedWriter {
        field_type,
        params,
        keyed_field: keyed_field_name(&field_type.name),
        ctx,
    };
    writer.walk("", value, 1)
}
