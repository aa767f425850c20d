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

use base64::prelude::{Engine, BASE64_STANDARD};
use serde_json::Value as JsonValue;

use super::{FieldType, FieldTypeKind, LeafContext, TextSearchInfo};
use crate::document::FieldValue;
use crate::mapper::field_params::BinaryParams;
use crate::MappingError;

pub(crate) fn build(name: &str, params: &BinaryParams) -> Result<FieldType, MappingError> {
    Ok(FieldType {
        name: name.to_string(),
        is_indexed: false,
        is_stored: params.store,
        has_doc_values: params.doc_values,
        text_search_info: TextSearchInfo::none(),
        meta: params.meta.clone(),
        kind: FieldTypeKind::Binary,
    })
}

pub(crate) fn index_value(
    field_type: &FieldType,
    value: &JsonValue,
    ctx: &mut LeafContext,
) -> Result<(), String> {
    let JsonValue::String(encoded) = value else {
        return Err(format!("expected a base64 encoded string, got [{value}]"));
    };
    if !field_type.is_stored && !field_type.has_doc_values {
        return Ok(());
    }
    let bytes = BASE64_STANDARD
        .decode(encoded)
        .map_err(|error| format!("failed to decode base64 value: {error}"))?;
    if field_type.has_doc_values {
        ctx.add(&field_type.name, FieldValue::BinaryDocValues(bytes));
    }
    if field_type.is_stored {
        ctx.add(&field_type.name, FieldValue::Stored(value.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::document::IndexDocument;

    #[test]
    fn test_binary_doc_values() {
        let params: BinaryParams = serde_json::from_value(json!({"doc_values": true})).unwrap();
        let field_type = build("blob", &params).unwrap();
        let mut doc = IndexDocument::root();
        let mut ignored = BTreeSet::new();
        let mut ctx = LeafContext::new(&mut doc, &mut ignored);
        index_value(&field_type, &json!("AAEC"), &mut ctx).unwrap();
        assert!(index_value(&field_type, &json!("***"), &mut ctx).is_err());
        assert!(index_value(&field_type, &json!(12), &mut ctx).is_err());
        assert_eq!(
            doc.get_fields("blob").collect::<Vec<_>>(),
            [&FieldValue::BinaryDocValues(vec![0, 1, 2])]
        );
    }
}
