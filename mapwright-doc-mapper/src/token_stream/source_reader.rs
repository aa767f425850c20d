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

use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Reads a source document, rejecting objects that repeat a key.
///
/// Object keys keep the order they have in the source.
pub fn parse_json_source(source: &str) -> Result<JsonValue, serde_json::Error> {
    let mut deserializer = serde_json::Deserializer::from_str(source);
    let value = UniqueKeysSeed.deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(value)
}

#[derive(Clone, Copy)]
struct UniqueKeysSeed;

impl<'de> DeserializeSeed<'de> for UniqueKeysSeed {
    type Value = JsonValue;

    fn deserialize<D>(self, deserializer: D) -> Result<JsonValue, D::Error>
    where D: Deserializer<'de> {
        deserializer.deserialize_any(UniqueKeysVisitor)
    }
}

struct UniqueKeysVisitor;

impl<'de> Visitor<'de> for UniqueKeysVisitor {
    type Value = JsonValue;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON value")
    }

    fn visit_bool<E>(self, value: bool) -> Result<JsonValue, E> {
        Ok(JsonValue::Bool(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<JsonValue, E> {
        Ok(JsonValue::from(value))
    }

    fn visit_u64<E>(self, value: u64) -> Result<JsonValue, E> {
        Ok(JsonValue::from(value))
    }

    fn visit_f64<E>(self, value: f64) -> Result<JsonValue, E> {
        Ok(JsonValue::from(value))
    }

    fn visit_str<E>(self, value: &str) -> Result<JsonValue, E> {
        Ok(JsonValue::String(value.to_string()))
    }

    fn visit_string<E>(self, value: String) -> Result<JsonValue, E> {
        Ok(JsonValue::String(value))
    }

    fn visit_unit<E>(self) -> Result<JsonValue, E> {
        Ok(JsonValue::Null)
    }

    fn visit_none<E>(self) -> Result<JsonValue, E> {
        Ok(JsonValue::Null)
    }

    fn visit_seq<S>(self, mut seq: S) -> Result<JsonValue, S::Error>
    where S: SeqAccess<'de> {
        let mut values = Vec::new();
        while let Some(value) = seq.next_element_seed(UniqueKeysSeed)? {
            values.push(value);
        }
        Ok(JsonValue::Array(values))
    }

    fn visit_map<M>(self, mut map: M) -> Result<JsonValue, M::Error>
    where M: MapAccess<'de> {
        let mut object = JsonMap::new();
        while let Some(key) = map.next_key::<String>()? {
            if object.contains_key(&key) {
                return Err(de::Error::custom(format!("Duplicate field '{key}'")));
            }
            let value = map.next_value_seed(UniqueKeysSeed)?;
            object.insert(key, value);
        }
        Ok(JsonValue::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_json_source_keeps_key_order() {
        let value = parse_json_source(r#"{"z": 1, "a": [true, null, 1.5], "m": {"y": "x"}}"#)
            .unwrap();
        assert_eq!(value, json!({"z": 1, "a": [true, null, 1.5], "m": {"y": "x"}}));
        assert_eq!(
            value.to_string(),
            r#"{"z":1,"a":[true,null,1.5],"m":{"y":"x"}}"#
        );
    }

    #[test]
    fn test_parse_json_source_rejects_duplicate_keys() {
        let error = parse_json_source(r#"{"a": 1, "a": "x"}"#).unwrap_err();
        assert!(error.to_string().starts_with("Duplicate field 'a'"));
        let error = parse_json_source(r#"{"o": [{"k": 1, "k": 2}]}"#).unwrap_err();
        assert!(error.to_string().starts_with("Duplicate field 'k'"));
        parse_json_source(r#"{"a": {"k": 1}, "b": {"k": 2}}"#).unwrap();
    }

    #[test]
    fn test_parse_json_source_rejects_trailing_content() {
        assert!(parse_json_source(r#"{"a": 1} {"b": 2}"#).is_err());
        assert!(parse_json_source(r#"{"a": "#).is_err());
    }
}
