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

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::MappingError;

/// An alternate name for a concrete field. Aliases are resolved at search time and cannot be
/// written to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldAliasMapper {
    name: String,
    simple_name: String,
    path: String,
}

impl FieldAliasMapper {
    pub const CONTENT_TYPE: &'static str = "alias";

    pub(crate) fn parse(
        name: &str,
        simple_name: &str,
        mut definition: JsonMap<String, JsonValue>,
    ) -> Result<FieldAliasMapper, MappingError> {
        let path = match definition.remove("path") {
            Some(JsonValue::String(path)) if !path.is_empty() => path,
            _ => {
                return Err(MappingError::Invalid(format!(
                    "The [path] property must be specified for field [{name}]."
                )))
            }
        };
        if let Some((param, value)) = definition.into_iter().next() {
            return Err(MappingError::Invalid(format!(
                "Mapping definition for [{name}] has unsupported parameters:  [{param} : {value}]"
            )));
        }
        Ok(FieldAliasMapper {
            name: name.to_string(),
            simple_name: simple_name.to_string(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn simple_name(&self) -> &str {
        &self.simple_name
    }

    /// Full path of the aliased field.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn invalid_path(&self, reason: &str) -> MappingError {
        MappingError::Invalid(format!(
            "Invalid [path] value [{}] for field alias [{}]: {reason}",
            self.path, self.name
        ))
    }

    pub fn to_json(&self) -> JsonMap<String, JsonValue> {
        let mut json = JsonMap::new();
        json.insert("type".to_string(), JsonValue::from(Self::CONTENT_TYPE));
        json.insert("path".to_string(), JsonValue::from(self.path.as_str()));
        json
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse_alias(definition: JsonValue) -> Result<FieldAliasMapper, MappingError> {
        let JsonValue::Object(definition) = definition else {
            panic!("expected an object");
        };
        FieldAliasMapper::parse("route.alias", "alias", definition)
    }

    #[test]
    fn test_parse_alias() {
        let alias = parse_alias(json!({"path": "route.distance"})).unwrap();
        assert_eq!(alias.path(), "route.distance");
        assert_eq!(alias.simple_name(), "alias");
        assert_eq!(
            JsonValue::Object(alias.to_json()),
            json!({"type": "alias", "path": "route.distance"})
        );
    }

    #[test]
    fn test_alias_requires_path() {
        let error = parse_alias(json!({})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "The [path] property must be specified for field [route.alias]."
        );
        let error = parse_alias(json!({"path": "x", "store": true})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Mapping definition for [route.alias] has unsupported parameters:  [store : true]"
        );
    }
}
