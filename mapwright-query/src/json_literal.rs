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

use serde::{Deserialize, Serialize};

/// A value supplied by a user in a query, before it is interpreted by a field type.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
#[serde(untagged)]
pub enum JsonLiteral {
    Number(serde_json::Number),
    String(String),
    Bool(bool),
}

impl JsonLiteral {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsonLiteral::String(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for JsonLiteral {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonLiteral::Number(number) => number.fmt(formatter),
            JsonLiteral::String(text) => formatter.write_str(text),
            JsonLiteral::Bool(bool_val) => bool_val.fmt(formatter),
        }
    }
}

impl From<&str> for JsonLiteral {
    fn from(text: &str) -> Self {
        JsonLiteral::String(text.to_string())
    }
}

impl From<String> for JsonLiteral {
    fn from(text: String) -> Self {
        JsonLiteral::String(text)
    }
}

impl From<i64> for JsonLiteral {
    fn from(value: i64) -> Self {
        JsonLiteral::Number(value.into())
    }
}

impl From<f64> for JsonLiteral {
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value)
            .map(JsonLiteral::Number)
            .unwrap_or_else(|| JsonLiteral::String(value.to_string()))
    }
}

impl From<bool> for JsonLiteral {
    fn from(value: bool) -> Self {
        JsonLiteral::Bool(value)
    }
}

/// Conversion of a [`JsonLiteral`] into the native type of a field.
pub trait InterpretUserInput<'a>: Sized {
    fn interpret_json(user_input: &'a JsonLiteral) -> Option<Self> {
        match user_input {
            JsonLiteral::Number(number) => Self::interpret_number(number),
            JsonLiteral::String(str_val) => Self::interpret_str(str_val),
            JsonLiteral::Bool(bool_val) => Self::interpret_bool(*bool_val),
        }
    }

    fn interpret_number(_number: &serde_json::Number) -> Option<Self> {
        None
    }

    fn interpret_bool(_bool: bool) -> Option<Self> {
        None
    }

    fn interpret_str(_text: &'a str) -> Option<Self> {
        None
    }
}

impl<'a> InterpretUserInput<'a> for &'a str {
    fn interpret_str(text: &'a str) -> Option<Self> {
        Some(text)
    }
}

impl<'a> InterpretUserInput<'a> for f64 {
    fn interpret_number(number: &serde_json::Number) -> Option<Self> {
        number.as_f64()
    }

    fn interpret_str(text: &'a str) -> Option<Self> {
        text.trim().parse().ok()
    }
}

impl<'a> InterpretUserInput<'a> for bool {
    fn interpret_bool(bool_val: bool) -> Option<Self> {
        Some(bool_val)
    }

    fn interpret_str(text: &'a str) -> Option<Self> {
        match text {
            "true" => Some(true),
            "false" | "" => Some(false),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_json_literal() {
        assert_eq!(f64::interpret_json(&JsonLiteral::from("1.5")), Some(1.5));
        assert_eq!(f64::interpret_json(&JsonLiteral::from(2i64)), Some(2.0));
        assert_eq!(f64::interpret_json(&JsonLiteral::Bool(true)), None);
        assert_eq!(bool::interpret_json(&JsonLiteral::from("true")), Some(true));
        assert_eq!(bool::interpret_json(&JsonLiteral::from("")), Some(false));
        assert_eq!(bool::interpret_json(&JsonLiteral::from("yes")), None);
        assert_eq!(<&str>::interpret_json(&JsonLiteral::from("abc")), Some("abc"));
    }

    #[test]
    fn test_json_literal_untagged_serde() {
        let literals: Vec<JsonLiteral> = serde_json::from_str(r#"[1, "a", true]"#).unwrap();
        assert_eq!(
            literals,
            vec![
                JsonLiteral::from(1i64),
                JsonLiteral::from("a"),
                JsonLiteral::Bool(true)
            ]
        );
        assert_eq!(literals[0].to_string(), "1");
    }
}
