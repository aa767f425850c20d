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

//! Pull parser abstraction over documents.
//!
//! The document parser never looks at a `serde_json::Value` tree directly. It pulls [`Token`]s
//! from a [`TokenStream`], which lets [`DotExpandingTokenStream`] rewrite `{"a.b": 1}` into
//! `{"a": {"b": 1}}` on the fly.

mod dot_expander;
mod json_stream;
mod path;
mod source_reader;

use std::fmt;

use serde_json::{Map as JsonMap, Value as JsonValue};

pub use self::dot_expander::{DotExpandingTokenStream, ExpansionScope};
pub use self::json_stream::JsonTokenStream;
pub use self::path::split_and_validate_path;
pub use self::source_reader::parse_json_source;
use crate::DocParsingError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    FieldName,
    String,
    Number,
    Boolean,
    Null,
}

impl Token {
    /// Returns true for tokens carrying a scalar value, `null` included.
    pub fn is_value(self) -> bool {
        matches!(
            self,
            Token::String | Token::Number | Token::Boolean | Token::Null
        )
    }

    pub fn is_start(self) -> bool {
        matches!(self, Token::StartObject | Token::StartArray)
    }

    pub fn is_end(self) -> bool {
        matches!(self, Token::EndObject | Token::EndArray)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Token::StartObject => "START_OBJECT",
            Token::EndObject => "END_OBJECT",
            Token::StartArray => "START_ARRAY",
            Token::EndArray => "END_ARRAY",
            Token::FieldName => "FIELD_NAME",
            Token::String => "VALUE_STRING",
            Token::Number => "VALUE_NUMBER",
            Token::Boolean => "VALUE_BOOLEAN",
            Token::Null => "VALUE_NULL",
        };
        formatter.write_str(name)
    }
}

/// Where a token was read: its 1-based ordinal in the stream and the JSON pointer of the value
/// it belongs to.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TokenLocation {
    pub ordinal: u64,
    pub pointer: String,
}

impl fmt::Display for TokenLocation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.ordinal, self.pointer)
    }
}

pub trait TokenStream {
    /// Advances to the next token. Returns `None` once the document is exhausted.
    fn next_token(&mut self) -> Result<Option<Token>, DocParsingError>;

    fn current_token(&self) -> Option<Token>;

    /// Name of the field whose name is the current token.
    fn current_name(&self) -> Option<&str>;

    /// Value of the current scalar token.
    fn scalar_value(&self) -> Option<&JsonValue>;

    fn location(&self) -> TokenLocation;

    /// If the current token starts an object or an array, advances to its matching end token.
    fn skip_children(&mut self) -> Result<(), DocParsingError> {
        skip_children_of(self)
    }

    /// Reads the whole value starting at the current token. On return, the current token is the
    /// last token of that value.
    fn read_subtree(&mut self) -> Result<JsonValue, DocParsingError> {
        read_subtree_of(self)
    }
}

fn unexpected_end<S: TokenStream + ?Sized>(stream: &S) -> DocParsingError {
    DocParsingError::parse(stream.location(), "unexpected end of document")
}

pub(crate) fn skip_children_of<S: TokenStream + ?Sized>(
    stream: &mut S,
) -> Result<(), DocParsingError> {
    if !stream.current_token().is_some_and(Token::is_start) {
        return Ok(());
    }
    let mut depth = 1usize;
    while depth > 0 {
        match stream.next_token()? {
            Some(token) if token.is_start() => depth += 1,
            Some(token) if token.is_end() => depth -= 1,
            Some(_) => {}
            None => return Err(unexpected_end(stream)),
        }
    }
    Ok(())
}

pub(crate) fn read_subtree_of<S: TokenStream + ?Sized>(
    stream: &mut S,
) -> Result<JsonValue, DocParsingError> {
    let Some(token) = stream.current_token() else {
        return Err(unexpected_end(stream));
    };
    match token {
        Token::StartObject => {
            let mut map = JsonMap::new();
            loop {
                match stream.next_token()? {
                    Some(Token::EndObject) => return Ok(JsonValue::Object(map)),
                    Some(Token::FieldName) => {
                        let name = stream.current_name().unwrap_or_default().to_string();
                        if stream.next_token()?.is_none() {
                            return Err(unexpected_end(stream));
                        }
                        let value = read_subtree_of(stream)?;
                        insert_merging_objects(&mut map, name, value);
                    }
                    Some(other) => {
                        return Err(DocParsingError::parse(
                            stream.location(),
                            format!("expected a field name but got {other}"),
                        ));
                    }
                    None => return Err(unexpected_end(stream)),
                }
            }
        }
        Token::StartArray => {
            let mut values = Vec::new();
            loop {
                match stream.next_token()? {
                    Some(Token::EndArray) => return Ok(JsonValue::Array(values)),
                    Some(_) => values.push(read_subtree_of(stream)?),
                    None => return Err(unexpected_end(stream)),
                }
            }
        }
        token if token.is_value() => Ok(stream.scalar_value().cloned().unwrap_or(JsonValue::Null)),
        other => Err(DocParsingError::parse(
            stream.location(),
            format!("expected a value but got {other}"),
        )),
    }
}

/// `{"a.b": 1, "a.c": 2}` read through the expander yields the name `a` twice.
fn insert_merging_objects(map: &mut JsonMap<String, JsonValue>, name: String, value: JsonValue) {
    match (map.get_mut(&name), value) {
        (Some(JsonValue::Object(existing)), JsonValue::Object(incoming)) => {
            for (child_name, child_value) in incoming {
                insert_merging_objects(existing, child_name, child_value);
            }
        }
        (_, value) => {
            map.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_read_subtree_merges_repeated_objects() {
        let mut map = JsonMap::new();
        insert_merging_objects(&mut map, "a".to_string(), json!({"b": 1}));
        insert_merging_objects(&mut map, "a".to_string(), json!({"c": 2}));
        insert_merging_objects(&mut map, "d".to_string(), json!(3));
        assert_eq!(JsonValue::Object(map), json!({"a": {"b": 1, "c": 2}, "d": 3}));
    }

    #[test]
    fn test_skip_children_on_scalar_is_noop() {
        let document = json!({"a": 1, "b": [1, [2]], "c": 3});
        let mut stream = JsonTokenStream::new(&document);
        assert_eq!(stream.next_token().unwrap(), Some(Token::StartObject));
        assert_eq!(stream.next_token().unwrap(), Some(Token::FieldName));
        assert_eq!(stream.next_token().unwrap(), Some(Token::Number));
        stream.skip_children().unwrap();
        assert_eq!(stream.current_token(), Some(Token::Number));
        assert_eq!(stream.next_token().unwrap(), Some(Token::FieldName));
        assert_eq!(stream.next_token().unwrap(), Some(Token::StartArray));
        stream.skip_children().unwrap();
        assert_eq!(stream.current_token(), Some(Token::EndArray));
        assert_eq!(stream.next_token().unwrap(), Some(Token::FieldName));
        assert_eq!(stream.current_name(), Some("c"));
    }
}
