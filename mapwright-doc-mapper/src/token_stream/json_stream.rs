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

use std::fmt::Write;

use serde_json::Value as JsonValue;

use super::{Token, TokenLocation, TokenStream};
use crate::DocParsingError;

enum Frame<'a> {
    Object {
        entries: serde_json::map::Iter<'a>,
        key: Option<&'a str>,
        pending: Option<&'a JsonValue>,
    },
    Array {
        elements: std::slice::Iter<'a, JsonValue>,
        index: Option<usize>,
    },
}

enum Step<'a> {
    Enter(&'a JsonValue),
    Emit(Token),
    Pop(Token),
}

/// Token stream over an already parsed JSON document.
///
/// Nesting is bounded by `serde_json`'s recursion limit, which is why the default
/// [`TokenStream::read_subtree`] may recurse.
pub struct JsonTokenStream<'a> {
    root: Option<&'a JsonValue>,
    frames: Vec<Frame<'a>>,
    current_token: Option<Token>,
    current_value: Option<&'a JsonValue>,
    ordinal: u64,
}

impl<'a> JsonTokenStream<'a> {
    pub fn new(document: &'a JsonValue) -> JsonTokenStream<'a> {
        JsonTokenStream {
            root: Some(document),
            frames: Vec::new(),
            current_token: None,
            current_value: None,
            ordinal: 0,
        }
    }

    fn enter(&mut self, value: &'a JsonValue) -> Token {
        self.current_value = None;
        match value {
            JsonValue::Object(map) => {
                self.frames.push(Frame::Object {
                    entries: map.iter(),
                    key: None,
                    pending: None,
                });
                Token::StartObject
            }
            JsonValue::Array(elements) => {
                self.frames.push(Frame::Array {
                    elements: elements.iter(),
                    index: None,
                });
                Token::StartArray
            }
            scalar => {
                self.current_value = Some(scalar);
                match scalar {
                    JsonValue::String(_) => Token::String,
                    JsonValue::Number(_) => Token::Number,
                    JsonValue::Bool(_) => Token::Boolean,
                    _ => Token::Null,
                }
            }
        }
    }
}

impl TokenStream for JsonTokenStream<'_> {
    fn next_token(&mut self) -> Result<Option<Token>, DocParsingError> {
        let step = if let Some(root) = self.root.take() {
            Step::Enter(root)
        } else {
            match self.frames.last_mut() {
                None => {
                    self.current_token = None;
                    self.current_value = None;
                    return Ok(None);
                }
                Some(Frame::Object {
                    entries,
                    key,
                    pending,
                }) => {
                    if let Some(value) = pending.take() {
                        Step::Enter(value)
                    } else if let Some((name, value)) = entries.next() {
                        *key = Some(name.as_str());
                        *pending = Some(value);
                        Step::Emit(Token::FieldName)
                    } else {
                        Step::Pop(Token::EndObject)
                    }
                }
                Some(Frame::Array { elements, index }) => match elements.next() {
                    Some(value) => {
                        *index = Some(index.map_or(0, |index| index + 1));
                        Step::Enter(value)
                    }
                    None => Step::Pop(Token::EndArray),
                },
            }
        };
        let token = match step {
            Step::Enter(value) => self.enter(value),
            Step::Emit(token) => {
                self.current_value = None;
                token
            }
            Step::Pop(token) => {
                self.frames.pop();
                self.current_value = None;
                token
            }
        };
        self.ordinal += 1;
        self.current_token = Some(token);
        Ok(Some(token))
    }

    fn current_token(&self) -> Option<Token> {
        self.current_token
    }

    fn current_name(&self) -> Option<&str> {
        match self.frames.last() {
            Some(Frame::Object { key, .. }) => *key,
            _ => None,
        }
    }

    fn scalar_value(&self) -> Option<&JsonValue> {
        self.current_value
    }

    fn location(&self) -> TokenLocation {
        let mut pointer = String::new();
        for frame in &self.frames {
            match frame {
                Frame::Object { key: Some(key), .. } => {
                    pointer.push('/');
                    pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
                }
                Frame::Array {
                    index: Some(index), ..
                } => {
                    let _ = write!(pointer, "/{index}");
                }
                _ => {}
            }
        }
        TokenLocation {
            ordinal: self.ordinal,
            pointer,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn collect_tokens(document: &JsonValue) -> Vec<(Token, Option<String>)> {
        let mut stream = JsonTokenStream::new(document);
        let mut tokens = Vec::new();
        while let Some(token) = stream.next_token().unwrap() {
            let name = if token == Token::FieldName {
                stream.current_name().map(str::to_string)
            } else {
                None
            };
            tokens.push((token, name));
        }
        tokens
    }

    #[test]
    fn test_json_token_stream_tokens() {
        let document = json!({"a": {"b": [1, "x", null]}, "c": true});
        let tokens = collect_tokens(&document);
        assert_eq!(
            tokens,
            vec![
                (Token::StartObject, None),
                (Token::FieldName, Some("a".to_string())),
                (Token::StartObject, None),
                (Token::FieldName, Some("b".to_string())),
                (Token::StartArray, None),
                (Token::Number, None),
                (Token::String, None),
                (Token::Null, None),
                (Token::EndArray, None),
                (Token::EndObject, None),
                (Token::FieldName, Some("c".to_string())),
                (Token::Boolean, None),
                (Token::EndObject, None),
            ]
        );
    }

    #[test]
    fn test_json_token_stream_location() {
        let document = json!({"a/b": [10, {"c": 1}]});
        let mut stream = JsonTokenStream::new(&document);
        for _ in 0..6 {
            stream.next_token().unwrap();
        }
        assert_eq!(stream.current_token(), Some(Token::FieldName));
        let location = stream.location();
        assert_eq!(location.ordinal, 6);
        assert_eq!(location.pointer, "/a~1b/1/c");
        stream.next_token().unwrap();
        assert_eq!(stream.scalar_value(), Some(&json!(1)));
        assert_eq!(stream.current_name(), Some("c"));
    }

    #[test]
    fn test_json_token_stream_read_subtree() {
        let document = json!({"a": {"b": [1, {"c": "d"}]}, "e": 2});
        let mut stream = JsonTokenStream::new(&document);
        stream.next_token().unwrap();
        stream.next_token().unwrap();
        stream.next_token().unwrap();
        let subtree = stream.read_subtree().unwrap();
        assert_eq!(subtree, json!({"b": [1, {"c": "d"}]}));
        assert_eq!(stream.current_token(), Some(Token::EndObject));
        assert_eq!(stream.next_token().unwrap(), Some(Token::FieldName));
        assert_eq!(stream.current_name(), Some("e"));
    }
}
