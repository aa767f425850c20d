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

use std::collections::VecDeque;

use serde_json::Value as JsonValue;

use super::{
    read_subtree_of, skip_children_of, split_and_validate_path, Token, TokenLocation, TokenStream,
};
use crate::DocParsingError;

/// How field names are expanded inside the object the parser is currently reading.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExpansionScope {
    /// The object does not hold sub-objects: dotted names are kept whole.
    pub flat: bool,
    /// Paths, relative to the object, of descendants that do not hold sub-objects.
    pub flat_paths: Vec<String>,
}

#[derive(Debug)]
struct PendingClose {
    depth: usize,
    count: usize,
}

/// Wraps a token stream so that `{"a.b.c": v}` reads as `{"a": {"b": {"c": v}}}`.
///
/// Synthetic tokens report the location of the dotted field name they were derived from.
pub struct DotExpandingTokenStream<S> {
    inner: S,
    queue: VecDeque<(Token, Option<String>)>,
    current_token: Option<Token>,
    synthetic: bool,
    synthetic_name: Option<String>,
    // Number of containers currently open in the inner stream.
    depth: usize,
    closers: Vec<PendingClose>,
    expanded_name: Option<String>,
    scopes: Vec<ExpansionScope>,
    expansion_disabled: bool,
}

impl<S: TokenStream> DotExpandingTokenStream<S> {
    pub fn new(inner: S) -> DotExpandingTokenStream<S> {
        DotExpandingTokenStream {
            inner,
            queue: VecDeque::new(),
            current_token: None,
            synthetic: false,
            synthetic_name: None,
            depth: 0,
            closers: Vec::new(),
            expanded_name: None,
            scopes: Vec::new(),
            expansion_disabled: false,
        }
    }

    /// Declares the expansion rules of the object whose content is about to be read.
    pub fn push_scope(&mut self, scope: ExpansionScope) {
        self.scopes.push(scope);
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn collapse_for_scope(&self, parts: Vec<String>) -> Vec<String> {
        let Some(scope) = self.scopes.last() else {
            return parts;
        };
        if scope.flat {
            return vec![parts.join(".")];
        }
        for split in 1..parts.len() {
            let prefix = parts[..split].join(".");
            if scope.flat_paths.iter().any(|flat_path| *flat_path == prefix) {
                let mut collapsed = parts[..split].to_vec();
                collapsed.push(parts[split..].join("."));
                return collapsed;
            }
        }
        parts
    }

    fn expand_field_name(&mut self) -> Result<(), DocParsingError> {
        let Some(name) = self.inner.current_name() else {
            return Ok(());
        };
        if !name.contains('.') {
            return Ok(());
        }
        let name = name.to_string();
        let parts = split_and_validate_path(&name)
            .map_err(|error| error.with_location(self.inner.location()))?;
        let mut parts = self.collapse_for_scope(parts).into_iter();
        let (Some(first), true) = (parts.next(), parts.len() > 0) else {
            return Ok(());
        };
        let num_objects = parts.len();
        for part in parts {
            self.queue.push_back((Token::StartObject, None));
            self.queue.push_back((Token::FieldName, Some(part)));
        }
        self.closers.push(PendingClose {
            depth: self.depth,
            count: num_objects,
        });
        self.synthetic = true;
        self.synthetic_name = Some(first);
        self.expanded_name = Some(name);
        Ok(())
    }

    fn with_expansion_disabled<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, DocParsingError>,
    ) -> Result<T, DocParsingError> {
        let previous = std::mem::replace(&mut self.expansion_disabled, true);
        let result = read(self);
        self.expansion_disabled = previous;
        result
    }
}

impl<S: TokenStream> TokenStream for DotExpandingTokenStream<S> {
    fn next_token(&mut self) -> Result<Option<Token>, DocParsingError> {
        if let Some((token, name)) = self.queue.pop_front() {
            self.synthetic = true;
            self.synthetic_name = name;
            self.current_token = Some(token);
            return Ok(Some(token));
        }
        self.synthetic = false;
        self.synthetic_name = None;
        let Some(token) = self.inner.next_token()? else {
            self.current_token = None;
            if !self.closers.is_empty() {
                return Err(DocParsingError::parse(
                    self.inner.location(),
                    "unexpected end of document",
                ));
            }
            return Ok(None);
        };
        self.current_token = Some(token);
        if let Some(expanded_name) = self.expanded_name.take() {
            if token.is_end() || token == Token::FieldName {
                return Err(DocParsingError::parse(
                    self.inner.location(),
                    format!("field [{expanded_name}] has no value, found {token}"),
                ));
            }
        }
        match token {
            Token::StartObject | Token::StartArray => self.depth += 1,
            Token::EndObject | Token::EndArray => self.depth = self.depth.saturating_sub(1),
            Token::FieldName if !self.expansion_disabled => self.expand_field_name()?,
            _ => {}
        }
        let closes_value = token.is_value() || token.is_end();
        if closes_value
            && self
                .closers
                .last()
                .is_some_and(|closer| closer.depth == self.depth)
        {
            if let Some(closer) = self.closers.pop() {
                for _ in 0..closer.count {
                    self.queue.push_back((Token::EndObject, None));
                }
            }
        }
        Ok(Some(token))
    }

    fn current_token(&self) -> Option<Token> {
        self.current_token
    }

    fn current_name(&self) -> Option<&str> {
        if self.synthetic {
            self.synthetic_name.as_deref()
        } else {
            self.inner.current_name()
        }
    }

    fn scalar_value(&self) -> Option<&JsonValue> {
        if self.synthetic {
            None
        } else {
            self.inner.scalar_value()
        }
    }

    fn location(&self) -> TokenLocation {
        self.inner.location()
    }

    fn skip_children(&mut self) -> Result<(), DocParsingError> {
        self.with_expansion_disabled(|stream| skip_children_of(stream))
    }

    fn read_subtree(&mut self) -> Result<JsonValue, DocParsingError> {
        self.with_expansion_disabled(|stream| read_subtree_of(stream))
    }
}
