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

use crate::token_stream::TokenLocation;
use crate::DocParsingError;

fn path_error(reason: String) -> DocParsingError {
    DocParsingError::parse(TokenLocation::default(), reason)
}

/// Splits a field name on dots, rejecting names whose object resolution would be ambiguous.
///
/// The returned error carries no location: callers attach it with
/// [`DocParsingError::with_location`].
pub fn split_and_validate_path(full_path: &str) -> Result<Vec<String>, DocParsingError> {
    if full_path.is_empty() {
        return Err(path_error("field name cannot be an empty string".to_string()));
    }
    if !full_path.contains('.') {
        return Ok(vec![full_path.to_string()]);
    }
    if full_path.chars().all(|character| character == '.') {
        return Err(path_error("field name cannot contain only dots".to_string()));
    }
    if full_path.starts_with('.') || full_path.ends_with('.') {
        return Err(path_error(format!(
            "object field starting or ending with a [.] makes object resolution ambiguous: \
             [{full_path}]"
        )));
    }
    let mut parts = Vec::new();
    for part in full_path.split('.') {
        if part.trim().is_empty() {
            return Err(path_error(format!(
                "object field cannot contain only whitespace: ['{full_path}']"
            )));
        }
        parts.push(part.to_string());
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(path: &str) -> String {
        match split_and_validate_path(path).unwrap_err() {
            DocParsingError::Parse { reason, .. } => reason,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_split_and_validate_path() {
        assert_eq!(split_and_validate_path("a").unwrap(), vec!["a"]);
        assert_eq!(split_and_validate_path("a.b.c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(split_and_validate_path(" a .b").unwrap(), vec![" a ", "b"]);
        assert_eq!(reason(""), "field name cannot be an empty string");
        assert_eq!(reason("..."), "field name cannot contain only dots");
        assert_eq!(
            reason(".a"),
            "object field starting or ending with a [.] makes object resolution ambiguous: [.a]"
        );
        assert_eq!(
            reason("a."),
            "object field starting or ending with a [.] makes object resolution ambiguous: [a.]"
        );
        assert_eq!(
            reason("a..b"),
            "object field cannot contain only whitespace: ['a..b']"
        );
        assert_eq!(
            reason("a. .b"),
            "object field cannot contain only whitespace: ['a. .b']"
        );
    }
}
