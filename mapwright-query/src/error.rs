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

use thiserror::Error;

/// Errors raised while a field type builds a query.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum QueryError {
    /// The field cannot serve this kind of query.
    #[error("{reason}")]
    UnsupportedQuery { field: String, reason: String },
    /// The query needs per document script execution and the search context forbids it.
    #[error(
        "[{query_kind}] queries cannot be executed against runtime field [{field}] while \
         [search.allow_expensive_queries] is set to [false]."
    )]
    QueryNotAllowed { query_kind: String, field: String },
    /// The user supplied value cannot be interpreted by the field type.
    #[error("failed to create query on field [{field}]: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl QueryError {
    pub fn not_searchable(field: &str) -> QueryError {
        QueryError::UnsupportedQuery {
            field: field.to_string(),
            reason: format!(
                "Cannot search on field [{field}] since it is not indexed nor has doc values."
            ),
        }
    }

    pub fn not_indexed(field: &str) -> QueryError {
        QueryError::UnsupportedQuery {
            field: field.to_string(),
            reason: format!("Cannot search on field [{field}] since it is not indexed."),
        }
    }

    pub fn unsupported(field: &str, query_kind: &str, type_name: &str) -> QueryError {
        QueryError::UnsupportedQuery {
            field: field.to_string(),
            reason: format!(
                "Can only use {query_kind} queries on keyword and text fields - not on [{field}] \
                 which is of type [{type_name}]"
            ),
        }
    }

    pub fn text_only(field: &str, query_kind: &str, type_name: &str) -> QueryError {
        QueryError::UnsupportedQuery {
            field: field.to_string(),
            reason: format!(
                "Can only use {query_kind} queries on text fields - not on [{field}] which is of \
                 type [{type_name}]"
            ),
        }
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> QueryError {
        QueryError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_messages() {
        assert_eq!(
            QueryError::not_searchable("f").to_string(),
            "Cannot search on field [f] since it is not indexed nor has doc values."
        );
        assert_eq!(
            QueryError::unsupported("f", "fuzzy", "long").to_string(),
            "Can only use fuzzy queries on keyword and text fields - not on [f] which is of type \
             [long]"
        );
        assert_eq!(
            QueryError::text_only("k", "phrase", "keyword").to_string(),
            "Can only use phrase queries on text fields - not on [k] which is of type [keyword]"
        );
        assert_eq!(
            QueryError::QueryNotAllowed {
                query_kind: "term".to_string(),
                field: "r".to_string()
            }
            .to_string(),
            "[term] queries cannot be executed against runtime field [r] while \
             [search.allow_expensive_queries] is set to [false]."
        );
    }
}
