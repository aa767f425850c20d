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

use crate::QueryError;

/// Per search settings consulted by field types while they build queries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SearchExecutionContext {
    allow_expensive_queries: bool,
}

impl Default for SearchExecutionContext {
    fn default() -> Self {
        SearchExecutionContext {
            allow_expensive_queries: true,
        }
    }
}

impl SearchExecutionContext {
    pub fn new(allow_expensive_queries: bool) -> Self {
        SearchExecutionContext {
            allow_expensive_queries,
        }
    }

    pub fn allow_expensive_queries(&self) -> bool {
        self.allow_expensive_queries
    }

    /// Fails if queries running a script on every document are disabled.
    pub fn check_expensive_query_allowed(
        &self,
        query_kind: &str,
        field: &str,
    ) -> Result<(), QueryError> {
        if self.allow_expensive_queries {
            return Ok(());
        }
        Err(QueryError::QueryNotAllowed {
            query_kind: query_kind.to_string(),
            field: field.to_string(),
        })
    }
}
