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

//! Queries produced by mapwright field types.
//!
//! Field types translate user supplied values ([`JsonLiteral`]) into [`Query`] values that the
//! query execution engine consumes. The execution engine itself lives outside of this workspace.

mod error;
mod json_literal;
mod query;
mod search_context;

pub use error::QueryError;
pub use json_literal::{InterpretUserInput, JsonLiteral};
pub use query::{PointValue, Query, ScriptPredicate, TermValue};
pub use search_context::SearchExecutionContext;
