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

use itertools::Itertools;
use thiserror::Error;

use crate::token_stream::TokenLocation;

/// Error raised while reading a mapping definition.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MappingError {
    #[error("No handler for type [{type_name}] declared on field [{field}]")]
    UnknownType { field: String, type_name: String },
    #[error("No handler for type [{type_name}] declared on runtime field [{field}]")]
    UnknownRuntimeType { field: String, type_name: String },
    #[error("Failed to parse mapping for field [{field}]: {reason}")]
    InvalidDefinition { field: String, reason: String },
    #[error("{0}")]
    InvalidName(String),
    #[error("dynamic template [{name}] has invalid content [{reason}]")]
    InvalidDynamicTemplate { name: String, reason: String },
    #[error("Dynamic template syntax error. An array of named objects is expected.")]
    DynamicTemplateSyntax,
    #[error("analyzer [{0}] has not been configured in mappings")]
    UnknownAnalyzer(String),
    #[error("{0}")]
    Invalid(String),
}

impl MappingError {
    pub(crate) fn invalid_definition(field: &str, reason: impl ToString) -> MappingError {
        MappingError::InvalidDefinition {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A mapping ceiling from `mapping.*.limit` was exceeded.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum LimitError {
    #[error("Limit of total fields [{limit}] has been exceeded")]
    TotalFields { limit: u64 },
    #[error("Limit of mapping depth [{limit}] has been exceeded due to object field [{path}]")]
    Depth { limit: u64, path: String },
    #[error("Field name [{name}] is longer than the limit of [{limit}] characters")]
    FieldNameLength { limit: u64, name: String },
    #[error("Limit of nested fields [{limit}] has been exceeded")]
    NestedFields { limit: u64 },
}

/// Two mappings cannot be reconciled.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MergeError {
    /// Every illegal parameter transition of one field, reported at once.
    #[error(
        "Mapper for [{field}] conflicts with existing mapper:\n\t{}",
        conflicts.iter().join("\n\t")
    )]
    Conflict {
        field: String,
        conflicts: Vec<String>,
    },
    #[error("mapper [{field}] cannot be changed from type [{existing}] to [{incoming}]")]
    TypeConflict {
        field: String,
        existing: String,
        incoming: String,
    },
    #[error("can't merge a non object mapping [{field}] with an object mapping")]
    KindConflict { field: String },
    #[error("{0}")]
    ObjectConflict(String),
    #[error(transparent)]
    LimitExceeded(#[from] LimitError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Error raised while parsing a single document. It never affects other documents.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocParsingError {
    #[error("failed to parse field [{field}] of type [{field_type}]: {reason}")]
    Malformed {
        field: String,
        field_type: String,
        reason: String,
    },
    #[error(
        "mapping set to strict, dynamic introduction of [{field}] within [{path}] is not allowed"
    )]
    StrictDynamicMapping { path: String, field: String },
    #[error("Error executing script on field [{field}]: {reason}")]
    Script { field: String, reason: String },
    #[error("failed to parse [{location}]: {reason}")]
    Parse {
        location: TokenLocation,
        reason: String,
    },
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("failed to build the dynamic mapping update: {0}")]
    DynamicUpdate(#[from] MergeError),
    #[error("routing is required for [{id}]")]
    RoutingMissing { id: String },
    #[error(
        "The number of nested documents has exceeded the allowed limit of [{limit}]. This limit \
         can be set by changing the [index.mapping.nested_objects.limit] index level setting."
    )]
    NestedObjectsLimit { limit: u64 },
    #[error("the document exceeds the maximum object depth of [{limit}]")]
    DepthLimit { limit: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

impl DocParsingError {
    pub(crate) fn parse(location: TokenLocation, reason: impl Into<String>) -> DocParsingError {
        DocParsingError::Parse {
            location,
            reason: reason.into(),
        }
    }

    /// Attaches a token location to errors raised before the location was known.
    pub(crate) fn with_location(self, location: TokenLocation) -> DocParsingError {
        match self {
            DocParsingError::Parse { reason, .. } => DocParsingError::Parse { location, reason },
            other => other,
        }
    }
}

/// Errors surfaced by [`crate::MapperService`].
#[derive(Error, Debug)]
pub enum MapperServiceError {
    #[error("failed to parse mapping: {0}")]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    DocParsing(#[from] DocParsingError),
}

impl From<LimitError> for MapperServiceError {
    fn from(error: LimitError) -> Self {
        MapperServiceError::Merge(MergeError::LimitExceeded(error))
    }
}
