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

#![deny(clippy::disallowed_methods)]

//! Index mappings: how JSON documents are turned into indexable fields, how new fields are
//! discovered while parsing, and how mapping changes are merged and published.

mod analysis;
mod document;
mod document_mapper;
mod error;
pub mod field_type;
pub mod lookup;
pub mod mapper;
mod mapper_service;
mod mapping;
mod parser;
pub mod token_stream;

pub use analysis::{get_analyzer_registry, AnalyzerRegistry, DEFAULT_ANALYZER};
pub use document::{
    FieldValue, IndexDocument, IndexableField, ParsedDocument, SharedLong, SourceToParse,
    TextToken, UNASSIGNED_SEQ_NO, UNSET_VERSION,
};
pub use document_mapper::DocumentMapper;
pub use error::{DocParsingError, LimitError, MapperServiceError, MappingError, MergeError};
pub use lookup::{FieldTypeLookup, MappingLookup};
pub use mapper::{MappingParserContext, MergeReason};
pub use mapper_service::MapperService;
pub use mapping::{Mapping, DOC_TYPE};
pub use parser::DocumentParser;
