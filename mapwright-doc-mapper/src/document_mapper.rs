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

use std::sync::Arc;

use crate::lookup::MappingLookup;
use crate::parser::DocumentParser;
use crate::{DocParsingError, Mapping, ParsedDocument, SourceToParse};

/// One published version of an index mapping, with the lookup and the parser documents are
/// indexed with.
#[derive(Debug)]
pub struct DocumentMapper {
    lookup: Arc<MappingLookup>,
    parser: Arc<DocumentParser>,
    version: u64,
}

impl DocumentMapper {
    pub(crate) fn new(
        lookup: MappingLookup,
        parser: Arc<DocumentParser>,
        version: u64,
    ) -> DocumentMapper {
        DocumentMapper {
            lookup: Arc::new(lookup),
            parser,
            version,
        }
    }

    pub fn mapping(&self) -> &Arc<Mapping> {
        self.lookup.mapping()
    }

    pub fn lookup(&self) -> &Arc<MappingLookup> {
        &self.lookup
    }

    /// Incremented every time a new mapping is published.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn parse(&self, source: SourceToParse) -> Result<ParsedDocument, DocParsingError> {
        self.parser.parse(&self.lookup, source)
    }
}
