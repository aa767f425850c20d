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

use super::{FieldType, FieldTypeKind, NumberType, TextSearchInfo};

/// The fields every document carries, next to the ones declared in the mapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum MetadataKind {
    Id,
    Source,
    Routing,
    Ignored,
    Version,
    SeqNo,
    NestedPath,
}

impl MetadataKind {
    pub const ALL: [MetadataKind; 7] = [
        MetadataKind::Id,
        MetadataKind::Source,
        MetadataKind::Routing,
        MetadataKind::Ignored,
        MetadataKind::Version,
        MetadataKind::SeqNo,
        MetadataKind::NestedPath,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetadataKind::Id => "_id",
            MetadataKind::Source => "_source",
            MetadataKind::Routing => "_routing",
            MetadataKind::Ignored => "_ignored",
            MetadataKind::Version => "_version",
            MetadataKind::SeqNo => "_seq_no",
            MetadataKind::NestedPath => "_nested_path",
        }
    }

    pub fn from_name(name: &str) -> Option<MetadataKind> {
        MetadataKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
    }

    /// Whether the field can be configured in the mapping, e.g. `"_source": {"enabled": false}`.
    pub fn is_configurable(self) -> bool {
        matches!(self, MetadataKind::Source | MetadataKind::Routing)
    }

    pub(crate) fn is_term_based(self) -> bool {
        matches!(
            self,
            MetadataKind::Id
                | MetadataKind::Routing
                | MetadataKind::Ignored
                | MetadataKind::NestedPath
        )
    }

    pub(crate) fn number_type(self) -> Option<NumberType> {
        match self {
            MetadataKind::Version | MetadataKind::SeqNo => Some(NumberType::Long),
            _ => None,
        }
    }

    pub fn field_type(self) -> FieldType {
        let (is_indexed, is_stored, has_doc_values) = match self {
            MetadataKind::Id | MetadataKind::Routing => (true, true, false),
            MetadataKind::Source => (false, true, false),
            MetadataKind::Ignored | MetadataKind::NestedPath => (true, false, false),
            MetadataKind::Version => (false, false, true),
            MetadataKind::SeqNo => (true, false, true),
        };
        FieldType {
            name: self.name().to_string(),
            is_indexed,
            is_stored,
            has_doc_values,
            text_search_info: if self.is_term_based() {
                TextSearchInfo::keyword(None)
            } else {
                TextSearchInfo::none()
            },
            meta: Default::default(),
            kind: FieldTypeKind::Metadata(self),
        }
    }
}
