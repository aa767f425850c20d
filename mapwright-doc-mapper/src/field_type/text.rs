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

use mapwright_query::{Query, QueryError, TermValue};
use serde_json::Value as JsonValue;

use super::{scalar_to_string, FieldType, FieldTypeKind, LeafContext, TextSearchInfo};
use crate::analysis::{get_analyzer_registry, DEFAULT_ANALYZER};
use crate::document::{FieldValue, TextToken};
use crate::mapper::field_params::{IndexOptions, IndexPrefixes, TermVector, TextParams};
use crate::MappingError;

pub const INDEX_PHRASE_SUFFIX: &str = "._index_phrase";
pub const INDEX_PREFIX_SUFFIX: &str = "._index_prefix";

/// Gap inserted between the positions of two values of the same field.
pub const POSITION_INCREMENT_GAP_DEFAULT: u32 = 100;

const MAX_PREFIX_CHARS: u32 = 20;

/// Similarities a text field can score with.
pub const SIMILARITIES: [&str; 2] = ["BM25", "boolean"];

pub const DEFAULT_SIMILARITY: &str = "BM25";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TextKind {
    pub analyzer: String,
    pub search_analyzer: String,
    pub index_phrases: bool,
    pub index_prefixes: Option<IndexPrefixes>,
    pub fielddata: bool,
    pub index_options: IndexOptions,
    pub position_increment_gap: u32,
    pub term_vector: TermVector,
    pub similarity: String,
}

impl TextKind {
    pub fn has_positions(&self) -> bool {
        self.index_options >= IndexOptions::Positions
    }

    /// Prefix queries whose length is covered by the edge n-grams become term queries.
    pub(crate) fn index_prefix_query(
        &self,
        field_type: &FieldType,
        prefix: &str,
        case_insensitive: bool,
    ) -> Option<Query> {
        let index_prefixes = self.index_prefixes?;
        let num_chars = prefix.chars().count() as u32;
        if case_insensitive
            || num_chars < index_prefixes.min_chars
            || num_chars > index_prefixes.max_chars
        {
            return None;
        }
        Some(Query::Term {
            field: format!("{}{INDEX_PREFIX_SUFFIX}", field_type.name),
            term: TermValue::from(prefix),
        })
    }

    pub(crate) fn phrase_query(
        &self,
        field_type: &FieldType,
        text: &str,
    ) -> Result<Query, QueryError> {
        if !field_type.is_indexed {
            return Err(QueryError::not_indexed(&field_type.name));
        }
        let mut tokens = get_analyzer_registry().analyze(&self.search_analyzer, text);
        if tokens.is_empty() {
            return Ok(Query::match_none(format!(
                "the analyzer removed every token of [{text}]"
            )));
        }
        if tokens.len() == 1 {
            let token = tokens.remove(0);
            return Ok(Query::Term {
                field: field_type.name.clone(),
                term: TermValue::Text(token.text),
            });
        }
        if !self.has_positions() {
            return Err(QueryError::UnsupportedQuery {
                field: field_type.name.clone(),
                reason: format!(
                    "field:[{}] was indexed without position data; cannot run PhraseQuery \
                     (phrase={text})",
                    field_type.name
                ),
            });
        }
        if self.index_phrases && tokens.len() == 2 && tokens[1].position == tokens[0].position + 1
        {
            return Ok(Query::Term {
                field: format!("{}{INDEX_PHRASE_SUFFIX}", field_type.name),
                term: TermValue::Text(format!("{} {}", tokens[0].text, tokens[1].text)),
            });
        }
        let first_position = tokens[0].position;
        Ok(Query::Phrase {
            field: field_type.name.clone(),
            terms: tokens
                .into_iter()
                .map(|token| (token.position - first_position, token.text))
                .collect(),
        })
    }
}

pub(crate) fn build(name: &str, params: &TextParams) -> Result<FieldType, MappingError> {
    let registry = get_analyzer_registry();
    let analyzer = params
        .analyzer
        .clone()
        .unwrap_or_else(|| DEFAULT_ANALYZER.to_string());
    registry
        .validate_analyzer(&analyzer)
        .map_err(|error| MappingError::invalid_definition(name, error))?;
    let search_analyzer = params
        .search_analyzer
        .clone()
        .unwrap_or_else(|| analyzer.clone());
    registry
        .validate_analyzer(&search_analyzer)
        .map_err(|error| MappingError::invalid_definition(name, error))?;
    let has_positions = params.index_options >= IndexOptions::Positions;
    if let Some(index_prefixes) = &params.index_prefixes {
        if index_prefixes.min_chars > index_prefixes.max_chars {
            return Err(MappingError::invalid_definition(
                name,
                format!(
                    "min_chars [{}] must be less than max_chars [{}]",
                    index_prefixes.min_chars, index_prefixes.max_chars
                ),
            ));
        }
        if index_prefixes.min_chars < 1 {
            return Err(MappingError::invalid_definition(
                name,
                format!(
                    "min_chars [{}] must be greater than zero",
                    index_prefixes.min_chars
                ),
            ));
        }
        if index_prefixes.max_chars >= MAX_PREFIX_CHARS {
            return Err(MappingError::invalid_definition(
                name,
                format!(
                    "max_chars [{}] must be less than {MAX_PREFIX_CHARS}",
                    index_prefixes.max_chars
                ),
            ));
        }
        if !params.index {
            return Err(MappingError::invalid_definition(
                name,
                format!("Cannot set index_prefixes on unindexed field [{name}]"),
            ));
        }
    }
    if params.index_phrases {
        if !params.index {
            return Err(MappingError::invalid_definition(
                name,
                format!("Cannot set index_phrases on unindexed field [{name}]"),
            ));
        }
        if !has_positions {
            return Err(MappingError::invalid_definition(
                name,
                format!("Cannot set index_phrases on field [{name}] if positions are not enabled"),
            ));
        }
    }
    let similarity = params
        .similarity
        .clone()
        .unwrap_or_else(|| DEFAULT_SIMILARITY.to_string());
    if !SIMILARITIES.contains(&similarity.as_str()) {
        return Err(MappingError::invalid_definition(
            name,
            format!("Unknown Similarity type [{similarity}] for field [{name}]"),
        ));
    }
    if params.term_vector != TermVector::No && !params.index {
        return Err(MappingError::invalid_definition(
            name,
            format!("Cannot set term_vector on unindexed field [{name}]"),
        ));
    }
    if params.position_increment_gap.is_some() && !has_positions {
        return Err(MappingError::invalid_definition(
            name,
            format!(
                "Cannot set position_increment_gap on field [{name}] without positions enabled"
            ),
        ));
    }
    Ok(FieldType {
        name: name.to_string(),
        is_indexed: params.index,
        is_stored: params.store,
        has_doc_values: false,
        text_search_info: TextSearchInfo {
            tokenized: true,
            has_positions,
            search_analyzer: Some(search_analyzer.clone()),
        },
        meta: params.meta.clone(),
        kind: FieldTypeKind::Text(TextKind {
            analyzer,
            search_analyzer,
            index_phrases: params.index_phrases,
            index_prefixes: params.index_prefixes,
            fielddata: params.fielddata,
            index_options: params.index_options,
            position_increment_gap: params
                .position_increment_gap
                .unwrap_or(POSITION_INCREMENT_GAP_DEFAULT),
            term_vector: params.term_vector,
            similarity,
        }),
    })
}

fn edge_ngrams(token: &str, index_prefixes: IndexPrefixes) -> impl Iterator<Item = String> + '_ {
    let min_chars = index_prefixes.min_chars as usize;
    let max_chars = index_prefixes.max_chars as usize;
    token
        .char_indices()
        .map(|(offset, ch)| offset + ch.len_utf8())
        .enumerate()
        .filter(move |(index, _)| *index + 1 >= min_chars && *index < max_chars)
        .map(|(_, end)| token[..end].to_string())
}

pub(crate) fn index_value(
    field_type: &FieldType,
    value: &JsonValue,
    ctx: &mut LeafContext,
) -> Result<(), String> {
    let FieldTypeKind::Text(text_kind) = &field_type.kind else {
        return Err(format!("field [{}] is not a text field", field_type.name));
    };
    let text = scalar_to_string(value)?;
    if field_type.is_indexed {
        let first_position = ctx
            .doc()
            .next_position(&field_type.name, text_kind.position_increment_gap as usize);
        let tokens: Vec<TextToken> = get_analyzer_registry()
            .analyze(&text_kind.analyzer, &text)
            .into_iter()
            .map(|token| TextToken {
                text: token.text,
                position: token.position + first_position,
            })
            .collect();
        if text_kind.index_phrases {
            let phrase_field = format!("{}{INDEX_PHRASE_SUFFIX}", field_type.name);
            for pair in tokens.windows(2) {
                if pair[1].position == pair[0].position + 1 {
                    ctx.add(
                        &phrase_field,
                        FieldValue::Term(TermValue::Text(format!(
                            "{} {}",
                            pair[0].text, pair[1].text
                        ))),
                    );
                }
            }
        }
        if let Some(index_prefixes) = &text_kind.index_prefixes {
            let prefix_field = format!("{}{INDEX_PREFIX_SUFFIX}", field_type.name);
            for token in &tokens {
                for prefix in edge_ngrams(&token.text, *index_prefixes) {
                    ctx.add(&prefix_field, FieldValue::Term(TermValue::Text(prefix)));
                }
            }
        }
        if !tokens.is_empty() {
            ctx.add(&field_type.name, FieldValue::Text(tokens));
        }
    }
    if field_type.is_stored {
        ctx.add(
            &field_type.name,
            FieldValue::Stored(JsonValue::String(text.into_owned())),
        );
    }
    Ok(())
}
