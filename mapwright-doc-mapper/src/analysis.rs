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

use once_cell::sync::Lazy;
use tantivy::tokenizer::{
    AsciiFoldingFilter, LowerCaser, RawTokenizer, RemoveLongFilter, SimpleTokenizer, TextAnalyzer,
    TokenStream as _, TokenizerManager, WhitespaceTokenizer,
};

use crate::document::TextToken;
use crate::MappingError;

/// Longer tokens are dropped by the text analyzers.
pub const DEFAULT_REMOVE_TOKEN_LENGTH: usize = 255;

pub const DEFAULT_ANALYZER: &str = "standard";

/// Named analyzers and normalizers available to text and keyword fields.
pub struct AnalyzerRegistry {
    analyzers: TokenizerManager,
    normalizers: TokenizerManager,
}

impl AnalyzerRegistry {
    fn new() -> AnalyzerRegistry {
        let analyzers = TokenizerManager::new();
        let standard = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(DEFAULT_REMOVE_TOKEN_LENGTH))
            .filter(LowerCaser)
            .build();
        analyzers.register(DEFAULT_ANALYZER, standard);
        analyzers.register(
            "simple",
            TextAnalyzer::builder(SimpleTokenizer::default())
                .filter(LowerCaser)
                .build(),
        );
        analyzers.register(
            "whitespace",
            TextAnalyzer::builder(WhitespaceTokenizer::default())
                .filter(RemoveLongFilter::limit(DEFAULT_REMOVE_TOKEN_LENGTH))
                .build(),
        );
        analyzers.register(
            "keyword",
            TextAnalyzer::builder(RawTokenizer::default()).build(),
        );
        analyzers.register(
            "folding",
            TextAnalyzer::builder(SimpleTokenizer::default())
                .filter(RemoveLongFilter::limit(DEFAULT_REMOVE_TOKEN_LENGTH))
                .filter(LowerCaser)
                .filter(AsciiFoldingFilter)
                .build(),
        );

        let normalizers = TokenizerManager::new();
        normalizers.register(
            "lowercase",
            TextAnalyzer::builder(RawTokenizer::default())
                .filter(LowerCaser)
                .build(),
        );
        normalizers.register(
            "asciifolding",
            TextAnalyzer::builder(RawTokenizer::default())
                .filter(AsciiFoldingFilter)
                .build(),
        );
        AnalyzerRegistry {
            analyzers,
            normalizers,
        }
    }

    pub fn validate_analyzer(&self, name: &str) -> Result<(), MappingError> {
        if self.analyzers.get(name).is_none() {
            return Err(MappingError::UnknownAnalyzer(name.to_string()));
        }
        Ok(())
    }

    pub fn validate_normalizer(&self, name: &str) -> Result<(), MappingError> {
        if self.normalizers.get(name).is_none() {
            return Err(MappingError::Invalid(format!(
                "normalizer [{name}] not found for field"
            )));
        }
        Ok(())
    }

    /// Tokenizes `text`. Unknown analyzers produce no tokens: names are validated when the
    /// mapping is built.
    pub fn analyze(&self, analyzer_name: &str, text: &str) -> Vec<TextToken> {
        let Some(mut analyzer) = self.analyzers.get(analyzer_name) else {
            return Vec::new();
        };
        let mut token_stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while token_stream.advance() {
            let token = token_stream.token();
            tokens.push(TextToken {
                text: token.text.clone(),
                position: token.position,
            });
        }
        tokens
    }

    /// Applies a keyword normalizer. Normalizers always emit a single token.
    pub fn normalize(&self, normalizer_name: &str, text: &str) -> String {
        let Some(mut normalizer) = self.normalizers.get(normalizer_name) else {
            return text.to_string();
        };
        let mut token_stream = normalizer.token_stream(text);
        let mut normalized = String::with_capacity(text.len());
        while token_stream.advance() {
            normalized.push_str(&token_stream.token().text);
        }
        normalized
    }
}

/// Returns the process wide analyzer registry.
pub fn get_analyzer_registry() -> &'static AnalyzerRegistry {
    static ANALYZER_REGISTRY: Lazy<AnalyzerRegistry> = Lazy::new(AnalyzerRegistry::new);
    &ANALYZER_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_analyzer() {
        let tokens = get_analyzer_registry().analyze("standard", "Quick brown-fox");
        let texts: Vec<&str> = tokens.iter().map(|token| token.text.as_str()).collect();
        assert_eq!(texts, ["quick", "brown", "fox"]);
        assert_eq!(tokens[2].position, 2);
    }

    #[test]
    fn test_keyword_analyzer_keeps_input() {
        let tokens = get_analyzer_registry().analyze("keyword", "Hello World");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "Hello World");
    }

    #[test]
    fn test_normalizers() {
        let registry = get_analyzer_registry();
        assert_eq!(registry.normalize("lowercase", "HeLLo"), "hello");
        assert_eq!(registry.normalize("asciifolding", "café"), "cafe");
        assert_eq!(registry.normalize("missing", "HeLLo"), "HeLLo");
    }

    #[test]
    fn test_unknown_analyzer() {
        let error = get_analyzer_registry()
            .validate_analyzer("klingon")
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "analyzer [klingon] has not been configured in mappings"
        );
        get_analyzer_registry().validate_analyzer("whitespace").unwrap();
        get_analyzer_registry().validate_normalizer("lowercase").unwrap();
    }
}
