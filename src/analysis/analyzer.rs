//! Analyzer pipelines and the analyzer registry.

use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;

use crate::analysis::filter::{LowercaseFilter, StopFilter, TokenFilter};
use crate::analysis::token::TokenStream;
use crate::analysis::tokenizer::{KeywordTokenizer, Tokenizer, UnicodeWordTokenizer};
use crate::error::{Result, SalixError};

/// Turns field text into a token stream.
pub trait Analyzer: Send + Sync + Debug {
    /// Analyze `text`.
    fn analyze<'a>(&self, text: &'a str) -> Box<dyn TokenStream + 'a>;
}

/// A tokenizer followed by a chain of filters.
#[derive(Debug, Clone)]
pub struct PipelineAnalyzer {
    tokenizer: Arc<dyn Tokenizer>,
    filters: Vec<Arc<dyn TokenFilter>>,
}

impl PipelineAnalyzer {
    /// Create a pipeline from a tokenizer.
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        PipelineAnalyzer {
            tokenizer,
            filters: Vec::new(),
        }
    }

    /// Append a filter to the pipeline.
    pub fn with_filter(mut self, filter: Arc<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// The standard analyzer: Unicode words, lowercased, English stop words
    /// removed.
    pub fn standard() -> Self {
        PipelineAnalyzer::new(Arc::new(UnicodeWordTokenizer))
            .with_filter(Arc::new(LowercaseFilter))
            .with_filter(Arc::new(StopFilter::english()))
    }

    /// Unicode words, lowercased, no stop list.
    pub fn simple() -> Self {
        PipelineAnalyzer::new(Arc::new(UnicodeWordTokenizer)).with_filter(Arc::new(LowercaseFilter))
    }

    /// The whole input as one token, unchanged. For identifiers.
    pub fn keyword() -> Self {
        PipelineAnalyzer::new(Arc::new(KeywordTokenizer))
    }
}

impl Analyzer for PipelineAnalyzer {
    fn analyze<'a>(&self, text: &'a str) -> Box<dyn TokenStream + 'a> {
        let mut stream = self.tokenizer.tokenize(text);
        for filter in &self.filters {
            stream = filter.apply(stream);
        }
        stream
    }
}

/// Maps analyzer names (as stored in the schema) to analyzer instances.
///
/// A registry is passed to writers and searchers explicitly; there is no
/// process-wide analyzer cache.
#[derive(Debug, Clone)]
pub struct AnalyzerRegistry {
    analyzers: AHashMap<String, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    /// A registry with the built-in analyzers: `standard`, `simple`,
    /// `keyword`.
    pub fn with_defaults() -> Self {
        let mut registry = AnalyzerRegistry {
            analyzers: AHashMap::new(),
        };
        registry.register("standard", Arc::new(PipelineAnalyzer::standard()));
        registry.register("simple", Arc::new(PipelineAnalyzer::simple()));
        registry.register("keyword", Arc::new(PipelineAnalyzer::keyword()));
        registry
    }

    /// Register an analyzer under a name, replacing any previous entry.
    pub fn register<S: Into<String>>(&mut self, name: S, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(name.into(), analyzer);
    }

    /// Look up an analyzer by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Analyzer>> {
        self.analyzers
            .get(name)
            .cloned()
            .ok_or_else(|| SalixError::analysis(format!("unknown analyzer: {name}")))
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        AnalyzerRegistry::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(analyzer: &dyn Analyzer, text: &str) -> Vec<(String, u32)> {
        let mut stream = analyzer.analyze(text);
        let mut out = Vec::new();
        while let Some(token) = stream.next_token() {
            out.push((token.text.clone(), token.position));
        }
        out
    }

    #[test]
    fn test_standard_analyzer() {
        let analyzer = PipelineAnalyzer::standard();
        let tokens = analyze(&analyzer, "This is the first document we've added");
        assert_eq!(
            tokens,
            vec![
                ("first".to_string(), 3),
                ("document".to_string(), 4),
                ("we've".to_string(), 5),
                ("added".to_string(), 6),
            ]
        );
    }

    #[test]
    fn test_simple_analyzer_keeps_stop_words() {
        let analyzer = PipelineAnalyzer::simple();
        let tokens = analyze(&analyzer, "The Cat");
        assert_eq!(
            tokens,
            vec![("the".to_string(), 0), ("cat".to_string(), 1)]
        );
    }

    #[test]
    fn test_keyword_analyzer() {
        let analyzer = PipelineAnalyzer::keyword();
        let tokens = analyze(&analyzer, "/a/B");
        assert_eq!(tokens, vec![("/a/B".to_string(), 0)]);
    }

    #[test]
    fn test_registry() {
        let registry = AnalyzerRegistry::with_defaults();
        assert!(registry.get("standard").is_ok());
        assert!(registry.get("keyword").is_ok());
        assert!(registry.get("nope").is_err());
    }
}
