//! Text analysis pipeline.
//!
//! Analyzers turn field text into a stream of positioned tokens. The engine
//! consumes tokens; everything here is pluggable through the
//! [`AnalyzerRegistry`], which a writer or searcher receives explicitly
//! instead of reading process-wide state.

pub mod analyzer;
pub mod filter;
pub mod token;
pub mod tokenizer;

pub use analyzer::{Analyzer, AnalyzerRegistry, PipelineAnalyzer};
pub use filter::{LowercaseFilter, StopFilter, TokenFilter};
pub use token::{Token, TokenStream, VecTokenStream};
pub use tokenizer::{KeywordTokenizer, Tokenizer, UnicodeWordTokenizer, WhitespaceTokenizer};
