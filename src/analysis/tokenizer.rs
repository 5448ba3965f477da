//! Tokenizers: text in, positioned tokens out.

use std::fmt::Debug;

use unicode_segmentation::UnicodeSegmentation;

use crate::analysis::token::{Token, TokenStream};

/// Splits text into a token stream.
pub trait Tokenizer: Send + Sync + Debug {
    /// Tokenize `text`. The stream borrows the input.
    fn tokenize<'a>(&self, text: &'a str) -> Box<dyn TokenStream + 'a>;
}

/// Tokenizer that splits on Unicode word boundaries and keeps segments
/// containing at least one alphanumeric character.
#[derive(Debug, Clone, Default)]
pub struct UnicodeWordTokenizer;

impl Tokenizer for UnicodeWordTokenizer {
    fn tokenize<'a>(&self, text: &'a str) -> Box<dyn TokenStream + 'a> {
        Box::new(SegmentStream {
            segments: text.split_word_bound_indices().collect::<Vec<_>>().into_iter(),
            keep: |segment: &str| segment.chars().any(|c| c.is_alphanumeric()),
            token: Token::new(String::new(), 0),
            next_position: 0,
        })
    }
}

/// Tokenizer that splits on ASCII/Unicode whitespace.
#[derive(Debug, Clone, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize<'a>(&self, text: &'a str) -> Box<dyn TokenStream + 'a> {
        let segments: Vec<(usize, &str)> = text
            .split_whitespace()
            .map(|word| {
                let offset = word.as_ptr() as usize - text.as_ptr() as usize;
                (offset, word)
            })
            .collect();
        Box::new(SegmentStream {
            segments: segments.into_iter(),
            keep: |_segment: &str| true,
            token: Token::new(String::new(), 0),
            next_position: 0,
        })
    }
}

/// Tokenizer that emits the whole input as a single token. Used by
/// identifier fields.
#[derive(Debug, Clone, Default)]
pub struct KeywordTokenizer;

impl Tokenizer for KeywordTokenizer {
    fn tokenize<'a>(&self, text: &'a str) -> Box<dyn TokenStream + 'a> {
        let segments = if text.is_empty() {
            Vec::new()
        } else {
            vec![(0usize, text)]
        };
        Box::new(SegmentStream {
            segments: segments.into_iter(),
            keep: |_segment: &str| true,
            token: Token::new(String::new(), 0),
            next_position: 0,
        })
    }
}

/// Shared stream over `(byte offset, segment)` pairs. The token buffer is
/// reused between calls.
struct SegmentStream<'a, F: Fn(&str) -> bool> {
    segments: std::vec::IntoIter<(usize, &'a str)>,
    keep: F,
    token: Token,
    next_position: u32,
}

impl<'a, F: Fn(&str) -> bool> TokenStream for SegmentStream<'a, F> {
    fn next_token(&mut self) -> Option<&Token> {
        for (offset, segment) in self.segments.by_ref() {
            if !(self.keep)(segment) {
                continue;
            }
            self.token.text.clear();
            self.token.text.push_str(segment);
            self.token.position = self.next_position;
            self.token.start_offset = offset as u32;
            self.token.end_offset = (offset + segment.len()) as u32;
            self.token.boost = 1.0;
            self.next_position += 1;
            return Some(&self.token);
        }
        None
    }
}
