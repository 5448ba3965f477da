//! Token filters: streams in, streams out.

use std::collections::HashSet;
use std::fmt::Debug;

use crate::analysis::token::{Token, TokenStream};

/// Transforms or drops tokens from a stream.
pub trait TokenFilter: Send + Sync + Debug {
    /// Wrap a stream with this filter.
    fn apply<'a>(&self, stream: Box<dyn TokenStream + 'a>) -> Box<dyn TokenStream + 'a>;
}

/// Lowercases token text.
#[derive(Debug, Clone, Default)]
pub struct LowercaseFilter;

impl TokenFilter for LowercaseFilter {
    fn apply<'a>(&self, stream: Box<dyn TokenStream + 'a>) -> Box<dyn TokenStream + 'a> {
        Box::new(LowercaseStream {
            inner: stream,
            token: Token::new(String::new(), 0),
        })
    }
}

struct LowercaseStream<'a> {
    inner: Box<dyn TokenStream + 'a>,
    token: Token,
}

impl<'a> TokenStream for LowercaseStream<'a> {
    fn next_token(&mut self) -> Option<&Token> {
        let inner = self.inner.next_token()?;
        self.token.text.clear();
        for c in inner.text.chars() {
            for lower in c.to_lowercase() {
                self.token.text.push(lower);
            }
        }
        self.token.position = inner.position;
        self.token.start_offset = inner.start_offset;
        self.token.end_offset = inner.end_offset;
        self.token.boost = inner.boost;
        Some(&self.token)
    }
}

/// Drops tokens found in a stop set. Positions of surviving tokens are not
/// renumbered, so positional queries still see the original distances.
#[derive(Debug, Clone)]
pub struct StopFilter {
    stops: HashSet<String>,
}

/// The default English stop list.
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "and", "are", "as", "at", "be", "by", "can", "for", "from", "have", "if", "in", "is",
    "it", "may", "not", "of", "on", "or", "tab", "that", "the", "this", "to", "us", "we", "when",
    "will", "with", "yet", "you", "your",
];

impl StopFilter {
    /// Create a filter over the given stop words.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StopFilter {
            stops: words.into_iter().map(Into::into).collect(),
        }
    }

    /// The default English stop list.
    pub fn english() -> Self {
        StopFilter::new(DEFAULT_STOP_WORDS.iter().copied())
    }
}

impl TokenFilter for StopFilter {
    fn apply<'a>(&self, stream: Box<dyn TokenStream + 'a>) -> Box<dyn TokenStream + 'a> {
        Box::new(StopStream {
            inner: stream,
            stops: self.stops.clone(),
            token: Token::new(String::new(), 0),
        })
    }
}

struct StopStream<'a> {
    inner: Box<dyn TokenStream + 'a>,
    stops: HashSet<String>,
    token: Token,
}

impl<'a> TokenStream for StopStream<'a> {
    fn next_token(&mut self) -> Option<&Token> {
        loop {
            let inner = self.inner.next_token()?;
            if self.stops.contains(inner.text.as_str()) {
                continue;
            }
            self.token.clone_from(inner);
            return Some(&self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tokenizer::{Tokenizer, UnicodeWordTokenizer};

    fn run<'a>(filter: &dyn TokenFilter, text: &'a str) -> Vec<(String, u32)> {
        let mut stream = filter.apply(UnicodeWordTokenizer.tokenize(text));
        let mut out = Vec::new();
        while let Some(token) = stream.next_token() {
            out.push((token.text.clone(), token.position));
        }
        out
    }

    #[test]
    fn test_lowercase_filter() {
        let tokens = run(&LowercaseFilter, "Hello WORLD Straße");
        assert_eq!(
            tokens,
            vec![
                ("hello".to_string(), 0),
                ("world".to_string(), 1),
                ("straße".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_stop_filter_keeps_positions() {
        let filter = StopFilter::english();
        let tokens = run(&filter, "mary had a little lamb");
        assert_eq!(
            tokens,
            vec![
                ("mary".to_string(), 0),
                ("had".to_string(), 1),
                ("little".to_string(), 3),
                ("lamb".to_string(), 4),
            ]
        );
    }
}
