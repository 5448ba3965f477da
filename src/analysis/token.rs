//! Token types for text analysis.

use serde::{Deserialize, Serialize};

/// A single unit of text produced by a tokenizer.
///
/// Streams hand out `&Token` references that are only valid until the next
/// call to [`TokenStream::next_token`]; the stream reuses its internal
/// buffer. Consumers copy the fields they need to retain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The text content of the token.
    pub text: String,

    /// Position in the token stream (0-based). Filters that remove tokens
    /// leave gaps rather than renumbering, so phrase distances survive
    /// stop-word removal.
    pub position: u32,

    /// Character offset where this token starts in the original text.
    pub start_offset: u32,

    /// Character offset one past the end of this token.
    pub end_offset: u32,

    /// Per-token boost factor.
    pub boost: f32,
}

impl Token {
    /// Create a token with the given text and position.
    pub fn new<S: Into<String>>(text: S, position: u32) -> Self {
        Token {
            text: text.into(),
            position,
            start_offset: 0,
            end_offset: 0,
            boost: 1.0,
        }
    }

    /// Create a token with text, position and character offsets.
    pub fn with_offsets<S: Into<String>>(
        text: S,
        position: u32,
        start_offset: u32,
        end_offset: u32,
    ) -> Self {
        Token {
            text: text.into(),
            position,
            start_offset,
            end_offset,
            boost: 1.0,
        }
    }

    /// Set the boost factor.
    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    /// Length of the token text in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// True when the token text is empty.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// A streaming sequence of tokens.
///
/// The returned reference borrows the stream's internal buffer and is
/// invalidated by the next call.
pub trait TokenStream {
    /// Advance to the next token, or `None` at end of input.
    fn next_token(&mut self) -> Option<&Token>;

    /// Drain the stream into owned tokens. Mostly for tests.
    fn collect_tokens(&mut self) -> Vec<Token>
    where
        Self: Sized,
    {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token() {
            tokens.push(token.clone());
        }
        tokens
    }
}

impl TokenStream for Box<dyn TokenStream + '_> {
    fn next_token(&mut self) -> Option<&Token> {
        self.as_mut().next_token()
    }
}

/// A token stream over a pre-built vector of tokens.
#[derive(Debug)]
pub struct VecTokenStream {
    tokens: std::vec::IntoIter<Token>,
    current: Option<Token>,
}

impl VecTokenStream {
    /// Wrap a vector of tokens.
    pub fn new(tokens: Vec<Token>) -> Self {
        VecTokenStream {
            tokens: tokens.into_iter(),
            current: None,
        }
    }
}

impl TokenStream for VecTokenStream {
    fn next_token(&mut self) -> Option<&Token> {
        self.current = self.tokens.next();
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_creation() {
        let token = Token::new("hello", 0);
        assert_eq!(token.text, "hello");
        assert_eq!(token.position, 0);
        assert_eq!(token.boost, 1.0);

        let token = Token::with_offsets("world", 1, 6, 11).with_boost(2.0);
        assert_eq!(token.start_offset, 6);
        assert_eq!(token.end_offset, 11);
        assert_eq!(token.boost, 2.0);
    }

    #[test]
    fn test_vec_token_stream() {
        let mut stream = VecTokenStream::new(vec![Token::new("a", 0), Token::new("b", 1)]);
        assert_eq!(stream.next_token().unwrap().text, "a");
        assert_eq!(stream.next_token().unwrap().text, "b");
        assert!(stream.next_token().is_none());
    }
}
