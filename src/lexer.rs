//! Lexer for accelerator descriptors using logos
//!
//! A descriptor names one instantiation of the vector MAC unit, e.g.
//! `1x8U8-2x8I8-2S32`:
//! - Numbers: counts, vector widths, element bit widths
//! - `x`: separates an operand count from its vector width
//! - Element kinds: `U` (unsigned), `I` (signed integer), `S` (signed accumulator)
//! - `-`: separates operand groups

use logos::Logos;

/// Token types for the descriptor language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<usize>().ok())]
    Number(usize),

    #[token("x")]
    #[token("X")]
    Times,

    #[token("-")]
    Dash,

    #[token("U")]
    #[token("u")]
    Unsigned,

    #[token("I")]
    #[token("i")]
    Signed,

    #[token("S")]
    #[token("s")]
    SignedAcc,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Times => write!(f, "x"),
            Token::Dash => write!(f, "-"),
            Token::Unsigned => write!(f, "U"),
            Token::Signed => write!(f, "I"),
            Token::SignedAcc => write!(f, "S"),
        }
    }
}

/// Lexer wrapper that provides a stream of tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Get current position in source
    pub fn span(&self) -> std::ops::Range<usize> {
        self.inner.span()
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Token, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_form_tokens() {
        let tokens: Vec<_> = Lexer::new("1x8U8").filter_map(Result::ok).collect();
        assert_eq!(
            tokens,
            vec![
                Token::Number(1),
                Token::Times,
                Token::Number(8),
                Token::Unsigned,
                Token::Number(8),
            ]
        );
    }

    #[test]
    fn test_full_descriptor() {
        let tokens: Vec<_> = Lexer::new("8U8-16I8-2S32").filter_map(Result::ok).collect();
        assert_eq!(
            tokens,
            vec![
                Token::Number(8),
                Token::Unsigned,
                Token::Number(8),
                Token::Dash,
                Token::Number(16),
                Token::Signed,
                Token::Number(8),
                Token::Dash,
                Token::Number(2),
                Token::SignedAcc,
                Token::Number(32),
            ]
        );
    }

    #[test]
    fn test_lowercase_and_whitespace() {
        let tokens: Vec<_> = Lexer::new(" 2 s 32 ").filter_map(Result::ok).collect();
        assert_eq!(
            tokens,
            vec![Token::Number(2), Token::SignedAcc, Token::Number(32)]
        );
    }

    #[test]
    fn test_invalid_character() {
        let results: Vec<_> = Lexer::new("8F8").collect();
        assert!(results.iter().any(|r| r.is_err()));
    }
}
