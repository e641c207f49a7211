//! Parser for accelerator descriptors
//!
//! Parses descriptors like:
//! - `1x8U8-2x8I8-2S32` (count x width, per operand group)
//! - `8U8-16I8-2S32` (count omitted, width is the total element count)

use crate::descriptor::{Descriptor, ElemKind, LaneGroup, OperandGroup};
use crate::error::{HarnessError, HarnessResult};
use crate::lexer::{Lexer, Token};

/// Parser for descriptor strings
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    current: Option<Token>,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
            current: None,
        }
    }

    /// Advance to the next token, reporting unrecognised input
    fn advance(&mut self) -> HarnessResult<Option<Token>> {
        let prev = self.current.take();
        self.current = match self.lexer.next() {
            Some(Ok(tok)) => Some(tok),
            Some(Err(())) => {
                let span = self.lexer.span();
                return Err(HarnessError::LexerError {
                    position: span.start,
                    message: "unrecognised character in descriptor".to_string(),
                });
            }
            None => None,
        };
        Ok(prev)
    }

    fn check(&self, expected: &Token) -> bool {
        match &self.current {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    fn expect(&mut self, expected: Token) -> HarnessResult<Token> {
        if self.check(&expected) {
            self.advance()?
                .ok_or_else(|| HarnessError::parse_error("Unexpected end of input"))
        } else {
            Err(HarnessError::parse_error(format!(
                "Expected '{}', got {}",
                expected,
                describe(&self.current)
            )))
        }
    }

    /// Parse a complete descriptor
    pub fn parse_descriptor(&mut self) -> HarnessResult<Descriptor> {
        self.advance()?;

        let data = self.parse_operand_group()?;
        self.expect(Token::Dash)?;
        let coef = self.parse_operand_group()?;
        self.expect(Token::Dash)?;
        let lanes = self.parse_lane_group()?;

        if self.current.is_some() {
            return Err(HarnessError::parse_error(format!(
                "Trailing input after descriptor: {}",
                describe(&self.current)
            )));
        }

        Ok(Descriptor { data, coef, lanes })
    }

    /// Parse `<count>x<width><kind><bits>` or `<width><kind><bits>`
    fn parse_operand_group(&mut self) -> HarnessResult<OperandGroup> {
        let first = self.parse_number()?;

        let (count, width) = if self.check(&Token::Times) {
            self.advance()?;
            (Some(first), self.parse_number()?)
        } else {
            (None, first)
        };

        let kind = self.parse_kind()?;
        let bits = self.parse_number()?;

        Ok(match count {
            Some(count) => OperandGroup::new(count, width, kind, bits),
            None => OperandGroup::short(width, kind, bits),
        })
    }

    /// Parse `<lanes><kind><bits>`
    fn parse_lane_group(&mut self) -> HarnessResult<LaneGroup> {
        let lanes = self.parse_number()?;
        let kind = self.parse_kind()?;
        let bits = self.parse_number()?;
        Ok(LaneGroup { lanes, kind, bits })
    }

    fn parse_number(&mut self) -> HarnessResult<usize> {
        match self.current {
            Some(Token::Number(n)) => {
                self.advance()?;
                Ok(n)
            }
            _ => Err(HarnessError::parse_error(format!(
                "Expected number, got {}",
                describe(&self.current)
            ))),
        }
    }

    fn parse_kind(&mut self) -> HarnessResult<ElemKind> {
        let kind = match self.current {
            Some(Token::Unsigned) => ElemKind::Unsigned,
            Some(Token::Signed) => ElemKind::Signed,
            Some(Token::SignedAcc) => ElemKind::SignedAcc,
            _ => {
                return Err(HarnessError::parse_error(format!(
                    "Expected element kind (U, I or S), got {}",
                    describe(&self.current)
                )))
            }
        };
        self.advance()?;
        Ok(kind)
    }
}

fn describe(token: &Option<Token>) -> String {
    match token {
        Some(tok) => format!("'{}'", tok),
        None => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_long_form() {
        let mut parser = Parser::new("1x8U8-2x8I8-2S32");
        let desc = parser.parse_descriptor().unwrap();

        assert_eq!(desc.data, OperandGroup::new(1, 8, ElemKind::Unsigned, 8));
        assert_eq!(desc.coef, OperandGroup::new(2, 8, ElemKind::Signed, 8));
        assert_eq!(desc.lanes.lanes, 2);
        assert_eq!(desc.lanes.kind, ElemKind::SignedAcc);
        assert_eq!(desc.lanes.bits, 32);
    }

    #[test]
    fn test_parse_short_form() {
        let mut parser = Parser::new("8U8-16I8-2S32");
        let desc = parser.parse_descriptor().unwrap();

        assert_eq!(desc.data, OperandGroup::short(8, ElemKind::Unsigned, 8));
        assert_eq!(desc.coef, OperandGroup::short(16, ElemKind::Signed, 8));
    }

    #[test]
    fn test_parse_missing_lane_group() {
        let mut parser = Parser::new("1x8U8-2x8I8");
        let err = parser.parse_descriptor().unwrap_err();
        assert!(matches!(err, HarnessError::ParseError { .. }));
    }

    #[test]
    fn test_parse_trailing_input() {
        let mut parser = Parser::new("1x8U8-2x8I8-2S32-4");
        assert!(parser.parse_descriptor().is_err());
    }

    #[test]
    fn test_parse_lexer_error_position() {
        let mut parser = Parser::new("1x8U8-2x8Q8-2S32");
        match parser.parse_descriptor() {
            Err(HarnessError::LexerError { position, .. }) => assert_eq!(position, 9),
            other => panic!("Expected lexer error, got {:?}", other),
        }
    }
}
