use super::tokenize::{Token, TokenKind};
use crate::error::SyntaxError;

/// Binary expression tree. Operators keep their token; NOT only has a left
/// child, words and phrases are leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
    pub token: Token,
    pub left: Option<Box<AstNode>>,
    pub right: Option<Box<AstNode>>,
}

impl AstNode {
    fn leaf(token: Token) -> Self {
        Self {
            token,
            left: None,
            right: None,
        }
    }
}

/// Recursive descent; `&` and `|` share one precedence level and associate
/// to the left.
pub fn parse(tokens: &[Token]) -> Result<AstNode, SyntaxError> {
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.expression()?;
    match parser.peek() {
        Some(t) => Err(SyntaxError::UnexpectedToken(t.text.clone())),
        None => Ok(node),
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expression(&mut self) -> Result<AstNode, SyntaxError> {
        let mut node = self.term()?;
        while let Some(op) = self
            .peek()
            .filter(|t| matches!(t.kind, TokenKind::And | TokenKind::Or))
            .cloned()
        {
            self.pos += 1;
            let right = self.term()?;
            node = AstNode {
                token: op,
                left: Some(Box::new(node)),
                right: Some(Box::new(right)),
            };
        }
        Ok(node)
    }

    fn term(&mut self) -> Result<AstNode, SyntaxError> {
        match self.peek() {
            None => Err(SyntaxError::UnexpectedEndOfInput),
            Some(t) if t.kind == TokenKind::Not => {
                let token = t.clone();
                self.pos += 1;
                let operand = self.term()?;
                Ok(AstNode {
                    token,
                    left: Some(Box::new(operand)),
                    right: None,
                })
            }
            Some(_) => self.factor(),
        }
    }

    fn factor(&mut self) -> Result<AstNode, SyntaxError> {
        let Some(token) = self.next() else {
            return Err(SyntaxError::UnexpectedEndOfInput);
        };
        match token.kind {
            TokenKind::Word | TokenKind::Phrase => Ok(AstNode::leaf(token)),
            TokenKind::Open => {
                let node = self.expression()?;
                match self.next() {
                    Some(t) if t.kind == TokenKind::Close => Ok(node),
                    _ => Err(SyntaxError::MissingCloseParenthesis),
                }
            }
            _ => Err(SyntaxError::UnexpectedToken(token.text)),
        }
    }
}
