use std::fmt;

use crate::error::SyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    And,
    Or,
    Not,
    Open,
    Close,
    Word,
    Phrase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    fn op(kind: TokenKind, c: char) -> Self {
        Self {
            kind,
            text: c.to_string(),
        }
    }

    pub fn word(text: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Word,
            text: text.into(),
        }
    }

    pub fn phrase(text: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Phrase,
            text: text.into(),
        }
    }

    pub fn and() -> Self {
        Self::op(TokenKind::And, '&')
    }

    /// Left operand of an implicit AND.
    fn ends_operand(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::Phrase | TokenKind::Close)
    }

    /// Right operand of an implicit AND.
    fn starts_operand(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Word | TokenKind::Phrase | TokenKind::Not | TokenKind::Open
        )
    }
}

/// Query syntax of the token, so joined tokens tokenize the same way again.
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Phrase => write!(f, "\"{}\"", self.text),
            _ => f.write_str(&self.text),
        }
    }
}

fn is_delimiter(c: char) -> bool {
    matches!(c, '&' | '|' | '!' | '(' | ')' | '"') || c.is_whitespace()
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, SyntaxError> {
    let input = input.trim();
    let (Some(first), Some(last)) = (input.chars().next(), input.chars().last()) else {
        return Err(SyntaxError::UnexpectedEndOfInput);
    };
    if matches!(first, '&' | '|' | ')') {
        return Err(SyntaxError::WrongStartingChar(first));
    }
    if matches!(last, '&' | '|' | '!' | '(') {
        return Err(SyntaxError::WrongEndingChar(last));
    }

    let tokens = scan(input)?;
    Ok(insert_implicit_ands(tokens))
}

fn scan(mut input: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    while let Some(c) = input.chars().next() {
        let rest = &input[c.len_utf8()..];
        input = match c {
            '&' => {
                tokens.push(Token::op(TokenKind::And, c));
                rest
            }
            '|' => {
                tokens.push(Token::op(TokenKind::Or, c));
                rest
            }
            '!' => {
                tokens.push(Token::op(TokenKind::Not, c));
                rest
            }
            '(' => {
                tokens.push(Token::op(TokenKind::Open, c));
                rest
            }
            ')' => {
                tokens.push(Token::op(TokenKind::Close, c));
                rest
            }
            '"' => {
                let end = rest.find('"').ok_or(SyntaxError::UnterminatedQuote)?;
                tokens.push(Token::phrase(rest[..end].trim()));
                &rest[end + 1..]
            }
            _ => {
                let end = input.find(is_delimiter).unwrap_or(input.len());
                let word = input[..end].trim();
                if !word.is_empty() {
                    tokens.push(Token::word(word));
                }
                &input[end..]
            }
        }
        .trim_start();
    }
    Ok(tokens)
}

fn insert_implicit_ands(tokens: Vec<Token>) -> Vec<Token> {
    let mut result = Vec::with_capacity(tokens.len() * 2);
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        let needs_and = token.ends_operand() && iter.peek().is_some_and(Token::starts_operand);
        result.push(token);
        if needs_and {
            result.push(Token::and());
        }
    }
    result
}
