pub mod ast;
pub mod tokenize;

use serde::Deserialize;

use crate::error::SyntaxError;
use crate::model::ContentKind;
pub use ast::AstNode;
pub use tokenize::{Token, TokenKind};

/// Tokenizes and parses a query string.
pub fn parse_query(input: &str) -> Result<AstNode, SyntaxError> {
    let tokens = tokenize::tokenize(input)?;
    ast::parse(&tokens)
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    pub include_headings: bool,
    pub include_footnotes: bool,
    pub include_summaries: bool,
    pub with_stemming: bool,
    pub work_codes: Option<Vec<String>>,
}

impl SearchOptions {
    /// Paragraphs are always searched, the other kinds on request.
    pub fn kinds(&self) -> Vec<ContentKind> {
        let mut kinds = vec![ContentKind::Paragraph];
        if self.include_headings {
            kinds.push(ContentKind::Heading);
        }
        if self.include_footnotes {
            kinds.push(ContentKind::Footnote);
        }
        if self.include_summaries {
            kinds.push(ContentKind::Summary);
        }
        kinds
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub options: SearchOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn options_default_to_paragraphs() {
        let req: SearchRequest = serde_json::from_str(r#"{"query": "Kant"}"#).unwrap();
        assert_eq!(req.options.kinds(), vec![ContentKind::Paragraph]);
        let req: SearchRequest = serde_json::from_str(
            r#"{"query": "Kant", "options": {"includeFootnotes": true, "workCodes": ["GMS"]}}"#,
        )
        .unwrap();
        assert_eq!(
            req.options.kinds(),
            vec![ContentKind::Paragraph, ContentKind::Footnote]
        );
        assert_eq!(req.options.work_codes, Some(vec!["GMS".to_string()]));
    }

    fn pieces() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop::sample::select(vec![
                "Kant", "Vernunft", "Größe", "&", "|", "!", "(", ")", "\"reine Vernunft\"",
            ]),
            1..10,
        )
        .prop_map(|v| v.join(" "))
    }

    proptest! {
        #[test]
        fn rejoined_tokens_tokenize_identically(input in pieces()) {
            if let Ok(tokens) = tokenize::tokenize(&input) {
                let joined = tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" ");
                let again = tokenize::tokenize(&joined).unwrap();
                let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
                let kinds_again: Vec<_> = again.iter().map(|t| t.kind).collect();
                prop_assert_eq!(kinds, kinds_again);
            }
        }

        #[test]
        fn parsed_queries_are_full_binary_trees(input in pieces()) {
            if let Ok(node) = parse_query(&input) {
                fn check(n: &AstNode) -> bool {
                    match n.token.kind {
                        TokenKind::And | TokenKind::Or => {
                            n.left.as_deref().is_some_and(check) && n.right.as_deref().is_some_and(check)
                        }
                        TokenKind::Not => n.right.is_none() && n.left.as_deref().is_some_and(check),
                        TokenKind::Word | TokenKind::Phrase => n.left.is_none() && n.right.is_none(),
                        TokenKind::Open | TokenKind::Close => false,
                    }
                }
                prop_assert!(check(&node));
            }
        }

        #[test]
        fn parenthesizing_is_neutral(input in pieces()) {
            if let Ok(node) = parse_query(&input) {
                let wrapped = parse_query(&format!("({input})")).unwrap();
                prop_assert_eq!(node, wrapped);
            }
        }
    }
}
