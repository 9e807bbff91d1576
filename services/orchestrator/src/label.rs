//! Label expressions.
//!
//! ```text
//! expr    := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | primary
//! primary := "(" expr ")" | atom
//! ```
//!
//! An atom is any run of characters other than whitespace, parentheses and
//! the operator characters `!`, `&`, `|`. A blank expression parses to
//! [`LabelExpr::Unspecified`], which matches no node.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("unbalanced parentheses in label expression")]
    UnbalancedParentheses,

    #[error("unexpected '{found}' in label expression")]
    Unexpected { found: String },

    #[error("label expression ends unexpectedly")]
    UnexpectedEnd,

    #[error("stray '{0}' in label expression, expected '{0}{0}'")]
    StrayOperator(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Atom(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Atom(atom) => f.write_str(atom),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

/// Parsed label expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelExpr {
    /// No expression given. Never matches.
    Unspecified,
    Atom(String),
    Not(Box<LabelExpr>),
    And(Box<LabelExpr>, Box<LabelExpr>),
    Or(Box<LabelExpr>, Box<LabelExpr>),
}

impl LabelExpr {
    pub fn parse(expression: &str) -> Result<Self, LabelError> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Ok(Self::Unspecified);
        }
        validate_parentheses(&tokens)?;

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(expr),
            Some(token) => Err(LabelError::Unexpected {
                found: token.to_string(),
            }),
        }
    }

    pub fn is_specified(&self) -> bool {
        !matches!(self, Self::Unspecified)
    }

    /// Evaluate against a node's label set.
    pub fn matches(&self, labels: &BTreeSet<&str>) -> bool {
        match self {
            Self::Unspecified => false,
            Self::Atom(atom) => labels.contains(atom.as_str()),
            Self::Not(inner) => !inner.matches(labels),
            Self::And(left, right) => left.matches(labels) && right.matches(labels),
            Self::Or(left, right) => left.matches(labels) || right.matches(labels),
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parent_binds_tighter: bool) -> fmt::Result {
        if parent_binds_tighter && matches!(self, Self::Or(..)) {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for LabelExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => Ok(()),
            Self::Atom(atom) => f.write_str(atom),
            Self::Not(inner) => match inner.as_ref() {
                Self::Atom(_) | Self::Not(_) => write!(f, "!{inner}"),
                _ => write!(f, "!({inner})"),
            },
            Self::And(left, right) => {
                left.fmt_operand(f, true)?;
                f.write_str(" && ")?;
                right.fmt_operand(f, true)
            }
            Self::Or(left, right) => {
                left.fmt_operand(f, false)?;
                f.write_str(" || ")?;
                right.fmt_operand(f, false)
            }
        }
    }
}

impl FromStr for LabelExpr {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, LabelError> {
    let mut chars = expression.chars().peekable();
    let mut tokens = Vec::new();

    while let Some(ch) = chars.peek().copied() {
        if ch.is_whitespace() {
            let _ = chars.next();
            continue;
        }

        match ch {
            '(' => {
                let _ = chars.next();
                tokens.push(Token::LParen);
                continue;
            }
            ')' => {
                let _ = chars.next();
                tokens.push(Token::RParen);
                continue;
            }
            '!' => {
                let _ = chars.next();
                tokens.push(Token::Not);
                continue;
            }
            '&' | '|' => {
                let _ = chars.next();
                if chars.next_if_eq(&ch).is_none() {
                    return Err(LabelError::StrayOperator(ch));
                }
                tokens.push(if ch == '&' { Token::And } else { Token::Or });
                continue;
            }
            _ => {}
        }

        let mut atom = String::new();
        while let Some(atom_ch) = chars.peek().copied() {
            if atom_ch.is_whitespace() || matches!(atom_ch, '(' | ')' | '!' | '&' | '|') {
                break;
            }
            let _ = chars.next();
            atom.push(atom_ch);
        }
        tokens.push(Token::Atom(atom));
    }

    Ok(tokens)
}

fn validate_parentheses(tokens: &[Token]) -> Result<(), LabelError> {
    let mut depth = 0u32;
    for token in tokens {
        match token {
            Token::LParen => depth = depth.saturating_add(1),
            Token::RParen => {
                if depth == 0 {
                    return Err(LabelError::UnbalancedParentheses);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    if depth == 0 {
        Ok(())
    } else {
        Err(LabelError::UnbalancedParentheses)
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<LabelExpr, LabelError> {
        let mut expr = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            expr = LabelExpr::Or(Box::new(expr), Box::new(self.and()?));
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<LabelExpr, LabelError> {
        let mut expr = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            expr = LabelExpr::And(Box::new(expr), Box::new(self.unary()?));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<LabelExpr, LabelError> {
        match self.next() {
            Some(Token::Not) => Ok(LabelExpr::Not(Box::new(self.unary()?))),
            Some(Token::LParen) => {
                let expr = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(expr),
                    Some(token) => Err(LabelError::Unexpected {
                        found: token.to_string(),
                    }),
                    None => Err(LabelError::UnexpectedEnd),
                }
            }
            Some(Token::Atom(atom)) => Ok(LabelExpr::Atom(atom)),
            Some(token) => Err(LabelError::Unexpected {
                found: token.to_string(),
            }),
            None => Err(LabelError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn labels<'a>(atoms: &[&'a str]) -> BTreeSet<&'a str> {
        atoms.iter().copied().collect()
    }

    #[rstest]
    #[case("solaris11", true)]
    #[case("windows", false)]
    #[case("solaris11 && sparc", true)]
    #[case("solaris11 && x86", false)]
    #[case("windows || sparc", true)]
    #[case("!windows", true)]
    #[case("!(solaris11 && sparc)", false)]
    #[case("(windows || solaris11) && !x86", true)]
    #[case("solaris1.acme.com", true)]
    fn test_matches(#[case] expression: &str, #[case] expected: bool) {
        let node = labels(&["solaris11", "sparc", "solaris1.acme.com"]);
        let expr = LabelExpr::parse(expression).unwrap();
        assert_eq!(expr.matches(&node), expected, "{expression}");
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn test_blank_is_unspecified(#[case] expression: &str) {
        let expr = LabelExpr::parse(expression).unwrap();
        assert_eq!(expr, LabelExpr::Unspecified);
        assert!(!expr.is_specified());
        assert!(!expr.matches(&labels(&["anything"])));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = LabelExpr::parse("a || b && c").unwrap();
        assert_eq!(
            expr,
            LabelExpr::Or(
                Box::new(LabelExpr::Atom("a".into())),
                Box::new(LabelExpr::And(
                    Box::new(LabelExpr::Atom("b".into())),
                    Box::new(LabelExpr::Atom("c".into())),
                )),
            )
        );
    }

    #[rstest]
    #[case("(a || b", LabelError::UnbalancedParentheses)]
    #[case("a)", LabelError::UnbalancedParentheses)]
    #[case("a & b", LabelError::StrayOperator('&'))]
    #[case("a | b", LabelError::StrayOperator('|'))]
    #[case("a &&", LabelError::UnexpectedEnd)]
    #[case("a b", LabelError::Unexpected { found: "b".into() })]
    #[case("&& a", LabelError::Unexpected { found: "&&".into() })]
    #[case("()", LabelError::Unexpected { found: ")".into() })]
    fn test_parse_errors(#[case] expression: &str, #[case] expected: LabelError) {
        assert_eq!(LabelExpr::parse(expression).unwrap_err(), expected);
    }

    #[test]
    fn test_display_keeps_grouping() {
        for expression in ["a", "!a", "a && b", "a || b", "(a || b) && !c", "!(a && b) || c"] {
            let expr = LabelExpr::parse(expression).unwrap();
            assert_eq!(expr.to_string(), expression);
        }
    }

    fn atom() -> impl Strategy<Value = LabelExpr> {
        "[a-z][a-z0-9.]{0,8}".prop_map(LabelExpr::Atom)
    }

    fn expr() -> impl Strategy<Value = LabelExpr> {
        atom().prop_recursive(4, 32, 2, |inner| {
            prop_oneof![
                inner.clone().prop_map(|e| LabelExpr::Not(Box::new(e))),
                (inner.clone(), inner.clone())
                    .prop_map(|(l, r)| LabelExpr::And(Box::new(l), Box::new(r))),
                (inner.clone(), inner).prop_map(|(l, r)| LabelExpr::Or(Box::new(l), Box::new(r))),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_display_preserves_meaning(
            e in expr(),
            node in proptest::collection::btree_set("[a-z][a-z0-9.]{0,8}", 0..6),
        ) {
            let reparsed = LabelExpr::parse(&e.to_string()).unwrap();
            let node: BTreeSet<&str> = node.iter().map(String::as_str).collect();
            prop_assert_eq!(reparsed.matches(&node), e.matches(&node));
        }
    }
}
