//! Condition predicates for `conditional_items`
//!
//! A small comparison language evaluated against the ambient context
//! dictionary: `os_vers BEGINSWITH "14" AND machine_type == "laptop"`.
//! Operators: `==`, `!=`, `<`, `<=`, `>`, `>=`, `IN`, `CONTAINS`,
//! `BEGINSWITH`, `ENDSWITH`, `LIKE`, combined with `AND`, `OR`, `NOT`
//! and parentheses. Aggregates are written `{"a", "b"}`. Dotted
//! numeric operands compare version-aware.

use plist::{Dictionary, Value};
use std::cmp::Ordering;
use steward_errors::{Error, ManifestError, Result};
use steward_types::compare_versions;

/// Evaluate a predicate against a context dictionary.
///
/// # Errors
///
/// Returns `ManifestError::BadPredicate` on a syntax error. Callers
/// treat that as the predicate evaluating false, with a warning.
pub fn evaluate(predicate: &str, context: &Dictionary) -> Result<bool> {
    let tokens = tokenize(predicate)
        .map_err(|detail| bad_predicate(predicate, &detail))?;
    let mut parser = Parser {
        tokens,
        position: 0,
        context,
    };
    let result = parser
        .expression()
        .map_err(|detail| bad_predicate(predicate, &detail))?;
    if parser.position != parser.tokens.len() {
        return Err(bad_predicate(predicate, "trailing tokens"));
    }
    Ok(result)
}

fn bad_predicate(predicate: &str, detail: &str) -> Error {
    ManifestError::BadPredicate {
        predicate: predicate.to_string(),
        detail: detail.to_string(),
    }
    .into()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    In,
    Contains,
    BeginsWith,
    EndsWith,
    Like,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err("single '=' (use '==')".into());
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err("unexpected '!'".into());
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '"' | '\'' => {
                let (literal, next) = lex_string(&chars, i, ch)?;
                tokens.push(Token::Str(literal));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(keyword_or_ident(&word));
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }
    Ok(tokens)
}

fn lex_string(
    chars: &[char],
    start: usize,
    quote: char,
) -> std::result::Result<(String, usize), String> {
    let mut literal = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                literal.push(chars[i + 1]);
                i += 2;
            }
            c if c == quote => return Ok((literal, i + 1)),
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated string literal".into())
}

fn keyword_or_ident(word: &str) -> Token {
    match word.to_ascii_uppercase().as_str() {
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        "IN" => Token::In,
        "CONTAINS" => Token::Contains,
        "BEGINSWITH" => Token::BeginsWith,
        "ENDSWITH" => Token::EndsWith,
        "LIKE" => Token::Like,
        _ => Token::Ident(word.to_string()),
    }
}

/// A resolved operand value.
#[derive(Debug, Clone, PartialEq)]
enum Val {
    Str(String),
    Num(f64),
    Bool(bool),
    List(Vec<Val>),
    Missing,
}

impl Val {
    fn from_plist(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Str(s.clone()),
            Value::Boolean(b) => Self::Bool(*b),
            Value::Integer(n) => n
                .as_signed()
                .map_or(Self::Missing, |v| Self::num_from_i64(v)),
            Value::Real(r) => Self::Num(*r),
            Value::Array(items) => Self::List(items.iter().map(Self::from_plist).collect()),
            _ => Self::Missing,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn num_from_i64(v: i64) -> Self {
        Self::Num(v as f64)
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    context: &'a Dictionary,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, token: &Token) -> std::result::Result<(), String> {
        if self.peek() == Some(token) {
            self.position += 1;
            Ok(())
        } else {
            Err(format!("expected {token:?}, found {:?}", self.peek()))
        }
    }

    // expression := and_expr (OR and_expr)*
    fn expression(&mut self) -> std::result::Result<bool, String> {
        let mut result = self.and_expression()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            let rhs = self.and_expression()?;
            result = result || rhs;
        }
        Ok(result)
    }

    // and_expr := unary (AND unary)*
    fn and_expression(&mut self) -> std::result::Result<bool, String> {
        let mut result = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            let rhs = self.unary()?;
            result = result && rhs;
        }
        Ok(result)
    }

    // unary := NOT unary | '(' expression ')' | comparison
    fn unary(&mut self) -> std::result::Result<bool, String> {
        match self.peek() {
            Some(Token::Not) => {
                self.position += 1;
                Ok(!self.unary()?)
            }
            Some(Token::LParen) => {
                self.position += 1;
                let inner = self.expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            _ => self.comparison(),
        }
    }

    // comparison := operand op operand | TRUE-ish bare value
    fn comparison(&mut self) -> std::result::Result<bool, String> {
        let lhs = self.operand()?;
        let Some(op) = self.peek().cloned() else {
            // Bare operand: truthy booleans allowed, anything else is an error.
            return match lhs {
                Val::Bool(b) => Ok(b),
                other => Err(format!("dangling operand {other:?}")),
            };
        };
        let compare = match op {
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge
            | Token::In | Token::Contains | Token::BeginsWith | Token::EndsWith
            | Token::Like => {
                self.position += 1;
                op
            }
            _ => {
                return match lhs {
                    Val::Bool(b) => Ok(b),
                    other => Err(format!("dangling operand {other:?}")),
                };
            }
        };
        let rhs = self.operand()?;
        Ok(apply_operator(&compare, &lhs, &rhs))
    }

    fn operand(&mut self) -> std::result::Result<Val, String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Val::Str(s)),
            Some(Token::Number(n)) => Ok(Val::Str(n)),
            Some(Token::Ident(name)) => Ok(self.resolve(&name)),
            Some(Token::LBrace) => {
                let mut items = Vec::new();
                loop {
                    match self.peek() {
                        Some(Token::RBrace) => {
                            self.position += 1;
                            break;
                        }
                        Some(_) => {
                            items.push(self.operand()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.position += 1;
                            }
                        }
                        None => return Err("unterminated aggregate".into()),
                    }
                }
                Ok(Val::List(items))
            }
            other => Err(format!("expected operand, found {other:?}")),
        }
    }

    fn resolve(&self, name: &str) -> Val {
        match name.to_ascii_uppercase().as_str() {
            "TRUE" | "TRUEPREDICATE" | "YES" => return Val::Bool(true),
            "FALSE" | "FALSEPREDICATE" | "NO" => return Val::Bool(false),
            _ => {}
        }
        self.context
            .get(name)
            .map_or(Val::Missing, Val::from_plist)
    }
}

fn apply_operator(op: &Token, lhs: &Val, rhs: &Val) -> bool {
    match op {
        Token::Eq => val_eq(lhs, rhs),
        Token::Ne => {
            if matches!(lhs, Val::Missing) || matches!(rhs, Val::Missing) {
                true
            } else {
                !val_eq(lhs, rhs)
            }
        }
        Token::Lt => val_cmp(lhs, rhs) == Some(Ordering::Less),
        Token::Le => matches!(
            val_cmp(lhs, rhs),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Token::Gt => val_cmp(lhs, rhs) == Some(Ordering::Greater),
        Token::Ge => matches!(
            val_cmp(lhs, rhs),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Token::In => contains(rhs, lhs),
        Token::Contains => contains(lhs, rhs),
        Token::BeginsWith => string_pair(lhs, rhs).is_some_and(|(a, b)| a.starts_with(&b)),
        Token::EndsWith => string_pair(lhs, rhs).is_some_and(|(a, b)| a.ends_with(&b)),
        Token::Like => string_pair(lhs, rhs).is_some_and(|(a, b)| glob_match(&b, &a)),
        _ => false,
    }
}

fn val_eq(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::Missing, _) | (_, Val::Missing) => false,
        (Val::Bool(x), Val::Bool(y)) => x == y,
        _ => val_cmp(a, b) == Some(Ordering::Equal),
    }
}

fn val_cmp(a: &Val, b: &Val) -> Option<Ordering> {
    let (a, b) = (as_text(a)?, as_text(b)?);
    if looks_like_version(&a) && looks_like_version(&b) {
        return Some(compare_versions(&a, &b));
    }
    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        return x.partial_cmp(&y);
    }
    Some(a.cmp(&b))
}

fn as_text(value: &Val) -> Option<String> {
    match value {
        Val::Str(s) => Some(s.clone()),
        Val::Num(n) => Some(format_num(*n)),
        Val::Bool(b) => Some(b.to_string()),
        Val::List(_) | Val::Missing => None,
    }
}

fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        let whole = n as i64;
        whole.to_string()
    } else {
        n.to_string()
    }
}

fn looks_like_version(text: &str) -> bool {
    text.contains('.')
        && !text.is_empty()
        && text.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// `haystack CONTAINS needle`: collection membership or substring.
fn contains(haystack: &Val, needle: &Val) -> bool {
    match haystack {
        Val::List(items) => items.iter().any(|item| val_eq(item, needle)),
        Val::Str(text) => as_text(needle).is_some_and(|n| text.contains(&n)),
        _ => false,
    }
}

fn string_pair(lhs: &Val, rhs: &Val) -> Option<(String, String)> {
    Some((as_text(lhs)?, as_text(rhs)?))
}

/// Match a LIKE pattern with `*` (any run) and `?` (any one char).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    fn inner(pattern: &[char], text: &[char]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some('*') => {
                (0..=text.len()).any(|skip| inner(&pattern[1..], &text[skip..]))
            }
            Some('?') => !text.is_empty() && inner(&pattern[1..], &text[1..]),
            Some(c) => text.first() == Some(c) && inner(&pattern[1..], &text[1..]),
        }
    }
    inner(&pattern, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("os_vers".into(), Value::String("14.5".into()));
        dict.insert("machine_type".into(), Value::String("laptop".into()));
        dict.insert("munki_version".into(), Value::String("6.3.1".into()));
        dict.insert("physical_memory_gb".into(), Value::Integer(16.into()));
        dict.insert(
            "catalogs".into(),
            Value::Array(vec![
                Value::String("testing".into()),
                Value::String("production".into()),
            ]),
        );
        dict
    }

    #[test]
    fn equality_and_boolean_composition() {
        let ctx = context();
        assert!(evaluate("machine_type == \"laptop\"", &ctx).unwrap());
        assert!(!evaluate("machine_type == \"desktop\"", &ctx).unwrap());
        assert!(evaluate(
            "machine_type == \"laptop\" AND os_vers BEGINSWITH \"14\"",
            &ctx
        )
        .unwrap());
        assert!(evaluate(
            "machine_type == \"desktop\" OR os_vers BEGINSWITH \"14\"",
            &ctx
        )
        .unwrap());
        assert!(evaluate("NOT machine_type == \"desktop\"", &ctx).unwrap());
    }

    #[test]
    fn version_comparison_is_segment_aware() {
        let ctx = context();
        // Lexicographic comparison would get this wrong ("14.5" < "9").
        assert!(evaluate("os_vers > \"9.0\"", &ctx).unwrap());
        assert!(evaluate("os_vers >= \"14.5\"", &ctx).unwrap());
        assert!(evaluate("munki_version < \"6.10\"", &ctx).unwrap());
    }

    #[test]
    fn numeric_comparison() {
        let ctx = context();
        assert!(evaluate("physical_memory_gb >= 8", &ctx).unwrap());
        assert!(!evaluate("physical_memory_gb < 16", &ctx).unwrap());
    }

    #[test]
    fn catalogs_membership() {
        let ctx = context();
        assert!(evaluate("catalogs CONTAINS \"production\"", &ctx).unwrap());
        assert!(!evaluate("catalogs CONTAINS \"development\"", &ctx).unwrap());
        assert!(evaluate("\"testing\" IN catalogs", &ctx).unwrap());
        assert!(evaluate("machine_type IN {\"laptop\", \"desktop\"}", &ctx).unwrap());
    }

    #[test]
    fn like_pattern_matching() {
        let ctx = context();
        assert!(evaluate("os_vers LIKE \"14.*\"", &ctx).unwrap());
        assert!(evaluate("machine_type LIKE \"l?ptop\"", &ctx).unwrap());
        assert!(!evaluate("machine_type LIKE \"desk*\"", &ctx).unwrap());
    }

    #[test]
    fn missing_keys_compare_false() {
        let ctx = context();
        assert!(!evaluate("no_such_key == \"anything\"", &ctx).unwrap());
        assert!(evaluate("no_such_key != \"anything\"", &ctx).unwrap());
        assert!(!evaluate("no_such_key > \"1\"", &ctx).unwrap());
    }

    #[test]
    fn parenthesized_grouping() {
        let ctx = context();
        assert!(evaluate(
            "(machine_type == \"desktop\" OR machine_type == \"laptop\") AND os_vers >= \"14.0\"",
            &ctx
        )
        .unwrap());
    }

    #[test]
    fn syntax_errors_are_reported() {
        let ctx = context();
        assert!(evaluate("machine_type = \"laptop\"", &ctx).is_err());
        assert!(evaluate("machine_type ==", &ctx).is_err());
        assert!(evaluate("(machine_type == \"laptop\"", &ctx).is_err());
        assert!(evaluate("os_vers BEGINSWITH \"14", &ctx).is_err());
    }
}
