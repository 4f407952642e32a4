//! Conditional-compilation predicates on exercise cases.
//!
//! A case gated by `#[cfg(...)]` only exists in the compiled crate when its
//! predicate holds for the compiler's active configuration, as printed by
//! `rustc --print cfg`. Cases whose predicates fail are dropped before the
//! dispatch harness is rendered.

use std::collections::BTreeSet;

use crate::core::types::ExerciseCase;

/// Active configuration options: bare names (`unix`) and `name="value"` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CfgSet {
    names: BTreeSet<String>,
    pairs: BTreeSet<(String, String)>,
}

impl CfgSet {
    /// Parse the output of `rustc --print cfg`.
    pub fn parse(output: &str) -> Self {
        let mut set = Self::default();
        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.split_once('=') {
                Some((name, value)) => {
                    set.pairs.insert((
                        name.trim().to_string(),
                        value.trim().trim_matches('"').to_string(),
                    ));
                }
                None => {
                    set.names.insert(line.to_string());
                }
            }
        }
        set
    }

    /// Whether `predicate` (the text inside `cfg(...)`) holds.
    ///
    /// `None` when the predicate cannot be parsed.
    pub fn evaluate(&self, predicate: &str) -> Option<bool> {
        let tokens = tokenize(predicate)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return None;
        }
        Some(self.holds(&expr))
    }

    /// All predicates hold. Unparsable predicates count as holding, so the
    /// compiler (not the runner) gets the final word on them.
    pub fn enables(&self, predicates: &[String]) -> bool {
        predicates
            .iter()
            .all(|predicate| self.evaluate(predicate).unwrap_or(true))
    }

    fn holds(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Name(name) => self.names.contains(name),
            Expr::Pair(name, value) => self.pairs.contains(&(name.clone(), value.clone())),
            Expr::Any(items) => items.iter().any(|item| self.holds(item)),
            Expr::All(items) => items.iter().all(|item| self.holds(item)),
            Expr::Not(item) => !self.holds(item),
        }
    }
}

/// Keep the cases `cfg` enables, renumbering their order.
pub fn retain_enabled(cases: Vec<ExerciseCase>, cfg: &CfgSet) -> Vec<ExerciseCase> {
    cases
        .into_iter()
        .filter(|case| cfg.enables(&case.cfg))
        .enumerate()
        .map(|(order, case)| ExerciseCase { order, ..case })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Open,
    Close,
    Comma,
    Eq,
}

#[derive(Debug)]
enum Expr {
    Name(String),
    Pair(String, String),
    Any(Vec<Expr>),
    All(Vec<Expr>),
    Not(Box<Expr>),
}

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' | '=' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::Open,
                    ')' => Token::Close,
                    ',' => Token::Comma,
                    _ => Token::Eq,
                });
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => value.push(chars.next()?),
                        other => value.push(other),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if !(c.is_alphanumeric() || c == '_') {
                        break;
                    }
                    ident.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            _ => return None,
        }
    }
    Some(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expr(&mut self) -> Option<Expr> {
        let Some(Token::Ident(name)) = self.advance() else {
            return None;
        };
        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                let Some(Token::Str(value)) = self.advance() else {
                    return None;
                };
                Some(Expr::Pair(name, value))
            }
            Some(Token::Open) => {
                self.pos += 1;
                let items = self.list()?;
                match name.as_str() {
                    "any" => Some(Expr::Any(items)),
                    "all" => Some(Expr::All(items)),
                    "not" => {
                        let mut items = items;
                        if items.len() != 1 {
                            return None;
                        }
                        items.pop().map(|item| Expr::Not(Box::new(item)))
                    }
                    _ => None,
                }
            }
            _ => Some(Expr::Name(name)),
        }
    }

    /// Comma-separated predicates up to the closing parenthesis.
    fn list(&mut self) -> Option<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(&Token::Close) {
                self.pos += 1;
                return Some(items);
            }
            items.push(self.expr()?);
            match self.advance()? {
                Token::Comma => {}
                Token::Close => return Some(items),
                _ => return None,
            }
        }
    }
}
