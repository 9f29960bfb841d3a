//! Band-math expressions over `b1..bn`.
//!
//! Grammar:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := '-' unary | atom
//! atom   := number | 'b' digits | '(' expr ')'
//! ```

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    /// Zero-based band index.
    Band(usize),
    Neg(Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, bands: &[&[f64]], i: usize) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Band(b) => bands[*b][i],
            Expr::Neg(e) => -e.eval(bands, i),
            Expr::Binary(op, l, r) => {
                let (l, r) = (l.eval(bands, i), r.eval(bands, i));
                match op {
                    Op::Add => l + r,
                    Op::Sub => l - r,
                    Op::Mul => l * r,
                    Op::Div => l / r,
                }
            }
        }
    }

    fn max_band(&self) -> Option<usize> {
        match self {
            Expr::Number(_) => None,
            Expr::Band(b) => Some(*b),
            Expr::Neg(e) => e.max_band(),
            Expr::Binary(_, l, r) => l.max_band().max(r.max_band()),
        }
    }
}

/// A parsed expression together with its source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BandExpression {
    source: String,
    root: Expr,
}

impl BandExpression {
    pub fn parse(source: &str) -> Result<Self, String> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expr()?;
        if let Some(token) = parser.peek() {
            return Err(format!("unexpected {token:?} in expression '{source}'"));
        }
        Ok(Self {
            source: source.trim().to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of bands the expression needs (highest referenced index).
    pub fn bands_required(&self) -> usize {
        self.root.max_band().map_or(0, |b| b + 1)
    }

    /// Evaluate pixel-wise over equally sized band planes.
    pub fn evaluate(&self, bands: &[&[f64]]) -> Result<Vec<f64>, TaskError> {
        let required = self.bands_required();
        if required > bands.len() {
            return Err(TaskError::InvalidInput(format!(
                "expression '{}' references b{} but the image has {} bands",
                self.source,
                required,
                bands.len()
            )));
        }
        let len = bands.first().map_or(0, |b| b.len());
        Ok((0..len).map(|i| self.root.eval(bands, i)).collect())
    }
}

impl TryFrom<String> for BandExpression {
    type Error = String;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Self::parse(&source)
    }
}

impl From<BandExpression> for String {
    fn from(expression: BandExpression) -> Self {
        expression.source
    }
}

impl std::fmt::Display for BandExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Band(usize),
    Op(char),
    Open,
    Close,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            'b' | 'B' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                let digits: String = chars[start..end].iter().collect();
                let band: usize = digits
                    .parse()
                    .map_err(|_| format!("band reference at {i} needs a number, e.g. b1"))?;
                if band == 0 {
                    return Err("bands are numbered from b1".to_string());
                }
                tokens.push(Token::Band(band - 1));
                i = end;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse()
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Number(value));
            }
            other => return Err(format!("unexpected character '{other}' at {i}")),
        }
    }
    if tokens.is_empty() {
        return Err("expression is empty".to_string());
    }
    Ok(tokens)
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

    fn expr(&mut self) -> Result<Expr, String> {
        let mut left = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' { Op::Add } else { Op::Sub };
            self.pos += 1;
            left = Expr::Binary(op, Box::new(left), Box::new(self.term()?));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek() {
            let op = if *c == '*' { Op::Mul } else { Op::Div };
            self.pos += 1;
            left = Expr::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Band(b)) => Ok(Expr::Band(b)),
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected {other:?}")),
            None => Err("expression ends unexpectedly".to_string()),
        }
    }
}
