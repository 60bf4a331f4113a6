//! Calibration formula language.
//!
//! Sensor capabilities may declare a formula that corrects the raw reading
//! before it is reported, for example `{}/1.333 + 2`. The grammar is
//! deliberately tiny:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | primary
//! primary := NUMBER | '{}' | '(' expr ')'
//! ```
//!
//! `{}` (or the positional form `{0}`) stands for the raw reading and must
//! occur exactly once. There are no identifiers, calls or assignments.
//!
//! A formula is compiled once into a flat node arena. Children are always
//! pushed before their parent, so evaluation is a single forward pass.

use std::fmt;

/// Placeholder token substituted with the raw reading.
pub const PLACEHOLDER: &str = "{}";

/// Deepest nesting of parentheses and unary signs a formula may use.
pub const MAX_NESTING: usize = 64;

/// Errors produced while compiling or evaluating a formula.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    /// The formula is not valid in the calibration grammar.
    #[error("invalid calibration formula at column {}: {message}", .position + 1)]
    Parse { position: usize, message: String },

    /// A divisor evaluated to zero.
    #[error("division by zero in calibration formula")]
    DivisionByZero,
}

impl ExprError {
    fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

/// Index into the node arena.
type NodeId = u32;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Literal(f64),
    Raw,
    Neg(NodeId),
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Placeholder,
    Op(BinaryOp),
    LParen,
    RParen,
}

/// A compiled calibration formula.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationExpr {
    source: String,
    nodes: Vec<Node>,
}

impl CalibrationExpr {
    /// Compile a formula string.
    pub fn parse(formula: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(formula)?;
        if tokens.is_empty() {
            return Err(ExprError::parse(0, "formula is empty"));
        }

        let placeholders = tokens
            .iter()
            .filter(|(t, _)| matches!(t, Token::Placeholder))
            .count();
        if placeholders != 1 {
            return Err(ExprError::parse(
                0,
                format!(
                    "formula must reference the raw value '{}' exactly once, found {}",
                    PLACEHOLDER, placeholders
                ),
            ));
        }

        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: formula.len(),
            depth: 0,
            nodes: Vec::with_capacity(tokens.len()),
        };
        parser.expr()?;
        if let Some((token, at)) = parser.peek() {
            let message = match token {
                Token::RParen => "unbalanced ')'".to_string(),
                other => format!("unexpected {}", describe(other)),
            };
            return Err(ExprError::parse(at, message));
        }

        let compiled = Self {
            source: formula.to_string(),
            nodes: parser.nodes,
        };
        compiled.check_constant_divisors()?;
        Ok(compiled)
    }

    /// The formula text this expression was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with `raw` substituted for the placeholder.
    pub fn eval(&self, raw: f64) -> Result<f64, ExprError> {
        let mut values: Vec<f64> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let value = match *node {
                Node::Literal(v) => v,
                Node::Raw => raw,
                Node::Neg(inner) => -values[inner as usize],
                Node::Binary { op, lhs, rhs } => {
                    apply(op, values[lhs as usize], values[rhs as usize])?
                }
            };
            values.push(value);
        }
        // The parser always leaves the root as the last node.
        values
            .pop()
            .ok_or_else(|| ExprError::parse(0, "formula is empty"))
    }

    /// Reject divisors that are constant zero, e.g. `{} / (2 - 2)`.
    ///
    /// Such a formula can never succeed, so it is reported at compile time
    /// instead of on every poll.
    fn check_constant_divisors(&self) -> Result<(), ExprError> {
        let mut constant: Vec<Option<f64>> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let value = match *node {
                Node::Literal(v) => Some(v),
                Node::Raw => None,
                Node::Neg(inner) => constant[inner as usize].map(|v| -v),
                Node::Binary { op, lhs, rhs } => {
                    let rhs = constant[rhs as usize];
                    if op == BinaryOp::Div && rhs == Some(0.0) {
                        return Err(ExprError::DivisionByZero);
                    }
                    match (constant[lhs as usize], rhs) {
                        (Some(l), Some(r)) => Some(apply(op, l, r)?),
                        _ => None,
                    }
                }
            };
            constant.push(value);
        }
        Ok(())
    }
}

impl fmt::Display for CalibrationExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for CalibrationExpr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Compile and evaluate `formula` in one step.
///
/// Prefer [`CalibrationExpr::parse`] once plus [`CalibrationExpr::eval`]
/// per reading when the same formula is applied repeatedly.
pub fn evaluate(formula: &str, raw: f64) -> Result<f64, ExprError> {
    CalibrationExpr::parse(formula)?.eval(raw)
}

fn apply(op: BinaryOp, lhs: f64, rhs: f64) -> Result<f64, ExprError> {
    Ok(match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        BinaryOp::Div => {
            if rhs == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            lhs / rhs
        }
    })
}

fn describe(token: Token) -> String {
    match token {
        Token::Number(v) => format!("number {}", v),
        Token::Placeholder => format!("placeholder '{}'", PLACEHOLDER),
        Token::Op(op) => format!("operator '{}'", op.symbol()),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'+' => tokens.push((Token::Op(BinaryOp::Add), start)),
            b'-' => tokens.push((Token::Op(BinaryOp::Sub), start)),
            b'*' => tokens.push((Token::Op(BinaryOp::Mul), start)),
            b'/' => tokens.push((Token::Op(BinaryOp::Div), start)),
            b'(' => tokens.push((Token::LParen, start)),
            b')' => tokens.push((Token::RParen, start)),
            b'{' => {
                let close = input[start..]
                    .find('}')
                    .map(|off| start + off)
                    .ok_or_else(|| ExprError::parse(start, "unterminated placeholder"))?;
                let inner = input[start + 1..close].trim();
                if !(inner.is_empty() || inner == "0") {
                    return Err(ExprError::parse(
                        start,
                        format!(
                            "unknown placeholder '{{{}}}', only '{}' is allowed",
                            inner, PLACEHOLDER
                        ),
                    ));
                }
                tokens.push((Token::Placeholder, start));
                i = close + 1;
                continue;
            }
            b'0'..=b'9' | b'.' => {
                let len = scan_number(&bytes[start..]);
                let text = &input[start..start + len];
                let value: f64 = text
                    .parse()
                    .map_err(|_| ExprError::parse(start, format!("invalid number '{}'", text)))?;
                tokens.push((Token::Number(value), start));
                i = start + len;
                continue;
            }
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(ExprError::parse(
                    start,
                    format!("unexpected character '{}'", ch),
                ));
            }
        }
        i += 1;
    }

    Ok(tokens)
}

/// Length of the decimal literal at the start of `bytes`, including an
/// optional exponent.
fn scan_number(bytes: &[u8]) -> usize {
    let mut len = 0;
    while len < bytes.len() && (bytes[len].is_ascii_digit() || bytes[len] == b'.') {
        len += 1;
    }
    if len < bytes.len() && (bytes[len] == b'e' || bytes[len] == b'E') {
        let mut exp = len + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        let digits_start = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > digits_start {
            len = exp;
        }
    }
    len
}

struct Parser<'a> {
    tokens: &'a [(Token, usize)],
    pos: usize,
    end: usize,
    depth: usize,
    nodes: Vec<Node>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<(Token, usize)> {
        self.tokens.get(self.pos).copied()
    }

    fn descend(&mut self, at: usize) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ExprError::parse(
                at,
                format!("nesting deeper than {} levels", MAX_NESTING),
            ));
        }
        Ok(())
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        (self.nodes.len() - 1) as NodeId
    }

    fn expr(&mut self) -> Result<NodeId, ExprError> {
        let mut lhs = self.term()?;
        while let Some((Token::Op(op @ (BinaryOp::Add | BinaryOp::Sub)), _)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = self.push(Node::Binary { op, lhs, rhs });
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<NodeId, ExprError> {
        let mut lhs = self.unary()?;
        while let Some((Token::Op(op @ (BinaryOp::Mul | BinaryOp::Div)), _)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = self.push(Node::Binary { op, lhs, rhs });
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<NodeId, ExprError> {
        match self.peek() {
            Some((Token::Op(BinaryOp::Sub), at)) => {
                self.pos += 1;
                self.descend(at)?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(self.push(Node::Neg(inner)))
            }
            Some((Token::Op(BinaryOp::Add), at)) => {
                self.pos += 1;
                self.descend(at)?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(inner)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<NodeId, ExprError> {
        let Some((token, at)) = self.peek() else {
            return Err(ExprError::parse(self.end, "unexpected end of formula"));
        };
        self.pos += 1;
        match token {
            Token::Number(v) => Ok(self.push(Node::Literal(v))),
            Token::Placeholder => Ok(self.push(Node::Raw)),
            Token::LParen => {
                self.descend(at)?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.peek() {
                    Some((Token::RParen, _)) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(ExprError::parse(at, "unbalanced '('")),
                }
            }
            other => Err(ExprError::parse(at, format!("unexpected {}", describe(other)))),
        }
    }
}
