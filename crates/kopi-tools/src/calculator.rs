//! Arithmetic evaluation with a strict token allow-list.
//!
//! The expression is tokenized and evaluated by a small recursive-descent
//! parser.  Anything outside the allow-list — bare identifiers, attribute
//! access, function calls other than a fixed set of math functions — is
//! rejected before evaluation, and every intermediate value is checked
//! against a magnitude cap so expressions like `10^10^10` cannot exhaust
//! resources.  The adapter never lets a fault escape: all failures become
//! [`ToolOutcome::Rejected`].

use thiserror::Error;
use tracing::debug;

use crate::outcome::{ToolOutcome, ToolValue};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Limits applied before and during evaluation.
#[derive(Debug, Clone)]
pub struct CalculatorConfig {
    /// Maximum expression length in characters.
    pub max_length: usize,

    /// Maximum number of tokens after lexing.
    pub max_tokens: usize,

    /// Absolute magnitude cap applied to every intermediate value.
    pub max_magnitude: f64,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            max_length: 100,
            max_tokens: 64,
            max_magnitude: 1e15,
        }
    }
}

/// Math functions the parser will accept.  Any other identifier is rejected.
const ALLOWED_FUNCTIONS: &[&str] = &["sqrt", "abs", "round", "floor", "ceil", "min", "max"];

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// The calculator tool adapter.
#[derive(Debug, Clone, Default)]
pub struct Calculator {
    config: CalculatorConfig,
}

impl Calculator {
    /// Create a calculator with the given limits.
    pub fn new(config: CalculatorConfig) -> Self {
        Self { config }
    }

    /// Evaluate a candidate arithmetic expression.
    ///
    /// Returns `Success` with the numeric value, or `Rejected` with a
    /// user-presentable reason.  This adapter is pure and synchronous; it
    /// has no backend to be unavailable.
    pub fn invoke(&self, expression: &str) -> ToolOutcome {
        match self.evaluate(expression) {
            Ok(value) => {
                debug!(expression, value, "expression evaluated");
                ToolOutcome::Success(ToolValue::Number {
                    expression: expression.trim().to_owned(),
                    value,
                })
            }
            Err(e) => {
                debug!(expression, error = %e, "expression rejected");
                ToolOutcome::rejected(e.to_string())
            }
        }
    }

    fn evaluate(&self, expression: &str) -> Result<f64, CalcError> {
        let expr = expression.trim();
        if expr.is_empty() {
            return Err(CalcError::Empty);
        }
        if expr.len() > self.config.max_length {
            return Err(CalcError::TooLong {
                max: self.config.max_length,
            });
        }

        let tokens = tokenize(expr)?;
        if tokens.len() > self.config.max_tokens {
            return Err(CalcError::TooLong {
                max: self.config.max_length,
            });
        }

        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            max_magnitude: self.config.max_magnitude,
        };
        let value = parser.parse_expr()?;
        parser.expect_end()?;

        if !value.is_finite() {
            return Err(CalcError::Overflow);
        }
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Internal evaluation errors; mapped to rejection reasons at the boundary.
#[derive(Debug, Error)]
enum CalcError {
    #[error("no expression provided")]
    Empty,

    #[error("expression too long (limit {max} characters)")]
    TooLong { max: usize },

    #[error("invalid character `{0}` in expression")]
    InvalidChar(char),

    #[error("`{0}` is not an allowed function")]
    UnknownFunction(String),

    #[error("unexpected token at position {0}")]
    UnexpectedToken(usize),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("division by zero")]
    DivisionByZero,

    #[error("result exceeds the allowed magnitude")]
    Overflow,

    #[error("sqrt of a negative number")]
    NegativeSqrt,

    #[error("{0} expects at least one argument")]
    MissingArguments(&'static str),
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Func(&'static str),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, CalcError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                // `**` is accepted as power, matching common calculator input.
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Caret);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value: f64 = text.parse().map_err(|_| CalcError::UnexpectedToken(start))?;
                tokens.push(Token::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                let lower = name.to_ascii_lowercase();
                // Only allow-listed function names followed by `(` survive;
                // everything else (variables, dunders, import-like tokens)
                // is rejected here, before any evaluation.
                let allowed = ALLOWED_FUNCTIONS
                    .iter()
                    .find(|f| **f == lower)
                    .copied()
                    .ok_or_else(|| CalcError::UnknownFunction(name.clone()))?;
                if chars.get(i) != Some(&'(') {
                    return Err(CalcError::UnknownFunction(name));
                }
                tokens.push(Token::Func(allowed));
            }
            other => return Err(CalcError::InvalidChar(other)),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser / evaluator
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    max_magnitude: f64,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_end(&self) -> Result<(), CalcError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(CalcError::UnexpectedToken(self.pos))
        }
    }

    fn check(&self, value: f64) -> Result<f64, CalcError> {
        if !value.is_finite() || value.abs() > self.max_magnitude {
            Err(CalcError::Overflow)
        } else {
            Ok(value)
        }
    }

    /// expr := term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.parse_term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    value = self.check(value + rhs)?;
                }
                Token::Minus => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    value = self.check(value - rhs)?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    /// term := power (('*' | '/' | '%') power)*
    fn parse_term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.parse_power()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.advance();
                    let rhs = self.parse_power()?;
                    value = self.check(value * rhs)?;
                }
                Token::Slash => {
                    self.advance();
                    let rhs = self.parse_power()?;
                    if rhs == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    value = self.check(value / rhs)?;
                }
                Token::Percent => {
                    self.advance();
                    let rhs = self.parse_power()?;
                    if rhs == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    value = self.check(value % rhs)?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    /// power := unary ('^' power)?   (right-associative)
    fn parse_power(&mut self) -> Result<f64, CalcError> {
        let base = self.parse_unary()?;
        if self.peek() == Some(&Token::Caret) {
            self.advance();
            let exponent = self.parse_power()?;
            return self.check(base.powf(exponent));
        }
        Ok(base)
    }

    /// unary := '-' unary | primary
    fn parse_unary(&mut self) -> Result<f64, CalcError> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            let value = self.parse_unary()?;
            return Ok(-value);
        }
        self.parse_primary()
    }

    /// primary := number | '(' expr ')' | func '(' args ')'
    fn parse_primary(&mut self) -> Result<f64, CalcError> {
        match self.advance() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.check(n)
            }
            Some(Token::LParen) => {
                let value = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    Some(_) => Err(CalcError::UnexpectedToken(self.pos - 1)),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some(Token::Func(name)) => {
                let name = *name;
                match self.advance() {
                    Some(Token::LParen) => {}
                    Some(_) => return Err(CalcError::UnexpectedToken(self.pos - 1)),
                    None => return Err(CalcError::UnexpectedEnd),
                }
                let mut args = vec![self.parse_expr()?];
                while self.peek() == Some(&Token::Comma) {
                    self.advance();
                    args.push(self.parse_expr()?);
                }
                match self.advance() {
                    Some(Token::RParen) => {}
                    Some(_) => return Err(CalcError::UnexpectedToken(self.pos - 1)),
                    None => return Err(CalcError::UnexpectedEnd),
                }
                let value = apply_function(name, &args)?;
                self.check(value)
            }
            Some(_) => Err(CalcError::UnexpectedToken(self.pos - 1)),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

fn apply_function(name: &'static str, args: &[f64]) -> Result<f64, CalcError> {
    let single = |args: &[f64]| -> Result<f64, CalcError> {
        args.first()
            .copied()
            .ok_or(CalcError::MissingArguments(name))
    };

    match name {
        "sqrt" => {
            let x = single(args)?;
            if x < 0.0 {
                return Err(CalcError::NegativeSqrt);
            }
            Ok(x.sqrt())
        }
        "abs" => Ok(single(args)?.abs()),
        "round" => Ok(single(args)?.round()),
        "floor" => Ok(single(args)?.floor()),
        "ceil" => Ok(single(args)?.ceil()),
        "min" => {
            if args.is_empty() {
                return Err(CalcError::MissingArguments(name));
            }
            Ok(args.iter().copied().fold(f64::INFINITY, f64::min))
        }
        "max" => {
            if args.is_empty() {
                return Err(CalcError::MissingArguments(name));
            }
            Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        }
        _ => Err(CalcError::UnknownFunction(name.to_owned())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
