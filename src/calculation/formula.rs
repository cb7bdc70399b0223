//! Formula pay element evaluation.
//!
//! Formula elements carry a small arithmetic expression that is parsed once
//! when the element is defined and evaluated per employee with exact decimal
//! arithmetic.
//!
//! Supported syntax: decimal literals, `+ - * /`, unary minus, parentheses,
//! `min(a, b)` / `max(a, b)`, and the variables `basic_salary`, `hours`,
//! `days`, `units` and `rate`.

use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};

/// Variables a formula can reference.
pub const FORMULA_VARIABLES: [&str; 5] = ["basic_salary", "hours", "days", "units", "rate"];

/// Values bound to the formula variables for one employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormulaContext {
    /// The employee's basic salary for the period.
    pub basic_salary: Decimal,
    /// Hours from the assignment.
    pub hours: Decimal,
    /// Days from the assignment.
    pub days: Decimal,
    /// Units from the assignment.
    pub units: Decimal,
    /// Rate from the assignment.
    pub rate: Decimal,
}

impl FormulaContext {
    fn lookup(&self, name: &str) -> Option<Decimal> {
        match name {
            "basic_salary" => Some(self.basic_salary),
            "hours" => Some(self.hours),
            "days" => Some(self.days),
            "units" => Some(self.units),
            "rate" => Some(self.rate),
            _ => None,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Number(Decimal),
    Variable(String),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(Decimal),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

/// A parsed formula.
///
/// # Example
///
/// ```
/// use payrun_engine::calculation::{Formula, FormulaContext};
/// use rust_decimal::Decimal;
///
/// let formula = Formula::parse("min(basic_salary * 0.1, 2000)").unwrap();
/// let context = FormulaContext {
///     basic_salary: Decimal::new(3500000, 2),
///     ..Default::default()
/// };
/// assert_eq!(formula.evaluate(&context).unwrap(), Decimal::new(2000, 0));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Parses an expression, rejecting unknown variables and malformed syntax.
    pub fn parse(source: &str) -> EngineResult<Formula> {
        let error = |message: String| EngineError::FormulaError {
            expression: source.to_string(),
            message,
        };

        let tokens = tokenize(source).map_err(error)?;
        if tokens.is_empty() {
            return Err(error("expression is empty".to_string()));
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expression().map_err(error)?;
        if let Some(token) = parser.peek() {
            return Err(error(format!("unexpected {:?} after expression", token)));
        }

        Ok(Formula {
            source: source.to_string(),
            expr,
        })
    }

    /// The formula source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the formula. Fails on division by zero or overflow.
    pub fn evaluate(&self, context: &FormulaContext) -> EngineResult<Decimal> {
        evaluate(&self.expr, context).map_err(|message| EngineError::FormulaError {
            expression: self.source.clone(),
            message,
        })
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
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
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<Decimal>()
                    .map_err(|_| format!("invalid number '{}'", literal))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
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

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of expression", expected)),
        }
    }

    fn expression(&mut self) -> Result<Expr, String> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn factor(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Minus) => Ok(Expr::Negate(Box::new(self.factor()?))),
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let function = match name.as_str() {
                    "min" => Some(Function::Min),
                    "max" => Some(Function::Max),
                    _ => None,
                };
                match function {
                    Some(function) => {
                        self.expect(Token::LParen)?;
                        let a = self.expression()?;
                        self.expect(Token::Comma)?;
                        let b = self.expression()?;
                        self.expect(Token::RParen)?;
                        Ok(Expr::Call(function, Box::new(a), Box::new(b)))
                    }
                    None if FORMULA_VARIABLES.contains(&name.as_str()) => {
                        Ok(Expr::Variable(name))
                    }
                    None => Err(format!("unknown variable '{}'", name)),
                }
            }
            Some(token) => Err(format!("unexpected {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn evaluate(expr: &Expr, context: &FormulaContext) -> Result<Decimal, String> {
    match expr {
        Expr::Number(value) => Ok(*value),
        Expr::Variable(name) => context
            .lookup(name)
            .ok_or_else(|| format!("unknown variable '{}'", name)),
        Expr::Negate(inner) => Ok(-evaluate(inner, context)?),
        Expr::Binary(op, lhs, rhs) => {
            let a = evaluate(lhs, context)?;
            let b = evaluate(rhs, context)?;
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div if b.is_zero() => return Err("division by zero".to_string()),
                BinaryOp::Div => a.checked_div(b),
            };
            result.ok_or_else(|| "arithmetic overflow".to_string())
        }
        Expr::Call(function, a, b) => {
            let a = evaluate(a, context)?;
            let b = evaluate(b, context)?;
            Ok(match function {
                Function::Min => a.min(b),
                Function::Max => a.max(b),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn context() -> FormulaContext {
        FormulaContext {
            basic_salary: dec("20000.00"),
            hours: dec("10"),
            days: dec("2"),
            units: dec("3"),
            rate: dec("150.00"),
        }
    }

    fn eval(source: &str) -> Decimal {
        Formula::parse(source).unwrap().evaluate(&context()).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3"), dec("7"));
        assert_eq!(eval("(1 + 2) * 3"), dec("9"));
        assert_eq!(eval("10 - 4 - 3"), dec("3"));
        assert_eq!(eval("12 / 3 / 2"), dec("2"));
    }

    #[test]
    fn test_variables() {
        assert_eq!(eval("hours * rate * 1.5"), dec("2250.000"));
        assert_eq!(eval("basic_salary / 21.67 * days").round_dp(2), dec("1845.86"));
        assert_eq!(eval("units * 100"), dec("300"));
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(eval("-5 + 10"), dec("5"));
        assert_eq!(eval("-(2 * 3)"), dec("-6"));
    }

    #[test]
    fn test_min_max() {
        assert_eq!(eval("min(basic_salary * 0.1, 1500)"), dec("1500"));
        assert_eq!(eval("max(hours - 12, 0)"), dec("0"));
    }

    #[test]
    fn test_unknown_variable_rejected_at_parse() {
        let result = Formula::parse("salary * 2");
        match result {
            Err(EngineError::FormulaError { message, .. }) => {
                assert!(message.contains("unknown variable 'salary'"));
            }
            other => panic!("Expected FormulaError, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_expressions_rejected() {
        assert!(Formula::parse("").is_err());
        assert!(Formula::parse("1 +").is_err());
        assert!(Formula::parse("(1 + 2").is_err());
        assert!(Formula::parse("1 2").is_err());
        assert!(Formula::parse("min(1)").is_err());
        assert!(Formula::parse("4 % 2").is_err());
        assert!(Formula::parse("1..2").is_err());
    }

    #[test]
    fn test_division_by_zero_fails_at_evaluation() {
        let formula = Formula::parse("basic_salary / (days - 2)").unwrap();
        let result = formula.evaluate(&context());
        match result {
            Err(EngineError::FormulaError { message, .. }) => {
                assert_eq!(message, "division by zero");
            }
            other => panic!("Expected FormulaError, got {:?}", other),
        }
    }

    #[test]
    fn test_source_preserved() {
        let formula = Formula::parse("hours * rate").unwrap();
        assert_eq!(formula.source(), "hours * rate");
    }
}
