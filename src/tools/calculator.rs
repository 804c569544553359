//! Calculator tool and its arithmetic expression evaluator.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary ('^' unary)?
//! primary := number | ident | ident '(' args ')' | '(' expr ')'
//! ```
//!
//! `**`, `×` and `÷` are accepted as aliases for `^`, `*` and `/`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::tools::{number_value, opt_numbers, opt_str, Tool, ToolError, ToolResult};

/// Nesting limit for parentheses, unary signs and exponents.
const MAX_DEPTH: usize = 128;
/// Longest accepted expression, in characters.
const MAX_EXPRESSION_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("unknown name '{0}'")]
    UnknownName(String),
    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("math domain error")]
    Domain,
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("expression longer than {0} characters")]
    TooLong(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Num(n) => write!(f, "{n}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Op(c) => write!(f, "{c}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Scientific notation: 1e3, 2.5E-4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| EvalError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Op('^'));
                i += 2;
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '×' => {
                tokens.push(Token::Op('*'));
                i += 1;
            }
            '÷' => {
                tokens.push(Token::Op('/'));
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
            other => return Err(EvalError::UnexpectedChar(other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
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

    fn expect(&mut self, expected: Token) -> Result<(), EvalError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(EvalError::UnexpectedToken(t.to_string())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err(EvalError::DivisionByZero),
                '/' => value / rhs,
                // Floored modulo, sign follows the divisor.
                _ => value - rhs * (value / rhs).floor(),
            };
        }
        Ok(value)
    }

    // Every recursive path of the grammar passes through here.
    fn unary(&mut self) -> Result<f64, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, EvalError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let args = self.args()?;
                    call(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(t) => Err(EvalError::UnexpectedToken(t.to_string())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    fn args(&mut self) -> Result<Vec<f64>, EvalError> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(t) => return Err(EvalError::UnexpectedToken(t.to_string())),
                None => return Err(EvalError::UnexpectedEnd),
            }
        }
    }
}

fn constant(name: &str) -> Result<f64, EvalError> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        "tau" => Ok(std::f64::consts::TAU),
        _ => Err(EvalError::UnknownName(name.to_string())),
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64, EvalError> {
    let arity = |expected: &'static str| EvalError::Arity {
        name: name.to_string(),
        expected,
        got: args.len(),
    };
    let one = || match args {
        [x] => Ok(*x),
        _ => Err(arity("1")),
    };

    match name {
        "sqrt" => {
            let x = one()?;
            if x < 0.0 {
                return Err(EvalError::Domain);
            }
            Ok(x.sqrt())
        }
        "abs" => Ok(one()?.abs()),
        "sin" => Ok(one()?.sin()),
        "cos" => Ok(one()?.cos()),
        "tan" => Ok(one()?.tan()),
        "exp" => Ok(one()?.exp()),
        "floor" => Ok(one()?.floor()),
        "ceil" => Ok(one()?.ceil()),
        "round" => Ok(one()?.round()),
        "ln" => log(one()?, None),
        "log" => match args {
            [x] => log(*x, None),
            [x, base] => log(*x, Some(*base)),
            _ => Err(arity("1 or 2")),
        },
        "log10" => log(one()?, Some(10.0)),
        "log2" => log(one()?, Some(2.0)),
        "pow" => match args {
            [x, y] => Ok(x.powf(*y)),
            _ => Err(arity("2")),
        },
        "min" | "max" if args.is_empty() => Err(arity("at least 1")),
        "min" => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        _ => Err(EvalError::UnknownName(name.to_string())),
    }
}

fn log(x: f64, base: Option<f64>) -> Result<f64, EvalError> {
    if x <= 0.0 || base.is_some_and(|b| b <= 0.0 || b == 1.0) {
        return Err(EvalError::Domain);
    }
    Ok(match base {
        Some(b) => x.ln() / b.ln(),
        None => x.ln(),
    })
}

/// Evaluate an arithmetic expression.
pub fn evaluate(input: &str) -> Result<f64, EvalError> {
    if input.chars().count() > MAX_EXPRESSION_LEN {
        return Err(EvalError::TooLong(MAX_EXPRESSION_LEN));
    }
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(EvalError::UnexpectedEnd);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(t) = parser.next() {
        return Err(EvalError::UnexpectedToken(t.to_string()));
    }
    if !value.is_finite() {
        return Err(EvalError::Domain);
    }
    Ok(value)
}

/// Apply a named operation to a list of values.
pub fn apply_operation(operation: &str, values: &[f64]) -> Result<f64, ToolError> {
    let fail = |msg: &str| Err(ToolError::InvalidArgument(msg.to_string()));
    match operation {
        "add" => Ok(values.iter().sum()),
        "subtract" => match values.split_first() {
            Some((first, rest)) => Ok(first - rest.iter().sum::<f64>()),
            None => fail("subtract requires at least 1 value"),
        },
        "multiply" => Ok(values.iter().product()),
        "divide" => {
            let Some((first, rest)) = values.split_first() else {
                return fail("divide requires at least 1 value");
            };
            let mut result = *first;
            for v in rest {
                if *v == 0.0 {
                    return fail("Division by zero");
                }
                result /= v;
            }
            Ok(result)
        }
        "power" => match values {
            [x, y] => Ok(x.powf(*y)),
            _ => fail("Power operation requires exactly 2 values"),
        },
        "sqrt" => match values {
            [x] if *x < 0.0 => fail("Cannot take square root of negative number"),
            [x] => Ok(x.sqrt()),
            _ => fail("Square root requires exactly 1 value"),
        },
        "log" => match values {
            [x] => log(*x, None),
            [x, b] => log(*x, Some(*b)),
            _ => return fail("Log requires 1 or 2 values"),
        }
        .map_err(|e| ToolError::InvalidArgument(e.to_string())),
        other => Err(ToolError::InvalidArgument(format!(
            "Unknown operation: {other}"
        ))),
    }
}

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Perform mathematical calculations"
    }

    fn category(&self) -> &str {
        "math"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Mathematical expression to evaluate (e.g., '2 + 2 * 3')"
                },
                "operation": {
                    "type": "string",
                    "description": "Mathematical operation",
                    "enum": ["add", "subtract", "multiply", "divide", "power", "sqrt", "log"]
                },
                "values": {
                    "type": "array",
                    "items": {"type": "number"},
                    "description": "Values to perform operation on"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        if let Some(expression) = opt_str(args, "expression")? {
            let result =
                evaluate(expression).map_err(|e| ToolError::InvalidArgument(e.to_string()))?;
            return Ok(ToolResult::success(json!({
                "expression": expression,
                "result": number_value(result),
            })));
        }

        match (opt_str(args, "operation")?, opt_numbers(args, "values")?) {
            (Some(operation), Some(values)) if !values.is_empty() => {
                let result = apply_operation(operation, &values)?;
                Ok(ToolResult::success(json!({
                    "operation": operation,
                    "values": values,
                    "result": number_value(result),
                })))
            }
            _ => Err(ToolError::InvalidArgument(
                "Provide either 'expression' or both 'operation' and 'values'".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(evaluate("2 + 2 * 3").unwrap(), 8.0);
        assert_eq!(evaluate("(2 + 2) * 3").unwrap(), 12.0);
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(evaluate("-2 ** 2").unwrap(), -4.0);
        assert_eq!(evaluate("2 ^ -1").unwrap(), 0.5);
        assert_eq!(evaluate("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(evaluate("-7 % 3").unwrap(), 2.0);
    }

    #[test]
    fn test_aliases_functions_and_constants() {
        assert_eq!(evaluate("123 × 456").unwrap(), 56088.0);
        assert_eq!(evaluate("9 ÷ 3").unwrap(), 3.0);
        assert_eq!(evaluate("sqrt(16) + max(1, 5, 3)").unwrap(), 9.0);
        assert_eq!(evaluate("log(8, 2)").unwrap(), 3.0);
        assert!((evaluate("cos(pi)").unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(evaluate("1.5e3").unwrap(), 1500.0);
    }

    #[test]
    fn test_errors() {
        assert_eq!(evaluate("1 / 0"), Err(EvalError::DivisionByZero));
        assert_eq!(evaluate("sqrt(-1)"), Err(EvalError::Domain));
        assert_eq!(evaluate(""), Err(EvalError::UnexpectedEnd));
        assert_eq!(evaluate("2 +"), Err(EvalError::UnexpectedEnd));
        assert!(matches!(evaluate("(1"), Err(EvalError::UnexpectedEnd)));
        assert!(matches!(evaluate("1 2"), Err(EvalError::UnexpectedToken(_))));
        assert!(matches!(evaluate("__import__"), Err(EvalError::UnknownName(_))));
        assert!(matches!(evaluate("2 $ 3"), Err(EvalError::UnexpectedChar('$'))));
        assert!(matches!(evaluate("pow(1)"), Err(EvalError::Arity { .. })));
    }

    #[test]
    fn test_nesting_and_length_limits() {
        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&nested).unwrap(), 1.0);
        assert_eq!(evaluate(&format!("{}5", "-".repeat(100))).unwrap(), 5.0);

        let deep = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
        assert_eq!(evaluate(&deep), Err(EvalError::TooLong(MAX_EXPRESSION_LEN)));
        let deep = format!("{}1{}", "(".repeat(400), ")".repeat(400));
        assert_eq!(evaluate(&deep), Err(EvalError::TooDeep(MAX_DEPTH)));
        let signs = format!("{}1", "-".repeat(500));
        assert_eq!(evaluate(&signs), Err(EvalError::TooDeep(MAX_DEPTH)));
        let powers = format!("2{}", "^1".repeat(300));
        assert_eq!(evaluate(&powers), Err(EvalError::TooDeep(MAX_DEPTH)));
        let calls = format!("{}1{}", "abs(".repeat(150), ")".repeat(150));
        assert_eq!(evaluate(&calls), Err(EvalError::TooDeep(MAX_DEPTH)));
    }

    #[tokio::test]
    async fn test_tool_rejects_runaway_input() {
        let expression = "-".repeat(100_000) + "1";
        let args = json!({"expression": expression}).as_object().cloned().unwrap();
        let err = CalculatorTool.execute(&args).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument(_)));
    }

    #[test]
    fn test_operations() {
        assert_eq!(apply_operation("add", &[1.0, 2.0, 3.0]).unwrap(), 6.0);
        assert_eq!(apply_operation("subtract", &[10.0, 3.0, 2.0]).unwrap(), 5.0);
        assert_eq!(apply_operation("multiply", &[2.0, 3.0, 4.0]).unwrap(), 24.0);
        assert_eq!(apply_operation("power", &[2.0, 10.0]).unwrap(), 1024.0);
        assert!(apply_operation("divide", &[1.0, 0.0]).is_err());
        assert!(apply_operation("sqrt", &[-4.0]).is_err());
        assert!(apply_operation("power", &[2.0]).is_err());
        assert!(apply_operation("modulo", &[2.0]).is_err());
    }

    #[tokio::test]
    async fn test_tool_execute() {
        let args = json!({"expression": "123 * 456"}).as_object().cloned().unwrap();
        let result = CalculatorTool.execute(&args).await.unwrap();
        assert_eq!(result.data["result"], json!(56088));

        let args = json!({"operation": "divide", "values": [7, 2]}).as_object().cloned().unwrap();
        let result = CalculatorTool.execute(&args).await.unwrap();
        assert_eq!(result.data["result"], json!(3.5));

        assert!(CalculatorTool.execute(&Map::new()).await.is_err());
    }
}
