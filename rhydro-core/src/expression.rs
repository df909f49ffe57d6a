//! Arithmetic expressions over named boundary values.
//!
//! # Grammar
//!
//! ```text
//! expr    = term (('+' | '-') term)*
//! term    = unary (('*' | '/') unary)*
//! unary   = '-' unary | power
//! power   = atom (('^' | '**') unary)?
//! atom    = number | name | name '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! Functions: `sqrt`, `exp`, `ln`, `log10`, `abs`, `min`, `max`, `pow`.
//! A missing operand (`NaN`) makes the result missing without raising an error.

use crate::errors::{HydroError, HydroResult};
use crate::timeseries::FloatValue;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(FloatValue),
    Name(String),
    Neg(Box<Node>),
    Binary(Op, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

const FUNCTIONS: [(&str, usize); 8] = [
    ("sqrt", 1),
    ("exp", 1),
    ("ln", 1),
    ("log10", 1),
    ("abs", 1),
    ("min", 2),
    ("max", 2),
    ("pow", 2),
];

/// A parsed expression, ready to be evaluated once per time step.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> HydroResult<Self> {
        let mut parser = Parser {
            input: source,
            pos: 0,
        };
        parser.skip_whitespace();
        if parser.peek().is_none() {
            return Err(HydroError::ExpressionEval("empty expression".into()));
        }
        let root = parser.parse_expr()?;
        parser.skip_whitespace();
        if let Some(c) = parser.peek() {
            return Err(HydroError::ExpressionEval(format!(
                "unexpected '{c}' at position {} in '{source}'",
                parser.pos
            )));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names referenced by the expression, sorted.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        collect_names(&self.root, &mut names);
        names
    }

    /// Evaluate with `lookup` supplying the value of each name.
    pub fn eval<F>(&self, lookup: &F) -> HydroResult<FloatValue>
    where
        F: Fn(&str) -> Option<FloatValue>,
    {
        eval(&self.root, lookup)
    }
}

fn collect_names(node: &Node, names: &mut BTreeSet<String>) {
    match node {
        Node::Number(_) => {}
        Node::Name(name) => {
            names.insert(name.clone());
        }
        Node::Neg(inner) => collect_names(inner, names),
        Node::Binary(_, lhs, rhs) => {
            collect_names(lhs, names);
            collect_names(rhs, names);
        }
        Node::Call(_, args) => args.iter().for_each(|a| collect_names(a, names)),
    }
}

fn eval<F>(node: &Node, lookup: &F) -> HydroResult<FloatValue>
where
    F: Fn(&str) -> Option<FloatValue>,
{
    match node {
        Node::Number(v) => Ok(*v),
        Node::Name(name) => lookup(name)
            .ok_or_else(|| HydroError::ExpressionEval(format!("unresolved name '{name}'"))),
        Node::Neg(inner) => Ok(-eval(inner, lookup)?),
        Node::Binary(op, lhs, rhs) => {
            let a = eval(lhs, lookup)?;
            let b = eval(rhs, lookup)?;
            if a.is_nan() || b.is_nan() {
                return Ok(FloatValue::NAN);
            }
            let value = match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div => {
                    if b == 0.0 {
                        return Err(HydroError::ExpressionEval("division by zero".into()));
                    }
                    a / b
                }
                Op::Pow => a.powf(b),
            };
            finite(value, "arithmetic")
        }
        Node::Call(function, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, lookup))
                .collect::<HydroResult<Vec<_>>>()?;
            if values.iter().any(|v| v.is_nan()) {
                return Ok(FloatValue::NAN);
            }
            let x = values[0];
            let value = match function.as_str() {
                "sqrt" if x < 0.0 => {
                    return Err(HydroError::ExpressionEval(format!("sqrt of negative value {x}")))
                }
                "sqrt" => x.sqrt(),
                "exp" => x.exp(),
                "ln" | "log10" if x <= 0.0 => {
                    return Err(HydroError::ExpressionEval(format!(
                        "{function} of non-positive value {x}"
                    )))
                }
                "ln" => x.ln(),
                "log10" => x.log10(),
                "abs" => x.abs(),
                "min" => x.min(values[1]),
                "max" => x.max(values[1]),
                "pow" => x.powf(values[1]),
                other => {
                    return Err(HydroError::ExpressionEval(format!(
                        "unknown function '{other}'"
                    )))
                }
            };
            finite(value, function)
        }
    }
}

fn finite(value: FloatValue, what: &str) -> HydroResult<FloatValue> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(HydroError::ExpressionEval(format!(
            "{what} produced a non-finite value"
        )))
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn error(&self, message: &str) -> HydroError {
        HydroError::ExpressionEval(format!(
            "{message} at position {} in '{}'",
            self.pos, self.input
        ))
    }

    fn parse_expr(&mut self) -> HydroResult<Node> {
        let mut lhs = self.parse_term()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('+') => Op::Add,
                Some('-') => Op::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_term(&mut self) -> HydroResult<Node> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let rest = &self.input[self.pos..];
            let op = if rest.starts_with('*') && !rest.starts_with("**") {
                Op::Mul
            } else if rest.starts_with('/') {
                Op::Div
            } else {
                return Ok(lhs);
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> HydroResult<Node> {
        self.skip_whitespace();
        if self.peek() == Some('-') {
            self.advance();
            return Ok(Node::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> HydroResult<Node> {
        let base = self.parse_atom()?;
        self.skip_whitespace();
        if self.input[self.pos..].starts_with("**") {
            self.pos += 2;
        } else if self.peek() == Some('^') {
            self.advance();
        } else {
            return Ok(base);
        }
        // Right associative: 2^3^2 == 2^(3^2)
        let exponent = self.parse_unary()?;
        Ok(Node::Binary(Op::Pow, Box::new(base), Box::new(exponent)))
    }

    fn parse_atom(&mut self) -> HydroResult<Node> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.advance();
                let inner = self.parse_expr()?;
                self.skip_whitespace();
                if self.peek() != Some(')') {
                    return Err(self.error("missing closing parenthesis"));
                }
                self.advance();
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let name = self.parse_name();
                self.skip_whitespace();
                if self.peek() == Some('(') {
                    self.advance();
                    self.parse_call(name)
                } else {
                    Ok(Node::Name(name))
                }
            }
            Some(c) => Err(self.error(&format!("unexpected '{c}'"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_call(&mut self, name: String) -> HydroResult<Node> {
        let arity = FUNCTIONS
            .iter()
            .find(|(f, _)| *f == name)
            .map(|(_, arity)| *arity)
            .ok_or_else(|| self.error(&format!("unknown function '{name}'")))?;
        let mut args = vec![self.parse_expr()?];
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                    args.push(self.parse_expr()?);
                }
                Some(')') => {
                    self.advance();
                    break;
                }
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
        if args.len() != arity {
            return Err(self.error(&format!(
                "{name} takes {arity} argument(s), got {}",
                args.len()
            )));
        }
        Ok(Node::Call(name, args))
    }

    fn parse_number(&mut self) -> HydroResult<Node> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.advance();
        }
        // Exponent part, e.g. 1.5e-3
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mark = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.pos = mark;
            }
        }
        let text = &self.input[start..self.pos];
        text.parse::<FloatValue>()
            .map(Node::Number)
            .map_err(|_| self.error(&format!("invalid number '{text}'")))
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.advance();
        }
        self.input[start..self.pos].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use std::collections::HashMap;

    fn eval_with(source: &str, values: &[(&str, f64)]) -> HydroResult<f64> {
        let values: HashMap<&str, f64> = values.iter().copied().collect();
        Expression::parse(source)?.eval(&|name: &str| values.get(name).copied())
    }

    #[test]
    fn precedence() {
        assert_eq!(eval_with("1 + 2 * 3", &[]).unwrap(), 7.0);
        assert_eq!(eval_with("(1 + 2) * 3", &[]).unwrap(), 9.0);
        assert_eq!(eval_with("-2^2", &[]).unwrap(), -4.0);
        assert_eq!(eval_with("2^3^2", &[]).unwrap(), 512.0);
        assert_eq!(eval_with("2 ** 3", &[]).unwrap(), 8.0);
        assert_eq!(eval_with("10 - 4 - 3", &[]).unwrap(), 3.0);
        assert_eq!(eval_with("1.5e2 / 3", &[]).unwrap(), 50.0);
    }

    #[test]
    fn names_and_functions() {
        let values = [("input_1", 4.0), ("q", 2.0)];
        assert_eq!(eval_with("sqrt(input_1) + q", &values).unwrap(), 4.0);
        assert_eq!(eval_with("max(input_1, q) * min(input_1, q)", &values).unwrap(), 8.0);
        assert!(is_close!(eval_with("ln(exp(q))", &values).unwrap(), 2.0));
        assert_eq!(eval_with("pow(q, 3)", &values).unwrap(), 8.0);
        assert_eq!(eval_with("abs(-q)", &values).unwrap(), 2.0);

        let expression = Expression::parse("a * b + sqrt(c)").unwrap();
        let names: Vec<_> = expression.variables().into_iter().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn evaluation_errors() {
        assert!(matches!(
            eval_with("x + 1", &[]),
            Err(HydroError::ExpressionEval(_))
        ));
        assert!(matches!(
            eval_with("1 / (x - 1)", &[("x", 1.0)]),
            Err(HydroError::ExpressionEval(_))
        ));
        assert!(eval_with("sqrt(x)", &[("x", -1.0)]).is_err());
        assert!(eval_with("ln(0)", &[]).is_err());
    }

    #[test]
    fn missing_operand_gives_missing_result() {
        assert!(eval_with("x / 0 + 1", &[("x", f64::NAN)]).unwrap().is_nan());
        assert!(eval_with("sqrt(x)", &[("x", f64::NAN)]).unwrap().is_nan());
    }

    #[test]
    fn parse_errors() {
        assert!(Expression::parse("").is_err());
        assert!(Expression::parse("1 +").is_err());
        assert!(Expression::parse("(1 + 2").is_err());
        assert!(Expression::parse("foo(1)").is_err());
        assert!(Expression::parse("min(1)").is_err());
        assert!(Expression::parse("1 2").is_err());
    }
}
