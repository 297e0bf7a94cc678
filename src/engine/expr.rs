//! Arithmetic expressions for custom function types and constant arguments.
//!
//! Grammar (usual precedence, `^` is right-associative):
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/') unary)*
//! unary := '-' unary | power
//! power := atom ('^' unary)?
//! atom  := number | ident | ident '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! Identifiers resolve against an environment (parameter names and `x`);
//! calls resolve to math functions or, through a [`Callee`], to function types.

use std::collections::HashMap;

use crate::engine::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Bin(Op, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Resolves calls that are not plain math functions (function types).
pub trait Callee {
    fn call(&self, name: &str, x: f64, args: &[f64]) -> Option<f64>;
}

/// Callee that knows no function types.
pub struct NoCallee;

impl Callee for NoCallee {
    fn call(&self, _name: &str, _x: f64, _args: &[f64]) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Sym(char),
}

fn tokenize(src: &str) -> Result<Vec<Token>, EngineError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
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
                .map_err(|_| EngineError::Syntax(format!("bad number '{text}' in '{src}'")))?;
            out.push(Token::Num(value));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            out.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*/^(),".contains(c) {
            out.push(Token::Sym(c));
            i += 1;
        } else {
            return Err(EngineError::Syntax(format!("unexpected '{c}' in '{src}'")));
        }
    }
    Ok(out)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    src: &'a str,
}

impl Parser<'_> {
    fn peek_sym(&self, sym: char) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Sym(c)) if *c == sym)
    }

    fn expect_sym(&mut self, sym: char) -> Result<(), EngineError> {
        if self.peek_sym(sym) {
            self.pos += 1;
            Ok(())
        } else {
            Err(EngineError::Syntax(format!("expected '{sym}' in '{}'", self.src)))
        }
    }

    fn expr(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.term()?;
        loop {
            let op = if self.peek_sym('+') {
                Op::Add
            } else if self.peek_sym('-') {
                Op::Sub
            } else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.peek_sym('*') {
                Op::Mul
            } else if self.peek_sym('/') {
                Op::Div
            } else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, EngineError> {
        if self.peek_sym('-') {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.peek_sym('+') {
            self.pos += 1;
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, EngineError> {
        let base = self.atom()?;
        if self.peek_sym('^') {
            self.pos += 1;
            let exp = self.unary()?;
            return Ok(Expr::Bin(Op::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, EngineError> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Num(v)) => {
                self.pos += 1;
                Ok(Expr::Num(v))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                if self.peek_sym('(') {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if !self.peek_sym(')') {
                        args.push(self.expr()?);
                        while self.peek_sym(',') {
                            self.pos += 1;
                            args.push(self.expr()?);
                        }
                    }
                    self.expect_sym(')')?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(Token::Sym('(')) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect_sym(')')?;
                Ok(inner)
            }
            _ => Err(EngineError::Syntax(format!("unexpected end of '{}'", self.src))),
        }
    }
}

/// Parse an expression.
pub fn parse_expr(src: &str) -> Result<Expr, EngineError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0, src };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(EngineError::Syntax(format!("trailing input in '{src}'")));
    }
    Ok(expr)
}

fn math_call(name: &str, args: &[f64]) -> Option<f64> {
    let v = match (name, args) {
        ("exp", [a]) => a.exp(),
        ("ln", [a]) => a.ln(),
        ("sqrt", [a]) => a.sqrt(),
        ("abs", [a]) => a.abs(),
        _ => return None,
    };
    Some(v)
}

impl Expr {
    /// Evaluate with variables from `env` and the abscissa `x`.
    pub fn eval(&self, env: &HashMap<String, f64>, x: f64, callee: &dyn Callee) -> Result<f64, EngineError> {
        match self {
            Expr::Num(v) => Ok(*v),
            Expr::Var(name) => match name.as_str() {
                "x" => Ok(x),
                "pi" => Ok(std::f64::consts::PI),
                _ => env.get(name).copied().ok_or_else(|| EngineError::Undefined {
                    kind: "parameter",
                    name: name.clone(),
                }),
            },
            Expr::Neg(inner) => Ok(-inner.eval(env, x, callee)?),
            Expr::Bin(op, a, b) => {
                let a = a.eval(env, x, callee)?;
                let b = b.eval(env, x, callee)?;
                Ok(match op {
                    Op::Add => a + b,
                    Op::Sub => a - b,
                    Op::Mul => a * b,
                    Op::Div => a / b,
                    Op::Pow => a.powf(b),
                })
            }
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(env, x, callee))
                    .collect::<Result<Vec<_>, _>>()?;
                math_call(name, &values)
                    .or_else(|| callee.call(name, x, &values))
                    .ok_or_else(|| EngineError::Undefined {
                        kind: "function",
                        name: name.clone(),
                    })
            }
        }
    }

    /// Variable names referenced by the expression (excluding `x` and `pi`).
    pub fn variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Num(_) => {}
            Expr::Var(name) => {
                if name != "x" && name != "pi" && !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Neg(inner) => inner.variables(out),
            Expr::Bin(_, a, b) => {
                a.variables(out);
                b.variables(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.variables(out)),
        }
    }
}

/// Split `src` on `sep` at parenthesis depth zero; pieces are trimmed.
pub fn split_top_level(src: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in src.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            _ if c == sep && depth == 0 => {
                out.push(src[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(src[start..].trim());
    out
}

/// Evaluate a constant expression such as `2*5.5` or `-1e-3`.
pub fn eval_constant(src: &str) -> Result<f64, EngineError> {
    parse_expr(src)?.eval(&HashMap::new(), 0.0, &NoCallee)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_and_power() {
        assert_eq!(eval_constant("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(eval_constant("-2^2").unwrap(), -4.0);
        assert_eq!(eval_constant("2^3^2").unwrap(), 512.0);
        assert!((eval_constant("1.5e-3 * 2").unwrap() - 3e-3).abs() < 1e-15);
    }

    #[test]
    fn variables_and_calls() {
        let e = parse_expr("a * exp(-(x - c)^2)").unwrap();
        let mut env = HashMap::new();
        env.insert("a".to_string(), 2.0);
        env.insert("c".to_string(), 1.0);
        assert_eq!(e.eval(&env, 1.0, &NoCallee).unwrap(), 2.0);

        let mut vars = Vec::new();
        e.variables(&mut vars);
        assert_eq!(vars, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn split_respects_parentheses() {
        assert_eq!(
            split_top_level("Gaussian(~1, 2, 3) + Constant(~0.5)", '+'),
            vec!["Gaussian(~1, 2, 3)", "Constant(~0.5)"]
        );
        assert_eq!(split_top_level("a, f(b, c), d", ','), vec!["a", "f(b, c)", "d"]);
    }

    #[test]
    fn unknown_names_are_reported() {
        assert!(matches!(eval_constant("foo + 1"), Err(EngineError::Undefined { .. })));
        assert!(matches!(eval_constant("Gaussian(1, 2, 3)"), Err(EngineError::Undefined { .. })));
        assert!(parse_expr("1 +").is_err());
        assert!(parse_expr("(1").is_err());
    }
}
