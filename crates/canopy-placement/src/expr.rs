//! Policy rule expressions.
//!
//! A small CEL-like language evaluated against one target:
//!
//! ```text
//! labels.env == "prod" && available.cpu >= 2
//! location.region in ["us-east", "us-west"]
//! !(labels["topology.kubernetes.io/zone"] == "us-east-1a") || ready
//! ```
//!
//! Supported: `== != < <= > >=`, `&& || !`, parentheses, `in [..]`,
//! string / number / bool / `null` literals, member access (`a.b`) and
//! indexing (`a["b"]`). A missing map key reads as `null`; `null` is falsy
//! in logical context and never orders against anything. A numeric string
//! compares as a number against a number.

use std::collections::BTreeMap;
use std::fmt;

use canopy_types::{ClusterTarget, parse_resources};
use thiserror::Error;

use crate::error::PlacementResult;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(m) => write!(f, "{{{} keys}}", m.len()),
        }
    }
}

/// Top-level names visible to an expression.
pub type Variables = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("unknown variable {0:?}")]
    UnknownVariable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
}

// ── Tokenizer ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Minus,
    Not,
    And,
    Or,
    Cmp(CmpOp),
}

fn tokenize(src: &str) -> Result<Vec<(usize, Tok)>, ExprError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let err = |offset: usize, message: &str| ExprError::Syntax {
        offset,
        message: message.to_string(),
    };

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match c {
            c if c.is_whitespace() => i += 1,
            '(' | ')' | '[' | ']' | ',' | '.' | '-' => {
                out.push((
                    pos,
                    match c {
                        '(' => Tok::LParen,
                        ')' => Tok::RParen,
                        '[' => Tok::LBracket,
                        ']' => Tok::RBracket,
                        ',' => Tok::Comma,
                        '.' => Tok::Dot,
                        _ => Tok::Minus,
                    },
                ));
                i += 1;
            }
            '&' if next == Some('&') => {
                out.push((pos, Tok::And));
                i += 2;
            }
            '|' if next == Some('|') => {
                out.push((pos, Tok::Or));
                i += 2;
            }
            '=' if next == Some('=') => {
                out.push((pos, Tok::Cmp(CmpOp::Eq)));
                i += 2;
            }
            '!' if next == Some('=') => {
                out.push((pos, Tok::Cmp(CmpOp::Ne)));
                i += 2;
            }
            '!' => {
                out.push((pos, Tok::Not));
                i += 1;
            }
            '<' | '>' => {
                let eq = next == Some('=');
                let op = match (c, eq) {
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    (_, true) => CmpOp::Ge,
                    _ => CmpOp::Gt,
                };
                out.push((pos, Tok::Cmp(op)));
                i += if eq { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    let Some(&(_, ch)) = chars.get(i) else {
                        return Err(err(pos, "unterminated string"));
                    };
                    i += 1;
                    match ch {
                        ch if ch == quote => break,
                        '\\' => {
                            let Some(&(_, escaped)) = chars.get(i) else {
                                return Err(err(pos, "unterminated string"));
                            };
                            s.push(escaped);
                            i += 1;
                        }
                        ch => s.push(ch),
                    }
                }
                out.push((pos, Tok::Str(s)));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|(_, ch)| ch.is_ascii_digit() || *ch == '.')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
                let n = text
                    .parse()
                    .map_err(|_| err(pos, &format!("bad number {text:?}")))?;
                out.push((pos, Tok::Num(n)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|(_, ch)| ch.is_ascii_alphanumeric() || *ch == '_')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
                out.push((pos, Tok::Ident(word)));
            }
            other => return Err(err(pos, &format!("unexpected character {other:?}"))),
        }
    }
    Ok(out)
}

// ── Parser ───────────────────────────────────────────────────────────

/// Deepest expression tree the parser builds. Chains of `&&`, `||` and
/// member access count one level per link.
const MAX_DEPTH: usize = 256;

struct Parser {
    toks: Vec<(usize, Tok)>,
    pos: usize,
    len: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.toks.get(self.pos).map_or(self.len, |(o, _)| *o)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        t
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), ExprError> {
        if self.peek() == Some(&tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("expression nested deeper than {MAX_DEPTH}")));
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let base = self.depth;
        self.descend()?;
        let mut lhs = self.and()?;
        while self.peek() == Some(&Tok::Or) {
            self.pos += 1;
            self.descend()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and()?));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        while self.peek() == Some(&Tok::And) {
            self.pos += 1;
            self.descend()?;
            lhs = Expr::And(Box::new(lhs), Box::new(self.unary()?));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Tok::Not) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.postfix()?;
        match self.peek() {
            Some(Tok::Cmp(op)) => {
                let op = *op;
                self.pos += 1;
                Ok(Expr::Compare(op, Box::new(lhs), Box::new(self.postfix()?)))
            }
            Some(Tok::Ident(w)) if w == "in" => {
                self.pos += 1;
                Ok(Expr::In(Box::new(lhs), Box::new(self.postfix()?)))
            }
            _ => Ok(lhs),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let base = self.depth;
        let mut e = self.primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.pos += 1;
                    self.descend()?;
                    match self.bump() {
                        Some(Tok::Ident(field)) => e = Expr::Member(Box::new(e), field),
                        _ => return Err(self.error("expected field name after '.'")),
                    }
                }
                Some(Tok::LBracket) => {
                    self.pos += 1;
                    self.descend()?;
                    let idx = self.or()?;
                    self.expect(Tok::RBracket, "']'")?;
                    e = Expr::Index(Box::new(e), Box::new(idx));
                }
                _ => {
                    self.depth = base;
                    return Ok(e);
                }
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        match self.bump() {
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::Num(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Tok::Minus) => match self.bump() {
                Some(Tok::Num(n)) => Ok(Expr::Literal(Value::Number(-n))),
                _ => Err(ExprError::Syntax {
                    offset,
                    message: "'-' must precede a number".to_string(),
                }),
            },
            Some(Tok::Ident(w)) => Ok(match w.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Var(w),
            }),
            Some(Tok::LParen) => {
                let e = self.or()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(e)
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Tok::RBracket) {
                    items.push(self.or()?);
                    while self.peek() == Some(&Tok::Comma) {
                        self.pos += 1;
                        items.push(self.or()?);
                    }
                }
                self.expect(Tok::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Some(_) => Err(ExprError::Syntax {
                offset,
                message: "unexpected token".to_string(),
            }),
            None => Err(ExprError::Syntax {
                offset,
                message: "unexpected end of expression".to_string(),
            }),
        }
    }
}

/// Parse an expression without evaluating it.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let toks = tokenize(src)?;
    let mut p = Parser {
        toks,
        pos: 0,
        len: src.len(),
        depth: 0,
    };
    if p.peek().is_none() {
        return Err(p.error("empty expression"));
    }
    let e = p.or()?;
    if p.peek().is_some() {
        return Err(p.error("trailing input"));
    }
    Ok(e)
}

// ── Evaluator ────────────────────────────────────────────────────────

fn truthy(v: &Value) -> Result<bool, ExprError> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(ExprError::Type(format!(
            "expected bool, found {}",
            other.type_name()
        ))),
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            matches!((a.as_number(), b.as_number()), (Some(x), Some(y)) if x == y)
        }
        _ => a == b,
    }
}

fn order(op: CmpOp, a: &Value, b: &Value) -> Result<bool, ExprError> {
    use std::cmp::Ordering;

    let ord = match (a, b) {
        (Value::Null, _) | (_, Value::Null) => return Ok(false),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => match x.partial_cmp(&y) {
                Some(o) => o,
                None => return Ok(false),
            },
            _ => {
                return Err(ExprError::Type(format!(
                    "cannot order {} against {}",
                    a.type_name(),
                    b.type_name()
                )));
            }
        },
    };
    Ok(match op {
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
    })
}

fn lookup(container: Value, key: &str) -> Result<Value, ExprError> {
    match container {
        Value::Map(mut m) => Ok(m.remove(key).unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(ExprError::Type(format!(
            "cannot access {key:?} on {}",
            other.type_name()
        ))),
    }
}

impl Expr {
    pub fn eval(&self, vars: &Variables) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => vars
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
            Expr::Member(base, field) => lookup(base.eval(vars)?, field),
            Expr::Index(base, idx) => match idx.eval(vars)? {
                Value::String(key) => lookup(base.eval(vars)?, &key),
                Value::Number(n) => match base.eval(vars)? {
                    Value::List(items) if n >= 0.0 && n.fract() == 0.0 => {
                        Ok(items.into_iter().nth(n as usize).unwrap_or(Value::Null))
                    }
                    other => Err(ExprError::Type(format!(
                        "cannot index {} with {n}",
                        other.type_name()
                    ))),
                },
                other => Err(ExprError::Type(format!(
                    "index must be a string or number, found {}",
                    other.type_name()
                ))),
            },
            Expr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|e| e.eval(vars))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&inner.eval(vars)?)?)),
            Expr::And(a, b) => Ok(Value::Bool(
                truthy(&a.eval(vars)?)? && truthy(&b.eval(vars)?)?,
            )),
            Expr::Or(a, b) => Ok(Value::Bool(
                truthy(&a.eval(vars)?)? || truthy(&b.eval(vars)?)?,
            )),
            Expr::Compare(op, a, b) => {
                let (a, b) = (a.eval(vars)?, b.eval(vars)?);
                Ok(Value::Bool(match op {
                    CmpOp::Eq => equal(&a, &b),
                    CmpOp::Ne => !equal(&a, &b),
                    _ => order(*op, &a, &b)?,
                }))
            }
            Expr::In(needle, haystack) => {
                let needle = needle.eval(vars)?;
                Ok(Value::Bool(match haystack.eval(vars)? {
                    Value::List(items) => items.iter().any(|i| equal(&needle, i)),
                    Value::Map(m) => matches!(&needle, Value::String(k) if m.contains_key(k)),
                    Value::String(s) => matches!(&needle, Value::String(n) if s.contains(n.as_str())),
                    Value::Null => false,
                    other => {
                        return Err(ExprError::Type(format!(
                            "'in' needs a list, map or string, found {}",
                            other.type_name()
                        )));
                    }
                }))
            }
        }
    }
}

/// Parse and evaluate in one step.
pub fn evaluate(src: &str, vars: &Variables) -> Result<Value, ExprError> {
    parse(src)?.eval(vars)
}

/// Evaluate an expression that must produce a bool. `null` reads as false.
pub fn evaluate_bool(src: &str, vars: &Variables) -> Result<bool, ExprError> {
    truthy(&evaluate(src, vars)?)
}

fn string_map(m: &canopy_types::Labels) -> Value {
    Value::Map(
        m.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn number_map(m: canopy_types::ResourceAmounts) -> Value {
    Value::Map(m.into_iter().map(|(k, v)| (k, Value::Number(v))).collect())
}

/// Variables describing one target: `name`, `workspace`, `ready`,
/// `labels`, `annotations`, `location`, `capacity`, `allocated`,
/// `available`.
pub fn target_variables(target: &ClusterTarget) -> PlacementResult<Variables> {
    let opt = |v: Option<&String>| v.map_or(Value::Null, |s| Value::String(s.clone()));
    let location = target.location.as_ref();
    let location = Value::Map(BTreeMap::from([
        ("region".to_string(), opt(location.and_then(|l| l.region.as_ref()))),
        ("zone".to_string(), opt(location.and_then(|l| l.zone.as_ref()))),
        ("provider".to_string(), opt(location.and_then(|l| l.provider.as_ref()))),
    ]));

    Ok(Variables::from([
        ("name".to_string(), Value::String(target.name.clone())),
        ("workspace".to_string(), Value::String(target.workspace.clone())),
        ("ready".to_string(), Value::Bool(target.ready)),
        ("labels".to_string(), string_map(&target.labels)),
        ("annotations".to_string(), string_map(&target.annotations)),
        ("location".to_string(), location),
        ("capacity".to_string(), number_map(parse_resources(&target.capacity)?)),
        ("allocated".to_string(), number_map(parse_resources(&target.allocated)?)),
        ("available".to_string(), number_map(target.available()?)),
    ]))
}
