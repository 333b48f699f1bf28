//! Policy expression language.
//!
//! Policies are small boolean expressions evaluated against the current user
//! and, optionally, a resource:
//!
//! ```text
//! user.get("ROLE_ADMIN") || (resource.owner == user.getIdentifier() && resource.status in ["draft", "review"])
//! ```
//!
//! Supported syntax: number, string (single or double quoted), `true`,
//! `false`, `null` and `[..]` literals; variables; member access `a.b`;
//! index access `a["b"]`; the user methods `get(name[, default])`,
//! `isAuthenticated()` and `getIdentifier()`; `!`/`not`, unary `-`;
//! `&&`/`and`, `||`/`or`; `==`, `!=`, `<`, `<=`, `>`, `>=`, `in`, `not in`.
//!
//! `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Deserializer};
use serde_json::{Number, Value as JsonValue};
use std::cmp::Ordering;

/// Name of the variable bound to the current user
pub const USER_VARIABLE: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Parsed policy expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(JsonValue),
    Array(Vec<Expression>),
    Variable(String),
    Member(Box<Expression>, String),
    Index(Box<Expression>, Box<Expression>),
    MethodCall {
        target: Box<Expression>,
        method: String,
        args: Vec<Expression>,
    },
    Unary(UnaryOp, Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
}

/// Access to the user a policy is evaluated for
pub trait UserContext {
    fn get(&self, name: &str, default: JsonValue) -> Result<JsonValue>;
    fn is_authenticated(&self) -> bool;
    fn identifier(&self) -> Option<&str>;
}

/// Variables visible to an expression
pub struct Scope<'a> {
    user: &'a dyn UserContext,
    variables: Vec<(&'a str, &'a JsonValue)>,
}

impl<'a> Scope<'a> {
    pub fn new(user: &'a dyn UserContext) -> Self {
        Self {
            user,
            variables: Vec::new(),
        }
    }

    pub fn with_variable(mut self, name: &'a str, value: &'a JsonValue) -> Self {
        self.variables.push((name, value));
        self
    }

    fn variable(&self, name: &str) -> Option<&'a JsonValue> {
        self.variables
            .iter()
            .rev()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, value)| *value)
    }
}

enum Value {
    User,
    Json(JsonValue),
}

impl Value {
    fn into_json(self) -> Result<JsonValue> {
        match self {
            Value::Json(value) => Ok(value),
            Value::User => Err(AuthzError::PolicyEvaluation(
                "'user' cannot be used as a value".to_string(),
            )),
        }
    }
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            position: 0,
        };
        let expression = parser.parse_or()?;
        if let Some((token, offset)) = parser.tokens.get(parser.position) {
            return Err(parser.error_at(*offset, &format!("unexpected {}", token.describe())));
        }
        Ok(expression)
    }

    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<JsonValue> {
        self.eval(scope)?.into_json()
    }

    pub fn evaluate_bool(&self, scope: &Scope<'_>) -> Result<bool> {
        Ok(is_truthy(&self.evaluate(scope)?))
    }

    fn eval(&self, scope: &Scope<'_>) -> Result<Value> {
        match self {
            Expression::Literal(value) => Ok(Value::Json(value.clone())),
            Expression::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(item.evaluate(scope)?);
                }
                Ok(Value::Json(JsonValue::Array(values)))
            }
            Expression::Variable(name) if name == USER_VARIABLE => Ok(Value::User),
            Expression::Variable(name) => scope
                .variable(name)
                .map(|value| Value::Json(value.clone()))
                .ok_or_else(|| AuthzError::PolicyEvaluation(format!("undefined variable '{}'", name))),
            Expression::Member(target, name) => match target.eval(scope)? {
                Value::Json(JsonValue::Object(map)) => Ok(Value::Json(
                    map.get(name).cloned().unwrap_or(JsonValue::Null),
                )),
                Value::Json(other) => Err(AuthzError::PolicyEvaluation(format!(
                    "cannot access property '{}' of {}",
                    name,
                    type_name(&other)
                ))),
                Value::User => Err(AuthzError::PolicyEvaluation(format!(
                    "cannot access property '{}' of user, use user.get(\"{}\")",
                    name, name
                ))),
            },
            Expression::Index(target, index) => {
                let target = target.eval(scope)?.into_json()?;
                let index = index.evaluate(scope)?;
                match (&target, &index) {
                    (JsonValue::Object(map), JsonValue::String(key)) => Ok(Value::Json(
                        map.get(key).cloned().unwrap_or(JsonValue::Null),
                    )),
                    (JsonValue::Array(items), JsonValue::Number(n)) => Ok(Value::Json(
                        n.as_u64()
                            .and_then(|i| items.get(i as usize))
                            .cloned()
                            .unwrap_or(JsonValue::Null),
                    )),
                    _ => Err(AuthzError::PolicyEvaluation(format!(
                        "cannot index {} with {}",
                        type_name(&target),
                        type_name(&index)
                    ))),
                }
            }
            Expression::MethodCall {
                target,
                method,
                args,
            } => {
                let Value::User = target.eval(scope)? else {
                    return Err(AuthzError::PolicyEvaluation(format!(
                        "method '{}' can only be called on user",
                        method
                    )));
                };
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.evaluate(scope)?);
                }
                call_user_method(scope.user, method, values).map(Value::Json)
            }
            Expression::Unary(UnaryOp::Not, operand) => {
                let value = operand.evaluate(scope)?;
                Ok(Value::Json(JsonValue::Bool(!is_truthy(&value))))
            }
            Expression::Unary(UnaryOp::Neg, operand) => match operand.evaluate(scope)? {
                JsonValue::Number(n) => Ok(Value::Json(negate(&n)?)),
                other => Err(AuthzError::PolicyEvaluation(format!(
                    "cannot negate {}",
                    type_name(&other)
                ))),
            },
            Expression::Binary(BinaryOp::And, left, right) => {
                let result = left.evaluate_bool(scope)? && right.evaluate_bool(scope)?;
                Ok(Value::Json(JsonValue::Bool(result)))
            }
            Expression::Binary(BinaryOp::Or, left, right) => {
                let result = left.evaluate_bool(scope)? || right.evaluate_bool(scope)?;
                Ok(Value::Json(JsonValue::Bool(result)))
            }
            Expression::Binary(op, left, right) => {
                let left = left.evaluate(scope)?;
                let right = right.evaluate(scope)?;
                binary(*op, &left, &right).map(|b| Value::Json(JsonValue::Bool(b)))
            }
        }
    }
}

/// Expressions deserialize from their source text
impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Expression::parse(&source).map_err(serde::de::Error::custom)
    }
}

fn call_user_method(user: &dyn UserContext, method: &str, args: Vec<JsonValue>) -> Result<JsonValue> {
    match (method, args.as_slice()) {
        ("get", [JsonValue::String(name)]) => user.get(name, JsonValue::Null),
        ("get", [JsonValue::String(name), default]) => user.get(name, default.clone()),
        ("isAuthenticated", []) => Ok(JsonValue::Bool(user.is_authenticated())),
        ("getIdentifier", []) => Ok(user
            .identifier()
            .map(|id| JsonValue::String(id.to_string()))
            .unwrap_or(JsonValue::Null)),
        _ => Err(AuthzError::PolicyEvaluation(format!(
            "invalid call user.{}() with {} argument(s)",
            method,
            args.len()
        ))),
    }
}

fn binary(op: BinaryOp, left: &JsonValue, right: &JsonValue) -> Result<bool> {
    match op {
        BinaryOp::Eq => Ok(loose_equals(left, right)),
        BinaryOp::Ne => Ok(!loose_equals(left, right)),
        BinaryOp::Lt => Ok(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::Le => Ok(matches!(compare(left, right), Some(Ordering::Less | Ordering::Equal))),
        BinaryOp::Gt => Ok(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::Ge => Ok(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::In | BinaryOp::NotIn => {
            let JsonValue::Array(items) = right else {
                return Err(AuthzError::PolicyEvaluation(format!(
                    "right operand of 'in' must be an array, got {}",
                    type_name(right)
                )));
            };
            let found = items.iter().any(|item| loose_equals(left, item));
            Ok(if op == BinaryOp::In { found } else { !found })
        }
        BinaryOp::And => Ok(is_truthy(left) && is_truthy(right)),
        BinaryOp::Or => Ok(is_truthy(left) || is_truthy(right)),
    }
}

pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

fn loose_equals(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn negate(n: &Number) -> Result<JsonValue> {
    if let Some(i) = n.as_i64() {
        if let Some(negated) = i.checked_neg() {
            return Ok(JsonValue::from(negated));
        }
    }
    n.as_f64()
        .and_then(|f| Number::from_f64(-f))
        .map(JsonValue::Number)
        .ok_or_else(|| AuthzError::PolicyEvaluation(format!("cannot negate {}", n)))
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(JsonValue),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Ident(name) => format!("'{}'", name),
            Token::Punct(p) => format!("'{}'", p),
        }
    }

    fn is_ident(&self, keyword: &str) -> bool {
        matches!(self, Token::Ident(name) if name == keyword)
    }
}

const KEYWORDS: [&str; 7] = ["and", "or", "not", "in", "true", "false", "null"];

const PUNCTUATION: [&str; 17] = [
    "===", "!==", "&&", "||", "==", "!=", "<=", ">=", "(", ")", "[", "]", ",", ".", "!", "<", ">",
];

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut rest = source;

    loop {
        let trimmed = rest.trim_start();
        let offset = source.len() - trimmed.len();
        rest = trimmed;
        let Some(c) = rest.chars().next() else {
            break;
        };

        if c.is_ascii_digit() {
            let end = rest
                .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
                .unwrap_or(rest.len());
            let literal = &rest[..end];
            let number = if let Ok(i) = literal.parse::<i64>() {
                JsonValue::from(i)
            } else {
                literal
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(JsonValue::Number)
                    .ok_or_else(|| {
                        AuthzError::PolicyParse(format!("invalid number '{}' at {}", literal, offset))
                    })?
            };
            tokens.push((Token::Number(number), offset));
            rest = &rest[end..];
        } else if c == '"' || c == '\'' {
            let (string, consumed) = read_string(rest, c).ok_or_else(|| {
                AuthzError::PolicyParse(format!("unterminated string at {}", offset))
            })?;
            tokens.push((Token::Str(string), offset));
            rest = &rest[consumed..];
        } else if c.is_ascii_alphabetic() || c == '_' {
            let end = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            tokens.push((Token::Ident(rest[..end].to_string()), offset));
            rest = &rest[end..];
        } else if c == '-' {
            tokens.push((Token::Punct("-"), offset));
            rest = &rest[1..];
        } else if let Some(punct) = PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            let normalized = match *punct {
                "===" => "==",
                "!==" => "!=",
                other => other,
            };
            tokens.push((Token::Punct(normalized), offset));
            rest = &rest[punct.len()..];
        } else {
            return Err(AuthzError::PolicyParse(format!(
                "unexpected character '{}' at {}",
                c, offset
            )));
        }
    }

    Ok(tokens)
}

/// Reads a quoted string; returns the unescaped content and the bytes consumed
fn read_string(input: &str, quote: char) -> Option<(String, usize)> {
    let mut result = String::new();
    let mut chars = input.char_indices().skip(1);
    while let Some((index, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                result.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
            }
            c if c == quote => return Some((result, index + c.len_utf8())),
            c => result.push(c),
        }
    }
    None
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<(Token, usize)>,
    position: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(token, _)| token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.position + ahead).map(|(token, _)| token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|(token, _)| token.clone());
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|token| token.is_ident(keyword)) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", punct)))
        }
    }

    fn error(&self, message: &str) -> AuthzError {
        let offset = self
            .tokens
            .get(self.position)
            .map(|(_, offset)| *offset)
            .unwrap_or(self.source.len());
        self.error_at(offset, message)
    }

    fn error_at(&self, offset: usize, message: &str) -> AuthzError {
        AuthzError::PolicyParse(format!(
            "{} at position {} in \"{}\"",
            message, offset, self.source
        ))
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") || self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expression::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut left = self.parse_comparison()?;
        while self.eat_punct("&&") || self.eat_keyword("and") {
            let right = self.parse_comparison()?;
            left = Expression::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct("==")) => BinaryOp::Eq,
                Some(Token::Punct("!=")) => BinaryOp::Ne,
                Some(Token::Punct("<")) => BinaryOp::Lt,
                Some(Token::Punct("<=")) => BinaryOp::Le,
                Some(Token::Punct(">")) => BinaryOp::Gt,
                Some(Token::Punct(">=")) => BinaryOp::Ge,
                Some(token) if token.is_ident("in") => BinaryOp::In,
                Some(token)
                    if token.is_ident("not") && self.peek_at(1).is_some_and(|t| t.is_ident("in")) =>
                {
                    BinaryOp::NotIn
                }
                _ => return Ok(left),
            };
            self.position += if op == BinaryOp::NotIn { 2 } else { 1 };
            let right = self.parse_unary()?;
            left = Expression::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        if self.eat_punct("!") || self.eat_keyword("not") {
            let operand = self.parse_unary()?;
            return Ok(Expression::Unary(UnaryOp::Not, Box::new(operand)));
        }
        if self.eat_punct("-") {
            let operand = self.parse_unary()?;
            return Ok(Expression::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        let mut expression = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(self.error("expected property name after '.'")),
                };
                if self.eat_punct("(") {
                    let args = self.parse_list(")")?;
                    expression = Expression::MethodCall {
                        target: Box::new(expression),
                        method: name,
                        args,
                    };
                } else {
                    expression = Expression::Member(Box::new(expression), name);
                }
            } else if self.eat_punct("[") {
                let index = self.parse_or()?;
                self.expect_punct("]")?;
                expression = Expression::Index(Box::new(expression), Box::new(index));
            } else {
                return Ok(expression);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expression::Literal(n)),
            Some(Token::Str(s)) => Ok(Expression::Literal(JsonValue::String(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expression::Literal(JsonValue::Bool(true))),
                "false" => Ok(Expression::Literal(JsonValue::Bool(false))),
                "null" => Ok(Expression::Literal(JsonValue::Null)),
                keyword if KEYWORDS.contains(&keyword) => {
                    self.position -= 1;
                    Err(self.error(&format!("unexpected keyword '{}'", keyword)))
                }
                _ => Ok(Expression::Variable(name)),
            },
            Some(Token::Punct("(")) => {
                let inner = self.parse_or()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(Token::Punct("[")) => Ok(Expression::Array(self.parse_list("]")?)),
            Some(token) => {
                self.position -= 1;
                Err(self.error(&format!("unexpected {}", token.describe())))
            }
            None => Err(self.error("unexpected end of expression")),
        }
    }

    /// Comma separated expressions up to the closing punctuation
    fn parse_list(&mut self, close: &str) -> Result<Vec<Expression>> {
        let mut items = Vec::new();
        if self.eat_punct(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            if self.eat_punct(close) {
                return Ok(items);
            }
            self.expect_punct(",")?;
        }
    }
}
