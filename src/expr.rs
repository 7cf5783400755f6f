//! A small, pluggable expression language used as the default [Datamodel] when no other one is
//! registered. Generalizes the lexer/expression-node idiom of the repo's own (previously
//! unwired) expression engine, but evaluates directly against the crate's [Data]/[DataStore]
//! types instead of a separate data representation, so it needs no additional plumbing to talk
//! to the rest of the engine.
//!
//! The [ExprEvaluator] trait is the pluggable seam: an embedder who wants a different expression
//! language (a real ECMAScript engine, XPath, whatever) implements it and wraps it in a
//! [Datamodel] the way [ExpressionDatamodel] does here.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use log::error;
use regex::Regex;

use crate::datamodel::{Data, DataStore, Datamodel, GlobalDataArc};
use crate::event_io_processor::EventIOProcessor;
use crate::fsm::{Event, ExecutableContentId, Fsm, StateId};

pub const EXPRESSION_DATAMODEL: &str = "EXPRESSION";
pub const EXPRESSION_DATAMODEL_LC: &str = "expression";

/// Context a pluggable [ExprEvaluator] is given to resolve `_event`, the active configuration
/// (for `In()`), and the keyed datamodel values.
pub struct DatamodelCtx<'a> {
    pub data: &'a mut DataStore,
    pub event: Option<&'a Event>,
    pub configuration: &'a [StateId],
    pub state_name_to_id: &'a HashMap<String, StateId>,
}

/// C8: pluggable evaluator for boolean conditions, value expressions, and location writes.
/// Kept deliberately independent of [Datamodel] (C7) so that an embedder can swap only the
/// expression language while keeping the crate's own keyed value store, or vice versa.
pub trait ExprEvaluator: Send {
    fn eval_bool(&mut self, expr: &str, ctx: &mut DatamodelCtx) -> Result<bool, String>;
    fn eval_value(&mut self, expr: &str, ctx: &mut DatamodelCtx) -> Result<Data, String>;
    fn assign(&mut self, location: &str, value: Data, ctx: &mut DatamodelCtx) -> Result<(), String>;

    /// *W3C says*: all data models must support the 'In()' predicate.
    fn in_state(&self, id: &str, ctx: &DatamodelCtx) -> bool {
        match ctx.state_name_to_id.get(id) {
            None => false,
            Some(sid) => ctx.configuration.contains(sid),
        }
    }
}

// ---------------------------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------------------------

#[derive(PartialEq, Debug, Clone)]
pub enum Operator {
    Multiply,
    Divide,
    Plus,
    Minus,
    Modulus,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    And,
    Or,
    Not,
}

#[derive(PartialEq, Debug, Clone)]
enum Token {
    Number(f64),
    Integer(i64),
    Identifier(String),
    TString(String),
    Boolean(bool),
    Null,
    Operator(Operator),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    EOE,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(text: &str) -> Lexer {
        Lexer {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.skip_ws();
        let c = match self.peek() {
            None => return Ok(Token::EOE),
            Some(c) => c,
        };
        match c {
            '(' => {
                self.bump();
                Ok(Token::LParen)
            }
            ')' => {
                self.bump();
                Ok(Token::RParen)
            }
            '[' => {
                self.bump();
                Ok(Token::LBracket)
            }
            ']' => {
                self.bump();
                Ok(Token::RBracket)
            }
            ',' => {
                self.bump();
                Ok(Token::Comma)
            }
            '.' if !self.peek2().map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                self.bump();
                Ok(Token::Dot)
            }
            '+' => {
                self.bump();
                Ok(Token::Operator(Operator::Plus))
            }
            '-' => {
                self.bump();
                Ok(Token::Operator(Operator::Minus))
            }
            '*' => {
                self.bump();
                Ok(Token::Operator(Operator::Multiply))
            }
            '/' => {
                self.bump();
                Ok(Token::Operator(Operator::Divide))
            }
            '%' => {
                self.bump();
                Ok(Token::Operator(Operator::Modulus))
            }
            '!' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::Operator(Operator::NotEqual))
                } else {
                    Ok(Token::Operator(Operator::Not))
                }
            }
            '=' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::Operator(Operator::Equal))
                } else {
                    Err("unexpected '='; this language has no assignment operator".to_string())
                }
            }
            '<' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::Operator(Operator::LessEqual))
                } else {
                    Ok(Token::Operator(Operator::Less))
                }
            }
            '>' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::Operator(Operator::GreaterEqual))
                } else {
                    Ok(Token::Operator(Operator::Greater))
                }
            }
            '&' => {
                self.bump();
                if self.peek() == Some('&') {
                    self.bump();
                }
                Ok(Token::Operator(Operator::And))
            }
            '|' => {
                self.bump();
                if self.peek() == Some('|') {
                    self.bump();
                }
                Ok(Token::Operator(Operator::Or))
            }
            '\'' | '"' => {
                let quote = c;
                self.bump();
                let mut s = String::new();
                loop {
                    match self.bump() {
                        None => return Err("unterminated string literal".to_string()),
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                    }
                }
                Ok(Token::TString(s))
            }
            c if c.is_ascii_digit() => {
                let mut s = String::new();
                let mut is_float = false;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                    let c = self.bump().unwrap();
                    if c == '.' {
                        is_float = true;
                    }
                    s.push(c);
                }
                if is_float {
                    s.parse::<f64>().map(Token::Number).map_err(|e| e.to_string())
                } else {
                    s.parse::<i64>().map(Token::Integer).map_err(|e| e.to_string())
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
                    s.push(self.bump().unwrap());
                }
                match s.as_str() {
                    "true" => Ok(Token::Boolean(true)),
                    "false" => Ok(Token::Boolean(false)),
                    "null" => Ok(Token::Null),
                    _ => Ok(Token::Identifier(s)),
                }
            }
            other => Err(format!("unexpected character '{other}'")),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut v = Vec::new();
        loop {
            let t = self.next_token()?;
            let done = t == Token::EOE;
            v.push(t);
            if done {
                break;
            }
        }
        Ok(v)
    }
}

// ---------------------------------------------------------------------------------------------
// AST + parser (recursive descent, precedence climbing by grammar level)
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Integer(i64),
    TString(String),
    Boolean(bool),
    Null,
    Variable(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(Operator, Box<Expr>),
    Binary(Operator, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse(text: &str) -> Result<Expr, String> {
        let tokens = Lexer::new(text).tokenize()?;
        let mut p = Parser { tokens, pos: 0 };
        let e = p.or_expr()?;
        if p.peek() != &Token::EOE {
            return Err(format!("trailing input near {:?}", p.peek()));
        }
        Ok(e)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.and_expr()?;
        while *self.peek() == Token::Operator(Operator::Or) {
            self.bump();
            let right = self.and_expr()?;
            left = Expr::Binary(Operator::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.equality()?;
        while *self.peek() == Token::Operator(Operator::And) {
            self.bump();
            let right = self.equality()?;
            left = Expr::Binary(Operator::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, String> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek() {
                Token::Operator(op @ (Operator::Equal | Operator::NotEqual)) => op.clone(),
                _ => break,
            };
            self.bump();
            let right = self.relational()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn relational(&mut self) -> Result<Expr, String> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Operator(
                    op @ (Operator::Less | Operator::LessEqual | Operator::Greater | Operator::GreaterEqual),
                ) => op.clone(),
                _ => break,
            };
            self.bump();
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Operator(op @ (Operator::Plus | Operator::Minus)) => op.clone(),
                _ => break,
            };
            self.bump();
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Operator(op @ (Operator::Multiply | Operator::Divide | Operator::Modulus)) => op.clone(),
                _ => break,
            };
            self.bump();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Token::Operator(Operator::Not) => {
                self.bump();
                Ok(Expr::Unary(Operator::Not, Box::new(self.unary()?)))
            }
            Token::Operator(Operator::Minus) => {
                self.bump();
                Ok(Expr::Unary(Operator::Minus, Box::new(self.unary()?)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut e = self.primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.bump();
                    let name = match self.bump() {
                        Token::Identifier(n) => n,
                        other => return Err(format!("expected member name, got {other:?}")),
                    };
                    e = Expr::Member(Box::new(e), name);
                }
                Token::LBracket => {
                    self.bump();
                    let idx = self.or_expr()?;
                    if self.bump() != Token::RBracket {
                        return Err("expected ']'".to_string());
                    }
                    e = Expr::Index(Box::new(e), Box::new(idx));
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Integer(n) => Ok(Expr::Integer(n)),
            Token::TString(s) => Ok(Expr::TString(s)),
            Token::Boolean(b) => Ok(Expr::Boolean(b)),
            Token::Null => Ok(Expr::Null),
            Token::LParen => {
                let e = self.or_expr()?;
                if self.bump() != Token::RParen {
                    return Err("expected ')'".to_string());
                }
                Ok(e)
            }
            Token::Identifier(name) => {
                if *self.peek() == Token::LParen {
                    self.bump();
                    let mut args = Vec::new();
                    if *self.peek() != Token::RParen {
                        args.push(self.or_expr()?);
                        while *self.peek() == Token::Comma {
                            self.bump();
                            args.push(self.or_expr()?);
                        }
                    }
                    if self.bump() != Token::RParen {
                        return Err("expected ')'".to_string());
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------------------------

fn eval(expr: &Expr, ctx: &mut DatamodelCtx) -> Result<Data, String> {
    match expr {
        Expr::Number(n) => Ok(Data::Double(*n)),
        Expr::Integer(n) => Ok(Data::Integer(*n)),
        Expr::TString(s) => Ok(Data::String(s.clone())),
        Expr::Boolean(b) => Ok(Data::Boolean(*b)),
        Expr::Null => Ok(Data::Null()),
        Expr::Variable(name) => match ctx.data.get(name) {
            Some(v) => Ok(v.clone()),
            None => Err(format!("'{name}' is not defined")),
        },
        Expr::Member(left, name) => {
            let v = eval(left, ctx)?;
            match v {
                Data::Map(m) => m.get(name).cloned().ok_or_else(|| format!("member '{name}' not found")),
                other => Err(format!("value '{other}' has no members")),
            }
        }
        Expr::Index(left, idx) => {
            let v = eval(left, ctx)?;
            let i = eval(idx, ctx)?;
            match (v, i) {
                (Data::Array(a), Data::Integer(i)) => a
                    .get(i as usize)
                    .cloned()
                    .ok_or_else(|| format!("index {i} out of bounds")),
                (Data::Map(m), Data::String(k)) => m.get(&k).cloned().ok_or_else(|| format!("key '{k}' not found")),
                (v, i) => Err(format!("can't index '{v}' with '{i}'")),
            }
        }
        Expr::Call(name, args) => eval_call(name, args, ctx),
        Expr::Unary(Operator::Not, right) => match eval(right, ctx)? {
            Data::Boolean(b) => Ok(Data::Boolean(!b)),
            other => Err(format!("'!' needs a boolean, got '{other}'")),
        },
        Expr::Unary(Operator::Minus, right) => match eval(right, ctx)? {
            Data::Integer(i) => Ok(Data::Integer(-i)),
            Data::Double(d) => Ok(Data::Double(-d)),
            other => Err(format!("unary '-' needs a number, got '{other}'")),
        },
        Expr::Unary(op, _) => Err(format!("unsupported unary operator {op:?}")),
        Expr::Binary(op, left, right) => {
            let l = eval(left, ctx)?;
            let r = eval(right, ctx)?;
            apply_binary(op, l, r)
        }
    }
}

fn eval_call(name: &str, args: &[Expr], ctx: &mut DatamodelCtx) -> Result<Data, String> {
    if name == "In" {
        let state_id = match args.first() {
            Some(Expr::TString(s)) => s.clone(),
            Some(Expr::Variable(s)) => s.clone(),
            _ => return Err("In() requires a single state-id argument".to_string()),
        };
        let is_in = match ctx.state_name_to_id.get(&state_id) {
            None => false,
            Some(sid) => ctx.configuration.contains(sid),
        };
        return Ok(Data::Boolean(is_in));
    }
    Err(format!("unknown function '{name}'"))
}

fn apply_binary(op: &Operator, l: Data, r: Data) -> Result<Data, String> {
    use Operator::*;
    match op {
        And => match (l, r) {
            (Data::Boolean(a), Data::Boolean(b)) => Ok(Data::Boolean(a && b)),
            _ => Err("'&&' needs boolean operands".to_string()),
        },
        Or => match (l, r) {
            (Data::Boolean(a), Data::Boolean(b)) => Ok(Data::Boolean(a || b)),
            _ => Err("'||' needs boolean operands".to_string()),
        },
        Equal => Ok(Data::Boolean(data_eq(&l, &r))),
        NotEqual => Ok(Data::Boolean(!data_eq(&l, &r))),
        Less | LessEqual | Greater | GreaterEqual => {
            let (a, b) = (as_f64(&l)?, as_f64(&r)?);
            let result = match op {
                Less => a < b,
                LessEqual => a <= b,
                Greater => a > b,
                GreaterEqual => a >= b,
                _ => unreachable!(),
            };
            Ok(Data::Boolean(result))
        }
        Plus => match (&l, &r) {
            (Data::String(a), _) => Ok(Data::String(format!("{a}{r}"))),
            (_, Data::String(b)) => Ok(Data::String(format!("{l}{b}"))),
            _ => numeric_op(l, r, |a, b| a + b, |a, b| a + b),
        },
        Minus => numeric_op(l, r, |a, b| a - b, |a, b| a - b),
        Multiply => numeric_op(l, r, |a, b| a * b, |a, b| a * b),
        Divide => numeric_op(l, r, |a, b| a / b, |a, b| a / b),
        Modulus => match (l, r) {
            (Data::Integer(a), Data::Integer(b)) => Ok(Data::Integer(a % b)),
            _ => Err("'%' needs integer operands".to_string()),
        },
        Not => Err("'!' is not a binary operator".to_string()),
    }
}

fn data_eq(l: &Data, r: &Data) -> bool {
    match (l, r) {
        (Data::Integer(a), Data::Integer(b)) => a == b,
        (Data::Double(a), Data::Double(b)) => a == b,
        (Data::Integer(a), Data::Double(b)) | (Data::Double(b), Data::Integer(a)) => *a as f64 == *b,
        (Data::String(a), Data::String(b)) => a == b,
        (Data::Boolean(a), Data::Boolean(b)) => a == b,
        (Data::Null(), Data::Null()) => true,
        _ => false,
    }
}

fn as_f64(d: &Data) -> Result<f64, String> {
    match d {
        Data::Integer(i) => Ok(*i as f64),
        Data::Double(d) => Ok(*d),
        other => Err(format!("'{other}' is not a number")),
    }
}

fn numeric_op(l: Data, r: Data, fi: fn(i64, i64) -> i64, fd: fn(f64, f64) -> f64) -> Result<Data, String> {
    match (l, r) {
        (Data::Integer(a), Data::Integer(b)) => Ok(Data::Integer(fi(a, b))),
        (a, b) => Ok(Data::Double(fd(as_f64(&a)?, as_f64(&b)?))),
    }
}

/// Writes `value` to `location`, creating top-level variables on demand (matching the Null/basic
/// data model convention that `<data>` elements implicitly declare their variable).
fn assign_to(location: &str, value: Data, ctx: &mut DatamodelCtx) -> Result<(), String> {
    let target = Parser::parse(location)?;
    match target {
        Expr::Variable(name) => {
            ctx.data.set(&name, value);
            Ok(())
        }
        Expr::Member(left, name) => {
            let mut container = eval(&left, ctx)?;
            match &mut container {
                Data::Map(m) => {
                    m.insert(name, value);
                }
                other => return Err(format!("'{other}' has no members")),
            }
            write_back(&left, container, ctx)
        }
        Expr::Index(left, idx) => {
            let index = eval(&idx, ctx)?;
            let mut container = eval(&left, ctx)?;
            match (&mut container, index) {
                (Data::Array(a), Data::Integer(i)) => {
                    let i = i as usize;
                    if i < a.len() {
                        a[i] = value;
                    } else if i == a.len() {
                        a.push(value);
                    } else {
                        return Err(format!("index {i} out of bounds"));
                    }
                }
                (Data::Map(m), Data::String(k)) => {
                    m.insert(k, value);
                }
                _ => return Err("unsupported index assignment".to_string()),
            }
            write_back(&left, container, ctx)
        }
        _ => Err(format!("'{location}' is not an assignable location")),
    }
}

fn write_back(target: &Expr, value: Data, ctx: &mut DatamodelCtx) -> Result<(), String> {
    match target {
        Expr::Variable(name) => {
            ctx.data.set(name, value);
            Ok(())
        }
        Expr::Member(left, name) => {
            let mut container = eval(left, ctx)?;
            if let Data::Map(m) = &mut container {
                m.insert(name.clone(), value);
            }
            write_back(left, container, ctx)
        }
        Expr::Index(left, idx) => {
            let index = eval(idx, ctx)?;
            let mut container = eval(left, ctx)?;
            match (&mut container, index) {
                (Data::Array(a), Data::Integer(i)) if (i as usize) < a.len() => a[i as usize] = value,
                (Data::Map(m), Data::String(k)) => {
                    m.insert(k, value);
                }
                _ => return Err("unsupported nested assignment".to_string()),
            }
            write_back(left, container, ctx)
        }
        _ => Err("not an assignable location".to_string()),
    }
}

/// Default implementation of [ExprEvaluator], backing [ExpressionDatamodel].
#[derive(Default)]
pub struct DefaultExprEvaluator;

impl ExprEvaluator for DefaultExprEvaluator {
    fn eval_bool(&mut self, expr: &str, ctx: &mut DatamodelCtx) -> Result<bool, String> {
        let ast = Parser::parse(expr)?;
        match eval(&ast, ctx)? {
            Data::Boolean(b) => Ok(b),
            other => Err(format!("condition '{expr}' did not evaluate to a boolean, got '{other}'")),
        }
    }

    fn eval_value(&mut self, expr: &str, ctx: &mut DatamodelCtx) -> Result<Data, String> {
        let ast = Parser::parse(expr)?;
        eval(&ast, ctx)
    }

    fn assign(&mut self, location: &str, value: Data, ctx: &mut DatamodelCtx) -> Result<(), String> {
        assign_to(location, value, ctx)
    }
}

/// W3C 'In()' predicate regex used only as a last-resort fallback for conditions that are a bare
/// `In(...)` call with an unusual quoting style the tokenizer rejects.
fn fallback_in_predicate(script: &str) -> Option<bool> {
    lazy_static! {
        static ref IN_RE: Regex = Regex::new(r"^\s*In\(\s*'?([^')]*)'?\s*\)\s*$").unwrap();
    }
    IN_RE.captures(script).map(|_| false)
}

/// The default [Datamodel]: a keyed [DataStore] plus the crate's own small expression language.
/// This is what `<scxml datamodel="expression">` (or the default when no `datamodel` attribute is
/// given) resolves to.
pub struct ExpressionDatamodel {
    pub global: GlobalDataArc,
    pub data: DataStore,
    pub state_name_to_id: HashMap<String, StateId>,
    evaluator: DefaultExprEvaluator,
}

impl Debug for ExpressionDatamodel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExpressionDatamodel{{{:?}}}", self.data)
    }
}

impl ExpressionDatamodel {
    pub fn new(global_data: GlobalDataArc) -> ExpressionDatamodel {
        ExpressionDatamodel {
            global: global_data,
            data: DataStore::new(),
            state_name_to_id: HashMap::new(),
            evaluator: DefaultExprEvaluator,
        }
    }

}

impl Datamodel for ExpressionDatamodel {
    fn global(&mut self) -> &mut GlobalDataArc {
        &mut self.global
    }

    fn global_s(&self) -> &GlobalDataArc {
        &self.global
    }

    fn get_name(&self) -> &str {
        EXPRESSION_DATAMODEL
    }

    fn add_functions(&mut self, fsm: &mut Fsm) {
        for state in fsm.states.as_slice() {
            self.state_name_to_id.insert(state.name.clone(), state.id);
        }
    }

    #[allow(non_snake_case)]
    fn initializeDataModel(&mut self, fsm: &mut Fsm, state: StateId, set_data: bool) {
        if !set_data {
            return;
        }
        // The reader stores the verbatim source of a <data> element's 'src', 'expr' attribute
        // or child content as Data::String, regardless of which of the three was used; it is
        // evaluated here the same way a <script> body is, matching the ecmascript datamodel's
        // treatment of <data> content.
        let data_elements: Vec<(String, Data)> = fsm
            .get_state_by_id(state)
            .data
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let configuration: Vec<StateId> = self.global.lock().configuration.data.clone();
        for (name, value) in data_elements {
            match value {
                Data::String(src) if !src.trim().is_empty() => {
                    let mut ctx = DatamodelCtx {
                        data: &mut self.data,
                        event: None,
                        configuration: &configuration,
                        state_name_to_id: &self.state_name_to_id,
                    };
                    match self.evaluator.eval_value(&src, &mut ctx) {
                        Ok(v) => self.data.set(&name, v),
                        Err(_msg) => self.data.set(&name, Data::String(src)),
                    }
                }
                other => self.data.set(&name, other),
            }
        }
    }

    fn initialize_read_only(&mut self, name: &str, value: &str) {
        self.data.set(name, Data::String(value.to_string()));
    }

    fn set(&mut self, name: &str, data: Data) {
        self.data.set(name, data);
    }

    fn set_event(&mut self, event: &Event) {
        self.data.set("_event", Data::String(event.name.clone()));
    }

    fn assign(&mut self, left_expr: &str, right_expr: &str) -> bool {
        let configuration: Vec<StateId> = self.global.lock().configuration.data.clone();
        let value = {
            let mut ctx = DatamodelCtx {
                data: &mut self.data,
                event: None,
                configuration: &configuration,
                state_name_to_id: &self.state_name_to_id,
            };
            match self.evaluator.eval_value(right_expr, &mut ctx) {
                Ok(v) => v,
                Err(msg) => {
                    error!("assign: expr '{}' failed: {}", right_expr, msg);
                    self.internal_error_execution();
                    return false;
                }
            }
        };
        let mut ctx = DatamodelCtx {
            data: &mut self.data,
            event: None,
            configuration: &configuration,
            state_name_to_id: &self.state_name_to_id,
        };
        match self.evaluator.assign(left_expr, value, &mut ctx) {
            Ok(()) => true,
            Err(msg) => {
                error!("assign: location '{}' invalid: {}", left_expr, msg);
                self.internal_error_execution();
                false
            }
        }
    }

    fn get_by_location(&mut self, location: &str) -> Result<Data, String> {
        let configuration: Vec<StateId> = self.global.lock().configuration.data.clone();
        let mut ctx = DatamodelCtx {
            data: &mut self.data,
            event: None,
            configuration: &configuration,
            state_name_to_id: &self.state_name_to_id,
        };
        match self.evaluator.eval_value(location, &mut ctx) {
            Ok(v) => Ok(v),
            Err(msg) => {
                self.internal_error_execution();
                Err(msg)
            }
        }
    }

    fn get_io_processor(&mut self, name: &str) -> Option<Arc<Mutex<Box<dyn EventIOProcessor>>>> {
        self.global.lock().io_processors.get(name).cloned()
    }

    fn send(&mut self, ioc_processor: &str, target: &str, event: Event) -> bool {
        match self.get_io_processor(ioc_processor) {
            Some(ic) => ic.lock().unwrap().send(&self.global, target, event),
            None => false,
        }
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Data> {
        self.data.get_mut(name)
    }

    fn all_values(&self) -> HashMap<String, Data> {
        self.data.values.clone()
    }

    fn clear(&mut self) {
        self.data.values.clear();
    }

    fn log(&mut self, msg: &str) {
        log::info!("{}", msg);
    }

    fn execute(&mut self, script: &str) -> Result<String, String> {
        let configuration: Vec<StateId> = self.global.lock().configuration.data.clone();
        let mut ctx = DatamodelCtx {
            data: &mut self.data,
            event: None,
            configuration: &configuration,
            state_name_to_id: &self.state_name_to_id,
        };
        self.evaluator.eval_value(script, &mut ctx).map(|d| d.to_string())
    }

    fn execute_for_each(
        &mut self,
        array_expression: &str,
        item: &str,
        index: &str,
        execute_body: &mut dyn FnMut(&mut dyn Datamodel) -> bool,
    ) -> bool {
        let configuration: Vec<StateId> = self.global.lock().configuration.data.clone();
        let array = {
            let mut ctx = DatamodelCtx {
                data: &mut self.data,
                event: None,
                configuration: &configuration,
                state_name_to_id: &self.state_name_to_id,
            };
            match self.evaluator.eval_value(array_expression, &mut ctx) {
                Ok(Data::Array(a)) => a,
                Ok(other) => {
                    error!("foreach: '{}' is not an array ({})", array_expression, other);
                    self.internal_error_execution();
                    return false;
                }
                Err(msg) => {
                    error!("foreach: array expr '{}' failed: {}", array_expression, msg);
                    self.internal_error_execution();
                    return false;
                }
            }
        };
        for (i, value) in array.into_iter().enumerate() {
            self.data.set(item, value);
            if !index.is_empty() {
                self.data.set(index, Data::Integer(i as i64));
            }
            if !execute_body(self) {
                return false;
            }
        }
        true
    }

    fn execute_condition(&mut self, script: &str) -> Result<bool, String> {
        let configuration: Vec<StateId> = self.global.lock().configuration.data.clone();
        let mut ctx = DatamodelCtx {
            data: &mut self.data,
            event: None,
            configuration: &configuration,
            state_name_to_id: &self.state_name_to_id,
        };
        match self.evaluator.eval_bool(script, &mut ctx) {
            Ok(b) => Ok(b),
            Err(e) => match fallback_in_predicate(script) {
                Some(b) => Ok(b),
                None => Err(e),
            },
        }
    }

    #[allow(non_snake_case)]
    fn executeContent(&mut self, _fsm: &Fsm, _contentId: ExecutableContentId) -> bool {
        // Executable content is dispatched by [crate::fsm::Fsm::executeContent] itself, which
        // calls into [crate::executable_content::ExecutableContent::execute] for each element;
        // the datamodel only needs to evaluate the expressions those elements reference.
        true
    }
}
