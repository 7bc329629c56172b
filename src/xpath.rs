//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! XPath 1.0 evaluator over data trees.
//!
//! The evaluator implements the XPath 1.0 core function library plus the
//! YANG extension functions of RFC 7950 §10: `current()`, `deref()`,
//! `re-match()`, `derived-from()`, `derived-from-or-self()`, `enum-value()`
//! and `bit-is-set()`. Namespace prefixes are resolved through the map
//! supplied with the query; a prefix that is neither in the map nor a loaded
//! module name is a typed error, never a silent empty node-set. The input
//! tree is never mutated.

use std::collections::HashMap;

use generational_arena::Index;

use crate::data::DataTree;
use crate::error::{Error, ErrorTag, Result};
use crate::schema::{self, DataValueType, SchemaNode};

/// Result of an XPath evaluation.
#[derive(Clone, Debug)]
pub enum XPathValue {
    NodeSet(Vec<Index>),
    Number(f64),
    String(String),
    Boolean(bool),
}

/// Evaluate an XPath expression with `cnode` as the context node (the tree
/// root when `None`). Prefixes in `nsmap` map to module names or namespace
/// URIs; unmapped prefixes fall back to module-name resolution.
pub fn eval(
    tree: &DataTree,
    cnode: Option<Index>,
    expr: &str,
    nsmap: &HashMap<String, String>,
) -> Result<XPathValue> {
    let ast = parse(expr)?;
    let ctx = EvalCtx {
        tree,
        nsmap,
        initial: cnode,
    };
    ctx.eval_expr(&ast, cnode, 1, 1)
}

/// Evaluate an XPath expression and coerce the result to a boolean.
pub fn eval_boolean(
    tree: &DataTree,
    cnode: Option<Index>,
    expr: &str,
    nsmap: &HashMap<String, String>,
) -> Result<bool> {
    Ok(boolean(&eval(tree, cnode, expr, nsmap)?))
}

// ===== AST =====

#[derive(Clone, Debug)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Number(f64),
    Literal(String),
    Call(String, Vec<Expr>),
    Path(Path),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Debug)]
struct Path {
    start: PathStart,
    steps: Vec<Step>,
}

#[derive(Clone, Debug)]
enum PathStart {
    Root,
    Context,
    Filter(Box<Expr>, Vec<Expr>),
}

#[derive(Clone, Debug)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    SelfAxis,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Attribute,
}

#[derive(Clone, Debug)]
enum NodeTest {
    Any,
    Name(Option<String>, String),
    Node,
    Text,
}

// ===== lexer =====

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Literal(String),
    Name(String),
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    DoubleColon,
    Colon,
    Dot,
    DotDot,
    Star,
    Pipe,
    Plus,
    Minus,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn lex(expr: &str) -> Result<Vec<Token>> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let err = |msg: String| Error::new(ErrorTag::InvalidValue, msg);
    while pos < bytes.len() {
        let byte = bytes[pos];
        match byte {
            b' ' | b'\t' | b'\r' | b'\n' => pos += 1,
            b'/' => {
                if bytes.get(pos + 1) == Some(&b'/') {
                    tokens.push(Token::DoubleSlash);
                    pos += 2;
                } else {
                    tokens.push(Token::Slash);
                    pos += 1;
                }
            }
            b'[' => {
                tokens.push(Token::LBracket);
                pos += 1;
            }
            b']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            b'(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            b'@' => {
                tokens.push(Token::At);
                pos += 1;
            }
            b',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            b'|' => {
                tokens.push(Token::Pipe);
                pos += 1;
            }
            b'+' => {
                tokens.push(Token::Plus);
                pos += 1;
            }
            b'-' => {
                tokens.push(Token::Minus);
                pos += 1;
            }
            b'*' => {
                tokens.push(Token::Star);
                pos += 1;
            }
            b'=' => {
                tokens.push(Token::Eq);
                pos += 1;
            }
            b'!' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token::Ne);
                    pos += 2;
                } else {
                    return Err(err("unexpected '!'".to_string()));
                }
            }
            b'<' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token::Le);
                    pos += 2;
                } else {
                    tokens.push(Token::Lt);
                    pos += 1;
                }
            }
            b'>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token::Ge);
                    pos += 2;
                } else {
                    tokens.push(Token::Gt);
                    pos += 1;
                }
            }
            b':' => {
                if bytes.get(pos + 1) == Some(&b':') {
                    tokens.push(Token::DoubleColon);
                    pos += 2;
                } else {
                    tokens.push(Token::Colon);
                    pos += 1;
                }
            }
            b'.' => {
                if bytes.get(pos + 1) == Some(&b'.') {
                    tokens.push(Token::DotDot);
                    pos += 2;
                } else if bytes
                    .get(pos + 1)
                    .map_or(false, |next| next.is_ascii_digit())
                {
                    let start = pos;
                    pos += 1;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                    let text = &expr[start..pos];
                    tokens.push(Token::Number(text.parse().map_err(
                        |_| err(format!("invalid number '{}'", text)),
                    )?));
                } else {
                    tokens.push(Token::Dot);
                    pos += 1;
                }
            }
            b'"' | b'\'' => {
                let quote = byte;
                let start = pos + 1;
                pos += 1;
                while pos < bytes.len() && bytes[pos] != quote {
                    pos += 1;
                }
                if pos >= bytes.len() {
                    return Err(err("unterminated string literal".to_string()));
                }
                tokens.push(Token::Literal(expr[start..pos].to_string()));
                pos += 1;
            }
            b'0'..=b'9' => {
                let start = pos;
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.')
                {
                    pos += 1;
                }
                let text = &expr[start..pos];
                tokens.push(Token::Number(
                    text.parse()
                        .map_err(|_| err(format!("invalid number '{}'", text)))?,
                ));
            }
            _ => {
                let start = pos;
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric()
                        || bytes[pos] == b'_'
                        || bytes[pos] == b'-'
                        || bytes[pos] >= 0x80)
                {
                    pos += 1;
                }
                if pos == start {
                    return Err(err(format!(
                        "unexpected character '{}'",
                        byte as char
                    )));
                }
                tokens.push(Token::Name(expr[start..pos].to_string()));
            }
        }
    }
    Ok(tokens)
}

// ===== parser =====

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn parse(expr: &str) -> Result<Expr> {
    let tokens = lex(expr)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::new(
            ErrorTag::InvalidValue,
            format!("trailing tokens in XPath expression '{}'", expr),
        ));
    }
    Ok(ast)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.bump() {
            Some(found) if found == token => Ok(()),
            found => Err(Error::new(
                ErrorTag::InvalidValue,
                format!("expected {:?}, found {:?}", token, found),
            )),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // Names "or"/"and"/"div"/"mod" act as operators only in operator
    // position, which the recursive descent structure encodes naturally.
    fn eat_op_name(&mut self, name: &str) -> bool {
        if let Some(Token::Name(found)) = self.peek() {
            if found == name {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_op_name("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.equality_expr()?;
        while self.eat_op_name("and") {
            let right = self.equality_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality_expr(&mut self) -> Result<Expr> {
        let mut left = self.relational_expr()?;
        loop {
            let op = if self.eat(&Token::Eq) {
                CmpOp::Eq
            } else if self.eat(&Token::Ne) {
                CmpOp::Ne
            } else {
                break;
            };
            let right = self.relational_expr()?;
            left = Expr::Cmp(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn relational_expr(&mut self) -> Result<Expr> {
        let mut left = self.additive_expr()?;
        loop {
            let op = if self.eat(&Token::Lt) {
                CmpOp::Lt
            } else if self.eat(&Token::Le) {
                CmpOp::Le
            } else if self.eat(&Token::Gt) {
                CmpOp::Gt
            } else if self.eat(&Token::Ge) {
                CmpOp::Ge
            } else {
                break;
            };
            let right = self.additive_expr()?;
            left = Expr::Cmp(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn additive_expr(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative_expr()?;
        loop {
            let op = if self.eat(&Token::Plus) {
                ArithOp::Add
            } else if self.eat(&Token::Minus) {
                ArithOp::Sub
            } else {
                break;
            };
            let right = self.multiplicative_expr()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative_expr(&mut self) -> Result<Expr> {
        let mut left = self.unary_expr()?;
        loop {
            let op = if self.eat(&Token::Star) {
                ArithOp::Mul
            } else if self.eat_op_name("div") {
                ArithOp::Div
            } else if self.eat_op_name("mod") {
                ArithOp::Mod
            } else {
                break;
            };
            let right = self.unary_expr()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            let inner = self.unary_expr()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.union_expr()
    }

    fn union_expr(&mut self) -> Result<Expr> {
        let mut left = self.path_expr()?;
        while self.eat(&Token::Pipe) {
            let right = self.path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn path_expr(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Number(number)) => {
                let number = *number;
                self.pos += 1;
                Ok(Expr::Number(number))
            }
            Some(Token::Literal(text)) => {
                let text = text.clone();
                self.pos += 1;
                Ok(Expr::Literal(text))
            }
            Some(Token::Name(name))
                if self.tokens.get(self.pos + 1) == Some(&Token::LParen)
                    && !is_node_type(name) =>
            {
                // Function call, possibly followed by a path.
                let name = name.clone();
                self.pos += 2;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.or_expr()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(Token::Comma)?;
                    }
                }
                let call = Expr::Call(name, args);
                let mut predicates = Vec::new();
                while self.eat(&Token::LBracket) {
                    predicates.push(self.or_expr()?);
                    self.expect(Token::RBracket)?;
                }
                if matches!(
                    self.peek(),
                    Some(Token::Slash) | Some(Token::DoubleSlash)
                ) {
                    let steps = self.steps(false)?;
                    Ok(Expr::Path(Path {
                        start: PathStart::Filter(Box::new(call), predicates),
                        steps,
                    }))
                } else if predicates.is_empty() {
                    Ok(call)
                } else {
                    Ok(Expr::Path(Path {
                        start: PathStart::Filter(Box::new(call), predicates),
                        steps: Vec::new(),
                    }))
                }
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                let mut predicates = Vec::new();
                while self.eat(&Token::LBracket) {
                    predicates.push(self.or_expr()?);
                    self.expect(Token::RBracket)?;
                }
                if matches!(
                    self.peek(),
                    Some(Token::Slash) | Some(Token::DoubleSlash)
                ) {
                    let steps = self.steps(false)?;
                    Ok(Expr::Path(Path {
                        start: PathStart::Filter(Box::new(inner), predicates),
                        steps,
                    }))
                } else if predicates.is_empty() {
                    Ok(inner)
                } else {
                    Ok(Expr::Path(Path {
                        start: PathStart::Filter(Box::new(inner), predicates),
                        steps: Vec::new(),
                    }))
                }
            }
            Some(Token::Slash) | Some(Token::DoubleSlash) => {
                let absolute_descendant = self.peek() == Some(&Token::DoubleSlash);
                self.pos += 1;
                let mut steps = Vec::new();
                if absolute_descendant {
                    steps.push(Step {
                        axis: Axis::DescendantOrSelf,
                        test: NodeTest::Node,
                        predicates: Vec::new(),
                    });
                }
                if !matches!(self.peek(), None | Some(Token::RParen)
                    | Some(Token::RBracket) | Some(Token::Comma))
                {
                    steps.extend(self.steps(true)?);
                }
                Ok(Expr::Path(Path {
                    start: PathStart::Root,
                    steps,
                }))
            }
            _ => {
                let steps = self.steps(true)?;
                Ok(Expr::Path(Path {
                    start: PathStart::Context,
                    steps,
                }))
            }
        }
    }

    // Parse a step sequence. When `first_ready` the cursor already sits on
    // the first step; otherwise a slash separator is consumed first.
    fn steps(&mut self, first_ready: bool) -> Result<Vec<Step>> {
        let mut steps = Vec::new();
        let mut first = first_ready;
        loop {
            if !first {
                if self.eat(&Token::DoubleSlash) {
                    steps.push(Step {
                        axis: Axis::DescendantOrSelf,
                        test: NodeTest::Node,
                        predicates: Vec::new(),
                    });
                } else if !self.eat(&Token::Slash) {
                    break;
                }
            }
            first = false;
            steps.push(self.step()?);
        }
        Ok(steps)
    }

    fn step(&mut self) -> Result<Step> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                test: NodeTest::Node,
                predicates: self.predicates()?,
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: self.predicates()?,
            });
        }

        let mut axis = Axis::Child;
        if self.eat(&Token::At) {
            axis = Axis::Attribute;
        } else if let Some(Token::Name(name)) = self.peek() {
            if self.tokens.get(self.pos + 1) == Some(&Token::DoubleColon) {
                axis = axis_by_name(name).ok_or_else(|| {
                    Error::new(
                        ErrorTag::InvalidValue,
                        format!("unknown axis '{}'", name),
                    )
                })?;
                self.pos += 2;
            }
        }

        let test = self.node_test()?;
        let predicates = self.predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn node_test(&mut self) -> Result<NodeTest> {
        if self.eat(&Token::Star) {
            return Ok(NodeTest::Any);
        }
        match self.bump() {
            Some(Token::Name(name)) => {
                if is_node_type(&name)
                    && self.peek() == Some(&Token::LParen)
                {
                    self.pos += 1;
                    self.expect(Token::RParen)?;
                    return Ok(match name.as_str() {
                        "text" => NodeTest::Text,
                        _ => NodeTest::Node,
                    });
                }
                if self.eat(&Token::Colon) {
                    match self.bump() {
                        Some(Token::Name(local)) => {
                            Ok(NodeTest::Name(Some(name), local))
                        }
                        Some(Token::Star) => {
                            Ok(NodeTest::Name(Some(name), "*".to_string()))
                        }
                        found => Err(Error::new(
                            ErrorTag::InvalidValue,
                            format!("expected name after ':', found {:?}", found),
                        )),
                    }
                } else {
                    Ok(NodeTest::Name(None, name))
                }
            }
            found => Err(Error::new(
                ErrorTag::InvalidValue,
                format!("expected node test, found {:?}", found),
            )),
        }
    }

    fn predicates(&mut self) -> Result<Vec<Expr>> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.or_expr()?);
            self.expect(Token::RBracket)?;
        }
        Ok(predicates)
    }
}

fn axis_by_name(name: &str) -> Option<Axis> {
    match name {
        "child" => Some(Axis::Child),
        "descendant" => Some(Axis::Descendant),
        "descendant-or-self" => Some(Axis::DescendantOrSelf),
        "parent" => Some(Axis::Parent),
        "self" => Some(Axis::SelfAxis),
        "ancestor" => Some(Axis::Ancestor),
        "ancestor-or-self" => Some(Axis::AncestorOrSelf),
        "following-sibling" => Some(Axis::FollowingSibling),
        "preceding-sibling" => Some(Axis::PrecedingSibling),
        "attribute" => Some(Axis::Attribute),
        _ => None,
    }
}

fn is_node_type(name: &str) -> bool {
    matches!(name, "node" | "text" | "comment" | "processing-instruction")
}

// ===== evaluation =====

struct EvalCtx<'a> {
    tree: &'a DataTree,
    nsmap: &'a HashMap<String, String>,
    initial: Option<Index>,
}

impl EvalCtx<'_> {
    fn eval_expr(
        &self,
        expr: &Expr,
        cnode: Option<Index>,
        position: usize,
        size: usize,
    ) -> Result<XPathValue> {
        match expr {
            Expr::Or(left, right) => {
                let left = self.eval_expr(left, cnode, position, size)?;
                if boolean(&left) {
                    return Ok(XPathValue::Boolean(true));
                }
                let right = self.eval_expr(right, cnode, position, size)?;
                Ok(XPathValue::Boolean(boolean(&right)))
            }
            Expr::And(left, right) => {
                let left = self.eval_expr(left, cnode, position, size)?;
                if !boolean(&left) {
                    return Ok(XPathValue::Boolean(false));
                }
                let right = self.eval_expr(right, cnode, position, size)?;
                Ok(XPathValue::Boolean(boolean(&right)))
            }
            Expr::Cmp(op, left, right) => {
                let left = self.eval_expr(left, cnode, position, size)?;
                let right = self.eval_expr(right, cnode, position, size)?;
                Ok(XPathValue::Boolean(self.compare(*op, &left, &right)))
            }
            Expr::Arith(op, left, right) => {
                let left =
                    number(self.tree, &self.eval_expr(left, cnode, position, size)?);
                let right = number(
                    self.tree,
                    &self.eval_expr(right, cnode, position, size)?,
                );
                let value = match op {
                    ArithOp::Add => left + right,
                    ArithOp::Sub => left - right,
                    ArithOp::Mul => left * right,
                    ArithOp::Div => left / right,
                    ArithOp::Mod => left % right,
                };
                Ok(XPathValue::Number(value))
            }
            Expr::Neg(inner) => {
                let value = number(
                    self.tree,
                    &self.eval_expr(inner, cnode, position, size)?,
                );
                Ok(XPathValue::Number(-value))
            }
            Expr::Union(left, right) => {
                let mut set = nodeset(self.eval_expr(left, cnode, position, size)?)?;
                for index in
                    nodeset(self.eval_expr(right, cnode, position, size)?)?
                {
                    if !set.contains(&index) {
                        set.push(index);
                    }
                }
                Ok(XPathValue::NodeSet(set))
            }
            Expr::Number(number) => Ok(XPathValue::Number(*number)),
            Expr::Literal(text) => Ok(XPathValue::String(text.clone())),
            Expr::Call(name, args) => {
                self.call(name, args, cnode, position, size)
            }
            Expr::Path(path) => self.eval_path(path, cnode, position, size),
        }
    }

    fn eval_path(
        &self,
        path: &Path,
        cnode: Option<Index>,
        position: usize,
        size: usize,
    ) -> Result<XPathValue> {
        let mut set: Vec<Index> = match &path.start {
            PathStart::Root => {
                if path.steps.is_empty() {
                    return Ok(XPathValue::NodeSet(
                        self.tree.roots.clone(),
                    ));
                }
                Vec::new()
            }
            PathStart::Context => match cnode {
                Some(index) => vec![index],
                None => Vec::new(),
            },
            PathStart::Filter(inner, predicates) => {
                let value = self.eval_expr(inner, cnode, position, size)?;
                let mut set = nodeset(value)?;
                for predicate in predicates {
                    set = self.filter(set, predicate)?;
                }
                set
            }
        };

        let from_root = matches!(path.start, PathStart::Root);
        for (step_pos, step) in path.steps.iter().enumerate() {
            let candidates: Vec<Index> =
                if from_root && step_pos == 0 {
                    // First step of an absolute path selects among roots.
                    self.apply_step_root(step)?
                } else {
                    let mut out = Vec::new();
                    for index in &set {
                        out.extend(self.axis_nodes(step.axis, *index));
                    }
                    out.retain(|index| self.test_matches(&step.test, *index));
                    out
                };
            let mut filtered = candidates;
            for predicate in &step.predicates {
                filtered = self.filter(filtered, predicate)?;
            }
            // Dedupe while keeping document order.
            let mut seen = Vec::new();
            for index in filtered {
                if !seen.contains(&index) {
                    seen.push(index);
                }
            }
            set = seen;
        }
        Ok(XPathValue::NodeSet(set))
    }

    fn apply_step_root(&self, step: &Step) -> Result<Vec<Index>> {
        let mut out = Vec::new();
        match step.axis {
            Axis::Child => {
                for root in &self.tree.roots {
                    if self.test_matches(&step.test, *root) {
                        out.push(*root);
                    }
                }
            }
            Axis::DescendantOrSelf => {
                for root in &self.tree.roots {
                    self.collect_descendants(*root, &mut out);
                }
                out.retain(|index| self.test_matches(&step.test, *index));
            }
            _ => {}
        }
        Ok(out)
    }

    fn axis_nodes(&self, axis: Axis, index: Index) -> Vec<Index> {
        let arena = &self.tree.arena;
        match axis {
            Axis::Child => arena[index].children.clone(),
            Axis::Parent => arena[index].parent.into_iter().collect(),
            Axis::SelfAxis => vec![index],
            Axis::Descendant => {
                let mut out = Vec::new();
                for child in &arena[index].children {
                    self.collect_descendants(*child, &mut out);
                }
                out
            }
            Axis::DescendantOrSelf => {
                let mut out = Vec::new();
                self.collect_descendants(index, &mut out);
                out
            }
            Axis::Ancestor => {
                let mut out = Vec::new();
                let mut cursor = arena[index].parent;
                while let Some(parent) = cursor {
                    out.push(parent);
                    cursor = arena[parent].parent;
                }
                out
            }
            Axis::AncestorOrSelf => {
                let mut out = vec![index];
                let mut cursor = arena[index].parent;
                while let Some(parent) = cursor {
                    out.push(parent);
                    cursor = arena[parent].parent;
                }
                out
            }
            Axis::FollowingSibling | Axis::PrecedingSibling => {
                let siblings = match arena[index].parent {
                    Some(parent) => &arena[parent].children,
                    None => &self.tree.roots,
                };
                let pos = siblings
                    .iter()
                    .position(|sibling| *sibling == index)
                    .unwrap_or(0);
                if axis == Axis::FollowingSibling {
                    siblings[pos + 1..].to_vec()
                } else {
                    siblings[..pos].to_vec()
                }
            }
            // Attribute nodes are not part of the data tree model.
            Axis::Attribute => Vec::new(),
        }
    }

    fn collect_descendants(&self, index: Index, out: &mut Vec<Index>) {
        out.push(index);
        for child in &self.tree.arena[index].children {
            self.collect_descendants(*child, out);
        }
    }

    fn test_matches(&self, test: &NodeTest, index: Index) -> bool {
        match test {
            NodeTest::Any | NodeTest::Node => true,
            NodeTest::Text => false,
            NodeTest::Name(prefix, name) => {
                let node = &self.tree.arena[index];
                if name != "*" && node.name != *name {
                    return false;
                }
                match prefix {
                    None => true,
                    Some(prefix) => match self.resolve_prefix(prefix) {
                        Ok(reference) => {
                            node.namespace.as_deref()
                                == Some(reference.namespace.as_str())
                        }
                        Err(_) => false,
                    },
                }
            }
        }
    }

    // A prefix maps to a module name or a namespace URI through the nsmap,
    // falling back to module names (the JSON path convention).
    fn resolve_prefix(&self, prefix: &str) -> Result<ResolvedPrefix> {
        let context = &self.tree.context;
        let target = self.nsmap.get(prefix).map(String::as_str).unwrap_or(prefix);
        let module = context
            .get_module(target, None)
            .or_else(|| context.get_module_ns(target))
            .or_else(|| context.get_module_prefix(target))
            .ok_or_else(|| {
                Error::new(
                    ErrorTag::UnknownNamespace,
                    format!("unknown XPath prefix '{}'", prefix),
                )
            })?;
        Ok(ResolvedPrefix {
            module_name: module.name().to_string(),
            namespace: module.namespace().to_string(),
        })
    }

    fn filter(&self, set: Vec<Index>, predicate: &Expr) -> Result<Vec<Index>> {
        let size = set.len();
        let mut out = Vec::new();
        for (pos, index) in set.into_iter().enumerate() {
            let value = self.eval_expr(predicate, Some(index), pos + 1, size)?;
            let keep = match value {
                // A numeric predicate selects by position.
                XPathValue::Number(number) => number == (pos + 1) as f64,
                other => boolean(&other),
            };
            if keep {
                out.push(index);
            }
        }
        Ok(out)
    }

    fn compare(
        &self,
        op: CmpOp,
        left: &XPathValue,
        right: &XPathValue,
    ) -> bool {
        use XPathValue::*;
        match (left, right) {
            (NodeSet(lset), NodeSet(rset)) => {
                lset.iter().any(|lindex| {
                    let lvalue = node_string(self.tree, *lindex);
                    rset.iter().any(|rindex| {
                        cmp_strings(op, &lvalue, &node_string(self.tree, *rindex))
                    })
                })
            }
            (NodeSet(set), other) => set.iter().any(|index| {
                cmp_value(op, &node_string(self.tree, *index), other)
            }),
            (other, NodeSet(set)) => set.iter().any(|index| {
                cmp_value(
                    op.flipped(),
                    &node_string(self.tree, *index),
                    other,
                )
            }),
            (left, right) => match op {
                CmpOp::Eq | CmpOp::Ne => {
                    let equal = match (left, right) {
                        (Boolean(lflag), _) => {
                            *lflag == boolean(right)
                        }
                        (_, Boolean(rflag)) => {
                            boolean(left) == *rflag
                        }
                        (Number(lnum), _) => *lnum == number(self.tree, right),
                        (_, Number(rnum)) => number(self.tree, left) == *rnum,
                        _ => string(self.tree, left) == string(self.tree, right),
                    };
                    (op == CmpOp::Eq) == equal
                }
                _ => {
                    let lnum = number(self.tree, left);
                    let rnum = number(self.tree, right);
                    match op {
                        CmpOp::Lt => lnum < rnum,
                        CmpOp::Le => lnum <= rnum,
                        CmpOp::Gt => lnum > rnum,
                        CmpOp::Ge => lnum >= rnum,
                        _ => unreachable!(),
                    }
                }
            },
        }
    }

    fn call(
        &self,
        name: &str,
        args: &[Expr],
        cnode: Option<Index>,
        position: usize,
        size: usize,
    ) -> Result<XPathValue> {
        let eval_arg = |arg: usize| -> Result<XPathValue> {
            self.eval_expr(&args[arg], cnode, position, size)
        };
        let arg_string = |arg: usize| -> Result<String> {
            Ok(string(self.tree, &eval_arg(arg)?))
        };
        match name {
            "last" => Ok(XPathValue::Number(size as f64)),
            "position" => Ok(XPathValue::Number(position as f64)),
            "count" => {
                let set = nodeset(eval_arg(0)?)?;
                Ok(XPathValue::Number(set.len() as f64))
            }
            "local-name" | "name" => {
                let index = match args.first() {
                    Some(_) => nodeset(eval_arg(0)?)?.first().copied(),
                    None => cnode,
                };
                let text = match index {
                    Some(index) => match name {
                        "local-name" => self.tree.arena[index].name.clone(),
                        _ => {
                            let node = &self.tree.arena[index];
                            match node.snode.map(|id| {
                                SchemaNode::new(&self.tree.context, id)
                            }) {
                                Some(snode) => format!(
                                    "{}:{}",
                                    snode.module().name(),
                                    node.name
                                ),
                                None => node.name.clone(),
                            }
                        }
                    },
                    None => String::new(),
                };
                Ok(XPathValue::String(text))
            }
            "namespace-uri" => {
                let index = match args.first() {
                    Some(_) => nodeset(eval_arg(0)?)?.first().copied(),
                    None => cnode,
                };
                let text = index
                    .and_then(|index| self.tree.arena[index].namespace.clone())
                    .unwrap_or_default();
                Ok(XPathValue::String(text))
            }
            "string" => {
                let text = match args.first() {
                    Some(_) => string(self.tree, &eval_arg(0)?),
                    None => match cnode {
                        Some(index) => node_string(self.tree, index),
                        None => String::new(),
                    },
                };
                Ok(XPathValue::String(text))
            }
            "concat" => {
                let mut out = String::new();
                for pos in 0..args.len() {
                    out.push_str(&arg_string(pos)?);
                }
                Ok(XPathValue::String(out))
            }
            "starts-with" => Ok(XPathValue::Boolean(
                arg_string(0)?.starts_with(&arg_string(1)?),
            )),
            "contains" => Ok(XPathValue::Boolean(
                arg_string(0)?.contains(&arg_string(1)?),
            )),
            "substring-before" => {
                let haystack = arg_string(0)?;
                let needle = arg_string(1)?;
                let text = haystack
                    .split_once(&needle)
                    .map(|(before, _)| before.to_string())
                    .unwrap_or_default();
                Ok(XPathValue::String(text))
            }
            "substring-after" => {
                let haystack = arg_string(0)?;
                let needle = arg_string(1)?;
                let text = haystack
                    .split_once(&needle)
                    .map(|(_, after)| after.to_string())
                    .unwrap_or_default();
                Ok(XPathValue::String(text))
            }
            "substring" => {
                let text = arg_string(0)?;
                let start = number(self.tree, &eval_arg(1)?).round() as i64;
                let chars: Vec<char> = text.chars().collect();
                let len = match args.len() {
                    3 => number(self.tree, &eval_arg(2)?).round() as i64,
                    _ => chars.len() as i64,
                };
                let from = (start - 1).max(0) as usize;
                let to = ((start - 1 + len).max(0) as usize).min(chars.len());
                let out = if from >= to {
                    String::new()
                } else {
                    chars[from..to].iter().collect()
                };
                Ok(XPathValue::String(out))
            }
            "string-length" => {
                let text = match args.first() {
                    Some(_) => arg_string(0)?,
                    None => match cnode {
                        Some(index) => node_string(self.tree, index),
                        None => String::new(),
                    },
                };
                Ok(XPathValue::Number(text.chars().count() as f64))
            }
            "normalize-space" => {
                let text = match args.first() {
                    Some(_) => arg_string(0)?,
                    None => match cnode {
                        Some(index) => node_string(self.tree, index),
                        None => String::new(),
                    },
                };
                Ok(XPathValue::String(
                    text.split_whitespace().collect::<Vec<_>>().join(" "),
                ))
            }
            "translate" => {
                let text = arg_string(0)?;
                let from: Vec<char> = arg_string(1)?.chars().collect();
                let to: Vec<char> = arg_string(2)?.chars().collect();
                let out = text
                    .chars()
                    .filter_map(|c| match from.iter().position(|f| *f == c) {
                        Some(pos) => to.get(pos).copied(),
                        None => Some(c),
                    })
                    .collect();
                Ok(XPathValue::String(out))
            }
            "boolean" => Ok(XPathValue::Boolean(boolean(&eval_arg(0)?))),
            "not" => Ok(XPathValue::Boolean(!boolean(&eval_arg(0)?))),
            "true" => Ok(XPathValue::Boolean(true)),
            "false" => Ok(XPathValue::Boolean(false)),
            "number" => {
                let value = match args.first() {
                    Some(_) => number(self.tree, &eval_arg(0)?),
                    None => match cnode {
                        Some(index) => {
                            str_to_number(&node_string(self.tree, index))
                        }
                        None => f64::NAN,
                    },
                };
                Ok(XPathValue::Number(value))
            }
            "sum" => {
                let set = nodeset(eval_arg(0)?)?;
                let sum = set
                    .iter()
                    .map(|index| str_to_number(&node_string(self.tree, *index)))
                    .sum();
                Ok(XPathValue::Number(sum))
            }
            "floor" => Ok(XPathValue::Number(
                number(self.tree, &eval_arg(0)?).floor(),
            )),
            "ceiling" => Ok(XPathValue::Number(
                number(self.tree, &eval_arg(0)?).ceil(),
            )),
            "round" => Ok(XPathValue::Number(
                number(self.tree, &eval_arg(0)?).round(),
            )),
            // ===== YANG extension functions (RFC 7950 §10) =====
            "current" => Ok(XPathValue::NodeSet(
                self.initial.into_iter().collect(),
            )),
            "deref" => {
                let set = nodeset(eval_arg(0)?)?;
                let mut out = Vec::new();
                if let Some(index) = set.first() {
                    out.extend(self.deref_node(*index));
                }
                Ok(XPathValue::NodeSet(out))
            }
            "re-match" => {
                let text = arg_string(0)?;
                let pattern = arg_string(1)?;
                let anchored = format!("^(?:{})$", pattern);
                let re = regex::Regex::new(&anchored).map_err(|err| {
                    Error::new(
                        ErrorTag::InvalidValue,
                        format!("invalid regular expression: {}", err),
                    )
                })?;
                Ok(XPathValue::Boolean(re.is_match(&text)))
            }
            "derived-from" | "derived-from-or-self" => {
                let set = nodeset(eval_arg(0)?)?;
                let base = arg_string(1)?;
                let or_self = name == "derived-from-or-self";
                let result = set.iter().any(|index| {
                    self.derived_from(*index, &base, or_self)
                        .unwrap_or(false)
                });
                Ok(XPathValue::Boolean(result))
            }
            "enum-value" => {
                let set = nodeset(eval_arg(0)?)?;
                let value = set
                    .first()
                    .and_then(|index| self.enum_value(*index))
                    .map(|value| value as f64)
                    .unwrap_or(f64::NAN);
                Ok(XPathValue::Number(value))
            }
            "bit-is-set" => {
                let set = nodeset(eval_arg(0)?)?;
                let bit = arg_string(1)?;
                let result = set.first().map_or(false, |index| {
                    self.tree.arena[*index]
                        .value
                        .as_deref()
                        .map_or(false, |body| {
                            body.split_whitespace().any(|b| b == bit)
                        })
                });
                Ok(XPathValue::Boolean(result))
            }
            _ => Err(Error::new(
                ErrorTag::InvalidValue,
                format!("unknown XPath function '{}'", name),
            )),
        }
    }

    // Resolve the instance(s) the leafref leaf at `index` points at.
    fn deref_node(&self, index: Index) -> Vec<Index> {
        let node = &self.tree.arena[index];
        let Some(value) = node.value.as_deref() else {
            return Vec::new();
        };
        let Some(target) = node
            .snode
            .and_then(|id| self.tree.context.snodes[id].leaf_type.as_ref())
            .and_then(|spec| spec.leafref_target)
        else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (candidate, candidate_node) in self.tree.arena.iter() {
            if candidate_node.snode == Some(target)
                && candidate_node.value.as_deref() == Some(value)
            {
                out.push(candidate);
            }
        }
        out
    }

    fn derived_from(
        &self,
        index: Index,
        base: &str,
        or_self: bool,
    ) -> Result<bool> {
        let context = &self.tree.context;
        let node = &self.tree.arena[index];
        let Some(value) = node.value.as_deref() else {
            return Ok(false);
        };
        let node_mid = node
            .snode
            .map(|id| context.snodes[id].module)
            .unwrap_or(0);
        let identity = schema::resolve_identity_ref(context, node_mid, value)?;
        let base = {
            let resolved = match base.split_once(':') {
                Some((prefix, name)) => {
                    let target = self
                        .nsmap
                        .get(prefix)
                        .map(String::as_str)
                        .unwrap_or(prefix);
                    format!("{}:{}", target, name)
                }
                None => base.to_string(),
            };
            schema::resolve_identity_ref(context, node_mid, &resolved)?
        };
        if !or_self && identity == base {
            return Ok(false);
        }
        Ok(schema::identity_derives(context, &identity, &base))
    }

    fn enum_value(&self, index: Index) -> Option<i32> {
        let node = &self.tree.arena[index];
        let value = node.value.as_deref()?;
        let spec = node
            .snode
            .and_then(|id| self.tree.context.snodes[id].leaf_type.as_ref())?;
        if spec.base != Some(DataValueType::Enum) {
            return None;
        }
        spec.enums
            .iter()
            .find(|(name, _)| name == value)
            .map(|(_, number)| *number)
    }
}

struct ResolvedPrefix {
    #[allow(dead_code)]
    module_name: String,
    namespace: String,
}

impl CmpOp {
    fn flipped(&self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            other => *other,
        }
    }
}

// ===== value coercions =====

fn nodeset(value: XPathValue) -> Result<Vec<Index>> {
    match value {
        XPathValue::NodeSet(set) => Ok(set),
        _ => Err(Error::new(
            ErrorTag::InvalidValue,
            "expression does not evaluate to a node-set",
        )),
    }
}

/// XPath string-value of a node: its body, or the concatenation of all
/// descendant bodies in document order.
pub(crate) fn node_string(tree: &DataTree, index: Index) -> String {
    let node = &tree.arena[index];
    if let Some(value) = node.value.as_deref() {
        return value.to_string();
    }
    let mut out = String::new();
    for child in &node.children {
        out.push_str(&node_string(tree, *child));
    }
    out
}

fn string(tree: &DataTree, value: &XPathValue) -> String {
    match value {
        XPathValue::String(text) => text.clone(),
        XPathValue::Number(number) => {
            if number.fract() == 0.0 && number.is_finite() {
                format!("{}", *number as i64)
            } else {
                number.to_string()
            }
        }
        XPathValue::Boolean(flag) => flag.to_string(),
        XPathValue::NodeSet(set) => match set.first() {
            Some(index) => node_string(tree, *index),
            None => String::new(),
        },
    }
}

fn number(tree: &DataTree, value: &XPathValue) -> f64 {
    match value {
        XPathValue::Number(number) => *number,
        XPathValue::String(text) => str_to_number(text),
        XPathValue::Boolean(flag) => {
            if *flag {
                1.0
            } else {
                0.0
            }
        }
        XPathValue::NodeSet(set) => match set.first() {
            Some(index) => str_to_number(&node_string(tree, *index)),
            None => f64::NAN,
        },
    }
}

fn boolean(value: &XPathValue) -> bool {
    match value {
        XPathValue::Boolean(flag) => *flag,
        XPathValue::Number(number) => *number != 0.0 && !number.is_nan(),
        XPathValue::String(text) => !text.is_empty(),
        XPathValue::NodeSet(set) => !set.is_empty(),
    }
}

fn str_to_number(text: &str) -> f64 {
    text.trim().parse().unwrap_or(f64::NAN)
}

fn cmp_strings(op: CmpOp, left: &str, right: &str) -> bool {
    match op {
        CmpOp::Eq => left == right,
        CmpOp::Ne => left != right,
        _ => {
            let lnum = str_to_number(left);
            let rnum = str_to_number(right);
            match op {
                CmpOp::Lt => lnum < rnum,
                CmpOp::Le => lnum <= rnum,
                CmpOp::Gt => lnum > rnum,
                CmpOp::Ge => lnum >= rnum,
                _ => unreachable!(),
            }
        }
    }
}

fn cmp_value(op: CmpOp, node_value: &str, other: &XPathValue) -> bool {
    match other {
        XPathValue::String(text) => cmp_strings(op, node_value, text),
        XPathValue::Number(number) => {
            let lnum = str_to_number(node_value);
            match op {
                CmpOp::Eq => lnum == *number,
                CmpOp::Ne => lnum != *number,
                CmpOp::Lt => lnum < *number,
                CmpOp::Le => lnum <= *number,
                CmpOp::Gt => lnum > *number,
                CmpOp::Ge => lnum >= *number,
            }
        }
        XPathValue::Boolean(flag) => {
            let lflag = !node_value.is_empty();
            match op {
                CmpOp::Eq => lflag == *flag,
                CmpOp::Ne => lflag != *flag,
                _ => false,
            }
        }
        XPathValue::NodeSet(_) => false,
    }
}
