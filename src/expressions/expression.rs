//! Parsed expression nodes and the shared evaluation procedure.

use super::context::ExpressionContext;
use super::operators::Operator;
use super::pipeline::Pipeline;
use super::stages::Stage;
use super::variables::{self, VariableRef};
use crate::config::{DEFAULT_MAX_REGEXP_LENGTH, MAX_EXPRESSION_DEPTH};
use crate::errors::{ExprError, Result};
use crate::value::{Map, Value};
use bson::Bson;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub type ExpressionRef = Arc<Expression>;

/// Limits applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub max_depth: usize,
    pub max_regexp_length: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self { max_depth: MAX_EXPRESSION_DEPTH, max_regexp_length: DEFAULT_MAX_REGEXP_LENGTH }
    }
}

pub(crate) fn join_path(parent: &str, path: &str) -> String {
    match (parent.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => parent.to_string(),
        (false, false) => format!("{parent}.{path}"),
    }
}

/// Parse-time stand in for a node while its children are parsed. Collects the variables the
/// node registers and lets children check variable references against their ancestors.
#[derive(Debug)]
pub struct ParseFrame<'p> {
    parent: Option<&'p ParseFrame<'p>>,
    path: String,
    full_path: String,
    depth: usize,
    options: ParseOptions,
    registered: RefCell<Vec<String>>,
}

impl<'p> ParseFrame<'p> {
    #[must_use]
    pub fn root(options: ParseOptions) -> ParseFrame<'static> {
        ParseFrame {
            parent: None,
            path: String::new(),
            full_path: String::new(),
            depth: 1,
            options,
            registered: RefCell::new(Vec::new()),
        }
    }

    /// Frame for the child at `path`; fails once the tree gets too deep.
    pub fn child(&self, path: &str) -> Result<ParseFrame<'_>> {
        let depth = self.depth + 1;
        let full_path = join_path(&self.full_path, path);
        if depth > self.options.max_depth {
            return Err(ExprError::invalid_query(format!(
                "Maximum expression depth ({}) exceeded",
                self.options.max_depth
            ))
            .with_path(full_path));
        }
        Ok(ParseFrame {
            parent: Some(self),
            path: path.to_string(),
            full_path,
            depth,
            options: self.options,
            registered: RefCell::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn options(&self) -> ParseOptions {
        self.options
    }

    pub fn register(&self, name: impl Into<String>) {
        let name = name.into();
        let mut registered = self.registered.borrow_mut();
        if !registered.contains(&name) {
            registered.push(name);
        }
    }

    /// Registers on the outermost frame.
    pub fn register_on_root(&self, name: &str) {
        let mut frame: &ParseFrame<'_> = self;
        while let Some(parent) = frame.parent {
            frame = parent;
        }
        frame.register(name);
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        if self.registered.borrow().iter().any(|n| n == name) {
            return true;
        }
        self.parent.is_some_and(|p| p.is_registered(name))
    }

    /// An `invalidArgument.query` error stamped with this frame's path.
    #[must_use]
    pub fn error(&self, reason: impl Into<String>) -> ExprError {
        ExprError::invalid_query(reason).with_path(self.full_path.clone())
    }

    /// Like [`ParseFrame::error`] but pointing at the sub-key `sub`.
    #[must_use]
    pub fn error_at(&self, sub: &str, reason: impl Into<String>) -> ExprError {
        ExprError::invalid_query(reason).with_path(join_path(&self.full_path, sub))
    }

    fn take_registered(&self) -> Vec<String> {
        std::mem::take(&mut *self.registered.borrow_mut())
    }
}

pub enum ExpressionKind {
    /// Returned as is; arrays and objects are literal-marked.
    Literal(Value),
    /// `$path.to.field`, read from `$$ROOT`.
    Field(String),
    Variable(VariableRef),
    /// Plain object whose values are expressions.
    Object(Vec<(String, ExpressionRef)>),
    /// Plain array whose elements are expressions.
    Array(Vec<ExpressionRef>),
    Operator(Operator),
    Pipeline(Pipeline),
    Stage(Stage),
}

impl ExpressionKind {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ExpressionKind::Literal(_) => "literal",
            ExpressionKind::Field(_) => "field",
            ExpressionKind::Variable(_) => "variable",
            ExpressionKind::Object(_) => "object",
            ExpressionKind::Array(_) => "array",
            ExpressionKind::Operator(op) => op.name(),
            ExpressionKind::Pipeline(_) => "pipeline",
            ExpressionKind::Stage(stage) => stage.name(),
        }
    }
}

/// One node of a parsed expression tree. Immutable once built and shared between evaluations.
pub struct Expression {
    path: String,
    full_path: String,
    depth: usize,
    input: Bson,
    registered: Vec<String>,
    kind: ExpressionKind,
}

impl Expression {
    pub(crate) fn build(frame: &ParseFrame<'_>, input: &Bson, kind: ExpressionKind) -> ExpressionRef {
        Arc::new(Expression {
            path: frame.path.clone(),
            full_path: frame.full_path.clone(),
            depth: frame.depth,
            input: input.clone(),
            registered: frame.take_registered(),
            kind,
        })
    }

    /// Position within the parent node.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Dotted position from the root of the tree.
    #[must_use]
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The raw definition this node was parsed from.
    #[must_use]
    pub fn input(&self) -> &Bson {
        &self.input
    }

    #[must_use]
    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    #[must_use]
    pub fn has_local_variables(&self) -> bool {
        !self.registered.is_empty()
    }

    #[must_use]
    pub fn kind(&self) -> &ExpressionKind {
        &self.kind
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("full_path", &self.full_path)
            .field("depth", &self.depth)
            .field("kind", &self.kind.name())
            .field("registered", &self.registered)
            .finish()
    }
}

/// Per-call evaluation options.
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Input handed to pipelines and stages, usually a cursor.
    pub input: Option<Value>,
}

impl EvalOptions {
    #[must_use]
    pub fn with_input(input: Value) -> Self {
        Self { input: Some(input) }
    }
}

pub trait Evaluate {
    /// Evaluates the node against `ec`.
    ///
    /// Nodes that register variables run in a child context of `ec` whose variable scope is
    /// cleared on entry. Depth limits are checked, the time taken is recorded under the node's
    /// full path and errors are stamped with that path.
    fn evaluate<'a>(&'a self, ec: &'a ExpressionContext, options: EvalOptions) -> BoxFuture<'a, Result<Value>>;
}

impl Evaluate for ExpressionRef {
    fn evaluate<'a>(&'a self, ec: &'a ExpressionContext, options: EvalOptions) -> BoxFuture<'a, Result<Value>> {
        async move {
            let scoped;
            let inner = if self.has_local_variables() && !ec.is_for(self) {
                scoped = ec.scoped_child(self)?;
                &scoped
            } else {
                ec
            };
            inner.enter(self)?;
            let started = Instant::now();
            let result = evaluate_kind(self, inner, ec, options).await;
            inner.exit(self, result, started.elapsed())
        }
        .boxed()
    }
}

/// Evaluates every expression, concurrently.
pub(crate) async fn evaluate_all(items: &[ExpressionRef], ec: &ExpressionContext) -> Result<Vec<Value>> {
    try_join_all(items.iter().map(|e| e.evaluate(ec, EvalOptions::default()))).await
}

async fn evaluate_kind(
    expr: &ExpressionRef,
    ec: &ExpressionContext,
    outer: &ExpressionContext,
    options: EvalOptions,
) -> Result<Value> {
    match expr.kind() {
        ExpressionKind::Literal(v) => Ok(v.clone()),
        ExpressionKind::Field(path) => {
            let root = ec.get_variable(variables::ROOT);
            ec.read_object(&root, path).await
        }
        ExpressionKind::Variable(var) => variables::evaluate(var, ec).await,
        ExpressionKind::Object(fields) => {
            let values = try_join_all(fields.iter().map(|(_, e)| e.evaluate(ec, EvalOptions::default()))).await?;
            let mut out = Map::with_capacity(fields.len());
            for ((name, _), value) in fields.iter().zip(values) {
                if !value.is_undefined() {
                    out.insert(name.clone(), value);
                }
            }
            Ok(Value::Object(out))
        }
        ExpressionKind::Array(items) => Ok(Value::Array(evaluate_all(items, ec).await?)),
        ExpressionKind::Operator(op) => op.evaluate(expr, ec, outer).await,
        ExpressionKind::Pipeline(pipeline) => pipeline.evaluate(ec, options).await,
        ExpressionKind::Stage(stage) => stage.evaluate(expr, ec, options).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_track_depth_and_paths() {
        let root = ParseFrame::root(ParseOptions { max_depth: 3, ..ParseOptions::default() });
        let a = root.child("0").unwrap();
        let b = a.child("$match").unwrap();
        assert_eq!(b.full_path(), "0.$match");
        assert_eq!(b.depth(), 3);
        let err = b.child("x").unwrap_err();
        assert_eq!(err.path(), Some("0.$match.x"));
        assert!(err.reason().contains("Maximum expression depth (3) exceeded"));
    }

    #[test]
    fn registration_is_visible_to_descendants() {
        let root = ParseFrame::root(ParseOptions::default());
        root.register("$$ROOT");
        let child = root.child("in").unwrap();
        child.register("item");
        let grandchild = child.child("0").unwrap();
        assert!(grandchild.is_registered("item"));
        assert!(grandchild.is_registered("$$ROOT"));
        assert!(!root.is_registered("item"));
        grandchild.register_on_root("$$SCRIPT");
        assert!(root.is_registered("$$SCRIPT"));
    }

    #[test]
    fn join_paths() {
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("a", ""), "a");
        assert_eq!(join_path("a", "b"), "a.b");
    }
}
