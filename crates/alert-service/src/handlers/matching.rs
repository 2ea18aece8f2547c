//! Match-expression gate.
//!
//! Compiles a boolean expression once at construction and evaluates it
//! against each event, forwarding to the inner handler only when it is
//! true. The scope exposes zero-argument functions (`changed()`,
//! `level()`, `name()`, `taskName()`, `duration()`), severity-level
//! constants, and the event's tags as variables.

use std::sync::Arc;

use alert_core::{Event, EventState, Handler, Level};
use async_trait::async_trait;
use evalexpr::{
    build_operator_tree, ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError,
    Function, HashMapContext, Node, Value,
};
use thiserror::Error;
use tracing::error;

/// Match-expression compilation failures.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid match expression: {0}")]
    Parse(#[from] EvalexprError),

    /// The expression calls a function outside the known scope.
    #[error("unknown function {0:?} in match expression")]
    UnknownFunction(String),
}

#[derive(Debug, Error)]
enum EvalError {
    #[error("event has no tag {0:?}")]
    MissingTag(String),
    #[error(transparent)]
    Eval(#[from] EvalexprError),
}

const KNOWN_FUNCTIONS: [&str; 5] = ["changed", "level", "name", "taskName", "duration"];
const CONSTANTS: [&str; 6] = ["OK", "INFO", "WARNING", "CRITICAL", "TRUE", "FALSE"];

/// Forwards an event iff the compiled expression evaluates true for it.
pub struct MatchHandler {
    inner: Arc<dyn Handler>,
    expr: Node,
    /// Scope functions the expression actually references; only these are
    /// installed per evaluation.
    functions: Vec<String>,
    /// Non-constant identifiers, resolved from the event's tags. A tag
    /// missing at evaluation time is an error and drops the event; it is
    /// not treated as a non-match.
    tags: Vec<String>,
}

impl MatchHandler {
    pub fn new(expression: &str, inner: Arc<dyn Handler>) -> Result<Self, MatchError> {
        let expr = build_operator_tree(expression)?;
        let mut functions = Vec::new();
        for ident in expr.iter_function_identifiers() {
            if !KNOWN_FUNCTIONS.contains(&ident) {
                return Err(MatchError::UnknownFunction(ident.to_string()));
            }
            if !functions.iter().any(|f| f == ident) {
                functions.push(ident.to_string());
            }
        }
        let mut tags = Vec::new();
        for ident in expr.iter_variable_identifiers() {
            if CONSTANTS.contains(&ident) {
                continue;
            }
            if !tags.iter().any(|t| t == ident) {
                tags.push(ident.to_string());
            }
        }
        let handler = Self {
            inner,
            expr,
            functions,
            tags,
        };
        // The parser accepts some malformed operator chains (e.g. a
        // trailing comparison with one operand) and only faults when
        // evaluated, so run the expression once against a placeholder
        // event with every referenced tag present. Arity and type errors
        // surface here instead of silently dropping live events.
        let mut sample = Event::new(String::new(), EventState::default());
        for tag in &handler.tags {
            sample.data.tags.insert(tag.clone(), String::new());
        }
        match handler.evaluate(&sample) {
            Ok(_) | Err(EvalError::MissingTag(_)) => {}
            Err(EvalError::Eval(err)) => return Err(MatchError::Parse(err)),
        }
        Ok(handler)
    }

    fn evaluate(&self, event: &Event) -> Result<bool, EvalError> {
        let mut ctx = HashMapContext::new();
        for level in Level::ALL {
            ctx.set_value(level.as_str().to_string(), Value::Int(level as i64))?;
        }
        ctx.set_value("TRUE".to_string(), Value::Boolean(true))?;
        ctx.set_value("FALSE".to_string(), Value::Boolean(false))?;
        for name in &self.functions {
            let value = match name.as_str() {
                "changed" => Value::Boolean(event.state.level != event.previous_level()),
                "level" => Value::Int(event.state.level as i64),
                "name" => Value::String(event.data.name.clone()),
                "taskName" => Value::String(event.data.task_name.clone()),
                // Nanoseconds, the unit durations compare in. Saturate
                // rather than wrap on durations beyond ~292 years.
                _ => Value::Int(
                    i64::try_from(event.state.duration.as_nanos()).unwrap_or(i64::MAX),
                ),
            };
            ctx.set_function(name.clone(), Function::new(move |_| Ok(value.clone())))?;
        }
        for tag in &self.tags {
            let value = event
                .data
                .tags
                .get(tag)
                .ok_or_else(|| EvalError::MissingTag(tag.clone()))?;
            ctx.set_value(tag.clone(), Value::String(value.clone()))?;
        }
        Ok(self.expr.eval_boolean_with_context(&ctx)?)
    }
}

#[async_trait]
impl Handler for MatchHandler {
    async fn handle(&self, event: &Event) {
        match self.evaluate(event) {
            Ok(true) => self.inner.handle(event).await,
            Ok(false) => {}
            Err(err) => {
                error!(
                    topic = %event.topic,
                    event = %event.state.id,
                    error = %err,
                    "failed to evaluate match expression, dropping event"
                );
            }
        }
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
