use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::types::{Expr, Value};

/// Outcome of one trace step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Success,
    Failed(String),
}

impl StepResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, StepResult::Success)
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepResult::Success => f.write_str("Success"),
            StepResult::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// One node of the trace tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceStep {
    label: String,
    description: String,
    result: StepResult,
    value: Option<String>,
    children: Vec<TraceStep>,
}

impl TraceStep {
    pub(crate) fn new(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
            result: StepResult::Success,
            value: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn succeed(mut self, value: impl fmt::Display) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub(crate) fn fail(mut self, error: impl fmt::Display) -> Self {
        self.result = StepResult::Failed(error.to_string());
        self
    }

    /// Record the outcome of `result`.
    pub(crate) fn finish<T: fmt::Display, E: fmt::Display>(
        self,
        result: &std::result::Result<T, E>,
    ) -> Self {
        match result {
            Ok(value) => self.succeed(value),
            Err(e) => self.fail(e),
        }
    }

    pub(crate) fn with_children(mut self, children: Vec<TraceStep>) -> Self {
        self.children = children;
        self
    }

    pub(crate) fn mark_failed(&mut self, reason: impl Into<String>) {
        self.result = StepResult::Failed(reason.into());
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn result(&self) -> &StepResult {
        &self.result
    }

    /// The value this step produced, rendered as text.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    #[must_use]
    pub fn children(&self) -> &[TraceStep] {
        &self.children
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}[{}] {}", "", self.result, self.label, indent = depth * 2)?;
        if !self.description.is_empty() {
            write!(f, ": {}", self.description)?;
        }
        if let Some(value) = &self.value {
            write!(f, " => {value}")?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.render(f, depth + 1)?;
        }
        Ok(())
    }
}

/// Step-by-step record of one traced evaluation, returned by
/// [`Evaluator::evaluate_traced`](crate::Evaluator::evaluate_traced).
///
/// Top-level steps appear in pipeline order: `Tokenization`, `Parsing`,
/// `Variable Extraction`, `Variable Resolution`, `Expression Evaluation` and
/// `Type Conversion`. Stages after a failing stage are absent. Variables are
/// resolved lazily during evaluation, so `Variable Resolution` lists each
/// identifier with the value the walk needed, or `not reached` for one in an
/// untaken branch; a failing variable fails both that step and the
/// evaluation.
#[derive(Debug)]
#[must_use]
pub struct EvaluationTrace {
    steps: Vec<TraceStep>,
    outcome: Result<f64>,
    duration: Duration,
}

impl EvaluationTrace {
    pub(crate) fn new(steps: Vec<TraceStep>, outcome: Result<f64>, duration: Duration) -> Self {
        Self {
            steps,
            outcome,
            duration,
        }
    }

    #[must_use]
    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    /// Top-level step with the given label.
    #[must_use]
    pub fn step(&self, label: &str) -> Option<&TraceStep> {
        self.steps.iter().find(|s| s.label == label)
    }

    /// The numeric result, same as [`Evaluator::evaluate`](crate::Evaluator::evaluate).
    #[must_use]
    pub fn result(&self) -> Option<f64> {
        self.outcome.as_ref().ok().copied()
    }

    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }

    /// # Errors
    ///
    /// The error that ended the traced evaluation.
    pub fn into_result(self) -> Result<f64> {
        self.outcome
    }

    /// Wall-clock duration of the whole traced evaluation.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for EvaluationTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(v) => write!(f, "result: {v}")?,
            Err(e) => write!(f, "error: {e}")?,
        }
        writeln!(f, ", duration: {:?}", self.duration)?;
        for step in &self.steps {
            step.render(f, 1)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Frames {
    open: Vec<TraceStep>,
    done: Vec<TraceStep>,
}

/// Collects one [`TraceStep`] per AST node visited by the tree walker.
///
/// The walker calls [`enter`](Self::enter) before and [`exit`](Self::exit)
/// after each node; a failing node fails every open ancestor as the error
/// propagates.
#[derive(Debug, Default)]
pub(crate) struct NodeRecorder {
    frames: Mutex<Frames>,
}

impl NodeRecorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enter(&self, expr: &Expr) {
        self.frames
            .lock()
            .open
            .push(TraceStep::new(expr.kind_name(), expr.to_string()));
    }

    pub(crate) fn exit(&self, result: &Result<Value>) {
        let mut frames = self.frames.lock();
        let Some(step) = frames.open.pop() else {
            return;
        };
        let step = step.finish(result);
        match frames.open.last_mut() {
            Some(parent) => parent.children.push(step),
            None => frames.done.push(step),
        }
    }

    /// Completed top-level node steps.
    pub(crate) fn into_steps(self) -> Vec<TraceStep> {
        self.frames.into_inner().done
    }
}
