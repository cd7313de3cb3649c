use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::arena::Arena;
use crate::bridge::VariableContext;
use crate::error::{Error, Result};
use crate::functions::FunctionRegistry;
use crate::trace::NodeRecorder;
use crate::types::{Value, VariableRegistry};

/// Per-evaluation resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Wall-clock budget measured from the start of the evaluation (or batch).
    pub timeout: Duration,
    /// Upper bound on the estimated bytes of resolved variables.
    pub memory_limit: usize,
    /// Deepest allowed function-call nesting.
    pub max_depth: usize,
    /// Most non-leaf nodes and function calls one evaluation may visit.
    pub max_evaluations: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            memory_limit: 1024 * 1024,
            max_depth: 50,
            max_evaluations: 10_000,
        }
    }
}

/// Cooperative cancellation flag shared between a caller and running
/// evaluations. Observed at every limit check.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// State shared by every context of one evaluation or batch.
struct Shared<'a> {
    start: Instant,
    cancellation: CancellationToken,
    limits: Limits,
    functions: &'a FunctionRegistry,
    variables: &'a VariableRegistry,
    arena: &'a Arena,
    memory_used: AtomicUsize,
}

/// Everything a running evaluation can see: host data, registries, the
/// arena, the limits and the counters checked against them.
///
/// A context serves one `evaluate` call or one batch job. Workers of a batch
/// get their own context through [`clone_for_worker`](Self::clone_for_worker)
/// and share the start time, cancellation, memory accounting and arena.
pub struct EvaluationContext<'a> {
    shared: Arc<Shared<'a>>,
    variables: &'a dyn VariableContext,
    resolved: Mutex<HashMap<Arc<str>, Slot>>,
    depth: AtomicUsize,
    evaluations: AtomicU64,
    recorder: Option<&'a NodeRecorder>,
}

impl<'a> EvaluationContext<'a> {
    pub(crate) fn new(
        variables: &'a dyn VariableContext,
        functions: &'a FunctionRegistry,
        registry: &'a VariableRegistry,
        arena: &'a Arena,
        limits: Limits,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                start: Instant::now(),
                cancellation,
                limits,
                functions,
                variables: registry,
                arena,
                memory_used: AtomicUsize::new(0),
            }),
            variables,
            resolved: Mutex::new(HashMap::new()),
            depth: AtomicUsize::new(0),
            evaluations: AtomicU64::new(0),
            recorder: None,
        }
    }

    /// A context for another job of the same batch: fresh variable cache and
    /// counters, shared deadline, cancellation, memory accounting and arena.
    #[must_use]
    pub fn clone_for_worker(&self, variables: &'a dyn VariableContext) -> EvaluationContext<'a> {
        Self {
            shared: Arc::clone(&self.shared),
            variables,
            resolved: Mutex::new(HashMap::new()),
            depth: AtomicUsize::new(0),
            evaluations: AtomicU64::new(0),
            recorder: None,
        }
    }

    pub(crate) fn with_recorder(mut self, recorder: &'a NodeRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub(crate) fn recorder(&self) -> Option<&'a NodeRecorder> {
        self.recorder
    }

    /// Run every limit check and count one evaluation step.
    ///
    /// # Errors
    ///
    /// The first violated limit, checked in the order cancellation, timeout,
    /// memory, depth, evaluation count.
    pub fn check_limits(&self) -> Result<()> {
        let limits = &self.shared.limits;
        if self.shared.cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let elapsed = self.shared.start.elapsed();
        if elapsed > limits.timeout {
            return Err(Error::Timeout {
                elapsed,
                limit: limits.timeout,
            });
        }
        let used = self.shared.memory_used.load(Ordering::Relaxed);
        if used > limits.memory_limit {
            return Err(Error::MemoryExceeded {
                used,
                limit: limits.memory_limit,
            });
        }
        if self.depth.load(Ordering::Relaxed) > limits.max_depth {
            return Err(Error::DepthExceeded {
                max: limits.max_depth,
            });
        }
        let count = self.evaluations.fetch_add(1, Ordering::Relaxed) + 1;
        if count > limits.max_evaluations {
            return Err(Error::EvaluationLimit {
                max: limits.max_evaluations,
            });
        }
        Ok(())
    }

    /// Value of an identifier. Cached for the rest of this context's life,
    /// so a second reference never re-runs the resolver.
    ///
    /// Registered variables win; otherwise the host context's `field(name)`
    /// is read directly.
    ///
    /// # Errors
    ///
    /// Wrapped resolver or validator failures for registered variables; the
    /// host context's error (typically [`Error::UnknownVariable`]) otherwise.
    pub fn resolve_variable(&self, name: &Arc<str>) -> Result<Value> {
        if let Some(hit) = self.resolved_value(name) {
            return Ok(hit);
        }

        let value = match self.shared.variables.get(name) {
            Some(variable) => variable.resolve(self.variables)?,
            None => self.variables.field(name)?.to_value()?,
        };

        self.shared
            .memory_used
            .fetch_add(value.memory_estimate(), Ordering::Relaxed);
        let (slot, value) = Slot::store(self.shared.arena, value);
        self.resolved.lock().insert(Arc::clone(name), slot);
        Ok(value)
    }

    /// What `name` resolved to in this context, without resolving it.
    pub(crate) fn resolved_value(&self, name: &str) -> Option<Value> {
        let slot = self.resolved.lock().get(name).cloned()?;
        slot.load(self.shared.arena)
    }

    /// Call a registered function with already-evaluated arguments.
    ///
    /// # Errors
    ///
    /// Limit violations, [`Error::UnknownFunction`], [`Error::Arity`], and
    /// whatever the function itself returns.
    pub fn call_function(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.check_limits()?;
        let function = self
            .shared
            .functions
            .get(name)
            .ok_or_else(|| Error::UnknownFunction {
                name: name.to_owned(),
            })?;
        function.check_arity(args.len())?;

        let _depth = DepthGuard::enter(&self.depth);
        if self.depth.load(Ordering::Relaxed) > self.shared.limits.max_depth {
            return Err(Error::DepthExceeded {
                max: self.shared.limits.max_depth,
            });
        }
        function.call(self, args)
    }

    #[must_use]
    pub fn variables(&self) -> &'a dyn VariableContext {
        self.variables
    }

    #[must_use]
    pub fn arena(&self) -> &'a Arena {
        self.shared.arena
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.shared.limits
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.shared.start.elapsed()
    }

    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.shared.memory_used.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn evaluation_count(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancellation.is_cancelled()
    }
}

impl fmt::Debug for EvaluationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("limits", &self.shared.limits)
            .field("elapsed", &self.elapsed())
            .field("memory_used", &self.memory_used())
            .field("depth", &self.depth())
            .field("evaluations", &self.evaluation_count())
            .finish_non_exhaustive()
    }
}

/// Where a resolved variable lives in the evaluation's arena.
#[derive(Debug, Clone)]
enum Slot {
    Number(usize),
    Bool(usize),
    Str(Arc<str>),
    Other(usize),
}

impl Slot {
    /// Move `value` into the arena's typed pools. Strings come back interned.
    fn store(arena: &Arena, value: Value) -> (Slot, Value) {
        match value {
            Value::Number(n) => (Slot::Number(arena.alloc_f64(n)), value),
            Value::Bool(b) => (Slot::Bool(arena.alloc_bool(b)), value),
            Value::Str(s) => {
                let interned = arena.alloc_string(&s);
                (Slot::Str(Arc::clone(&interned)), Value::Str(interned))
            }
            other => (Slot::Other(arena.alloc_value(other.clone())), other),
        }
    }

    fn load(&self, arena: &Arena) -> Option<Value> {
        match self {
            Slot::Number(slot) => arena.f64_at(*slot).map(Value::Number),
            Slot::Bool(slot) => arena.bool_at(*slot).map(Value::Bool),
            Slot::Str(s) => Some(Value::Str(Arc::clone(s))),
            Slot::Other(slot) => arena.value_at(*slot),
        }
    }
}

struct DepthGuard<'d>(&'d AtomicUsize);

impl<'d> DepthGuard<'d> {
    fn enter(depth: &'d AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::Relaxed);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
