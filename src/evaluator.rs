use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::arena::{Arena, ArenaPool};
use crate::bridge::VariableContext;
use crate::cache::{CacheStats, LruCache, DEFAULT_CAPACITY};
use crate::compile::{self, CompiledExpression};
use crate::context::{CancellationToken, EvaluationContext, Limits};
use crate::error::{Error, Result};
use crate::functions::{FunctionDescriptor, FunctionRegistry};
use crate::parse::{parse_tokens, Lexer};
use crate::trace::{EvaluationTrace, NodeRecorder, TraceStep};
use crate::types::{Variable, VariableRegistry};

/// Worker threads used by [`Evaluator::evaluate_batch`] unless configured.
pub const DEFAULT_WORKERS: usize = 4;

/// Builder for an [`Evaluator`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use formulary::{EvaluatorBuilder, Limits, VariableRegistry};
///
/// let evaluator = EvaluatorBuilder::new()
///     .variables(Arc::new(VariableRegistry::new()))
///     .cache_capacity(64)
///     .limits(Limits {
///         timeout: Duration::from_millis(20),
///         ..Limits::default()
///     })
///     .build();
/// assert_eq!(evaluator.cache_stats().capacity, 64);
/// ```
#[derive(Debug)]
pub struct EvaluatorBuilder {
    cache_capacity: usize,
    limits: Limits,
    functions: Option<Arc<FunctionRegistry>>,
    variables: Option<Arc<VariableRegistry>>,
    pool: Option<Arc<ArenaPool>>,
    workers: usize,
}

impl EvaluatorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
            limits: Limits::default(),
            functions: None,
            variables: None,
            pool: None,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Compiled-expression cache size. 0 selects the cache's fallback size.
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Function table to use instead of a fresh one with the builtins.
    #[must_use]
    pub fn functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = Some(functions);
        self
    }

    /// Variable registry to use instead of [`VariableRegistry::global`].
    #[must_use]
    pub fn variables(mut self, variables: Arc<VariableRegistry>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Arena pool to use instead of [`ArenaPool::global`].
    #[must_use]
    pub fn arena_pool(mut self, pool: Arc<ArenaPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Upper bound on batch worker threads. 0 is treated as 1.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn build(self) -> Evaluator {
        Evaluator {
            cache: LruCache::new(self.cache_capacity),
            lexer: Lexer::new(),
            functions: self
                .functions
                .unwrap_or_else(|| Arc::new(FunctionRegistry::new())),
            variables: self.variables.unwrap_or_else(VariableRegistry::global),
            pool: self.pool,
            limits: self.limits,
            workers: self.workers,
        }
    }
}

impl Default for EvaluatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiles, caches and evaluates formulas.
///
/// Thread-safe: share it behind an `Arc` and call [`evaluate`](Self::evaluate)
/// from any number of threads.
///
/// # Example
///
/// ```
/// use formulary::{EntityContext, Evaluator, Record, VariableRegistry};
/// use std::sync::Arc;
///
/// let evaluator = Evaluator::new(Arc::new(VariableRegistry::new()));
/// let shipment = EntityContext::new(Record::new().set("weight", 120_i64));
/// let charge = evaluator.evaluate("weight > 100 ? weight * 0.5 : 25", &shipment).unwrap();
/// assert!((charge - 60.0).abs() < 1e-9);
/// ```
pub struct Evaluator {
    cache: LruCache<Arc<str>, Arc<CompiledExpression>>,
    lexer: Lexer,
    functions: Arc<FunctionRegistry>,
    variables: Arc<VariableRegistry>,
    pool: Option<Arc<ArenaPool>>,
    limits: Limits,
    workers: usize,
}

impl Evaluator {
    /// An evaluator with default limits, cache size and builtins.
    #[must_use]
    pub fn new(variables: Arc<VariableRegistry>) -> Self {
        EvaluatorBuilder::new().variables(variables).build()
    }

    #[must_use]
    pub fn builder() -> EvaluatorBuilder {
        EvaluatorBuilder::new()
    }

    /// Compile `source`, or return the cached compilation of the identical
    /// string.
    ///
    /// # Errors
    ///
    /// Tokenizer, parser and complexity errors. Failures are not cached.
    pub fn compile(&self, source: &str) -> Result<Arc<CompiledExpression>> {
        if let Some(hit) = self.cache.get(source) {
            return Ok(hit);
        }
        log::debug!("compiling expression of {} bytes", source.len());
        let compiled = Arc::new(compile::compile(&self.lexer, source)?);
        self.cache.put(Arc::from(source), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Evaluate `source` against `variables` and coerce the result to `f64`.
    ///
    /// # Errors
    ///
    /// Compile errors, evaluation errors and limit violations, or
    /// [`Error::TypeCoercion`] when the result is neither a number nor a
    /// boolean.
    pub fn evaluate(&self, source: &str, variables: &dyn VariableContext) -> Result<f64> {
        self.evaluate_with_cancellation(source, variables, &CancellationToken::new())
    }

    /// Like [`evaluate`](Self::evaluate), stopping with [`Error::Cancelled`]
    /// at the next limit check after `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Same as [`evaluate`](Self::evaluate), plus [`Error::Cancelled`].
    pub fn evaluate_with_cancellation(
        &self,
        source: &str,
        variables: &dyn VariableContext,
        token: &CancellationToken,
    ) -> Result<f64> {
        let compiled = self.compile(source)?;
        self.pool().with_arena(|arena| {
            let ctx = self.context(variables, arena, token.clone());
            compiled.root().evaluate(&ctx)?.to_f64()
        })
    }

    /// Evaluate one expression against many contexts in parallel.
    ///
    /// The expression is compiled once. At most `min(contexts.len(), workers)`
    /// scoped threads pull jobs from a bounded queue; all jobs share one
    /// arena, one deadline and one memory budget. `results[i]` belongs to
    /// `contexts[i]`; failed jobs leave `0.0` in their slot. A job that
    /// panics fails with [`Error::Panicked`] and its worker moves on. The
    /// returned error is the one from the lowest failing index, or the
    /// compile error.
    pub fn evaluate_batch<C: VariableContext>(
        &self,
        source: &str,
        contexts: &[C],
    ) -> (Vec<f64>, Option<Error>) {
        let mut results = vec![0.0; contexts.len()];
        let Some(first) = contexts.first() else {
            return (results, None);
        };
        let compiled = match self.compile(source) {
            Ok(compiled) => compiled,
            Err(e) => return (results, Some(e)),
        };

        let arena = self.pool().acquire();
        let base = self.context(first, &arena, CancellationToken::new());
        let workers = self.workers.min(contexts.len());
        let (job_tx, job_rx) = mpsc::sync_channel::<usize>(workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (err_tx, err_rx) = mpsc::channel::<(usize, Error)>();

        let finished: Vec<(usize, f64)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let err_tx = err_tx.clone();
                    let job_rx = Arc::clone(&job_rx);
                    let (base, compiled) = (&base, &compiled);
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let job = job_rx.lock().recv();
                            let Ok(index) = job else {
                                break;
                            };
                            let ctx = base.clone_for_worker(&contexts[index]);
                            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                                compiled.root().evaluate(&ctx).and_then(|v| v.to_f64())
                            }))
                            .unwrap_or_else(|payload| Err(Error::panicked(payload.as_ref())));
                            match outcome {
                                Ok(value) => done.push((index, value)),
                                Err(e) => {
                                    log::warn!("batch job {index} failed: {e}");
                                    // receiver outlives every worker
                                    let _ = err_tx.send((index, e));
                                }
                            }
                        }
                        done
                    })
                })
                .collect();
            // if every worker dies, sends fail instead of blocking
            drop(job_rx);

            for index in 0..contexts.len() {
                if job_tx.send(index).is_err() {
                    break;
                }
            }
            drop(job_tx);

            let mut finished = Vec::with_capacity(contexts.len());
            for handle in handles {
                match handle.join() {
                    Ok(done) => finished.extend(done),
                    // jobs are caught individually; this is a worker dying between jobs
                    Err(payload) => {
                        let _ = err_tx.send((usize::MAX, Error::panicked(payload.as_ref())));
                    }
                }
            }
            finished
        });
        drop(err_tx);

        for (index, value) in finished {
            results[index] = value;
        }
        let first_error = err_rx
            .into_iter()
            .min_by_key(|(index, _)| *index)
            .map(|(_, e)| e);
        (results, first_error)
    }

    /// Evaluate `source` while recording every pipeline stage and every AST
    /// node visited. Never uses or fills the compile cache.
    pub fn evaluate_traced(&self, source: &str, variables: &dyn VariableContext) -> EvaluationTrace {
        let start = Instant::now();
        let mut steps = Vec::new();
        let outcome = self.run_traced(source, variables, &mut steps);
        EvaluationTrace::new(steps, outcome, start.elapsed())
    }

    fn run_traced(
        &self,
        source: &str,
        variables: &dyn VariableContext,
        steps: &mut Vec<TraceStep>,
    ) -> Result<f64> {
        let tokens = self.lexer.tokenize(source);
        steps.push(
            TraceStep::new("Tokenization", "split the source into tokens")
                .finish(&tokens.as_ref().map(|t| format!("{} tokens", t.len()))),
        );
        let tokens = tokens?;

        let compiled = parse_tokens(&tokens).and_then(|root| compile::from_root(source, root));
        steps.push(
            TraceStep::new("Parsing", "build and check the syntax tree")
                .finish(&compiled.as_ref().map(|c| c.root())),
        );
        let compiled = compiled?;

        let names: Vec<&str> = compiled.variables().iter().map(AsRef::as_ref).collect();
        steps.push(
            TraceStep::new("Variable Extraction", "collect referenced identifiers")
                .succeed(format!("[{}]", names.join(", "))),
        );

        self.pool().with_arena(|arena| {
            let recorder = NodeRecorder::new();
            let ctx = self
                .context(variables, arena, CancellationToken::new())
                .with_recorder(&recorder);

            // identifiers resolve lazily during the walk; the resolution
            // step reports only what the walk needed
            let evaluated = compiled.root().evaluate(&ctx);
            let failed_variable = evaluated.as_ref().err().and_then(|e| match e {
                Error::VariableResolution { name, .. }
                | Error::VariableValidation { name, .. }
                | Error::UnknownVariable { name } => Some((name.as_str(), e)),
                _ => None,
            });

            let children = compiled
                .variables()
                .iter()
                .map(|name| {
                    let description = match self.variables.get(name) {
                        Some(variable) if !variable.describe().is_empty() => {
                            variable.describe().to_owned()
                        }
                        Some(_) => "registered variable".to_owned(),
                        None => "host field".to_owned(),
                    };
                    let step = TraceStep::new(name.to_string(), description);
                    match (ctx.resolved_value(name), failed_variable) {
                        (Some(value), _) => step.succeed(value),
                        (None, Some((failed, e))) if failed == &**name => step.fail(e),
                        (None, _) => step.succeed("not reached"),
                    }
                })
                .collect();
            let mut resolution =
                TraceStep::new("Variable Resolution", "resolve each variable").with_children(children);
            if let Some((name, _)) = failed_variable {
                resolution.mark_failed(format!("variable '{name}' failed"));
            }
            steps.push(resolution);

            drop(ctx);
            steps.push(
                TraceStep::new("Expression Evaluation", compiled.source())
                    .with_children(recorder.into_steps())
                    .finish(&evaluated),
            );
            let value = evaluated?;

            let number = value.to_f64();
            steps.push(
                TraceStep::new("Type Conversion", format!("{} to number", value.type_name()))
                    .finish(&number),
            );
            number
        })
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every compiled expression and reset the cache counters.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Change the cache capacity. 0 is ignored.
    pub fn resize_cache(&self, capacity: usize) {
        self.cache.resize(capacity);
    }

    /// Compile every source and add them all to the cache. Nothing is cached
    /// if any source fails.
    ///
    /// # Errors
    ///
    /// The first compile error, in input order.
    pub fn preload<S: AsRef<str>>(&self, sources: &[S]) -> Result<()> {
        let compiled = sources
            .iter()
            .map(|s| compile::compile(&self.lexer, s.as_ref()).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        for expression in compiled {
            self.cache.put(Arc::from(expression.source()), expression);
        }
        Ok(())
    }

    /// Add a function, replacing any existing one with the same name.
    pub fn register_function(&self, descriptor: FunctionDescriptor) {
        self.functions.register(descriptor);
    }

    /// # Errors
    ///
    /// [`Error::DuplicateVariable`] when the name is taken.
    pub fn register_variable(&self, variable: Variable) -> Result<()> {
        self.variables.register(variable)
    }

    #[must_use]
    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    #[must_use]
    pub fn variables(&self) -> &Arc<VariableRegistry> {
        &self.variables
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    fn pool(&self) -> &ArenaPool {
        self.pool.as_deref().unwrap_or_else(|| ArenaPool::global())
    }

    fn context<'a>(
        &'a self,
        variables: &'a dyn VariableContext,
        arena: &'a Arena,
        token: CancellationToken,
    ) -> EvaluationContext<'a> {
        EvaluationContext::new(
            variables,
            &self.functions,
            &self.variables,
            arena,
            self.limits,
            token,
        )
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        EvaluatorBuilder::new().build()
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("cache", &self.cache)
            .field("functions", &self.functions.len())
            .field("variables", &self.variables.len())
            .field("limits", &self.limits)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}
