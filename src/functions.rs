use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::EvaluationContext;
use crate::error::{Arity, Error, Result};
use crate::types::{ops, Value};

/// Signature of a callable function. Arguments are already evaluated.
pub type FunctionFn = Arc<dyn Fn(&EvaluationContext<'_>, &[Value]) -> Result<Value> + Send + Sync>;

/// A named function with its accepted argument count.
#[derive(Clone)]
pub struct FunctionDescriptor {
    name: Arc<str>,
    arity: Arity,
    call: FunctionFn,
}

impl FunctionDescriptor {
    /// A function that can see the evaluation context. `max_args` of `None`
    /// accepts any number of arguments from `min_args` up.
    #[must_use]
    pub fn new(
        name: &str,
        min_args: usize,
        max_args: Option<usize>,
        call: impl Fn(&EvaluationContext<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Arc::from(name),
            arity: Arity {
                min: min_args,
                max: max_args,
            },
            call: Arc::new(call),
        }
    }

    /// A function of its arguments only.
    #[must_use]
    pub fn pure(
        name: &str,
        min_args: usize,
        max_args: Option<usize>,
        call: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, min_args, max_args, move |_, args| call(args))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// # Errors
    ///
    /// [`Error::Arity`] when `got` is outside the accepted range.
    pub fn check_arity(&self, got: usize) -> Result<()> {
        let Arity { min, max } = self.arity;
        if got < min || max.is_some_and(|max| got > max) {
            return Err(Error::Arity {
                name: self.name.to_string(),
                expected: self.arity,
                got,
            });
        }
        Ok(())
    }

    /// Invoke the function without an arity check.
    ///
    /// # Errors
    ///
    /// Whatever the function returns.
    pub fn call(&self, ctx: &EvaluationContext<'_>, args: &[Value]) -> Result<Value> {
        (self.call)(ctx, args)
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Case-sensitive function table. Lookups clone the descriptor out of the
/// lock, so functions never run while it is held.
#[derive(Debug)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, Arc<FunctionDescriptor>>>,
}

impl FunctionRegistry {
    /// A registry holding the builtin functions.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        for descriptor in builtins() {
            registry.register(descriptor);
        }
        registry
    }

    /// A registry with no functions at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Add a function, replacing any existing one with the same name.
    pub fn register(&self, descriptor: FunctionDescriptor) {
        self.functions
            .write()
            .insert(descriptor.name.to_string(), Arc::new(descriptor));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<FunctionDescriptor>> {
        self.functions.read().get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn number(name: &str, value: &Value) -> Result<f64> {
    value.as_number().ok_or_else(|| {
        Error::invalid_argument(format!(
            "{name}() expects a number, got {}",
            value.type_name()
        ))
    })
}

/// Numbers from the arguments, descending into nested arrays.
fn flatten(name: &str, args: &[Value], out: &mut Vec<f64>) -> Result<()> {
    for arg in args {
        match arg {
            Value::Array(items) => flatten(name, items, out)?,
            other => out.push(number(name, other)?),
        }
    }
    Ok(())
}

fn numbers(name: &str, args: &[Value]) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(args.len());
    flatten(name, args, &mut out)?;
    Ok(out)
}

fn unary(name: &'static str, f: fn(f64) -> f64) -> FunctionDescriptor {
    FunctionDescriptor::pure(name, 1, Some(1), move |args| {
        Ok(Value::Number(f(number(name, &args[0])?)))
    })
}

fn extremum(name: &'static str, pick: fn(f64, f64) -> f64) -> FunctionDescriptor {
    FunctionDescriptor::pure(name, 1, None, move |args| {
        numbers(name, args)?
            .into_iter()
            .reduce(pick)
            .map(Value::Number)
            .ok_or_else(|| Error::invalid_argument(format!("{name}() of an empty list")))
    })
}

#[allow(clippy::cast_possible_truncation)]
fn round(args: &[Value]) -> Result<Value> {
    let x = number("round", &args[0])?;
    let digits = match args.get(1) {
        Some(d) => number("round", d)?.trunc() as i32,
        None => 0,
    };
    let scale = 10f64.powi(digits);
    let rounded = (x * scale).round() / scale;
    if rounded.is_finite() {
        Ok(Value::Number(rounded))
    } else {
        Ok(Value::Number(x))
    }
}

fn to_number(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Number(n) => Ok(Value::Number(*n)),
        Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| Error::invalid_argument(format!("cannot parse '{s}' as a number"))),
        other => Err(Error::invalid_argument(format!(
            "number() cannot convert {}",
            other.type_name()
        ))),
    }
}

#[allow(clippy::cast_precision_loss)]
fn len(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::Array(items) => Ok(Value::Number(items.len() as f64)),
        other => Err(Error::invalid_argument(format!(
            "len() expects a string or array, got {}",
            other.type_name()
        ))),
    }
}

#[allow(clippy::cast_precision_loss)]
fn avg(args: &[Value]) -> Result<Value> {
    let values = numbers("avg", args)?;
    if values.is_empty() {
        return Err(Error::invalid_argument("avg() of an empty list"));
    }
    let total = finite_sum("avg", &values)?;
    Ok(Value::Number(total / values.len() as f64))
}

fn finite_sum(name: &str, values: &[f64]) -> Result<f64> {
    let total: f64 = values.iter().sum();
    if total.is_finite() {
        Ok(total)
    } else {
        Err(Error::overflow(format!("{name}()")))
    }
}

/// First argument that is not null, not an empty string or array, and not
/// zero or false.
fn coalesce(args: &[Value]) -> Value {
    args.iter()
        .find(|v| v.is_truthy())
        .cloned()
        .unwrap_or(Value::Null)
}

fn builtins() -> Vec<FunctionDescriptor> {
    vec![
        unary("abs", f64::abs),
        unary("floor", f64::floor),
        unary("ceil", f64::ceil),
        extremum("min", f64::min),
        extremum("max", f64::max),
        FunctionDescriptor::pure("round", 1, Some(2), round),
        FunctionDescriptor::pure("sqrt", 1, Some(1), |args| {
            let x = number("sqrt", &args[0])?;
            if x < 0.0 {
                return Err(Error::invalid_argument(format!(
                    "sqrt() of negative number {x}"
                )));
            }
            Ok(Value::Number(x.sqrt()))
        }),
        FunctionDescriptor::pure("pow", 2, Some(2), |args| {
            let base = number("pow", &args[0])?;
            let exponent = number("pow", &args[1])?;
            ops::power(base, exponent).map(Value::Number)
        }),
        FunctionDescriptor::pure("number", 1, Some(1), to_number),
        FunctionDescriptor::new("string", 1, Some(1), |ctx, args| {
            Ok(Value::Str(ctx.arena().alloc_string(&args[0].to_string())))
        }),
        FunctionDescriptor::pure("bool", 1, Some(1), |args| {
            Ok(Value::Bool(args[0].is_truthy()))
        }),
        FunctionDescriptor::pure("len", 1, Some(1), len),
        FunctionDescriptor::pure("sum", 0, None, |args| {
            finite_sum("sum", &numbers("sum", args)?).map(Value::Number)
        }),
        FunctionDescriptor::pure("avg", 1, None, avg),
        FunctionDescriptor::pure("if", 3, Some(3), |args| {
            Ok(if args[0].is_truthy() {
                args[1].clone()
            } else {
                args[2].clone()
            })
        }),
        FunctionDescriptor::pure("coalesce", 1, None, |args| Ok(coalesce(args))),
    ]
}
