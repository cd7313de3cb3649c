//! Formula engine for pricing and business rules.
//!
//! Expressions such as `weight > 100 ? weight * rate : min_charge` are
//! tokenized, parsed into a tree, cached, and evaluated against host data
//! under time, memory, depth and step limits.
//!
//! ```
//! use std::sync::Arc;
//! use formulary::{EntityContext, Evaluator, Record, Variable, VariableRegistry};
//!
//! let variables = Arc::new(VariableRegistry::new());
//! variables.register(Variable::constant("rate", 0.75)).unwrap();
//! let evaluator = Evaluator::new(variables);
//!
//! let shipment = EntityContext::new(Record::new().set("weight", 200_i64));
//! let charge = evaluator.evaluate("weight > 100 ? weight * rate : 50", &shipment).unwrap();
//! assert!((charge - 150.0).abs() < 1e-9);
//! ```

mod arena;
pub mod bridge;
mod cache;
pub mod coerce;
mod compile;
mod context;
mod error;
mod evaluate;
mod evaluator;
mod functions;
pub mod parse;
mod trace;
mod types;

pub use arena::{Allocation, Arena, ArenaPool, ArenaStats, PooledArena, DEFAULT_BLOCK_SIZE};
pub use bridge::{
    ComputedRegistry, EntityContext, FieldResolver, FieldSource, SchemaAwareContext,
    SchemaDefinition, SchemaRegistry, SchemaVariables, VariableContext,
};
pub use cache::{CacheStats, LruCache};
pub use compile::{CompiledExpression, MAX_COMPLEXITY};
pub use context::{CancellationToken, EvaluationContext, Limits};
pub use error::{Arity, Error, ErrorKind, Result, Span};
pub use evaluator::{Evaluator, EvaluatorBuilder, DEFAULT_WORKERS};
pub use functions::{FunctionDescriptor, FunctionFn, FunctionRegistry};
pub use parse::parse;
pub use trace::{EvaluationTrace, StepResult, TraceStep};
pub use types::{
    BinaryOp, Entity, Expr, HostValue, Precedence, Record, Resolver, Token, TokenKind, UnaryOp,
    Validator, Value, ValueType, Variable, VariableRegistry, VariableSource, EPSILON,
};
