//! Connects formula identifiers to host data: contexts, field sources,
//! JSON schemas and the schema-to-variable bridge.

mod context;
mod resolver;
mod schema;
mod variables;

pub use context::{ComputedFn, ComputedRegistry, EntityContext, VariableContext};
pub use resolver::{
    FieldResolver, TransformFn, DECIMAL_TO_FLOAT64, INT16_TO_FLOAT64, INT64_TO_FLOAT64,
};
pub use schema::{
    DataSource, FieldSource, FormulaContext, SchemaAwareContext, SchemaDefinition, SchemaRegistry,
};
pub use variables::SchemaVariables;
