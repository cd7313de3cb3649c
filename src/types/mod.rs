mod expr;
mod host;
pub(crate) mod ops;
mod record;
mod token;
mod value;
mod variable;

pub use expr::{BinaryOp, Expr, UnaryOp};
pub use host::{Entity, HostValue};
pub use record::Record;
pub use token::{Precedence, Token, TokenKind};
pub use value::{Value, ValueType, EPSILON};
pub use variable::{Resolver, Validator, Variable, VariableRegistry, VariableSource};
