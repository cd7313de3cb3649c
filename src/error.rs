use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Location of a token in the source text.
///
/// `offset` is a byte offset; `line` and `column` are 1-based and count
/// characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    #[must_use]
    pub fn new(offset: usize, line: usize, column: usize) -> Self {
        Self {
            offset,
            line,
            column,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Coarse classification of an [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TokenizationError,
    ParseError,
    ComplexityExceeded,
    EvaluationCancelled,
    EvaluationTimeout,
    EvaluationMemoryExceeded,
    EvaluationDepthExceeded,
    EvaluationComplexityExceeded,
    UnknownFunction,
    ArityError,
    DivisionByZero,
    ModuloByZero,
    Overflow,
    InvalidArgument,
    UnknownVariable,
    VariableResolutionError,
    VariableValidationError,
    TypeCoercionError,
    IndexOutOfRange,
    SchemaError,
    EvaluationPanicked,
}

/// Unified error type covering tokenizing, parsing, compilation, evaluation
/// and the variable/schema layer.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("tokenization error at {span}: {message}")]
    Tokenization { message: String, span: Span },

    #[error("expression is {len} bytes long; the maximum is {max}")]
    SourceTooLong { len: usize, max: usize },

    #[error("expression has more than {max} tokens")]
    TooManyTokens { max: usize },

    #[error("parse error at {span}: {message}")]
    Parse { message: String, span: Span },

    #[error("expression complexity {complexity} exceeds the maximum of {max}")]
    ComplexityExceeded { complexity: usize, max: usize },

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("evaluation timed out after {elapsed:?} (limit {limit:?})")]
    Timeout { elapsed: Duration, limit: Duration },

    #[error("evaluation used {used} bytes; the limit is {limit}")]
    MemoryExceeded { used: usize, limit: usize },

    #[error("evaluation depth exceeded the maximum of {max}")]
    DepthExceeded { max: usize },

    #[error("evaluation exceeded {max} node evaluations")]
    EvaluationLimit { max: u64 },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("function '{name}' expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: Arity,
        got: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("modulo by zero")]
    ModuloByZero,

    #[error("numeric overflow in '{op}'")]
    Overflow { op: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("variable resolution error for '{name}': {source}")]
    VariableResolution {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("variable validation error for '{name}': {source}")]
    VariableValidation {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("duplicate variable name '{name}'")]
    DuplicateVariable { name: String },

    #[error("type coercion error: {message}")]
    TypeCoercion { message: String },

    #[error("index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("schema error: {message}")]
    Schema { message: String },

    #[error("evaluation panicked: {message}")]
    Panicked { message: String },
}

/// Accepted argument count of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{max}"),
            Some(max) => write!(f, "{}..={max}", self.min),
            None => write!(f, "at least {}", self.min),
        }
    }
}

impl Error {
    /// The boundary classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Tokenization { .. } | Error::SourceTooLong { .. } | Error::TooManyTokens { .. } => {
                ErrorKind::TokenizationError
            }
            Error::Parse { .. } => ErrorKind::ParseError,
            Error::ComplexityExceeded { .. } => ErrorKind::ComplexityExceeded,
            Error::Cancelled => ErrorKind::EvaluationCancelled,
            Error::Timeout { .. } => ErrorKind::EvaluationTimeout,
            Error::MemoryExceeded { .. } => ErrorKind::EvaluationMemoryExceeded,
            Error::DepthExceeded { .. } => ErrorKind::EvaluationDepthExceeded,
            Error::EvaluationLimit { .. } => ErrorKind::EvaluationComplexityExceeded,
            Error::UnknownFunction { .. } => ErrorKind::UnknownFunction,
            Error::Arity { .. } => ErrorKind::ArityError,
            Error::DivisionByZero => ErrorKind::DivisionByZero,
            Error::ModuloByZero => ErrorKind::ModuloByZero,
            Error::Overflow { .. } => ErrorKind::Overflow,
            Error::InvalidArgument { .. } | Error::DuplicateVariable { .. } => {
                ErrorKind::InvalidArgument
            }
            Error::UnknownVariable { .. } => ErrorKind::UnknownVariable,
            Error::VariableResolution { .. } => ErrorKind::VariableResolutionError,
            Error::VariableValidation { .. } => ErrorKind::VariableValidationError,
            Error::TypeCoercion { .. } => ErrorKind::TypeCoercionError,
            Error::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            Error::Schema { .. } => ErrorKind::SchemaError,
            Error::Panicked { .. } => ErrorKind::EvaluationPanicked,
        }
    }

    /// Source position, for tokenizer and parser errors.
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Tokenization { span, .. } | Error::Parse { span, .. } => Some(*span),
            _ => None,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn type_coercion(message: impl Into<String>) -> Self {
        Error::TypeCoercion {
            message: message.into(),
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Error::Schema {
            message: message.into(),
        }
    }

    /// Wrap a caught panic payload, keeping its message when it has one.
    pub(crate) fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Error::Panicked { message }
    }

    pub(crate) fn overflow(op: impl Into<String>) -> Self {
        Error::Overflow { op: op.into() }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
