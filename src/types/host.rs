use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;

use super::record::Record;
use super::value::Value;
use crate::error::{Error, Result};

/// Attribute access for host types that are not plain records.
///
/// Implement this for domain structs so that field paths like
/// `shipment.weight` can descend into them without copying into a [`Record`].
pub trait Entity: fmt::Debug + Send + Sync {
    /// Name used in error messages, e.g. `"Shipment"`.
    fn type_name(&self) -> &str;

    /// Value of the named attribute, or `None` when the type has no such
    /// attribute.
    fn attribute(&self, name: &str) -> Option<HostValue>;
}

/// A value supplied by the host application, before coercion into the
/// engine's [`Value`].
///
/// Keeps the original width of integers and decimals so that field
/// transforms can tell them apart.
#[derive(Debug, Clone, Default)]
pub enum HostValue {
    #[default]
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    String(Arc<str>),
    List(Vec<HostValue>),
    Record(Record),
    Object(Arc<dyn Entity>),
}

impl HostValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool(_) => "bool",
            HostValue::I8(_) => "i8",
            HostValue::I16(_) => "i16",
            HostValue::I32(_) => "i32",
            HostValue::I64(_) => "i64",
            HostValue::U8(_) => "u8",
            HostValue::U16(_) => "u16",
            HostValue::U32(_) => "u32",
            HostValue::U64(_) => "u64",
            HostValue::F32(_) => "f32",
            HostValue::F64(_) => "f64",
            HostValue::Decimal(_) => "decimal",
            HostValue::String(_) => "string",
            HostValue::List(_) => "list",
            HostValue::Record(_) => "record",
            HostValue::Object(entity) => entity.type_name(),
        }
    }

    /// Look up one path segment on a record or entity.
    ///
    /// Returns `Ok(None)` when the attribute does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeCoercion`] when `self` has no attributes at all.
    pub fn attribute(&self, name: &str) -> Result<Option<HostValue>> {
        match self {
            HostValue::Record(record) => Ok(record.get(name).cloned()),
            HostValue::Object(entity) => Ok(entity.attribute(name)),
            other => Err(Error::type_coercion(format!(
                "cannot read attribute '{name}' of {}",
                other.type_name()
            ))),
        }
    }

    /// Convert into an engine value. Numbers of every width become
    /// [`Value::Number`]; lists convert element-wise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeCoercion`] for records, entities and decimals
    /// that do not fit in an `f64`.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            HostValue::Null => Ok(Value::Null),
            HostValue::Bool(b) => Ok(Value::Bool(*b)),
            HostValue::String(s) => Ok(Value::Str(Arc::clone(s))),
            HostValue::List(items) => items
                .iter()
                .map(HostValue::to_value)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            HostValue::Record(_) | HostValue::Object(_) => Err(Error::type_coercion(format!(
                "cannot use {} as a formula value",
                self.type_name()
            ))),
            numeric => crate::coerce::to_f64(numeric).map(Value::Number).ok_or_else(|| {
                Error::type_coercion(format!("cannot convert {} to a number", numeric.type_name()))
            }),
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Null, HostValue::Null) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::I8(a), HostValue::I8(b)) => a == b,
            (HostValue::I16(a), HostValue::I16(b)) => a == b,
            (HostValue::I32(a), HostValue::I32(b)) => a == b,
            (HostValue::I64(a), HostValue::I64(b)) => a == b,
            (HostValue::U8(a), HostValue::U8(b)) => a == b,
            (HostValue::U16(a), HostValue::U16(b)) => a == b,
            (HostValue::U32(a), HostValue::U32(b)) => a == b,
            (HostValue::U64(a), HostValue::U64(b)) => a == b,
            (HostValue::F32(a), HostValue::F32(b)) => a == b,
            (HostValue::F64(a), HostValue::F64(b)) => a == b,
            (HostValue::Decimal(a), HostValue::Decimal(b)) => a == b,
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::List(a), HostValue::List(b)) => a == b,
            (HostValue::Record(a), HostValue::Record(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => f.write_str("null"),
            HostValue::Bool(v) => write!(f, "{v}"),
            HostValue::I8(v) => write!(f, "{v}"),
            HostValue::I16(v) => write!(f, "{v}"),
            HostValue::I32(v) => write!(f, "{v}"),
            HostValue::I64(v) => write!(f, "{v}"),
            HostValue::U8(v) => write!(f, "{v}"),
            HostValue::U16(v) => write!(f, "{v}"),
            HostValue::U32(v) => write!(f, "{v}"),
            HostValue::U64(v) => write!(f, "{v}"),
            HostValue::F32(v) => write!(f, "{v}"),
            HostValue::F64(v) => write!(f, "{v}"),
            HostValue::Decimal(v) => write!(f, "{v}"),
            HostValue::String(v) => f.write_str(v),
            HostValue::List(items) => write!(f, "<list of {}>", items.len()),
            HostValue::Record(record) => write!(f, "<record of {}>", record.len()),
            HostValue::Object(entity) => write!(f, "<{}>", entity.type_name()),
        }
    }
}

macro_rules! host_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for HostValue {
                fn from(v: $t) -> Self {
                    HostValue::$variant(v)
                }
            }
        )*
    };
}

host_from! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    Record => Record,
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::String(Arc::from(v))
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::String(Arc::from(v))
    }
}

impl From<Arc<dyn Entity>> for HostValue {
    fn from(v: Arc<dyn Entity>) -> Self {
        HostValue::Object(v)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(v: Vec<T>) -> Self {
        HostValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(HostValue::Null, Into::into)
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => HostValue::Null,
            serde_json::Value::Bool(b) => HostValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    HostValue::I64(i)
                } else if let Some(u) = n.as_u64() {
                    HostValue::U64(u)
                } else {
                    HostValue::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => HostValue::from(s),
            serde_json::Value::Array(items) => {
                HostValue::List(items.into_iter().map(HostValue::from).collect())
            }
            serde_json::Value::Object(map) => {
                let mut record = Record::new();
                for (key, value) in map {
                    record.insert_field(key, HostValue::from(value));
                }
                HostValue::Record(record)
            }
        }
    }
}
