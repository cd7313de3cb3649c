use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;

use super::context::VariableContext;
use super::schema::FieldSource;
use crate::coerce;
use crate::error::{Error, Result};
use crate::types::HostValue;

/// A value transform applied after a field is read.
pub type TransformFn = Arc<dyn Fn(&HostValue) -> Result<HostValue> + Send + Sync>;

pub const DECIMAL_TO_FLOAT64: &str = "decimalToFloat64";
pub const INT64_TO_FLOAT64: &str = "int64ToFloat64";
pub const INT16_TO_FLOAT64: &str = "int16ToFloat64";

/// Resolves a [`FieldSource`] against a [`VariableContext`].
///
/// Computed sources call the named function; everything else reads `path`
/// (or `field`) and then applies the optional transform.
pub struct FieldResolver {
    transforms: RwLock<HashMap<String, TransformFn>>,
}

impl FieldResolver {
    /// A resolver with the built-in numeric transforms registered.
    #[must_use]
    pub fn new() -> Self {
        let resolver = Self {
            transforms: RwLock::new(HashMap::new()),
        };
        resolver.register_transform(DECIMAL_TO_FLOAT64, decimal_to_f64);
        resolver.register_transform(INT64_TO_FLOAT64, |v| {
            int_to_f64(v, INT64_TO_FLOAT64, i64::MIN, i64::MAX)
        });
        resolver.register_transform(INT16_TO_FLOAT64, |v| {
            int_to_f64(v, INT16_TO_FLOAT64, i64::from(i16::MIN), i64::from(i16::MAX))
        });
        resolver
    }

    /// Add or replace a named transform.
    pub fn register_transform(
        &self,
        name: impl Into<String>,
        f: impl Fn(&HostValue) -> Result<HostValue> + Send + Sync + 'static,
    ) {
        self.transforms.write().insert(name.into(), Arc::new(f));
    }

    #[must_use]
    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.read().contains_key(name)
    }

    /// Read the value a field source describes.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] for a source with nothing to read or an unknown
    /// transform; context errors are propagated unchanged.
    pub fn resolve(&self, source: &FieldSource, ctx: &dyn VariableContext) -> Result<HostValue> {
        if source.computed {
            let function = source
                .function
                .as_deref()
                .ok_or_else(|| Error::schema("computed field source has no function"))?;
            return ctx.computed(function);
        }

        let path = source
            .path
            .as_deref()
            .or(source.field.as_deref())
            .ok_or_else(|| Error::schema("field source has neither path nor field"))?;
        let value = ctx.field(path)?;

        match &source.transform {
            Some(name) => {
                let transform = self
                    .transforms
                    .read()
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::schema(format!("unknown transform '{name}'")))?;
                if value.is_null() {
                    return Ok(HostValue::Null);
                }
                transform(&value)
            }
            None => Ok(value),
        }
    }
}

impl Default for FieldResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FieldResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.transforms.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("FieldResolver")
            .field("transforms", &names)
            .finish()
    }
}

fn decimal_to_f64(value: &HostValue) -> Result<HostValue> {
    match value {
        HostValue::Decimal(d) => d.to_f64().map(HostValue::F64).ok_or_else(|| {
            Error::type_coercion(format!("{DECIMAL_TO_FLOAT64}: {d} does not fit in f64"))
        }),
        HostValue::F32(v) => Ok(HostValue::F64(f64::from(*v))),
        HostValue::F64(v) => Ok(HostValue::F64(*v)),
        other => Err(Error::type_coercion(format!(
            "{DECIMAL_TO_FLOAT64}: expected decimal, got {}",
            other.type_name()
        ))),
    }
}

#[allow(clippy::cast_precision_loss)]
fn int_to_f64(value: &HostValue, name: &str, min: i64, max: i64) -> Result<HostValue> {
    let is_integer = matches!(
        value,
        HostValue::I8(_)
            | HostValue::I16(_)
            | HostValue::I32(_)
            | HostValue::I64(_)
            | HostValue::U8(_)
            | HostValue::U16(_)
            | HostValue::U32(_)
            | HostValue::U64(_)
    );
    if !is_integer {
        return Err(Error::type_coercion(format!(
            "{name}: expected integer, got {}",
            value.type_name()
        )));
    }
    match coerce::to_i64(value) {
        Some(i) if (min..=max).contains(&i) => Ok(HostValue::F64(i as f64)),
        _ => Err(Error::type_coercion(format!("{name}: {value} is out of range"))),
    }
}
