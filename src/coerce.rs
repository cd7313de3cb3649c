//! Numeric and boolean coercion of host values.
//!
//! Every integer width, both float widths and decimals are recognised.
//! `None` means the value has no sensible reading in the target type.

use rust_decimal::prelude::ToPrimitive;

use crate::types::HostValue;

/// Read a host value as `f64`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn to_f64(value: &HostValue) -> Option<f64> {
    match value {
        HostValue::I8(v) => Some(f64::from(*v)),
        HostValue::I16(v) => Some(f64::from(*v)),
        HostValue::I32(v) => Some(f64::from(*v)),
        HostValue::I64(v) => Some(*v as f64),
        HostValue::U8(v) => Some(f64::from(*v)),
        HostValue::U16(v) => Some(f64::from(*v)),
        HostValue::U32(v) => Some(f64::from(*v)),
        HostValue::U64(v) => Some(*v as f64),
        HostValue::F32(v) => Some(f64::from(*v)),
        HostValue::F64(v) => Some(*v),
        HostValue::Decimal(d) => d.to_f64(),
        _ => None,
    }
}

/// Read a host value as `i64`. Floats and decimals are truncated toward
/// zero; values outside the `i64` range are rejected.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn to_i64(value: &HostValue) -> Option<i64> {
    match value {
        HostValue::I8(v) => Some(i64::from(*v)),
        HostValue::I16(v) => Some(i64::from(*v)),
        HostValue::I32(v) => Some(i64::from(*v)),
        HostValue::I64(v) => Some(*v),
        HostValue::U8(v) => Some(i64::from(*v)),
        HostValue::U16(v) => Some(i64::from(*v)),
        HostValue::U32(v) => Some(i64::from(*v)),
        HostValue::U64(v) => i64::try_from(*v).ok(),
        HostValue::F32(v) => float_to_i64(f64::from(*v)),
        HostValue::F64(v) => float_to_i64(*v),
        HostValue::Decimal(d) => d.trunc().to_i64(),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_i64(v: f64) -> Option<i64> {
    let t = v.trunc();
    if t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64 {
        Some(t as i64)
    } else {
        None
    }
}

/// Read a host value as `bool`: non-zero numbers and non-empty strings are
/// true, null is false.
#[must_use]
pub fn to_bool(value: &HostValue) -> Option<bool> {
    match value {
        HostValue::Bool(b) => Some(*b),
        HostValue::Null => Some(false),
        HostValue::String(s) => Some(!s.is_empty()),
        HostValue::Decimal(d) => Some(!d.is_zero()),
        HostValue::List(_) | HostValue::Record(_) | HostValue::Object(_) => None,
        numeric => to_f64(numeric).map(|n| n != 0.0),
    }
}
