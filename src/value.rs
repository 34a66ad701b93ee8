//! Tagged value type used as the currency of every public API.
//!
//! Values cross three boundaries: application code publishing telemetry,
//! the cloud invoking actions with typed parameters, and transport
//! plugins marshalling payloads onto the wire.  Conversions between the
//! scalar types follow two levels: BASIC covers numeric widening and
//! checked narrowing, ADVANCED adds the stringly conversions used when a
//! request arrives as text.  `convert_check` is an exact predictor of
//! `convert`: whenever the checker approves a conversion, performing it
//! succeeds.

use serde::{Deserialize, Serialize};

use crate::location::Location;
use crate::status::Status;
use crate::util::{parse_f64_prefix, parse_i128_prefix};

/// Type tag for a [`Value`].  Slots that can be "typed but unset" (action
/// parameters, a telemetry stream's declared type) carry a `ValueType`
/// next to an `Option<Value>`; `Null` doubles as the wildcard there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Null,
    Bool,
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Raw,
    String,
    Location,
}

/// How far a conversion is allowed to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConversionLevel {
    /// Numeric widening, checked narrowing, bool↔numeric.
    Basic,
    /// Basic plus string↔numeric, raw↔string (base64), bool↔string and
    /// null⇒anything.
    Advanced,
}

/// A single typed datum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Float32(f32),
    Float64(f64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Raw(Vec<u8>),
    String(String),
    Location(Location),
}

/// Closed interval of an integer target type, in i128 so every source
/// value can be compared without overflow.
fn integer_bounds(ty: ValueType) -> Option<(i128, i128)> {
    match ty {
        ValueType::Int8 => Some((i8::MIN as i128, i8::MAX as i128)),
        ValueType::Int16 => Some((i16::MIN as i128, i16::MAX as i128)),
        ValueType::Int32 => Some((i32::MIN as i128, i32::MAX as i128)),
        ValueType::Int64 => Some((i64::MIN as i128, i64::MAX as i128)),
        ValueType::UInt8 => Some((0, u8::MAX as i128)),
        ValueType::UInt16 => Some((0, u16::MAX as i128)),
        ValueType::UInt32 => Some((0, u32::MAX as i128)),
        ValueType::UInt64 => Some((0, u64::MAX as i128)),
        _ => None,
    }
}

fn make_integer(ty: ValueType, v: i128) -> Value {
    match ty {
        ValueType::Int8 => Value::Int8(v as i8),
        ValueType::Int16 => Value::Int16(v as i16),
        ValueType::Int32 => Value::Int32(v as i32),
        ValueType::Int64 => Value::Int64(v as i64),
        ValueType::UInt8 => Value::UInt8(v as u8),
        ValueType::UInt16 => Value::UInt16(v as u16),
        ValueType::UInt32 => Value::UInt32(v as u32),
        ValueType::UInt64 => Value::UInt64(v as u64),
        _ => unreachable!("not an integer type"),
    }
}

/// True when the fractional part vanishes at f32 precision.
fn has_no_decimal(v: f64) -> bool {
    ((v - v.trunc()) as f32).abs() < f32::MIN_POSITIVE
}

/// The zero value of a type, produced when converting from `Null`.
pub(crate) fn zero_of(ty: ValueType) -> Option<Value> {
    match ty {
        ValueType::Null | ValueType::Location => None,
        ValueType::Bool => Some(Value::Bool(false)),
        ValueType::Float32 => Some(Value::Float32(0.0)),
        ValueType::Float64 => Some(Value::Float64(0.0)),
        ValueType::Raw => Some(Value::Raw(Vec::new())),
        ValueType::String => Some(Value::String(String::new())),
        other => Some(make_integer(other, 0)),
    }
}

impl Value {
    /// The type tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Float32(_) => ValueType::Float32,
            Value::Float64(_) => ValueType::Float64,
            Value::Int8(_) => ValueType::Int8,
            Value::Int16(_) => ValueType::Int16,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::UInt8(_) => ValueType::UInt8,
            Value::UInt16(_) => ValueType::UInt16,
            Value::UInt32(_) => ValueType::UInt32,
            Value::UInt64(_) => ValueType::UInt64,
            Value::Raw(_) => ValueType::Raw,
            Value::String(_) => ValueType::String,
            Value::Location(_) => ValueType::Location,
        }
    }

    /// Integer-family payload widened to i128 (bool counts as 0/1).
    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Bool(b) => Some(*b as i128),
            Value::Int8(v) => Some(*v as i128),
            Value::Int16(v) => Some(*v as i128),
            Value::Int32(v) => Some(*v as i128),
            Value::Int64(v) => Some(*v as i128),
            Value::UInt8(v) => Some(*v as i128),
            Value::UInt16(v) => Some(*v as i128),
            Value::UInt32(v) => Some(*v as i128),
            Value::UInt64(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Attempt the conversion without mutating, returning the converted
    /// value on success.  This is the single source of truth behind both
    /// [`Value::convert`] and [`Value::convert_check`].
    fn try_convert(&self, level: ConversionLevel, to: ValueType) -> Option<Value> {
        if self.value_type() == to {
            return Some(self.clone());
        }
        if let Some(v) = self.try_convert_basic(to) {
            return Some(v);
        }
        if level >= ConversionLevel::Advanced {
            return self.try_convert_advanced(to);
        }
        None
    }

    fn try_convert_basic(&self, to: ValueType) -> Option<Value> {
        match to {
            ValueType::Bool => match self {
                Value::Float32(v) => Some(Value::Bool(*v != 0.0)),
                Value::Float64(v) => Some(Value::Bool(*v != 0.0)),
                _ => self.as_i128().map(|v| Value::Bool(v != 0)),
            },
            ValueType::Float32 => match self {
                Value::Float64(v) if v.abs() <= f32::MAX as f64 => {
                    Some(Value::Float32(*v as f32))
                }
                Value::Float64(_) => None,
                _ => self.as_i128().map(|v| Value::Float32(v as f32)),
            },
            ValueType::Float64 => match self {
                Value::Float32(v) => Some(Value::Float64(*v as f64)),
                _ => self.as_i128().map(|v| Value::Float64(v as f64)),
            },
            _ => {
                let (lo, hi) = integer_bounds(to)?;
                match self {
                    Value::Float32(v) => float_to_integer(*v as f64, to, lo, hi),
                    Value::Float64(v) => float_to_integer(*v, to, lo, hi),
                    _ => {
                        let v = self.as_i128()?;
                        (lo..=hi).contains(&v).then(|| make_integer(to, v))
                    }
                }
            }
        }
    }

    fn try_convert_advanced(&self, to: ValueType) -> Option<Value> {
        if matches!(self, Value::Null) {
            return zero_of(to);
        }
        match to {
            ValueType::String => match self {
                Value::Bool(b) => Some(Value::String(b.to_string())),
                Value::Float32(v) => Some(Value::String(v.to_string())),
                Value::Float64(v) => Some(Value::String(v.to_string())),
                Value::Raw(bytes) => Some(Value::String(crate::base64::encode(bytes))),
                _ => self.as_i128().map(|v| Value::String(v.to_string())),
            },
            ValueType::Bool => match self {
                // no, NO, FALSE, false, 0 and the empty string are false
                // (judged by the first character); everything else is true
                Value::String(s) => Some(Value::Bool(!matches!(
                    s.chars().next(),
                    None | Some('F') | Some('f') | Some('N') | Some('n') | Some('0')
                ))),
                Value::Raw(bytes) => Some(Value::Bool(!bytes.is_empty())),
                _ => None,
            },
            ValueType::Float32 => match self {
                Value::String(s) => Some(Value::Float32(parse_f64_prefix(s) as f32)),
                _ => None,
            },
            ValueType::Float64 => match self {
                Value::String(s) => Some(Value::Float64(parse_f64_prefix(s))),
                _ => None,
            },
            ValueType::Raw => match self {
                Value::String(s) => crate::base64::decode(s).ok().map(Value::Raw),
                _ => None,
            },
            ValueType::Null | ValueType::Location => None,
            _ => match self {
                Value::String(s) => {
                    integer_bounds(to)?;
                    Some(make_integer(to, parse_i128_prefix(s)))
                }
                _ => None,
            },
        }
    }

    /// Mutating conversion.  The value (and its type tag) change only when
    /// the conversion succeeds.
    pub fn convert(&mut self, level: ConversionLevel, to: ValueType) -> bool {
        match self.try_convert(level, to) {
            Some(v) => {
                *self = v;
                true
            }
            None => false,
        }
    }

    /// Non-mutating test: would [`Value::convert`] succeed?
    pub fn convert_check(&self, level: ConversionLevel, to: ValueType) -> bool {
        self.try_convert(level, to).is_some()
    }

    /// Read this value as `to`, optionally converting (the full
    /// BASIC→ADVANCED ladder).  `BadRequest` when the stored type cannot
    /// be coerced.
    pub fn coerce(&self, to: ValueType, allow_convert: bool) -> Result<Value, Status> {
        if self.value_type() == to {
            return Ok(self.clone());
        }
        if allow_convert {
            if let Some(v) = self.try_convert(ConversionLevel::Advanced, to) {
                return Ok(v);
            }
        }
        Err(Status::BadRequest)
    }
}

fn float_to_integer(v: f64, to: ValueType, lo: i128, hi: i128) -> Option<Value> {
    if has_no_decimal(v) && v >= lo as f64 && v <= hi as f64 {
        Some(make_integer(to, v as i128))
    } else {
        None
    }
}
