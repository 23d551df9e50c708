//! The supported primitive set (§4.1): the interchange currency between
//! encoders, the wire driver, and decoders.

use rust_decimal::Decimal;

/// A naive (timezone-less) date, time-of-day, or datetime.
///
/// These are re-exported from `chrono` rather than reinvented: the source
/// crate's workspace already depends on `chrono` for every other timestamp it
/// handles, and a bespoke calendar type would just be a worse chrono.
pub type Date = chrono::NaiveDate;
pub type Time = chrono::NaiveTime;
pub type DateTime = chrono::NaiveDateTime;

/// One value in the supported primitive set (§4.1).
///
/// `Encoder<T>` produces a `Vec<Value>`; `Decoder<T>` consumes one `Value`
/// per leaf. The `Null` variant is explicit rather than folded into
/// `Option<Value>` so that a non-optional decoder can fail with a precise
/// "unexpected NULL" rather than a type mismatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Date(Date),
    Time(Time),
    DateTime(DateTime),
    Null,
}

impl Value {
    /// Canonical textual rendering used for logging and error messages
    /// (§6 "Formatted-parameter rendering"). Never used to build SQL text.
    pub fn render(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::I8(v) => v.to_string(),
            Value::I16(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::F32(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::String(v) => format!("'{}'", v.replace('\'', "''")),
            Value::Bytes(v) => format!("<{} bytes>", v.len()),
            Value::Date(v) => v.to_string(),
            Value::Time(v) => v.to_string(),
            Value::DateTime(v) => v.to_string(),
            Value::Null => "null".to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The name used in error messages when a decoder expected a different
    /// variant than the one actually present.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::Null => "null",
        }
    }
}

macro_rules! impl_from_primitive {
    ($($variant:ident($ty:ty)),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )+
    };
}

impl_from_primitive!(
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Date(Date),
    Time(Time),
    DateTime(DateTime),
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl<T> From<Option<T>> for Value
where
    Value: From<T>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => Value::from(v),
            None => Value::Null,
        }
    }
}
