//! `Decoder<T>` (§4.1): reads an ordered sequence of column values from a
//! row cursor starting at a given offset.

use rust_decimal::Decimal;

use crate::error::DecodeError;
use crate::value::{Date, DateTime, Time, Value};

/// Column access exposed to a [`Decoder`] while it runs (§4.1 "Decoder
/// contract"). `row` is the already-fetched row (the interpreter hands the
/// decoder a materialized `Vec<Value>` rather than a live cursor handle, so
/// that `was_null` can be answered purely from `row` without a round trip).
pub struct RowCtx<'a> {
    row: &'a [Value],
    statement: &'a str,
    last_read: Option<usize>,
}

impl<'a> RowCtx<'a> {
    pub fn new(row: &'a [Value], statement: &'a str) -> Self {
        RowCtx {
            row,
            statement,
            last_read: None,
        }
    }

    pub fn column_count(&self) -> usize {
        self.row.len()
    }

    pub fn statement(&self) -> &str {
        self.statement
    }

    /// Fetch the raw value at 1-based `index`, recording it as the last
    /// column read so [`RowCtx::was_null`] reflects it immediately
    /// afterwards (§9 "decoders must query `was_null` immediately after
    /// each read to avoid stale state").
    fn get(&mut self, index: usize) -> Result<&'a Value, DecodeError> {
        self.last_read = Some(index);
        self.row.get(index - 1).ok_or_else(|| DecodeError {
            column: index,
            expected: "<any>",
            cause: format!("column {index} out of range (row has {} columns)", self.row.len()),
            statement: self.statement.to_owned(),
        })
    }

    /// True iff the last column read via one of the `get_*` accessors was
    /// SQL NULL. Reflects only the last-accessed column (§3 "ResultSet").
    pub fn was_null(&self) -> bool {
        match self.last_read {
            Some(idx) => self.row.get(idx - 1).is_some_and(Value::is_null),
            None => false,
        }
    }

    fn fail(&self, index: usize, expected: &'static str, actual: &Value) -> DecodeError {
        DecodeError {
            column: index,
            expected,
            cause: format!("found {} instead", actual.type_name()),
            statement: self.statement.to_owned(),
        }
    }

    pub fn get_bool(&mut self, index: usize) -> Result<Option<bool>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            other => Err(self.fail(index, "bool", other)),
        }
    }

    pub fn get_i8(&mut self, index: usize) -> Result<Option<i8>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::I8(x) => Ok(Some(*x)),
            other => Err(self.fail(index, "i8", other)),
        }
    }

    pub fn get_i16(&mut self, index: usize) -> Result<Option<i16>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::I16(x) => Ok(Some(*x)),
            other => Err(self.fail(index, "i16", other)),
        }
    }

    pub fn get_i32(&mut self, index: usize) -> Result<Option<i32>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::I32(x) => Ok(Some(*x)),
            other => Err(self.fail(index, "i32", other)),
        }
    }

    pub fn get_i64(&mut self, index: usize) -> Result<Option<i64>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::I64(x) => Ok(Some(*x)),
            other => Err(self.fail(index, "i64", other)),
        }
    }

    pub fn get_f32(&mut self, index: usize) -> Result<Option<f32>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::F32(x) => Ok(Some(*x)),
            other => Err(self.fail(index, "f32", other)),
        }
    }

    pub fn get_f64(&mut self, index: usize) -> Result<Option<f64>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::F64(x) => Ok(Some(*x)),
            other => Err(self.fail(index, "f64", other)),
        }
    }

    pub fn get_decimal(&mut self, index: usize) -> Result<Option<Decimal>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::Decimal(x) => Ok(Some(*x)),
            other => Err(self.fail(index, "decimal", other)),
        }
    }

    pub fn get_string(&mut self, index: usize) -> Result<Option<String>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::String(x) => Ok(Some(x.clone())),
            other => Err(self.fail(index, "string", other)),
        }
    }

    pub fn get_bytes(&mut self, index: usize) -> Result<Option<Vec<u8>>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::Bytes(x) => Ok(Some(x.clone())),
            other => Err(self.fail(index, "bytes", other)),
        }
    }

    pub fn get_date(&mut self, index: usize) -> Result<Option<Date>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::Date(x) => Ok(Some(*x)),
            other => Err(self.fail(index, "date", other)),
        }
    }

    pub fn get_time(&mut self, index: usize) -> Result<Option<Time>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::Time(x) => Ok(Some(*x)),
            other => Err(self.fail(index, "time", other)),
        }
    }

    pub fn get_datetime(&mut self, index: usize) -> Result<Option<DateTime>, DecodeError> {
        let v = self.get(index)?;
        match v {
            Value::Null => Ok(None),
            Value::DateTime(x) => Ok(Some(*x)),
            other => Err(self.fail(index, "datetime", other)),
        }
    }
}

/// A process-lifetime value that decodes `T` from columns
/// `[start, start + offset)` of a row (§4.1 "Decoder contract").
pub trait Decoder<T> {
    /// Exact column width this decoder consumes.
    fn offset(&self) -> usize;

    fn decode(&self, start: usize, ctx: &mut RowCtx<'_>) -> Result<T, DecodeError>;

    /// `map(d, f)`: transform the decoded value, preserving offset (§4.1
    /// composition law "Identity: map(d, identity) ≡ d").
    fn map<U, F>(self, f: F) -> MapDecoder<Self, F>
    where
        Self: Sized,
        F: Fn(T) -> U,
    {
        MapDecoder { inner: self, f }
    }

    /// `product(self, other)`: a decoder for `(T, U)` whose offset is the
    /// sum of the two offsets (§4.1 "Product associativity").
    fn zip<U, D2>(self, other: D2) -> ZipDecoder<Self, D2>
    where
        Self: Sized,
        D2: Decoder<U>,
    {
        ZipDecoder { a: self, b: other }
    }
}

/// Non-optional decoding of a single typed column. A column whose
/// `was_null` holds after the read fails "unexpected NULL" (§4.1 "Null
/// handling").
pub struct Column<T> {
    getter: fn(&mut RowCtx<'_>, usize) -> Result<Option<T>, DecodeError>,
}

macro_rules! column_ctor {
    ($name:ident, $ty:ty, $getter:ident) => {
        pub fn $name() -> Column<$ty> {
            Column {
                getter: RowCtx::$getter,
            }
        }
    };
}

column_ctor!(bool_col, bool, get_bool);
column_ctor!(i8_col, i8, get_i8);
column_ctor!(i16_col, i16, get_i16);
column_ctor!(i32_col, i32, get_i32);
column_ctor!(i64_col, i64, get_i64);
column_ctor!(f32_col, f32, get_f32);
column_ctor!(f64_col, f64, get_f64);
column_ctor!(decimal_col, Decimal, get_decimal);
column_ctor!(string_col, String, get_string);
column_ctor!(bytes_col, Vec<u8>, get_bytes);
column_ctor!(date_col, Date, get_date);
column_ctor!(time_col, Time, get_time);
column_ctor!(datetime_col, DateTime, get_datetime);

impl<T> Decoder<T> for Column<T> {
    fn offset(&self) -> usize {
        1
    }

    fn decode(&self, start: usize, ctx: &mut RowCtx<'_>) -> Result<T, DecodeError> {
        match (self.getter)(ctx, start)? {
            Some(v) => Ok(v),
            None => Err(DecodeError {
                column: start,
                expected: "non-null value",
                cause: "unexpected NULL".to_string(),
                statement: ctx.statement().to_owned(),
            }),
        }
    }
}

/// A decoder for `Option<T>` built from an inner [`Column<T>`] getter
/// (§4.1 "Null handling": absent emits `None` rather than failing).
pub fn optional<T>(col: Column<T>) -> impl Decoder<Option<T>> {
    OptDecoder { getter: col.getter }
}

pub struct OptDecoder<T> {
    getter: fn(&mut RowCtx<'_>, usize) -> Result<Option<T>, DecodeError>,
}

impl<T> Decoder<Option<T>> for OptDecoder<T> {
    fn offset(&self) -> usize {
        1
    }

    fn decode(&self, start: usize, ctx: &mut RowCtx<'_>) -> Result<Option<T>, DecodeError> {
        (self.getter)(ctx, start)
    }
}

pub struct MapDecoder<D, F> {
    inner: D,
    f: F,
}

impl<T, U, D, F> Decoder<U> for MapDecoder<D, F>
where
    D: Decoder<T>,
    F: Fn(T) -> U,
{
    fn offset(&self) -> usize {
        self.inner.offset()
    }

    fn decode(&self, start: usize, ctx: &mut RowCtx<'_>) -> Result<U, DecodeError> {
        self.inner.decode(start, ctx).map(&self.f)
    }
}

pub struct ZipDecoder<A, B> {
    a: A,
    b: B,
}

impl<T, U, A, B> Decoder<(T, U)> for ZipDecoder<A, B>
where
    A: Decoder<T>,
    B: Decoder<U>,
{
    fn offset(&self) -> usize {
        self.a.offset() + self.b.offset()
    }

    fn decode(&self, start: usize, ctx: &mut RowCtx<'_>) -> Result<(T, U), DecodeError> {
        let t = self.a.decode(start, ctx)?;
        let u = self.b.decode(start + self.a.offset(), ctx)?;
        Ok((t, u))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_map_matches_inner() {
        let row = vec![Value::I32(42)];
        let mut ctx = RowCtx::new(&row, "SELECT 1");
        let d = i32_col();
        let direct = d.decode(1, &mut ctx).unwrap();

        let mut ctx2 = RowCtx::new(&row, "SELECT 1");
        let mapped = i32_col().map(|x| x).decode(1, &mut ctx2).unwrap();
        assert_eq!(direct, mapped);
    }

    #[test]
    fn zip_offset_is_sum_and_associative() {
        let row = vec![Value::I32(1), Value::String("a".into()), Value::Bool(true)];
        let mut ctx = RowCtx::new(&row, "SELECT 1");
        let left_assoc = i32_col().zip(string_col()).zip(bool_col());
        let ((a, b), c) = left_assoc.decode(1, &mut ctx).unwrap();
        assert_eq!((a, b, c), (1, "a".to_string(), true));
        assert_eq!(left_assoc.offset(), 3);
    }

    #[test]
    fn non_optional_null_fails() {
        let row = vec![Value::Null];
        let mut ctx = RowCtx::new(&row, "SELECT 1");
        let err = i32_col().decode(1, &mut ctx).unwrap_err();
        assert!(err.cause.contains("unexpected NULL"));
    }

    #[test]
    fn optional_null_yields_none() {
        let row = vec![Value::Null];
        let mut ctx = RowCtx::new(&row, "SELECT 1");
        let result = optional(i32_col()).decode(1, &mut ctx).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn was_null_reflects_last_read_only() {
        let row = vec![Value::Null, Value::I32(5)];
        let mut ctx = RowCtx::new(&row, "SELECT 1");
        let _ = ctx.get_i32(1);
        assert!(ctx.was_null());
        let _ = ctx.get_i32(2);
        assert!(!ctx.was_null());
    }
}
