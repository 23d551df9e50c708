//! `Encoder<T>` (§4.1): turns a user value into an ordered, non-empty
//! sequence of [`Value`]s, or an aggregated list of error messages.

use rust_decimal::Decimal;

use crate::value::{Date, DateTime, Time, Value};

/// The result of encoding one value: either the ordered primitives it
/// expands to, or a non-empty list of human-readable failure messages
/// (§4.1 "Encoder contract").
#[derive(Debug, Clone)]
pub enum Encoded {
    Success(Vec<Value>),
    Failure(Vec<String>),
}

impl Encoded {
    pub fn is_success(&self) -> bool {
        matches!(self, Encoded::Success(_))
    }

    pub fn values(&self) -> Option<&[Value]> {
        match self {
            Encoded::Success(vs) => Some(vs),
            Encoded::Failure(_) => None,
        }
    }

    pub fn messages(&self) -> Option<&[String]> {
        match self {
            Encoded::Success(_) => None,
            Encoded::Failure(msgs) => Some(msgs),
        }
    }

    /// `product(a, b)`: concatenate on success, concatenate error lists on
    /// any failure (§4.1 composition law: "never drops errors").
    pub fn product(self, other: Encoded) -> Encoded {
        match (self, other) {
            (Encoded::Success(mut a), Encoded::Success(b)) => {
                a.extend(b);
                Encoded::Success(a)
            }
            (Encoded::Success(_), Encoded::Failure(b)) => Encoded::Failure(b),
            (Encoded::Failure(a), Encoded::Success(_)) => Encoded::Failure(a),
            (Encoded::Failure(mut a), Encoded::Failure(b)) => {
                a.extend(b);
                Encoded::Failure(a)
            }
        }
    }
}

/// A process-lifetime value that knows how to turn `Self` into an
/// [`Encoded`]. Implemented for every member of the supported primitive set
/// (§4.1) plus `Option<T>` and tuples (product composition).
pub trait Encode {
    fn encode(&self) -> Encoded;
}

macro_rules! impl_encode_scalar {
    ($ty:ty, $variant:ident) => {
        impl Encode for $ty {
            fn encode(&self) -> Encoded {
                Encoded::Success(vec![Value::$variant(self.clone())])
            }
        }
    };
}

impl Encode for bool {
    fn encode(&self) -> Encoded {
        Encoded::Success(vec![Value::Bool(*self)])
    }
}
impl Encode for i8 {
    fn encode(&self) -> Encoded {
        Encoded::Success(vec![Value::I8(*self)])
    }
}
impl Encode for i16 {
    fn encode(&self) -> Encoded {
        Encoded::Success(vec![Value::I16(*self)])
    }
}
impl Encode for i32 {
    fn encode(&self) -> Encoded {
        Encoded::Success(vec![Value::I32(*self)])
    }
}
impl Encode for i64 {
    fn encode(&self) -> Encoded {
        Encoded::Success(vec![Value::I64(*self)])
    }
}
impl Encode for f32 {
    fn encode(&self) -> Encoded {
        Encoded::Success(vec![Value::F32(*self)])
    }
}
impl Encode for f64 {
    fn encode(&self) -> Encoded {
        Encoded::Success(vec![Value::F64(*self)])
    }
}
impl_encode_scalar!(Decimal, Decimal);
impl_encode_scalar!(String, String);
impl_encode_scalar!(Vec<u8>, Bytes);
impl_encode_scalar!(Date, Date);
impl_encode_scalar!(Time, Time);
impl_encode_scalar!(DateTime, DateTime);

impl Encode for &str {
    fn encode(&self) -> Encoded {
        Encoded::Success(vec![Value::String((*self).to_owned())])
    }
}

/// Optional-of-T (§4.1): present delegates to the inner encoder, absent
/// emits a single `null` primitive.
impl<T: Encode> Encode for Option<T> {
    fn encode(&self) -> Encoded {
        match self {
            Some(v) => v.encode(),
            None => Encoded::Success(vec![Value::Null]),
        }
    }
}

macro_rules! impl_encode_tuple {
    ($($idx:tt : $t:ident),+) => {
        impl<$($t: Encode),+> Encode for ($($t,)+) {
            fn encode(&self) -> Encoded {
                let mut parts = Vec::new();
                $(parts.push(self.$idx.encode());)+
                parts.into_iter().reduce(Encoded::product).expect("at least one element")
            }
        }
    };
}

impl_encode_tuple!(0: A);
impl_encode_tuple!(0: A, 1: B);
impl_encode_tuple!(0: A, 1: B, 2: C);
impl_encode_tuple!(0: A, 1: B, 2: C, 3: D);
impl_encode_tuple!(0: A, 1: B, 2: C, 3: D, 4: E);
impl_encode_tuple!(0: A, 1: B, 2: C, 3: D, 4: E, 5: F);

/// `product(eA, eB)`: an encoder over `(A, B)` built from two independent
/// encoders, used by derive-style composition when hand-writing an
/// `Encode` impl for a record type field-by-field instead of relying on the
/// tuple impls above.
pub fn product<A, B>(a: &A, b: &B) -> Encoded
where
    A: Encode,
    B: Encode,
{
    a.encode().product(b.encode())
}

/// Lets any encodable value be passed directly to [`crate::sql::bind`]
/// without an explicit `.encode()` call.
impl<T: Encode> From<T> for Encoded
where
    T: EncodeMarker,
{
    fn from(v: T) -> Encoded {
        v.encode()
    }
}

/// A marker used only to scope the blanket `From<T> for Encoded` impl above
/// to values, not to `Encoded` itself (which already has a reflexive
/// `From`/`Into` from the standard library). Implemented for every type
/// that implements [`Encode`] except `Encoded`.
pub trait EncodeMarker {}
impl EncodeMarker for bool {}
impl EncodeMarker for i8 {}
impl EncodeMarker for i16 {}
impl EncodeMarker for i32 {}
impl EncodeMarker for i64 {}
impl EncodeMarker for f32 {}
impl EncodeMarker for f64 {}
impl EncodeMarker for Decimal {}
impl EncodeMarker for String {}
impl EncodeMarker for Vec<u8> {}
impl EncodeMarker for Date {}
impl EncodeMarker for Time {}
impl EncodeMarker for DateTime {}
impl EncodeMarker for &str {}
impl<T: EncodeMarker> EncodeMarker for Option<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_concatenates_on_success() {
        let e = 1i32.encode().product("x".encode());
        match e {
            Encoded::Success(vs) => assert_eq!(vs, vec![Value::I32(1), Value::String("x".into())]),
            Encoded::Failure(_) => panic!("expected success"),
        }
    }

    #[test]
    fn product_never_drops_errors() {
        let ok = 1i32.encode();
        let fail = Encoded::Failure(vec!["bad".to_string()]);
        let combined = ok.product(fail.clone());
        assert!(matches!(combined, Encoded::Failure(ref m) if m == &vec!["bad".to_string()]));

        let fail2 = Encoded::Failure(vec!["also bad".to_string()]);
        let combined2 = fail.product(fail2);
        match combined2 {
            Encoded::Failure(m) => assert_eq!(m, vec!["bad".to_string(), "also bad".to_string()]),
            Encoded::Success(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn option_none_emits_null() {
        let none: Option<i32> = None;
        match none.encode() {
            Encoded::Success(vs) => assert_eq!(vs, vec![Value::Null]),
            Encoded::Failure(_) => panic!("expected success"),
        }
    }

    #[test]
    fn tuple_product_matches_field_encoders() {
        let pair = (1i32, "x".to_string());
        let expected = 1i32.encode().product("x".to_string().encode());
        match (pair.encode(), expected) {
            (Encoded::Success(a), Encoded::Success(b)) => assert_eq!(a, b),
            _ => panic!("expected both successes"),
        }
    }
}
