//! The SQL fragment model (§4.2): an immutable `text` with `?` placeholders
//! plus an ordered parameter list. Fragments compose by concatenation.

use crate::encode::Encoded;
use crate::value::Value;

/// One entry in a [`Sql`]'s parameter list (§3 "Parameter").
///
/// `Static` text is merged into `text` eagerly by every combinator in this
/// module, so by the time a `Sql` reaches the interpreter the only `Static`
/// parameters left are ones a caller built by hand; the interpreter never
/// needs to special-case them during binding because binding only ever
/// walks `Dynamic` entries (see `Sql::dynamic_values`).
#[derive(Debug, Clone)]
pub enum Parameter {
    Static(String),
    Dynamic(Encoded),
}

/// An immutable SQL text plus its ordered parameters (§3 "Sql").
#[derive(Debug, Clone, Default)]
pub struct Sql {
    text: String,
    params: Vec<Parameter>,
}

impl Sql {
    /// Build a `Sql` from already-merged text and parameters. Callers should
    /// normally prefer [`Sql::raw`] or the `sql!` macro; this is the
    /// low-level constructor the rest of the module funnels through.
    pub fn new(text: impl Into<String>, params: Vec<Parameter>) -> Self {
        Sql {
            text: text.into(),
            params,
        }
    }

    /// A fragment with no dynamic parameters: plain literal SQL text.
    pub fn raw(text: impl Into<String>) -> Self {
        Sql::new(text, vec![])
    }

    /// Append a single bound (`?`) parameter whose value has already been
    /// encoded, i.e. the `${v}` arm of the `sql!` macro.
    pub fn bind(mut self, encoded: Encoded) -> Self {
        self.text.push('?');
        self.params.push(Parameter::Dynamic(encoded));
        self
    }

    /// Splice `s` verbatim into the text with no placeholder, i.e. the
    /// `${sc(s)}` arm of the `sql!` macro. Caller-trusted: the binder never
    /// rewrites or escapes this text (§6 "Statement text surface").
    pub fn splice(mut self, s: impl Into<String>) -> Self {
        self.text.push_str(&s.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// Count of dynamic parameters, used by testable-property 1
    /// (placeholder/parameter parity).
    pub fn dynamic_count(&self) -> usize {
        self.params
            .iter()
            .filter(|p| matches!(p, Parameter::Dynamic(_)))
            .count()
    }

    /// Count of `?` placeholders actually present in `text`.
    pub fn placeholder_count(&self) -> usize {
        self.text.matches('?').count()
    }

    /// The ordered list of encoded dynamic values the interpreter binds, in
    /// the order they must be sent to the statement (1-based positions are
    /// `index + 1`). A `Parameter::Dynamic(Encoded::Failure(_))` surfaces its
    /// messages here rather than being silently skipped.
    pub fn dynamic_values(&self) -> Vec<&Encoded> {
        self.params
            .iter()
            .filter_map(|p| match p {
                Parameter::Dynamic(e) => Some(e),
                Parameter::Static(_) => None,
            })
            .collect()
    }

    /// Canonical textual rendering of every dynamic parameter, in bind
    /// order, for logging and error messages (§6 "Formatted-parameter
    /// rendering"). A `Dynamic.Failure` renders as its joined messages
    /// rather than a value, since no value was ever produced.
    pub fn rendered_params(&self) -> Vec<String> {
        self.params
            .iter()
            .filter_map(|p| match p {
                Parameter::Static(_) => None,
                Parameter::Dynamic(Encoded::Success(vs)) => {
                    Some(vs.iter().map(Value::render).collect::<Vec<_>>().join(", "))
                }
                Parameter::Dynamic(Encoded::Failure(msgs)) => Some(format!("<encoding failed: {}>", msgs.join("; "))),
            })
            .collect()
    }

    pub fn concat(mut self, other: Sql) -> Self {
        self.text.push_str(&other.text);
        self.params.extend(other.params);
        self
    }
}

impl std::ops::Add for Sql {
    type Output = Sql;

    fn add(self, rhs: Sql) -> Sql {
        self.concat(rhs)
    }
}

impl std::iter::Sum for Sql {
    fn sum<I: Iterator<Item = Sql>>(iter: I) -> Self {
        iter.fold(Sql::default(), Sql::concat)
    }
}

/// Build a `VALUES (...)` clause from a non-empty list of already-built
/// fragments, e.g. each being a `parens(comma([...]))` of bound values.
pub fn values(rows: Vec<Sql>) -> Sql {
    debug_assert!(!rows.is_empty(), "values() requires at least one row");
    let mut out = Sql::raw("VALUES ");
    out = out.concat(comma(rows));
    out
}

/// `column IN (v1, v2, ...)` for a non-empty list of encoded values.
pub fn in_(column: &str, encoded: Vec<Encoded>) -> Sql {
    debug_assert!(!encoded.is_empty(), "in_() requires at least one value");
    let mut out = Sql::raw(format!("{column} IN ("));
    let bound: Vec<Sql> = encoded.into_iter().map(|e| Sql::default().bind(e)).collect();
    out = out.concat(comma(bound));
    out.concat(Sql::raw(")"))
}

/// `column NOT IN (v1, v2, ...)`.
pub fn not_in(column: &str, encoded: Vec<Encoded>) -> Sql {
    debug_assert!(!encoded.is_empty(), "not_in() requires at least one value");
    let mut out = Sql::raw(format!("{column} NOT IN ("));
    let bound: Vec<Sql> = encoded.into_iter().map(|e| Sql::default().bind(e)).collect();
    out = out.concat(comma(bound));
    out.concat(Sql::raw(")"))
}

/// Join fragments with `, `.
pub fn comma(parts: Vec<Sql>) -> Sql {
    join(parts, ", ")
}

/// `(a) AND (b) AND ...` for a non-empty list.
pub fn and_(parts: Vec<Sql>) -> Sql {
    debug_assert!(!parts.is_empty(), "and_() requires at least one clause");
    join(
        parts.into_iter().map(|p| parens(p)).collect(),
        " AND ",
    )
}

/// `(a) OR (b) OR ...` for a non-empty list.
pub fn or_(parts: Vec<Sql>) -> Sql {
    debug_assert!(!parts.is_empty(), "or_() requires at least one clause");
    join(parts.into_iter().map(|p| parens(p)).collect(), " OR ")
}

/// `WHERE (a) AND (b) AND ...`, omitted entirely when `parts` is empty
/// (the `whereAndOpt` combinator of §4.2).
pub fn where_and_opt(parts: Vec<Sql>) -> Sql {
    if parts.is_empty() {
        return Sql::default();
    }
    Sql::raw("WHERE ").concat(and_(parts))
}

/// `WHERE (a) OR (b) OR ...`, omitted entirely when `parts` is empty.
pub fn where_or_opt(parts: Vec<Sql>) -> Sql {
    if parts.is_empty() {
        return Sql::default();
    }
    Sql::raw("WHERE ").concat(or_(parts))
}

/// `WHERE (a) AND (b) AND ...` for a non-empty list (panics via debug_assert
/// on empty input; use [`where_and_opt`] when the clause list may be empty).
pub fn where_and(parts: Vec<Sql>) -> Sql {
    Sql::raw("WHERE ").concat(and_(parts))
}

/// `WHERE (a) OR (b) OR ...` for a non-empty list.
pub fn where_or(parts: Vec<Sql>) -> Sql {
    Sql::raw("WHERE ").concat(or_(parts))
}

/// `SET a = 1, b = 2, ...`.
pub fn set(assignments: Vec<Sql>) -> Sql {
    Sql::raw("SET ").concat(comma(assignments))
}

/// `ORDER BY a, b ...`.
pub fn order_by(columns: Vec<Sql>) -> Sql {
    Sql::raw("ORDER BY ").concat(comma(columns))
}

/// Wrap a fragment in parentheses.
pub fn parens(inner: Sql) -> Sql {
    Sql::raw("(").concat(inner).concat(Sql::raw(")"))
}

fn join(parts: Vec<Sql>, sep: &str) -> Sql {
    let mut out = Sql::default();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            out = out.concat(Sql::raw(sep));
        }
        out = out.concat(part);
    }
    out
}

/// Build a `Sql` fragment from literal text interleaved with bound values,
/// mirroring the source crate's `formatcp!`/`format_mysql_*_protocol`
/// text-building idiom but for the user-facing placeholder surface rather
/// than driver-internal `@db_name` splicing.
///
/// ```ignore
/// let id = 1;
/// let frag = sql!("SELECT name FROM user WHERE id = ", bind(id));
/// ```
///
/// Each comma-separated piece is either a string literal (spliced verbatim,
/// equivalent to `${sc(s)}`) or `bind(expr)` (encodes `expr` and emits a
/// `?`, equivalent to `${v}`).
#[macro_export]
macro_rules! sql {
    ($($piece:expr),+ $(,)?) => {{
        #[allow(unused_mut)]
        let mut frag = $crate::sql::Sql::default();
        $(
            frag = $crate::sql::__sql_piece(frag, $piece);
        )+
        frag
    }};
}

/// A single piece fed to the `sql!` macro: either literal text or a bound
/// value. Not part of the public API surface beyond what `sql!` needs.
pub enum Piece {
    Literal(String),
    Bound(Encoded),
}

pub fn bind<T: Into<Encoded>>(v: T) -> Piece {
    Piece::Bound(v.into())
}

impl From<&str> for Piece {
    fn from(s: &str) -> Self {
        Piece::Literal(s.to_owned())
    }
}

impl From<String> for Piece {
    fn from(s: String) -> Self {
        Piece::Literal(s)
    }
}

#[doc(hidden)]
pub fn __sql_piece(frag: Sql, piece: impl Into<Piece>) -> Sql {
    match piece.into() {
        Piece::Literal(s) => frag.splice(s),
        Piece::Bound(e) => frag.bind(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Encode;

    #[test]
    fn placeholder_parameter_parity() {
        let frag = sql!("SELECT * FROM t WHERE a = ", bind(1i32), " AND b = ", bind("x"));
        assert_eq!(frag.placeholder_count(), frag.dynamic_count());
        assert_eq!(frag.placeholder_count(), 2);
    }

    #[test]
    fn concatenation_appends_text_and_params() {
        let a = sql!("SELECT 1 WHERE a = ", bind(1i32));
        let b = sql!(" AND b = ", bind(2i32));
        let ab = a.clone().concat(b.clone());
        assert_eq!(ab.text(), format!("{}{}", a.text(), b.text()));
        assert_eq!(ab.dynamic_count(), a.dynamic_count() + b.dynamic_count());
    }

    #[test]
    fn where_and_opt_omits_empty() {
        assert_eq!(where_and_opt(vec![]).text(), "");
        let clause = where_and_opt(vec![sql!("a = ", bind(1i32))]);
        assert_eq!(clause.text(), "WHERE (a = ?)");
    }

    #[test]
    fn in_builds_placeholder_list() {
        let values: Vec<Encoded> = vec![1i32.encode(), 2i32.encode(), 3i32.encode()];
        let frag = in_("id", values);
        assert_eq!(frag.text(), "id IN (?, ?, ?)");
        assert_eq!(frag.dynamic_count(), 3);
    }
}
