//! Parameterized query model.
use std::fmt::{self, Write};

use bytes::Bytes;

use crate::{ext::UsizeExt, postgres::Oid, transport::V2Transport};

/// Immutable SQL template: literal fragments interleaved with parameter
/// slots.
///
/// Created once per distinct SQL text and never mutated, so it can be
/// cached and shared across executions. A query with `n` parameters has
/// `n + 1` fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    fragments: Vec<String>,
}

impl Query {
    /// Scan `sql` once, splitting it around `?` placeholders.
    ///
    /// Placeholders inside string literals, quoted identifiers and comments
    /// are left alone. No other SQL validation is performed.
    pub fn parse(sql: &str) -> Self {
        let bytes = sql.as_bytes();
        let mut fragments = Vec::new();
        let mut start = 0;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'?' => {
                    fragments.push(sql[start..i].to_owned());
                    i += 1;
                    start = i;
                }
                b'\'' => i = skip_quoted(bytes, i, b'\''),
                b'"' => i = skip_quoted(bytes, i, b'"'),
                b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line_comment(bytes, i),
                b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
                _ => i += 1,
            }
        }

        fragments.push(sql[start..].to_owned());
        Self { fragments }
    }

    /// A query taken verbatim, with no placeholder scan.
    pub fn simple(sql: &str) -> Self {
        Self { fragments: vec![sql.to_owned()] }
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn parameter_count(&self) -> usize {
        self.fragments.len() - 1
    }

    /// Create an empty parameter list sized for this query.
    pub fn parameters(&self) -> ParameterList {
        ParameterList::new(self.parameter_count())
    }

    /// The query text with bound values substituted, for diagnostics only.
    pub fn render(&self, params: &ParameterList) -> String {
        let mut out = String::new();
        for (i, fragment) in self.fragments.iter().enumerate() {
            out.push_str(fragment);
            if i < params.len() {
                params.render_into(&mut out, i + 1);
            }
        }
        out
    }
}

/// Skip a run delimited by `quote`, where a doubled quote is an escape.
fn skip_quoted(bytes: &[u8], at: usize, quote: u8) -> usize {
    let mut i = at + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

fn skip_line_comment(bytes: &[u8], at: usize) -> usize {
    let mut i = at + 2;
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

/// Block comments nest.
fn skip_block_comment(bytes: &[u8], at: usize) -> usize {
    let mut i = at + 2;
    let mut depth = 1;
    while i < bytes.len() && depth > 0 {
        if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
        } else if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    i
}

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Binary { bytes: Bytes, type_oid: Oid },
}

/// Per-execution parameter bindings for a [`Query`].
///
/// Slots are 1-based. Every slot must be bound before execution; the engine
/// rejects an incomplete list before any bytes are sent.
#[derive(Debug, Clone)]
pub struct ParameterList {
    values: Vec<Option<Value>>,
}

impl ParameterList {
    pub fn new(count: usize) -> Self {
        Self { values: vec![None; count] }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn slot(&mut self, index: usize) -> Result<&mut Option<Value>, BindError> {
        if index == 0 || index > self.values.len() {
            return Err(BindError::OutOfRange { index, count: self.values.len() });
        }
        Ok(&mut self.values[index - 1])
    }

    /// Bind a raw textual value, spliced into the query as-is.
    pub fn bind(&mut self, index: usize, value: impl Into<String>) -> Result<(), BindError> {
        *self.slot(index)? = Some(Value::Text(value.into()));
        Ok(())
    }

    /// Bind a string as a quoted literal, escaping embedded quotes and
    /// backslashes.
    pub fn bind_string(&mut self, index: usize, value: &str) -> Result<(), BindError> {
        let mut literal = String::with_capacity(value.len() + 2);
        literal.push('\'');
        for ch in value.chars() {
            match ch {
                '\'' => literal.push_str("''"),
                '\\' => literal.push_str("\\\\"),
                ch => literal.push(ch),
            }
        }
        literal.push('\'');
        self.bind(index, literal)
    }

    /// Bind an integer as wire text.
    pub fn bind_int(&mut self, index: usize, value: i64) -> Result<(), BindError> {
        let mut buf = itoa::Buffer::new();
        self.bind(index, buf.format(value))
    }

    /// Bind raw bytes together with the backend type oid they decode as.
    pub fn bind_bytes(
        &mut self,
        index: usize,
        bytes: impl Into<Bytes>,
        type_oid: Oid,
    ) -> Result<(), BindError> {
        *self.slot(index)? = Some(Value::Binary { bytes: bytes.into(), type_oid });
        Ok(())
    }

    /// Fail if any slot is still unset.
    pub fn check_all_set(&self) -> Result<(), BindError> {
        match self.values.iter().position(Option::is_none) {
            Some(at) => Err(BindError::Unset { index: at + 1 }),
            None => Ok(()),
        }
    }

    /// Serialize one slot into an outbound query message.
    pub(crate) fn write<T: V2Transport>(&self, index: usize, io: &mut T) {
        match &self.values[index - 1] {
            Some(Value::Text(text)) => io.send_str(text),
            Some(Value::Binary { bytes, .. }) => io.send_bytes(bytes),
            // rejected by check_all_set before serialization
            None => {}
        }
    }

    fn render_into(&self, out: &mut String, index: usize) {
        match &self.values[index - 1] {
            Some(Value::Text(text)) => out.push_str(text),
            Some(Value::Binary { bytes, type_oid }) => {
                let _ = write!(out, "<binary oid={type_oid} len={}>", bytes.len());
            }
            None => out.push('?'),
        }
    }
}

/// A fastpath parameter in the function-call wire sub-format.
#[derive(Debug, Clone)]
pub enum FastpathParam {
    /// A 4-byte integer.
    Int(i32),
    /// Length-prefixed raw bytes.
    Bytes(Bytes),
}

/// Per-call parameter bindings for a fastpath function call.
#[derive(Debug, Clone)]
pub struct FastpathParams {
    values: Vec<Option<FastpathParam>>,
}

impl FastpathParams {
    pub fn new(count: usize) -> Self {
        Self { values: vec![None; count] }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn bind(&mut self, index: usize, param: FastpathParam) -> Result<(), BindError> {
        if index == 0 || index > self.values.len() {
            return Err(BindError::OutOfRange { index, count: self.values.len() });
        }
        self.values[index - 1] = Some(param);
        Ok(())
    }

    pub fn bind_int(&mut self, index: usize, value: i32) -> Result<(), BindError> {
        self.bind(index, FastpathParam::Int(value))
    }

    pub fn bind_bytes(&mut self, index: usize, bytes: impl Into<Bytes>) -> Result<(), BindError> {
        self.bind(index, FastpathParam::Bytes(bytes.into()))
    }

    /// Fail if any slot is still unset.
    pub fn check_all_set(&self) -> Result<(), BindError> {
        match self.values.iter().position(Option::is_none) {
            Some(at) => Err(BindError::Unset { index: at + 1 }),
            None => Ok(()),
        }
    }

    /// Serialize one slot in the function-call sub-format: a 4-byte length,
    /// then the payload.
    pub(crate) fn write<T: V2Transport>(&self, index: usize, io: &mut T) {
        match &self.values[index - 1] {
            Some(FastpathParam::Int(value)) => {
                io.send_i32(4);
                io.send_i32(*value);
            }
            Some(FastpathParam::Bytes(bytes)) => {
                io.send_i32(bytes.len().to_i32());
                io.send_bytes(bytes);
            }
            // rejected by check_all_set before serialization
            None => {}
        }
    }
}

/// Parameter binding usage error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Slot index outside `1..=count`.
    OutOfRange { index: usize, count: usize },
    /// Execution attempted with an unbound slot.
    Unset { index: usize },
    /// Parameter list sized for a different query.
    CountMismatch { expected: usize, actual: usize },
}

impl std::error::Error for BindError { }

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { index, count } => {
                write!(f, "parameter index {index} out of range (1..={count})")
            }
            Self::Unset { index } => write!(f, "no value bound for parameter {index}"),
            Self::CountMismatch { expected, actual } => {
                write!(f, "query takes {expected} parameters, list holds {actual}")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_fragments() {
        let query = Query::parse("select * from t where a = ? and b = ?");
        assert_eq!(query.parameter_count(), 2);
        assert_eq!(
            query.fragments(),
            ["select * from t where a = ", " and b = ", ""],
        );
    }

    #[test]
    fn no_placeholders() {
        let query = Query::parse("select 1");
        assert_eq!(query.parameter_count(), 0);
        assert_eq!(query.fragments(), ["select 1"]);
    }

    #[test]
    fn placeholders_in_literals_are_kept() {
        let query = Query::parse(
            "select '?', \"a?b\", 'it''s ?' -- tail ?\n, /* ? /* nested ? */ */ ?",
        );
        assert_eq!(query.parameter_count(), 1);
    }

    #[test]
    fn simple_skips_the_scan() {
        let query = Query::simple("select '?' ? ?");
        assert_eq!(query.parameter_count(), 0);
    }

    #[test]
    fn bind_out_of_range() {
        let query = Query::parse("select ?");
        let mut params = query.parameters();
        assert_eq!(
            params.bind(0, "1"),
            Err(BindError::OutOfRange { index: 0, count: 1 }),
        );
        assert_eq!(
            params.bind(2, "1"),
            Err(BindError::OutOfRange { index: 2, count: 1 }),
        );
        assert_eq!(params.bind(1, "1"), Ok(()));
    }

    #[test]
    fn check_all_set_reports_first_unset() {
        let query = Query::parse("insert into t values (?, ?, ?)");
        let mut params = query.parameters();
        params.bind(1, "1").unwrap();
        params.bind(3, "3").unwrap();
        assert_eq!(params.check_all_set(), Err(BindError::Unset { index: 2 }));
        params.bind(2, "2").unwrap();
        assert_eq!(params.check_all_set(), Ok(()));
    }

    #[test]
    fn bind_string_escapes() {
        let query = Query::parse("select ?");
        let mut params = query.parameters();
        params.bind_string(1, "it's a \\ test").unwrap();
        assert_eq!(query.render(&params), "select 'it''s a \\\\ test'");
    }

    #[test]
    fn bind_int_renders_as_text() {
        let query = Query::parse("select ? + ?");
        let mut params = query.parameters();
        params.bind_int(1, -42).unwrap();
        params.bind_int(2, 7).unwrap();
        assert_eq!(query.render(&params), "select -42 + 7");
    }

    #[test]
    fn render_marks_unset_and_binary() {
        let query = Query::parse("select ?, ?");
        let mut params = query.parameters();
        params.bind_bytes(2, &b"\x00\x01"[..], 17).unwrap();
        assert_eq!(query.render(&params), "select ?, <binary oid=17 len=2>");
    }
}
