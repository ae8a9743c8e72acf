//! Parameterized SQL text.
//!
//! [`SqlWriter`] appends a placeholder and its bound value in the same call,
//! so the parameter list can never drift out of step with the `?` markers in
//! the text.

use crate::error::{GeoFilterError, Result};
use crate::grid::GeoPartId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value bound to one `?` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl QueryParam {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            QueryParam::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryParam::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        QueryParam::Int(v as i64)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        QueryParam::Int(v)
    }
}

impl From<GeoPartId> for QueryParam {
    fn from(v: GeoPartId) -> Self {
        QueryParam::Int(v.value() as i64)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        QueryParam::Float(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        QueryParam::Bool(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        QueryParam::Text(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        QueryParam::Text(v)
    }
}

impl fmt::Display for QueryParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryParam::Bool(v) => write!(f, "{}", v),
            QueryParam::Int(v) => write!(f, "{}", v),
            QueryParam::Float(v) => write!(f, "{}", v),
            QueryParam::Text(v) => write!(f, "'{}'", v.replace('\'', "''")),
        }
    }
}

/// Count `?` placeholders outside of single-quoted string literals.
pub fn count_placeholders(sql: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for c in sql.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

/// SQL text plus the values for its positional placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub text: String,
    pub params: Vec<QueryParam>,
}

impl SqlStatement {
    pub fn placeholder_count(&self) -> usize {
        count_placeholders(&self.text)
    }
}

impl fmt::Display for SqlStatement {
    /// Text with every placeholder replaced by its literal value; for logs only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params = self.params.iter();
        let mut in_literal = false;
        for c in self.text.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    write!(f, "{}", c)?;
                }
                '?' if !in_literal => match params.next() {
                    Some(param) => write!(f, "{}", param)?,
                    None => write!(f, "?")?,
                },
                _ => write!(f, "{}", c)?,
            }
        }
        Ok(())
    }
}

/// Incremental builder for [`SqlStatement`].
#[derive(Debug, Default)]
pub struct SqlWriter {
    text: String,
    params: Vec<QueryParam>,
}

impl SqlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw SQL. Must not contain placeholders, use [`bind`](Self::bind).
    pub fn push(&mut self, sql: &str) -> &mut Self {
        debug_assert_eq!(count_placeholders(sql), 0, "use bind() for placeholders");
        self.text.push_str(sql);
        self
    }

    /// Append one placeholder together with its value.
    pub fn bind(&mut self, value: impl Into<QueryParam>) -> &mut Self {
        self.text.push('?');
        self.params.push(value.into());
        self
    }

    /// Append `?, ?, ...` for every value.
    pub fn bind_list<I, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryParam>,
    {
        for (index, value) in values.into_iter().enumerate() {
            if index > 0 {
                self.text.push_str(", ");
            }
            self.bind(value);
        }
        self
    }

    /// Append a fragment that carries its own placeholders and values.
    pub fn push_fragment(&mut self, fragment: &AttributeFilter) -> &mut Self {
        self.text.push_str(&fragment.where_clause);
        self.params.extend(fragment.params.iter().cloned());
        self
    }

    /// Append a complete statement, e.g. a sub-select.
    pub fn push_statement(&mut self, statement: &SqlStatement) -> &mut Self {
        self.text.push_str(&statement.text);
        self.params.extend(statement.params.iter().cloned());
        self
    }

    pub fn finish(self) -> SqlStatement {
        SqlStatement {
            text: self.text,
            params: self.params,
        }
    }
}

/// Opaque predicate contributed by the application ("app filter").
///
/// The geo engine never inspects the clause, it only checks that the number
/// of placeholders matches the number of parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub where_clause: String,
    pub params: Vec<QueryParam>,
}

impl AttributeFilter {
    pub fn new(where_clause: impl Into<String>, params: Vec<QueryParam>) -> Result<Self> {
        let where_clause = where_clause.into();
        let placeholders = count_placeholders(&where_clause);
        if placeholders != params.len() {
            return Err(GeoFilterError::InvalidFormat(format!(
                "attribute filter has {} placeholders but {} parameters",
                placeholders,
                params.len()
            )));
        }
        if where_clause.trim().is_empty() {
            return Err(GeoFilterError::InvalidFormat(
                "attribute filter clause is empty".to_string(),
            ));
        }
        Ok(Self {
            where_clause,
            params,
        })
    }
}
