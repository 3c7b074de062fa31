//! Statements with named parameters.
//!
//! Statement text uses `${name}` placeholders. [`Query::format`] rewrites them into
//! the positional syntax of the target dialect and returns the bound values in
//! matching order, so one statement text serves every engine.

use std::collections::HashMap;

use crate::error::{BackendError, StorageResult};

use super::dialect::PlaceholderStyle;
use super::driver::Value;

/// A SQL statement with named `${name}` parameters.
#[derive(Debug, Clone)]
pub struct Query {
    sql: String,
    values: HashMap<String, Value>,
}

impl Query {
    /// Creates a query from statement text with `${name}` markers.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: HashMap::new(),
        }
    }

    /// Binds a value to every occurrence of `${name}`.
    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    /// Statement text before placeholder rendering.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Renders the statement for a placeholder style.
    ///
    /// Numbered styles reuse one index per distinct name. The `?` style repeats
    /// the value once per occurrence.
    pub fn format(&self, style: PlaceholderStyle) -> StorageResult<(String, Vec<Value>)> {
        let mut sql = String::with_capacity(self.sql.len());
        let mut params: Vec<Value> = Vec::new();
        let mut indexes: HashMap<&str, usize> = HashMap::new();
        let mut rest = self.sql.as_str();

        while let Some(start) = rest.find("${") {
            sql.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| BackendError::QueryError {
                message: format!("unterminated parameter in statement: {}", self.sql),
            })?;
            let name = &after[..end];
            let value = self
                .values
                .get(name)
                .ok_or_else(|| BackendError::QueryError {
                    message: format!("parameter '{}' is not bound", name),
                })?;

            let index = if style.is_numbered() {
                match indexes.get(name) {
                    Some(index) => *index,
                    None => {
                        params.push(value.clone());
                        indexes.insert(name, params.len());
                        params.len()
                    }
                }
            } else {
                params.push(value.clone());
                params.len()
            };
            sql.push_str(&style.render(index));
            rest = &after[end + 1..];
        }
        sql.push_str(rest);

        Ok((sql, params))
    }
}
