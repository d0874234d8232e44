//! Connection primitive.
//!
//! A [`Backend`] runs one statement at a time, either wrapped in its own
//! transaction or, for statements PostgreSQL refuses inside a transaction
//! block (`CREATE INDEX CONCURRENTLY`), on its own. [`Session`] adds the
//! lock-timeout retry loop on top and is what the rest of the engine uses.

mod postgres;
mod session;

pub use postgres::PgBackend;
pub use session::Session;

use async_trait::async_trait;

use crate::error::DbError;

/// A result row, every value decoded as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, Option<String>)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Option<String>)>) -> Self {
        Self { columns }
    }

    /// Build a row from `(name, value)` pairs with no NULLs.
    #[cfg(test)]
    pub(crate) fn from_pairs<const N: usize>(pairs: [(&str, &str); N]) -> Self {
        Self {
            columns: pairs
                .iter()
                .map(|(name, value)| (name.to_string(), Some(value.to_string())))
                .collect(),
        }
    }

    /// Value of the named column; `None` when absent or NULL.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Value of the first column.
    pub fn first(&self) -> Option<&str> {
        self.columns.first().and_then(|(_, value)| value.as_deref())
    }
}

/// Statement execution against one database connection.
#[async_trait]
pub trait Backend: Send {
    /// Run `sql` with text parameters inside its own transaction and return
    /// the rows it produced. The transaction is rolled back on failure.
    async fn transact(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>, DbError>;

    /// Run `sql` outside any transaction block.
    async fn execute_outside_transaction(&mut self, sql: &str) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup() {
        let row = Row::new(vec![
            ("name".into(), Some("n1".into())),
            ("status".into(), None),
        ]);
        assert_eq!(row.get("name"), Some("n1"));
        assert_eq!(row.get("status"), None);
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.first(), Some("n1"));
    }
}
