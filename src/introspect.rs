//! Read-only catalog queries about one table.
//!
//! Every query casts its output to `text`; rows come back as strings.

use crate::db::Session;
use crate::error::{Error, Result};
use crate::sql::qualified;

pub(crate) const SCHEMA_EXISTS: &str = "SELECT schema_name::text FROM information_schema.schemata \
     WHERE schema_name = $1";

pub(crate) const TABLE_EXISTS: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = $1 AND table_name = $2";

pub(crate) const COLUMNS: &str = "SELECT column_name::text FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position";

pub(crate) const COLUMN_TYPE: &str = "SELECT format_type(a.atttypid, a.atttypmod) AS data_type \
     FROM pg_attribute a \
     JOIN pg_class c ON c.oid = a.attrelid \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname = $1 AND c.relname = $2 AND a.attname = $3 \
     AND a.attnum > 0 AND NOT a.attisdropped";

pub(crate) const COLUMN_DEFAULT: &str = "SELECT column_default::text FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 AND column_name = $3";

pub(crate) const PRIMARY_KEY: &str = "SELECT kcu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON kcu.constraint_schema = tc.constraint_schema \
      AND kcu.constraint_name = tc.constraint_name \
     WHERE tc.table_schema = $1 AND tc.table_name = $2 \
       AND tc.constraint_type = 'PRIMARY KEY' \
     ORDER BY kcu.ordinal_position";

/// Foreign keys on other tables that reference the column.
pub(crate) const REFERENCING_FOREIGN_KEYS: &str = "SELECT c.conname::text \
     FROM pg_constraint c \
     JOIN pg_class t ON t.oid = c.confrelid \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     JOIN pg_attribute a ON a.attrelid = c.confrelid AND a.attnum = ANY (c.confkey) \
     WHERE c.contype = 'f' AND n.nspname = $1 AND t.relname = $2 AND a.attname = $3";

/// Single-column unique constraints or unique indexes on the column.
pub(crate) const UNIQUE_ON_COLUMN: &str = "SELECT i.indexrelid::regclass::text \
     FROM pg_index i \
     JOIN pg_class t ON t.oid = i.indrelid \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = i.indkey[0] \
     WHERE i.indisunique AND i.indnatts = 1 \
       AND n.nspname = $1 AND t.relname = $2 AND a.attname = $3";

/// Constraints of any kind on the table with the given name.
pub(crate) const CONSTRAINT_ON_TABLE: &str = "SELECT c.conname::text \
     FROM pg_constraint c \
     JOIN pg_class t ON t.oid = c.conrelid \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     WHERE n.nspname = $1 AND t.relname = $2 AND c.conname = $3";

pub(crate) const INDEX_VALID: &str = "SELECT i.indisvalid::text \
     FROM pg_index i \
     JOIN pg_class c ON c.oid = i.indexrelid \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname = $1 AND c.relname = $2";

/// Handle on a physical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub schema: String,
    pub name: String,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `schema.table`
    pub fn qualified(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    pub async fn exists(&self, session: &mut Session) -> Result<bool> {
        let rows = session.query(TABLE_EXISTS, &[self.schema.as_str(), self.name.as_str()]).await?;
        Ok(!rows.is_empty())
    }

    /// Column names in ordinal order.
    pub async fn columns(&self, session: &mut Session) -> Result<Vec<String>> {
        let rows = session.query(COLUMNS, &[self.schema.as_str(), self.name.as_str()]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first().map(str::to_string))
            .collect())
    }

    pub async fn has_column(&self, session: &mut Session, column: &str) -> Result<bool> {
        Ok(self.columns(session).await?.iter().any(|c| c == column))
    }

    /// Full type of a column including modifiers, e.g. `character varying(20)`.
    pub async fn column_type(&self, session: &mut Session, column: &str) -> Result<String> {
        session
            .query_value(COLUMN_TYPE, &[self.schema.as_str(), self.name.as_str(), column])
            .await?
            .ok_or_else(|| {
                Error::Validation(format!(
                    "column {} does not exist on {}",
                    column,
                    self.qualified()
                ))
            })
    }

    /// Default expression of a column, if it has one.
    pub async fn column_default(&self, session: &mut Session, column: &str) -> Result<Option<String>> {
        session
            .query_value(COLUMN_DEFAULT, &[self.schema.as_str(), self.name.as_str(), column])
            .await
    }

    /// Primary key columns in key order.
    pub async fn primary_key(&self, session: &mut Session) -> Result<Vec<String>> {
        let rows = session.query(PRIMARY_KEY, &[self.schema.as_str(), self.name.as_str()]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first().map(str::to_string))
            .collect())
    }

    /// The column backfill paginates on; the first primary key column.
    pub async fn pagination_key(&self, session: &mut Session) -> Result<String> {
        self.primary_key(session)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::Validation(format!("table {} has no primary key", self.qualified()))
            })
    }

    pub async fn row_count(&self, session: &mut Session) -> Result<u64> {
        let sql = format!("SELECT count(*)::text FROM {}", self.qualified());
        let count = session.query_value(&sql, &[]).await?.unwrap_or_default();
        count
            .parse()
            .map_err(|_| Error::Validation(format!("unexpected row count '{count}'")))
    }

    /// Names of foreign keys elsewhere that point at `column`.
    pub async fn referencing_foreign_keys(
        &self,
        session: &mut Session,
        column: &str,
    ) -> Result<Vec<String>> {
        let rows = session
            .query(REFERENCING_FOREIGN_KEYS, &[self.schema.as_str(), self.name.as_str(), column])
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first().map(str::to_string))
            .collect())
    }

    pub async fn is_unique(&self, session: &mut Session, column: &str) -> Result<bool> {
        let rows = session
            .query(UNIQUE_ON_COLUMN, &[self.schema.as_str(), self.name.as_str(), column])
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn has_constraint(&self, session: &mut Session, name: &str) -> Result<bool> {
        let rows = session
            .query(CONSTRAINT_ON_TABLE, &[self.schema.as_str(), self.name.as_str(), name])
            .await?;
        Ok(!rows.is_empty())
    }
}

pub async fn schema_exists(session: &mut Session, schema: &str) -> Result<bool> {
    Ok(!session.query(SCHEMA_EXISTS, &[schema]).await?.is_empty())
}

/// Whether index `schema.name` exists and can be used. An interrupted
/// concurrent build leaves the index behind with `indisvalid` false.
pub async fn index_is_valid(session: &mut Session, schema: &str, name: &str) -> Result<bool> {
    let valid = session.query_value(INDEX_VALID, &[schema, name]).await?;
    Ok(valid.as_deref() == Some("true"))
}
