//! SQL text helpers shared by every generator.
//!
//! Identifiers coming from a migration script are validated with
//! [`check_identifier`] before they reach any statement, so generators
//! interpolate them bare. Literal values go through [`literal`].

mod rewrite;

pub use rewrite::{rename_column_refs, rename_local_column_refs};

use crate::error::{Error, Result};

/// Prefix of every object the engine creates.
pub const PREFIX: &str = "laridae";
/// Schema holding the ledger table.
pub const LEDGER_SCHEMA: &str = "laridae";
/// Schema holding the "before" views.
pub const BEFORE_SCHEMA: &str = "laridae_before";
/// Schema holding synchronization trigger functions.
pub const TEMP_SCHEMA: &str = "laridae_temp";

/// PostgreSQL truncates identifiers beyond this many bytes (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Schema holding the "after" views of a migration.
pub fn after_schema(migration: &str) -> String {
    format!("{PREFIX}_{migration}")
}

/// Name of the shadow version of `column`.
pub fn shadow_column(column: &str) -> String {
    format!("{PREFIX}_new_{column}")
}

/// Temporary name of a constraint the engine adds during expand.
pub fn temp_constraint(column: &str, kind: &str) -> String {
    format!("{PREFIX}_constraint_{column}_{kind}")
}

/// Name the constraint takes once the migration is contracted.
pub fn final_constraint(table: &str, column: &str, kind: &str) -> String {
    format!("{table}_{column}_{kind}")
}

/// Whether `name` is a plain unquoted PostgreSQL identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a script identifier, naming the field in the message.
pub fn check_identifier(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Validation(format!(
            "{field} '{name}' contains invalid character(s)"
        )));
    }
    if !is_identifier(name) {
        return Err(Error::Validation(format!(
            "{field} '{name}' can only start with an alphabetical character or underscore"
        )));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Validation(format!(
            "{field} '{name}' is longer than {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    Ok(())
}

/// Quote a string as a SQL literal.
pub fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `schema.table`
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{schema}.{name}")
}
