//! Constraint propagation.
//!
//! Copies the constraints that cover a column onto its shadow column so the
//! shadow enforces the same rules once it takes the column's place. Copies are
//! added `NOT VALID` and validated after backfill. Primary key and unique
//! constraints are left alone; the strategies that need uniqueness build it
//! themselves.

use tracing::info;

use crate::db::Session;
use crate::error::Result;
use crate::introspect::Table;
use crate::schema;
use crate::sql::{self, rename_local_column_refs, MAX_IDENTIFIER_LEN};

/// Non-key constraints whose key includes the column, with their definitions.
pub(crate) const COLUMN_CONSTRAINTS: &str = "SELECT c.conname::text AS name, \
     pg_get_constraintdef(c.oid)::text AS definition \
     FROM pg_constraint c \
     JOIN pg_class t ON t.oid = c.conrelid \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = ANY (c.conkey) \
     WHERE n.nspname = $1 AND t.relname = $2 AND a.attname = $3 \
       AND c.contype NOT IN ('p', 'u') \
     ORDER BY c.conname";

const NOT_VALID: &str = "NOT VALID";

/// A constraint as the catalog reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnConstraint {
    pub name: String,
    pub definition: String,
}

pub async fn column_constraints(
    session: &mut Session,
    table: &Table,
    column: &str,
) -> Result<Vec<ColumnConstraint>> {
    let rows = session
        .query(COLUMN_CONSTRAINTS, &[table.schema.as_str(), table.name.as_str(), column])
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            Some(ColumnConstraint {
                name: row.get("name")?.to_string(),
                definition: row.get("definition")?.to_string(),
            })
        })
        .collect())
}

/// Name of the copy of constraint `name` on the shadow of `column`.
pub fn shadow_constraint_name(name: &str, column: &str) -> String {
    let shadow = sql::shadow_column(column);
    let renamed = if let Some(at) = find_segment(name, column) {
        format!("{}{}{}", &name[..at], shadow, &name[at + column.len()..])
    } else {
        format!("{}_new_{}", sql::PREFIX, name)
    };
    truncate(renamed)
}

/// Name a propagated constraint takes back at contract, or `None` when
/// `name` was not produced by [`shadow_constraint_name`].
pub fn restored_constraint_name(name: &str, column: &str) -> Option<String> {
    let shadow = sql::shadow_column(column);
    if let Some(at) = find_segment(name, &shadow) {
        return Some(format!("{}{}{}", &name[..at], column, &name[at + shadow.len()..]));
    }
    name.strip_prefix(&format!("{}_new_", sql::PREFIX))
        .map(str::to_string)
}

/// Definition of the copy: local references to `column` point at the shadow.
pub fn shadow_definition(definition: &str, column: &str) -> String {
    let renamed = rename_local_column_refs(definition, column, &sql::shadow_column(column));
    if renamed.trim_end().ends_with(NOT_VALID) {
        renamed
    } else {
        format!("{renamed} {NOT_VALID}")
    }
}

/// Byte offset of `needle` in `name` where it forms whole `_`-separated parts.
fn find_segment(name: &str, needle: &str) -> Option<usize> {
    name.match_indices(needle).map(|(at, _)| at).find(|&at| {
        let before = name[..at].chars().next_back();
        let after = name[at + needle.len()..].chars().next();
        matches!(before, None | Some('_')) && matches!(after, None | Some('_'))
    })
}

fn truncate(mut name: String) -> String {
    if name.len() > MAX_IDENTIFIER_LEN {
        let mut end = MAX_IDENTIFIER_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

/// Copy every propagatable constraint of `column` onto its shadow column.
/// Returns the names of the copies.
pub async fn propagate(session: &mut Session, table: &Table, column: &str) -> Result<Vec<String>> {
    let mut added = Vec::new();
    for constraint in column_constraints(session, table, column).await? {
        let name = shadow_constraint_name(&constraint.name, column);
        let definition = shadow_definition(&constraint.definition, column);
        schema::add_constraint(session, table, &name, &definition).await?;
        info!(from = %constraint.name, to = %name, "constraint propagated");
        added.push(name);
    }
    Ok(added)
}

pub async fn validate(session: &mut Session, table: &Table, names: &[String]) -> Result<()> {
    for name in names {
        schema::validate_constraint(session, table, name).await?;
    }
    Ok(())
}

/// Give propagated constraints on `column` their original names back. Run
/// once the shadow column has been renamed to `column`.
pub async fn restore_names(session: &mut Session, table: &Table, column: &str) -> Result<()> {
    for constraint in column_constraints(session, table, column).await? {
        if let Some(original) = restored_constraint_name(&constraint.name, column) {
            schema::rename_constraint(session, table, &constraint.name, &original).await?;
        }
    }
    Ok(())
}
