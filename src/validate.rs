//! Pre-flight checks of a script against the live catalog.
//!
//! Runs before anything is written. The first failing check wins.

use crate::db::Session;
use crate::error::Result;
use crate::introspect::{Table, schema_exists};
use crate::script::{MigrationScript, Operation};
use crate::sql;

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub message: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }
}

macro_rules! check {
    ($e:expr) => {
        if let Some(failure) = $e {
            return Ok(failure);
        }
    };
}

/// Check `script` against the database.
pub async fn validate(session: &mut Session, script: &MigrationScript) -> Result<Validation> {
    if let Err(e) = script.check() {
        return Ok(Validation::fail(e.to_string()));
    }

    let op = &script.operation;
    let table = op.table();
    let column = op.column();

    check!(table_exists(session, &table).await?);

    match op {
        Operation::AddColumn(_) => {
            check!(name_not_taken(session, &table, column).await?);
            if script.functions.is_some() {
                check!(has_primary_key(session, &table).await?);
            }
        }
        Operation::RenameColumn(info) => {
            check!(column_exists(session, &table, column).await?);
            check!(name_valid(&info.new_name));
            check!(name_not_taken(session, &table, &info.new_name).await?);
        }
        Operation::DropColumn(_) => {
            check!(column_exists(session, &table, column).await?);
            check!(no_unsupported_constraints(session, &table, column).await?);
        }
        Operation::AddForeignKey(info) => {
            check!(column_exists(session, &table, column).await?);
            check!(no_unsupported_constraints(session, &table, column).await?);
            check!(has_primary_key(session, &table).await?);

            let referenced = Table::new(table.schema.as_str(), info.column.references.table.as_str());
            if !referenced.exists(session).await? {
                return Ok(Validation::fail(format!(
                    "Referenced table {} does not exist",
                    referenced.qualified()
                )));
            }
            if !referenced.has_column(session, &info.column.references.column).await? {
                return Ok(Validation::fail(format!(
                    "Referenced column {} does not exist on {}",
                    info.column.references.column,
                    referenced.qualified()
                )));
            }
        }
        Operation::AddUnique(_) => {
            check!(column_exists(session, &table, column).await?);
            check!(no_unsupported_constraints(session, &table, column).await?);
            check!(has_primary_key(session, &table).await?);
            if table.is_unique(session, column).await? {
                return Ok(Validation::fail("Column is already unique"));
            }
        }
        Operation::AddNotNull(_)
        | Operation::AddCheck(_)
        | Operation::ChangeType(_)
        | Operation::CreateIndex(_) => {
            check!(column_exists(session, &table, column).await?);
            check!(no_unsupported_constraints(session, &table, column).await?);
            check!(has_primary_key(session, &table).await?);
        }
    }

    for name in constraint_names(op, &table) {
        check!(constraint_not_taken(session, &table, &name).await?);
    }

    Ok(Validation::ok())
}

/// Constraint names the operation leaves on the table once contracted.
fn constraint_names(op: &Operation, table: &Table) -> Vec<String> {
    match op {
        Operation::AddColumn(info) => {
            let column = &info.column;
            let mut names = Vec::new();
            if !column.nullable {
                names.push(sql::final_constraint(&table.name, &column.name, "not_null"));
            }
            if column.unique {
                names.push(sql::final_constraint(&table.name, &column.name, "key"));
            }
            if let Some(check) = &column.check {
                names.push(check.name.clone());
            }
            names
        }
        Operation::AddNotNull(info) => vec![sql::final_constraint(&table.name, &info.column, "not_null")],
        Operation::AddCheck(info) => vec![sql::final_constraint(&table.name, &info.column, "check")],
        Operation::AddUnique(info) => vec![sql::final_constraint(&table.name, &info.column, "key")],
        Operation::AddForeignKey(info) => vec![info.column.references.name.clone()],
        Operation::RenameColumn(_)
        | Operation::DropColumn(_)
        | Operation::ChangeType(_)
        | Operation::CreateIndex(_) => Vec::new(),
    }
}

async fn table_exists(session: &mut Session, table: &Table) -> Result<Option<Validation>> {
    if !schema_exists(session, &table.schema).await? {
        return Ok(Some(Validation::fail("Schema does not exist")));
    }
    if !table.exists(session).await? {
        return Ok(Some(Validation::fail("Table does not exist")));
    }
    Ok(None)
}

async fn column_exists(session: &mut Session, table: &Table, column: &str) -> Result<Option<Validation>> {
    if table.has_column(session, column).await? {
        Ok(None)
    } else {
        Ok(Some(Validation::fail("Column does not exist")))
    }
}

async fn no_unsupported_constraints(
    session: &mut Session,
    table: &Table,
    column: &str,
) -> Result<Option<Validation>> {
    if table.primary_key(session).await?.iter().any(|c| c == column) {
        return Ok(Some(Validation::fail(
            "Column is a primary key, which is not supported",
        )));
    }
    if !table.referencing_foreign_keys(session, column).await?.is_empty() {
        return Ok(Some(Validation::fail(
            "Column is referenced by a foreign key, which is not supported",
        )));
    }
    Ok(None)
}

async fn has_primary_key(session: &mut Session, table: &Table) -> Result<Option<Validation>> {
    if table.primary_key(session).await?.is_empty() {
        Ok(Some(Validation::fail(format!(
            "Table {} has no primary key; rows cannot be backfilled in batches",
            table.qualified()
        ))))
    } else {
        Ok(None)
    }
}

fn name_valid(name: &str) -> Option<Validation> {
    sql::check_identifier("new name", name)
        .err()
        .map(|e| Validation::fail(e.to_string()))
}

async fn name_not_taken(session: &mut Session, table: &Table, name: &str) -> Result<Option<Validation>> {
    if table.has_column(session, name).await? {
        Ok(Some(Validation::fail(format!(
            "Column {} already exists on {}",
            name,
            table.qualified()
        ))))
    } else {
        Ok(None)
    }
}

async fn constraint_not_taken(
    session: &mut Session,
    table: &Table,
    name: &str,
) -> Result<Option<Validation>> {
    if table.has_constraint(session, name).await? {
        Ok(Some(Validation::fail(format!(
            "Constraint {} already exists on {}",
            name,
            table.qualified()
        ))))
    } else {
        Ok(None)
    }
}
