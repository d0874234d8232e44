//! Migration scripts.
//!
//! A script is a JSON document naming the migration, the operation, its
//! parameters, and the `up`/`down` expressions that translate values between
//! the old and new column:
//!
//! ```json
//! {
//!   "name": "n1",
//!   "operation": "add_not_null_constraint",
//!   "info": { "schema": "public", "table": "t", "column": "c" },
//!   "functions": { "up": "COALESCE(c, 'x')", "down": "c" }
//! }
//! ```
//!
//! The same JSON is stored in the ledger and parsed again at contract or
//! rollback time.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::introspect::Table;
use crate::sql::{self, check_identifier, MAX_IDENTIFIER_LEN};

/// Migration names that would collide with the fixed `laridae_*` schemas.
const RESERVED_NAMES: &[&str] = &["before", "temp"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationScript {
    pub name: String,
    #[serde(flatten)]
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Functions>,
}

/// Value translations between the old and new column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Functions {
    /// Old shape to new shape; may reference any column by bare name.
    pub up: String,
    /// New shape to old shape, written against the original column name.
    pub down: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "info", rename_all = "snake_case")]
pub enum Operation {
    AddColumn(AddColumn),
    #[serde(rename = "add_not_null_constraint")]
    AddNotNull(ColumnRef),
    RenameColumn(RenameColumn),
    DropColumn(ColumnRef),
    #[serde(rename = "add_check_constraint")]
    AddCheck(AddCheck),
    #[serde(rename = "add_unique_constraint")]
    AddUnique(ColumnRef),
    #[serde(rename = "add_foreign_key_constraint")]
    AddForeignKey(AddForeignKey),
    #[serde(rename = "change_column_type")]
    ChangeType(ChangeType),
    CreateIndex(CreateIndex),
}

/// An existing column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub schema: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddColumn {
    pub schema: String,
    pub table: String,
    pub column: NewColumn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// Scalar default; strings, numbers and booleans are accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default = "yes")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<CheckSpec>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    pub constraint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameColumn {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCheck {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddForeignKey {
    pub schema: String,
    pub table: String,
    pub column: ForeignKeyColumn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyColumn {
    pub name: String,
    pub references: References,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct References {
    /// Name of the foreign key constraint.
    pub name: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeType {
    pub schema: String,
    pub table: String,
    pub column: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIndex {
    pub schema: String,
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub method: IndexMethod,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMethod {
    #[default]
    Btree,
    Hash,
    Gist,
    Spgist,
    Gin,
    Brin,
}

impl IndexMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexMethod::Btree => "btree",
            IndexMethod::Hash => "hash",
            IndexMethod::Gist => "gist",
            IndexMethod::Spgist => "spgist",
            IndexMethod::Gin => "gin",
            IndexMethod::Brin => "brin",
        }
    }
}

impl fmt::Display for IndexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    /// Wire name of the operation.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::AddColumn(_) => "add_column",
            Operation::AddNotNull(_) => "add_not_null_constraint",
            Operation::RenameColumn(_) => "rename_column",
            Operation::DropColumn(_) => "drop_column",
            Operation::AddCheck(_) => "add_check_constraint",
            Operation::AddUnique(_) => "add_unique_constraint",
            Operation::AddForeignKey(_) => "add_foreign_key_constraint",
            Operation::ChangeType(_) => "change_column_type",
            Operation::CreateIndex(_) => "create_index",
        }
    }

    /// The table the operation changes.
    pub fn table(&self) -> Table {
        let (schema, table) = match self {
            Operation::AddColumn(i) => (&i.schema, &i.table),
            Operation::AddNotNull(i) | Operation::DropColumn(i) | Operation::AddUnique(i) => {
                (&i.schema, &i.table)
            }
            Operation::RenameColumn(i) => (&i.schema, &i.table),
            Operation::AddCheck(i) => (&i.schema, &i.table),
            Operation::AddForeignKey(i) => (&i.schema, &i.table),
            Operation::ChangeType(i) => (&i.schema, &i.table),
            Operation::CreateIndex(i) => (&i.schema, &i.table),
        };
        Table::new(schema.as_str(), table.as_str())
    }

    /// The column the operation is about: the new column for `add_column`,
    /// the existing one otherwise.
    pub fn column(&self) -> &str {
        match self {
            Operation::AddColumn(i) => &i.column.name,
            Operation::AddNotNull(i) | Operation::DropColumn(i) | Operation::AddUnique(i) => {
                &i.column
            }
            Operation::RenameColumn(i) => &i.column,
            Operation::AddCheck(i) => &i.column,
            Operation::AddForeignKey(i) => &i.column.name,
            Operation::ChangeType(i) => &i.column,
            Operation::CreateIndex(i) => &i.column,
        }
    }

    /// Whether the operation needs `functions` to translate values.
    pub fn requires_functions(&self) -> bool {
        matches!(
            self,
            Operation::AddNotNull(_)
                | Operation::AddCheck(_)
                | Operation::AddUnique(_)
                | Operation::AddForeignKey(_)
                | Operation::ChangeType(_)
        )
    }

    /// Whether the operation copies the column into a shadow column.
    pub fn uses_shadow_column(&self) -> bool {
        self.requires_functions() || matches!(self, Operation::CreateIndex(_))
    }
}

impl MigrationScript {
    /// Parse and check a script.
    pub fn from_json(text: &str) -> Result<Self> {
        let script: MigrationScript = serde_json::from_str(text)?;
        script.check()?;
        Ok(script)
    }

    /// Read a script from a file path, or treat the argument as inline JSON.
    pub fn load(source: &str) -> Result<Self> {
        let trimmed = source.trim_start();
        if trimmed.starts_with('{') {
            return Self::from_json(trimmed);
        }
        let text = std::fs::read_to_string(Path::new(source))?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn table(&self) -> Table {
        self.operation.table()
    }

    /// Schema holding this migration's after views.
    pub fn after_schema(&self) -> String {
        sql::after_schema(&self.name)
    }

    /// Structural checks that need no database.
    pub fn check(&self) -> Result<()> {
        check_identifier("migration name", &self.name)?;
        check_prefixed("migration name", &self.name, sql::after_schema(&self.name).len())?;
        if RESERVED_NAMES.contains(&self.name.as_str()) {
            return Err(Error::Validation(format!(
                "migration name '{}' is reserved",
                self.name
            )));
        }

        let op = &self.operation;
        let table = op.table();
        check_identifier("schema", &table.schema)?;
        check_identifier("table", &table.name)?;
        check_identifier("column", op.column())?;
        if op.uses_shadow_column() {
            check_prefixed("column", op.column(), sql::shadow_column(op.column()).len())?;
        }

        if op.requires_functions() && self.functions.is_none() {
            return Err(Error::Validation(format!(
                "operation {} requires functions.up and functions.down",
                op.kind()
            )));
        }

        match op {
            Operation::AddColumn(info) => {
                check_type(&info.column.data_type)?;
                if let Some(default) = &info.column.default {
                    if default.is_array() || default.is_object() {
                        return Err(Error::Validation(
                            "column default must be a string, number or boolean".into(),
                        ));
                    }
                }
                if let Some(check) = &info.column.check {
                    check_identifier("check constraint name", &check.name)?;
                }
            }
            Operation::RenameColumn(info) => check_identifier("new_name", &info.new_name)?,
            Operation::AddForeignKey(info) => {
                check_identifier("constraint name", &info.column.references.name)?;
                check_identifier("referenced table", &info.column.references.table)?;
                check_identifier("referenced column", &info.column.references.column)?;
            }
            Operation::ChangeType(info) => check_type(&info.data_type)?,
            Operation::AddNotNull(_)
            | Operation::DropColumn(_)
            | Operation::AddCheck(_)
            | Operation::AddUnique(_)
            | Operation::CreateIndex(_) => {}
        }
        Ok(())
    }
}

fn check_prefixed(field: &str, name: &str, prefixed_len: usize) -> Result<()> {
    if prefixed_len > MAX_IDENTIFIER_LEN {
        return Err(Error::Validation(format!(
            "{field} '{name}' is too long once prefixed ({prefixed_len} > {MAX_IDENTIFIER_LEN} bytes)"
        )));
    }
    Ok(())
}

fn check_type(data_type: &str) -> Result<()> {
    if data_type.trim().is_empty() || data_type.contains(';') {
        return Err(Error::Validation(format!("invalid column type '{data_type}'")));
    }
    Ok(())
}

/// Render a scalar JSON default as a SQL literal.
pub fn default_literal(value: &Value) -> String {
    match value {
        Value::String(s) => sql::literal(s),
        other => sql::literal(&other.to_string()),
    }
}
