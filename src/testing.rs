//! In-memory [`Backend`] for unit tests.
//!
//! Models just enough of a database to drive the engine: tables with typed
//! columns and primary keys, the ledger table, the column DDL the strategies
//! issue, and injectable failures. Every statement attempt is recorded.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::db::{Backend, Row};
use crate::error::DbError;
use crate::{introspect, ledger, propagate};

#[derive(Debug, Clone)]
struct FakeColumn {
    name: String,
    data_type: String,
    default: Option<String>,
}

#[derive(Debug, Clone)]
struct FakeTable {
    schema: String,
    name: String,
    columns: Vec<FakeColumn>,
    primary_key: Vec<String>,
    rows: u64,
    /// (column, constraint name, definition)
    constraints: Vec<(String, String, String)>,
    /// (column, foreign key name) for keys elsewhere pointing here
    referenced_by: Vec<(String, String)>,
    unique: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: u32,
    pub name: String,
    pub script: String,
    pub status: String,
}

struct Failure {
    needle: String,
    error: DbError,
    remaining: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub sql: String,
    pub lockable: bool,
}

#[derive(Default)]
struct FakeState {
    tables: Vec<FakeTable>,
    schemas: Vec<String>,
    ledger: Option<Vec<LedgerEntry>>,
    failures: Vec<Failure>,
    attempts: Vec<Attempt>,
    /// (index name, validity checks still to answer `false`)
    invalid_indexes: Vec<(String, u32)>,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_table(&self, schema: &str, name: &str, columns: &[(&str, &str)], primary_key: &[&str]) {
        let mut state = self.state();
        if !state.schemas.iter().any(|s| s == schema) {
            state.schemas.push(schema.to_string());
        }
        state.tables.push(FakeTable {
            schema: schema.to_string(),
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(name, data_type)| FakeColumn {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                    default: None,
                })
                .collect(),
            primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
            rows: 0,
            constraints: Vec::new(),
            referenced_by: Vec::new(),
            unique: Vec::new(),
        });
    }

    pub fn set_row_count(&self, schema: &str, table: &str, rows: u64) {
        self.with_table(schema, table, |t| t.rows = rows);
    }

    pub fn set_default(&self, schema: &str, table: &str, column: &str, default: &str) {
        self.with_table(schema, table, |t| {
            if let Some(c) = t.columns.iter_mut().find(|c| c.name == column) {
                c.default = Some(default.to_string());
            }
        });
    }

    pub fn add_constraint(&self, schema: &str, table: &str, column: &str, name: &str, definition: &str) {
        self.with_table(schema, table, |t| {
            t.constraints
                .push((column.to_string(), name.to_string(), definition.to_string()))
        });
    }

    pub fn add_referencing_foreign_key(&self, schema: &str, table: &str, column: &str, name: &str) {
        self.with_table(schema, table, |t| {
            t.referenced_by.push((column.to_string(), name.to_string()))
        });
    }

    pub fn mark_unique(&self, schema: &str, table: &str, column: &str) {
        self.with_table(schema, table, |t| t.unique.push(column.to_string()));
    }

    /// Answer the next `times` validity checks of index `name` with `false`,
    /// as after a concurrent build that was cancelled part way.
    pub fn report_invalid_index(&self, name: &str, times: u32) {
        self.state().invalid_indexes.push((name.to_string(), times));
    }

    /// Start with an empty ledger table in place.
    pub fn init_ledger(&self) {
        self.state().ledger = Some(Vec::new());
    }

    pub fn push_ledger(&self, name: &str, script: &str, status: &str) {
        let mut state = self.state();
        let ledger = state.ledger.get_or_insert_with(Vec::new);
        let id = ledger.len() as u32 + 1;
        ledger.push(LedgerEntry {
            id,
            name: name.to_string(),
            script: script.to_string(),
            status: status.to_string(),
        });
    }

    pub fn ledger(&self) -> Vec<LedgerEntry> {
        self.state().ledger.clone().unwrap_or_default()
    }

    pub fn last_status(&self) -> Option<String> {
        self.ledger().last().map(|e| e.status.clone())
    }

    /// Fail the next `times` statements containing `needle` with a lock timeout.
    pub fn fail_with_lock_timeout(&self, needle: &str, times: u32) {
        self.state().failures.push(Failure {
            needle: needle.to_string(),
            error: DbError::LockTimeout("canceling statement due to lock timeout".into()),
            remaining: Some(times),
        });
    }

    /// Fail every statement containing `needle` with `error`.
    pub fn fail_with(&self, needle: &str, error: DbError) {
        self.state().failures.push(Failure {
            needle: needle.to_string(),
            error,
            remaining: None,
        });
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.state().attempts.clone()
    }

    pub fn attempts_matching(&self, needle: &str) -> usize {
        self.state()
            .attempts
            .iter()
            .filter(|a| a.sql.contains(needle))
            .count()
    }

    pub fn statements(&self) -> Vec<String> {
        self.attempts().into_iter().map(|a| a.sql).collect()
    }

    pub fn lockable_statements(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter(|a| a.lockable)
            .map(|a| a.sql)
            .collect()
    }

    /// Statements that change the user's schema: no catalog reads, no ledger.
    pub fn ddl_statements(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| !sql.starts_with("SELECT") && !sql.contains("laridae.migrations"))
            .filter(|sql| sql != ledger::CREATE_SCHEMA)
            .collect()
    }

    pub fn columns(&self, schema: &str, table: &str) -> Vec<String> {
        self.state()
            .tables
            .iter()
            .find(|t| t.schema == schema && t.name == table)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    fn with_table(&self, schema: &str, table: &str, f: impl FnOnce(&mut FakeTable)) {
        let mut state = self.state();
        if let Some(t) = state
            .tables
            .iter_mut()
            .find(|t| t.schema == schema && t.name == table)
        {
            f(t);
        }
    }

    fn handle(&self, sql: &str, params: &[&str], lockable: bool) -> Result<Vec<Row>, DbError> {
        let mut state = self.state();
        state.attempts.push(Attempt {
            sql: sql.to_string(),
            lockable,
        });

        for failure in state.failures.iter_mut() {
            if !sql.contains(&failure.needle) {
                continue;
            }
            match failure.remaining.as_mut() {
                None => return Err(failure.error.clone()),
                Some(0) => {}
                Some(n) => {
                    *n -= 1;
                    return Err(failure.error.clone());
                }
            }
        }

        state.respond(sql, params)
    }
}

fn single(name: &str, value: Option<String>) -> Row {
    Row::new(vec![(name.to_string(), value)])
}

fn param<'a>(params: &[&'a str], i: usize) -> &'a str {
    params.get(i).copied().unwrap_or_default()
}

impl FakeState {
    fn table(&self, schema: &str, name: &str) -> Option<&FakeTable> {
        self.tables.iter().find(|t| t.schema == schema && t.name == name)
    }

    fn table_by_qualified(&mut self, qualified: &str) -> Option<&mut FakeTable> {
        let (schema, name) = qualified.split_once('.')?;
        self.tables
            .iter_mut()
            .find(|t| t.schema == schema && t.name == name)
    }

    fn ledger_mut(&mut self) -> Result<&mut Vec<LedgerEntry>, DbError> {
        self.ledger.as_mut().ok_or_else(|| {
            DbError::UndefinedTable("relation \"laridae.migrations\" does not exist".into())
        })
    }

    fn respond(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>, DbError> {
        let p = |i| param(params, i);

        if sql == introspect::SCHEMA_EXISTS {
            return Ok(self
                .schemas
                .iter()
                .filter(|s| s.as_str() == p(0))
                .map(|s| single("schema_name", Some(s.clone())))
                .collect());
        }
        if sql == introspect::TABLE_EXISTS {
            return Ok(self
                .table(p(0), p(1))
                .map(|t| vec![single("table_name", Some(t.name.clone()))])
                .unwrap_or_default());
        }
        if sql == introspect::COLUMNS {
            return Ok(self
                .table(p(0), p(1))
                .map(|t| {
                    t.columns
                        .iter()
                        .map(|c| single("column_name", Some(c.name.clone())))
                        .collect()
                })
                .unwrap_or_default());
        }
        if sql == introspect::COLUMN_TYPE || sql == introspect::COLUMN_DEFAULT {
            let is_type = sql == introspect::COLUMN_TYPE;
            return Ok(self
                .table(p(0), p(1))
                .and_then(|t| t.columns.iter().find(|c| c.name == p(2)))
                .map(|c| {
                    if is_type {
                        vec![single("data_type", Some(c.data_type.clone()))]
                    } else {
                        vec![single("column_default", c.default.clone())]
                    }
                })
                .unwrap_or_default());
        }
        if sql == introspect::PRIMARY_KEY {
            return Ok(self
                .table(p(0), p(1))
                .map(|t| {
                    t.primary_key
                        .iter()
                        .map(|k| single("column_name", Some(k.clone())))
                        .collect()
                })
                .unwrap_or_default());
        }
        if sql == introspect::REFERENCING_FOREIGN_KEYS {
            return Ok(self
                .table(p(0), p(1))
                .map(|t| {
                    t.referenced_by
                        .iter()
                        .filter(|(column, _)| column == p(2))
                        .map(|(_, name)| single("conname", Some(name.clone())))
                        .collect()
                })
                .unwrap_or_default());
        }
        if sql == introspect::UNIQUE_ON_COLUMN {
            return Ok(self
                .table(p(0), p(1))
                .filter(|t| t.unique.iter().any(|c| c == p(2)))
                .map(|t| vec![single("indexrelid", Some(format!("{}_{}_key", t.name, p(2))))])
                .unwrap_or_default());
        }
        if sql == introspect::CONSTRAINT_ON_TABLE {
            return Ok(self
                .table(p(0), p(1))
                .filter(|t| t.constraints.iter().any(|(_, name, _)| name == p(2)))
                .map(|_| vec![single("conname", Some(p(2).to_string()))])
                .unwrap_or_default());
        }
        if sql == introspect::INDEX_VALID {
            let valid = match self.invalid_indexes.iter_mut().find(|(name, n)| name == p(1) && *n > 0) {
                Some((_, n)) => {
                    *n -= 1;
                    false
                }
                None => true,
            };
            return Ok(vec![single("indisvalid", Some(valid.to_string()))]);
        }
        if sql == propagate::COLUMN_CONSTRAINTS {
            return Ok(self
                .table(p(0), p(1))
                .map(|t| {
                    t.constraints
                        .iter()
                        .filter(|(column, _, _)| column == p(2))
                        .map(|(_, name, definition)| {
                            Row::from_pairs([("name", name.as_str()), ("definition", definition.as_str())])
                        })
                        .collect()
                })
                .unwrap_or_default());
        }
        if let Some(qualified) = sql.strip_prefix("SELECT count(*)::text FROM ") {
            let rows = self.table_by_qualified(qualified.trim()).map(|t| t.rows);
            return match rows {
                Some(rows) => Ok(vec![single("count", Some(rows.to_string()))]),
                None => Err(DbError::UndefinedTable(format!(
                    "relation \"{}\" does not exist",
                    qualified.trim()
                ))),
            };
        }

        if sql == ledger::LEDGER_EXISTS {
            let value = self.ledger.as_ref().map(|_| "laridae.migrations".to_string());
            return Ok(vec![single("to_regclass", value)]);
        }
        if sql == ledger::CREATE_TABLE {
            self.ledger.get_or_insert_with(Vec::new);
            return Ok(Vec::new());
        }
        if sql == ledger::LAST_MIGRATION {
            let ledger = self.ledger_mut()?;
            return Ok(ledger
                .last()
                .map(|e| {
                    let id = e.id.to_string();
                    vec![Row::from_pairs([
                        ("id", id.as_str()),
                        ("name", e.name.as_str()),
                        ("created_at", "2026-10-18 09:30:00.123456"),
                        ("script", e.script.as_str()),
                        ("status", e.status.as_str()),
                    ])]
                })
                .unwrap_or_default());
        }
        if sql == ledger::INSERT_MIGRATION {
            let (name, script) = (p(0).to_string(), p(1).to_string());
            let ledger = self.ledger_mut()?;
            let id = ledger.len() as u32 + 1;
            ledger.push(LedgerEntry {
                id,
                name,
                script,
                status: "aborted".into(),
            });
            return Ok(vec![single("id", Some(id.to_string()))]);
        }
        if sql == ledger::FINISH_EXPAND {
            let name = p(0).to_string();
            let ledger = self.ledger_mut()?;
            if let Some(e) = ledger.iter_mut().rev().find(|e| e.name == name) {
                e.status = "expanded".into();
            }
            return Ok(Vec::new());
        }
        if sql == ledger::SET_LAST_STATUS {
            let status = p(0).to_string();
            let ledger = self.ledger_mut()?;
            if let Some(e) = ledger.last_mut() {
                e.status = status;
            }
            return Ok(Vec::new());
        }

        if let Some(schema) = sql.strip_prefix("CREATE SCHEMA IF NOT EXISTS ") {
            if !self.schemas.iter().any(|s| s == schema) {
                self.schemas.push(schema.to_string());
            }
            return Ok(Vec::new());
        }
        if let Some(rest) = sql.strip_prefix("DROP SCHEMA IF EXISTS ") {
            let schema = rest.trim_end_matches(" CASCADE");
            self.schemas.retain(|s| s != schema);
            return Ok(Vec::new());
        }
        if let Some(rest) = sql.strip_prefix("ALTER TABLE ") {
            self.alter_table(rest);
        }
        Ok(Vec::new())
    }

    fn alter_table(&mut self, rest: &str) {
        let Some((qualified, action)) = rest.split_once(' ') else {
            return;
        };
        let Some(table) = self.table_by_qualified(qualified) else {
            return;
        };

        if let Some(def) = action.strip_prefix("ADD COLUMN ") {
            let (def, default) = match def.split_once(" DEFAULT ") {
                Some((def, default)) => (def, Some(default.to_string())),
                None => (def, None),
            };
            if let Some((name, data_type)) = def.split_once(' ') {
                table.columns.push(FakeColumn {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                    default,
                });
            }
        } else if let Some(column) = action.strip_prefix("DROP COLUMN IF EXISTS ") {
            let column = column.trim_end_matches(" CASCADE");
            table.columns.retain(|c| c.name != column);
        } else if let Some(names) = action.strip_prefix("RENAME COLUMN ") {
            if let Some((from, to)) = names.split_once(" TO ") {
                for c in table.columns.iter_mut().filter(|c| c.name == from) {
                    c.name = to.to_string();
                }
            }
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn transact(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>, DbError> {
        self.handle(sql, params, false)
    }

    async fn execute_outside_transaction(&mut self, sql: &str) -> Result<(), DbError> {
        self.handle(sql, &[], true).map(|_| ())
    }
}
