//! Schema and view synthesis.
//!
//! During the expand window a table is reachable through two views: one in
//! `laridae_before` showing the old shape and one in `laridae_<migration>`
//! showing the new shape. Both select from the same physical table, and a
//! `BEFORE INSERT OR UPDATE` trigger keeps the old and shadow columns in step
//! whichever view a write came through.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::db::Session;
use crate::error::{Error, Result};
use crate::introspect::{self, Table};
use crate::sql::{self, BEFORE_SCHEMA, TEMP_SCHEMA};

/// How each physical column appears in a view. Columns without a binding
/// appear under their own name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSpec {
    schema: String,
    bindings: HashMap<String, Option<String>>,
}

impl ViewSpec {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            bindings: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Leave `column` out of the view.
    pub fn hide(self, column: &str) -> Result<Self> {
        self.bind(column, None)
    }

    /// Show `column` under `alias`.
    pub fn alias(self, column: &str, alias: &str) -> Result<Self> {
        self.bind(column, Some(alias.to_string()))
    }

    fn bind(mut self, column: &str, alias: Option<String>) -> Result<Self> {
        if let Some(existing) = self.bindings.get(column) {
            return Err(Error::ViewBinding {
                view: self.schema.clone(),
                column: column.to_string(),
                existing: describe(existing),
                requested: describe(&alias),
            });
        }
        self.bindings.insert(column.to_string(), alias);
        Ok(self)
    }

    /// Select list for a table with the given physical columns.
    pub fn select_list(&self, columns: &[String]) -> Vec<String> {
        columns
            .iter()
            .filter_map(|column| match self.bindings.get(column) {
                None => Some(column.clone()),
                Some(None) => None,
                Some(Some(alias)) if alias == column => Some(column.clone()),
                Some(Some(alias)) => Some(format!("{column} AS {alias}")),
            })
            .collect()
    }

    pub fn create_view_sql(&self, table: &Table, columns: &[String]) -> String {
        format!(
            "CREATE VIEW {}.{} AS SELECT {} FROM {}",
            self.schema,
            table.name,
            self.select_list(columns).join(", "),
            table.qualified()
        )
    }
}

fn describe(alias: &Option<String>) -> String {
    match alias {
        Some(name) => name.clone(),
        None => "<hidden>".to_string(),
    }
}

/// The before-side view spec.
pub fn before_view() -> ViewSpec {
    ViewSpec::new(BEFORE_SCHEMA)
}

/// The after-side view spec for `migration`.
pub fn after_view(migration: &str) -> ViewSpec {
    ViewSpec::new(sql::after_schema(migration))
}

/// Create the view schema if needed and a view over every current column.
pub async fn create_view(session: &mut Session, table: &Table, spec: &ViewSpec) -> Result<()> {
    let columns = table.columns(session).await?;
    session
        .execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", spec.schema), &[])
        .await?;
    session.execute(&spec.create_view_sql(table, &columns), &[]).await?;
    info!(view = %format!("{}.{}", spec.schema, table.name), "view created");
    Ok(())
}

/// `NEW.<target> := <expr>` inside a trigger body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub target: String,
    pub expr: String,
}

impl Assignment {
    pub fn new(target: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            expr: expr.into(),
        }
    }
}

/// A synchronization trigger and its function.
///
/// A write is on the after side when the writer's effective search path
/// contains `after_schema`; every other writer, including the engine's own
/// backfill, is on the before side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTrigger {
    pub table: Table,
    /// Column the trigger is named after.
    pub column: String,
    pub after_schema: String,
    /// Applied to writes from the before side.
    pub before_side: Option<Assignment>,
    /// Applied to writes from the after side.
    pub after_side: Option<Assignment>,
}

impl SyncTrigger {
    /// Keep `column` and its shadow `shadow` consistent in both directions.
    ///
    /// `down` is written against the old column name; it is rewritten to read
    /// the shadow column instead.
    pub fn shadow(
        table: &Table,
        column: &str,
        shadow: &str,
        up: &str,
        down: &str,
        after_schema: &str,
    ) -> Self {
        Self {
            table: table.clone(),
            column: column.to_string(),
            after_schema: after_schema.to_string(),
            before_side: Some(Assignment::new(shadow, up)),
            after_side: Some(Assignment::new(
                column,
                sql::rename_column_refs(down, column, shadow),
            )),
        }
    }

    pub fn function_name(&self) -> String {
        format!("{}.triggerfn_{}_{}", TEMP_SCHEMA, self.table.name, self.column)
    }

    pub fn trigger_name(&self) -> String {
        format!("{}_trigger_{}", sql::PREFIX, self.column)
    }

    /// `CREATE FUNCTION` statement for a table with the given columns.
    pub fn function_sql(&self, columns: &[String]) -> String {
        let declarations: String = columns
            .iter()
            .map(|c| format!("    {c} {}.{c}%TYPE := NEW.{c};\n", self.table.qualified()))
            .collect();

        let on_after_side = format!("{} = ANY (current_schemas(false))", sql::literal(&self.after_schema));
        let assign = |a: &Assignment| format!("      NEW.{} := {};\n", a.target, a.expr);

        let branch = match (&self.after_side, &self.before_side) {
            (Some(after), Some(before)) => format!(
                "    IF {on_after_side} THEN\n{}    ELSE\n{}    END IF;\n",
                assign(after),
                assign(before)
            ),
            (Some(after), None) => {
                format!("    IF {on_after_side} THEN\n{}    END IF;\n", assign(after))
            }
            (None, Some(before)) => {
                format!("    IF NOT ({on_after_side}) THEN\n{}    END IF;\n", assign(before))
            }
            (None, None) => String::new(),
        };

        format!(
            "CREATE OR REPLACE FUNCTION {}()\n  RETURNS trigger\n  LANGUAGE plpgsql\nAS $$\n  DECLARE\n{}  BEGIN\n{}    RETURN NEW;\n  END;\n$$",
            self.function_name(),
            declarations,
            branch
        )
    }

    pub fn trigger_sql(&self) -> String {
        format!(
            "CREATE TRIGGER {} BEFORE INSERT OR UPDATE ON {} FOR EACH ROW EXECUTE FUNCTION {}()",
            self.trigger_name(),
            self.table.qualified(),
            self.function_name()
        )
    }

    /// Install the function in the temp schema and attach the trigger.
    pub async fn install(&self, session: &mut Session) -> Result<()> {
        let columns = self.table.columns(session).await?;
        session
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {TEMP_SCHEMA}"), &[])
            .await?;
        session.execute(&self.function_sql(&columns), &[]).await?;
        session.execute(&self.trigger_sql(), &[]).await?;
        info!(trigger = %self.trigger_name(), table = %self.table.qualified(), "sync trigger installed");
        Ok(())
    }
}

/// Drop the before, after and temp schemas with everything in them.
///
/// Safe to call at any point, including after a crash half way through expand.
pub async fn teardown_created_schemas(session: &mut Session, migration: &str) -> Result<()> {
    for schema in [
        BEFORE_SCHEMA.to_string(),
        sql::after_schema(migration),
        TEMP_SCHEMA.to_string(),
    ] {
        session
            .execute(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"), &[])
            .await?;
    }
    Ok(())
}

// Table DDL. Each wrapper is one statement in its own transaction.

pub async fn add_column(
    session: &mut Session,
    table: &Table,
    column: &str,
    data_type: &str,
    default: Option<&str>,
) -> Result<()> {
    let mut stmt = format!("ALTER TABLE {} ADD COLUMN {} {}", table.qualified(), column, data_type);
    if let Some(default) = default {
        stmt.push_str(" DEFAULT ");
        stmt.push_str(default);
    }
    session.execute(&stmt, &[]).await
}

/// Add the shadow copy of `column`, same type and default, nullable.
pub async fn add_shadow_column(session: &mut Session, table: &Table, column: &str) -> Result<String> {
    let shadow = sql::shadow_column(column);
    let data_type = table.column_type(session, column).await?;
    let default = table.column_default(session, column).await?;
    add_column(session, table, &shadow, &data_type, default.as_deref()).await?;
    Ok(shadow)
}

pub async fn drop_column(session: &mut Session, table: &Table, column: &str) -> Result<()> {
    session
        .execute(
            &format!("ALTER TABLE {} DROP COLUMN IF EXISTS {} CASCADE", table.qualified(), column),
            &[],
        )
        .await
}

pub async fn rename_column(session: &mut Session, table: &Table, from: &str, to: &str) -> Result<()> {
    session
        .execute(
            &format!("ALTER TABLE {} RENAME COLUMN {} TO {}", table.qualified(), from, to),
            &[],
        )
        .await
}

pub async fn add_constraint(
    session: &mut Session,
    table: &Table,
    name: &str,
    definition: &str,
) -> Result<()> {
    session
        .execute(
            &format!("ALTER TABLE {} ADD CONSTRAINT {} {}", table.qualified(), name, definition),
            &[],
        )
        .await
}

pub async fn drop_constraint(session: &mut Session, table: &Table, name: &str) -> Result<()> {
    session
        .execute(
            &format!("ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}", table.qualified(), name),
            &[],
        )
        .await
}

pub async fn rename_constraint(session: &mut Session, table: &Table, from: &str, to: &str) -> Result<()> {
    session
        .execute(
            &format!("ALTER TABLE {} RENAME CONSTRAINT {} TO {}", table.qualified(), from, to),
            &[],
        )
        .await
}

/// Validate a `NOT VALID` constraint. Always its own statement.
pub async fn validate_constraint(session: &mut Session, table: &Table, name: &str) -> Result<()> {
    session
        .execute(
            &format!("ALTER TABLE {} VALIDATE CONSTRAINT {}", table.qualified(), name),
            &[],
        )
        .await
}

/// Build an index without blocking writes. Runs outside any transaction.
///
/// A build cancelled by the lock timeout leaves an invalid index under
/// `name`, which the retried `IF NOT EXISTS` statement would accept as is.
/// The build only counts once the catalog reports the index valid; an
/// invalid one is dropped and built again.
pub async fn create_index(
    session: &mut Session,
    table: &Table,
    name: &str,
    method: &str,
    column: &str,
    unique: bool,
) -> Result<()> {
    let unique = if unique { "UNIQUE " } else { "" };
    let stmt = format!(
        "CREATE {}INDEX CONCURRENTLY IF NOT EXISTS {} ON {} USING {} ({})",
        unique,
        name,
        table.qualified(),
        method,
        column
    );
    loop {
        session.execute_lockable(&stmt).await?;
        if introspect::index_is_valid(session, &table.schema, name).await? {
            return Ok(());
        }
        warn!(index = name, table = %table.qualified(), "index build left an invalid index; rebuilding");
        drop_index(session, &table.schema, name).await?;
    }
}

pub async fn drop_index(session: &mut Session, schema: &str, name: &str) -> Result<()> {
    session
        .execute_lockable(&format!("DROP INDEX CONCURRENTLY IF EXISTS {schema}.{name}"))
        .await
}

pub async fn rename_index(session: &mut Session, schema: &str, from: &str, to: &str) -> Result<()> {
    session
        .execute(&format!("ALTER INDEX {schema}.{from} RENAME TO {to}"), &[])
        .await
}
