//! `add_column`: add a new column, optionally non-null, unique or checked.
//!
//! Old clients never see the column. When `functions` are given, writes
//! through the before view fill the column with `up`, and existing rows are
//! backfilled the same way.

use async_trait::async_trait;

use super::{Context, Strategy};
use crate::error::Result;
use crate::introspect::Table;
use crate::schema::{self, Assignment, SyncTrigger};
use crate::script::{self, AddColumn, Functions, NewColumn};
use crate::sql;

pub struct AddColumnStrategy<'a> {
    table: Table,
    column: &'a NewColumn,
    functions: Option<&'a Functions>,
}

impl<'a> AddColumnStrategy<'a> {
    pub fn new(info: &'a AddColumn, functions: Option<&'a Functions>) -> Self {
        Self {
            table: Table::new(info.schema.as_str(), info.table.as_str()),
            column: &info.column,
            functions,
        }
    }

    fn name(&self) -> &str {
        &self.column.name
    }

    fn not_null_constraint(&self) -> String {
        sql::temp_constraint(self.name(), "not_null")
    }

    fn unique_index(&self) -> String {
        format!("laridae_index_{}_{}_unique", self.table.name, self.name())
    }

    fn unique_constraint(&self) -> String {
        sql::final_constraint(&self.table.name, self.name(), "key")
    }

    /// Constraints added `NOT VALID` during expand, in creation order.
    fn deferred_constraints(&self) -> Vec<String> {
        let mut names = Vec::new();
        if !self.column.nullable {
            names.push(self.not_null_constraint());
        }
        if let Some(check) = &self.column.check {
            names.push(check.name.clone());
        }
        names
    }
}

#[async_trait]
impl Strategy for AddColumnStrategy<'_> {
    async fn expand(&self, cx: &mut Context<'_>) -> Result<()> {
        let name = self.name();
        let before = schema::before_view().hide(name)?;
        schema::create_view(cx.session, &self.table, &before).await?;

        let default = self.column.default.as_ref().map(script::default_literal);
        schema::add_column(cx.session, &self.table, name, &self.column.data_type, default.as_deref())
            .await?;
        schema::create_view(cx.session, &self.table, &schema::after_view(cx.migration)).await?;

        if let Some(functions) = self.functions {
            SyncTrigger {
                table: self.table.clone(),
                column: name.to_string(),
                after_schema: cx.after_schema(),
                before_side: Some(Assignment::new(name, functions.up.as_str())),
                after_side: None,
            }
            .install(cx.session)
            .await?;
        }

        if !self.column.nullable {
            schema::add_constraint(
                cx.session,
                &self.table,
                &self.not_null_constraint(),
                &format!("CHECK ({name} IS NOT NULL) NOT VALID"),
            )
            .await?;
        }
        if let Some(check) = &self.column.check {
            schema::add_constraint(
                cx.session,
                &self.table,
                &check.name,
                &format!("CHECK ({}) NOT VALID", check.constraint),
            )
            .await?;
        }
        if self.column.unique {
            schema::create_index(cx.session, &self.table, &self.unique_index(), "btree", name, true)
                .await?;
            schema::add_constraint(
                cx.session,
                &self.table,
                &self.unique_constraint(),
                &format!("UNIQUE USING INDEX {}", self.unique_index()),
            )
            .await?;
        }

        if let Some(functions) = self.functions {
            cx.batcher()
                .run(cx.session, &self.table, name, &functions.up)
                .await?;
        }

        for constraint in self.deferred_constraints() {
            schema::validate_constraint(cx.session, &self.table, &constraint).await?;
        }
        Ok(())
    }

    async fn contract_step(&self, cx: &mut Context<'_>) -> Result<()> {
        if !self.column.nullable {
            schema::rename_constraint(
                cx.session,
                &self.table,
                &self.not_null_constraint(),
                &sql::final_constraint(&self.table.name, self.name(), "not_null"),
            )
            .await?;
        }
        Ok(())
    }

    async fn rollback_step(&self, cx: &mut Context<'_>) -> Result<()> {
        for constraint in self.deferred_constraints() {
            schema::drop_constraint(cx.session, &self.table, &constraint).await?;
        }
        if self.column.unique {
            schema::drop_constraint(cx.session, &self.table, &self.unique_constraint()).await?;
            schema::drop_index(cx.session, &self.table.schema, &self.unique_index()).await?;
        }
        schema::drop_column(cx.session, &self.table, self.name()).await
    }
}
