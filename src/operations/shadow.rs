//! Steps shared by the strategies that work on a shadow copy of a column.

use tracing::warn;

use crate::error::Result;
use crate::introspect::Table;
use crate::schema::{self, SyncTrigger};
use crate::sql;

use super::Context;

pub(super) struct ShadowColumn {
    pub table: Table,
    pub column: String,
    pub shadow: String,
}

impl ShadowColumn {
    pub fn new(schema: &str, table: &str, column: &str) -> Self {
        Self {
            table: Table::new(schema, table),
            column: column.to_string(),
            shadow: sql::shadow_column(column),
        }
    }

    pub fn temp_constraint(&self, kind: &str) -> String {
        sql::temp_constraint(&self.column, kind)
    }

    pub fn final_constraint(&self, kind: &str) -> String {
        sql::final_constraint(&self.table.name, &self.column, kind)
    }

    /// Add the shadow with the column's own type and default.
    pub async fn add_copy(&self, cx: &mut Context<'_>) -> Result<()> {
        schema::add_shadow_column(cx.session, &self.table, &self.column).await?;
        Ok(())
    }

    /// Add the shadow with a different type and no default.
    pub async fn add_with_type(&self, cx: &mut Context<'_>, data_type: &str) -> Result<()> {
        schema::add_column(cx.session, &self.table, &self.shadow, data_type, None).await
    }

    /// Before view hides the shadow; after view shows the shadow under the
    /// column's name.
    pub async fn create_views(&self, cx: &mut Context<'_>) -> Result<()> {
        let before = schema::before_view().hide(&self.shadow)?;
        let after = schema::after_view(cx.migration)
            .hide(&self.column)?
            .alias(&self.shadow, &self.column)?;
        schema::create_view(cx.session, &self.table, &before).await?;
        schema::create_view(cx.session, &self.table, &after).await
    }

    pub async fn sync(&self, cx: &mut Context<'_>, up: &str, down: &str) -> Result<()> {
        SyncTrigger::shadow(&self.table, &self.column, &self.shadow, up, down, &cx.after_schema())
            .install(cx.session)
            .await
    }

    pub async fn backfill(&self, cx: &mut Context<'_>, up: &str) -> Result<()> {
        cx.batcher()
            .run(cx.session, &self.table, &self.shadow, up)
            .await?;
        Ok(())
    }

    /// Drop the original column and move the shadow into its place.
    pub async fn swap(&self, cx: &mut Context<'_>) -> Result<()> {
        schema::drop_column(cx.session, &self.table, &self.column).await?;
        schema::rename_column(cx.session, &self.table, &self.shadow, &self.column).await
    }

    /// Remove the shadow. When a contract stopped between dropping the
    /// column and renaming the shadow, the shadow holds the only copy of the
    /// data; the swap is finished instead.
    pub async fn drop(&self, cx: &mut Context<'_>) -> Result<()> {
        let columns = self.table.columns(cx.session).await?;
        let has = |name: &str| columns.iter().any(|c| c == name);
        if !has(&self.column) && has(&self.shadow) {
            warn!(
                table = %self.table.qualified(),
                column = %self.column,
                "column already dropped; moving {} into its place", self.shadow
            );
            return schema::rename_column(cx.session, &self.table, &self.shadow, &self.column).await;
        }
        schema::drop_column(cx.session, &self.table, &self.shadow).await
    }
}
