//! `rename_column`: the after view shows the column under its new name; the
//! physical rename happens at contract.

use async_trait::async_trait;

use super::{Context, Strategy};
use crate::error::Result;
use crate::introspect::Table;
use crate::schema;
use crate::script::RenameColumn;

pub struct RenameColumnStrategy<'a> {
    table: Table,
    info: &'a RenameColumn,
}

impl<'a> RenameColumnStrategy<'a> {
    pub fn new(info: &'a RenameColumn) -> Self {
        Self {
            table: Table::new(info.schema.as_str(), info.table.as_str()),
            info,
        }
    }
}

#[async_trait]
impl Strategy for RenameColumnStrategy<'_> {
    async fn expand(&self, cx: &mut Context<'_>) -> Result<()> {
        let after = schema::after_view(cx.migration).alias(&self.info.column, &self.info.new_name)?;
        schema::create_view(cx.session, &self.table, &schema::before_view()).await?;
        schema::create_view(cx.session, &self.table, &after).await
    }

    async fn contract_step(&self, cx: &mut Context<'_>) -> Result<()> {
        schema::rename_column(cx.session, &self.table, &self.info.column, &self.info.new_name).await
    }

    async fn rollback_step(&self, _cx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }
}
