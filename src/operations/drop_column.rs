//! `drop_column`: the after view leaves the column out; it is dropped for
//! real at contract.

use async_trait::async_trait;

use super::{Context, Strategy};
use crate::error::Result;
use crate::introspect::Table;
use crate::schema;
use crate::script::ColumnRef;

pub struct DropColumnStrategy<'a> {
    table: Table,
    column: &'a str,
}

impl<'a> DropColumnStrategy<'a> {
    pub fn new(info: &'a ColumnRef) -> Self {
        Self {
            table: Table::new(info.schema.as_str(), info.table.as_str()),
            column: &info.column,
        }
    }
}

#[async_trait]
impl Strategy for DropColumnStrategy<'_> {
    async fn expand(&self, cx: &mut Context<'_>) -> Result<()> {
        let after = schema::after_view(cx.migration).hide(self.column)?;
        schema::create_view(cx.session, &self.table, &schema::before_view()).await?;
        schema::create_view(cx.session, &self.table, &after).await
    }

    async fn contract_step(&self, cx: &mut Context<'_>) -> Result<()> {
        schema::drop_column(cx.session, &self.table, self.column).await
    }

    async fn rollback_step(&self, _cx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }
}
