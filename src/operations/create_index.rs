//! `create_index`: index an existing column.
//!
//! The index is built concurrently on a shadow copy that the sync trigger
//! keeps identical to the column, so the original is never locked for the
//! length of the build.

use async_trait::async_trait;

use super::shadow::ShadowColumn;
use super::{Context, Strategy};
use crate::error::Result;
use crate::propagate;
use crate::schema;
use crate::script::{CreateIndex, IndexMethod};

pub struct CreateIndexStrategy {
    shadow: ShadowColumn,
    method: IndexMethod,
}

impl CreateIndexStrategy {
    pub fn new(info: &CreateIndex) -> Self {
        Self {
            shadow: ShadowColumn::new(&info.schema, &info.table, &info.column),
            method: info.method,
        }
    }

    fn temp_index(&self) -> String {
        format!("laridae_index_{}_{}", self.shadow.table.name, self.shadow.column)
    }

    fn final_index(&self) -> String {
        format!("{}_{}_idx", self.shadow.table.name, self.shadow.column)
    }
}

#[async_trait]
impl Strategy for CreateIndexStrategy {
    async fn expand(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;

        s.add_copy(cx).await?;
        s.create_views(cx).await?;
        // Identity in both directions.
        s.sync(cx, &s.column, &s.column).await?;
        let propagated = propagate::propagate(cx.session, &s.table, &s.column).await?;

        schema::create_index(
            cx.session,
            &s.table,
            &self.temp_index(),
            self.method.as_str(),
            &s.shadow,
            false,
        )
        .await?;

        s.backfill(cx, &s.column).await?;
        propagate::validate(cx.session, &s.table, &propagated).await
    }

    async fn contract_step(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;
        s.swap(cx).await?;
        schema::rename_index(cx.session, &s.table.schema, &self.temp_index(), &self.final_index()).await?;
        propagate::restore_names(cx.session, &s.table, &s.column).await
    }

    async fn rollback_step(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;
        schema::drop_index(cx.session, &s.table.schema, &self.temp_index()).await?;
        s.drop(cx).await
    }
}
