//! `add_not_null_constraint`: make an existing column non-nullable.

use async_trait::async_trait;

use super::shadow::ShadowColumn;
use super::{Context, Strategy};
use crate::error::Result;
use crate::propagate;
use crate::schema;
use crate::script::{ColumnRef, Functions};

const KIND: &str = "not_null";

pub struct AddNotNullStrategy<'a> {
    shadow: ShadowColumn,
    functions: &'a Functions,
}

impl<'a> AddNotNullStrategy<'a> {
    pub fn new(info: &'a ColumnRef, functions: &'a Functions) -> Self {
        Self {
            shadow: ShadowColumn::new(&info.schema, &info.table, &info.column),
            functions,
        }
    }
}

#[async_trait]
impl Strategy for AddNotNullStrategy<'_> {
    async fn expand(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;
        let constraint = s.temp_constraint(KIND);

        s.add_copy(cx).await?;
        s.create_views(cx).await?;
        s.sync(cx, &self.functions.up, &self.functions.down).await?;

        // New rows are checked even under NOT VALID; the trigger has to be
        // filling the shadow first.
        schema::add_constraint(
            cx.session,
            &s.table,
            &constraint,
            &format!("CHECK ({} IS NOT NULL) NOT VALID", s.shadow),
        )
        .await?;
        let propagated = propagate::propagate(cx.session, &s.table, &s.column).await?;
        s.backfill(cx, &self.functions.up).await?;

        schema::validate_constraint(cx.session, &s.table, &constraint).await?;
        propagate::validate(cx.session, &s.table, &propagated).await
    }

    async fn contract_step(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;
        s.swap(cx).await?;
        schema::rename_constraint(cx.session, &s.table, &s.temp_constraint(KIND), &s.final_constraint(KIND))
            .await?;
        propagate::restore_names(cx.session, &s.table, &s.column).await
    }

    async fn rollback_step(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;
        schema::drop_constraint(cx.session, &s.table, &s.temp_constraint(KIND)).await?;
        s.drop(cx).await
    }
}
