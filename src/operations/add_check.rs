//! `add_check_constraint`: add a CHECK constraint on an existing column.

use async_trait::async_trait;

use super::shadow::ShadowColumn;
use super::{Context, Strategy};
use crate::error::Result;
use crate::propagate;
use crate::schema;
use crate::script::{AddCheck, Functions};
use crate::sql;

const KIND: &str = "check";

pub struct AddCheckStrategy<'a> {
    shadow: ShadowColumn,
    condition: &'a str,
    functions: &'a Functions,
}

impl<'a> AddCheckStrategy<'a> {
    pub fn new(info: &'a AddCheck, functions: &'a Functions) -> Self {
        Self {
            shadow: ShadowColumn::new(&info.schema, &info.table, &info.column),
            condition: &info.condition,
            functions,
        }
    }

    /// The condition as written applies to the column; the copy applies to
    /// the shadow.
    fn definition(&self) -> String {
        let condition = sql::rename_column_refs(self.condition, &self.shadow.column, &self.shadow.shadow);
        format!("CHECK ({condition}) NOT VALID")
    }
}

#[async_trait]
impl Strategy for AddCheckStrategy<'_> {
    async fn expand(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;
        let constraint = s.temp_constraint(KIND);

        s.add_copy(cx).await?;
        s.create_views(cx).await?;
        s.sync(cx, &self.functions.up, &self.functions.down).await?;

        schema::add_constraint(cx.session, &s.table, &constraint, &self.definition()).await?;
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
