//! `add_unique_constraint`: make an existing column unique.
//!
//! The unique index is built concurrently on the shadow column and then
//! attached as a constraint, which only needs a brief lock.

use async_trait::async_trait;

use super::shadow::ShadowColumn;
use super::{Context, Strategy};
use crate::error::Result;
use crate::propagate;
use crate::schema;
use crate::script::{ColumnRef, Functions};

const KIND: &str = "key";

pub struct AddUniqueStrategy<'a> {
    shadow: ShadowColumn,
    functions: &'a Functions,
}

impl<'a> AddUniqueStrategy<'a> {
    pub fn new(info: &'a ColumnRef, functions: &'a Functions) -> Self {
        Self {
            shadow: ShadowColumn::new(&info.schema, &info.table, &info.column),
            functions,
        }
    }

    fn index(&self) -> String {
        format!("laridae_index_{}_{}_unique", self.shadow.table.name, self.shadow.column)
    }
}

#[async_trait]
impl Strategy for AddUniqueStrategy<'_> {
    async fn expand(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;

        s.add_copy(cx).await?;
        s.create_views(cx).await?;
        s.sync(cx, &self.functions.up, &self.functions.down).await?;
        let propagated = propagate::propagate(cx.session, &s.table, &s.column).await?;

        schema::create_index(cx.session, &s.table, &self.index(), "btree", &s.shadow, true).await?;
        schema::add_constraint(
            cx.session,
            &s.table,
            &s.temp_constraint(KIND),
            &format!("UNIQUE USING INDEX {}", self.index()),
        )
        .await?;

        s.backfill(cx, &self.functions.up).await?;
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
        schema::drop_index(cx.session, &s.table.schema, &self.index()).await?;
        s.drop(cx).await
    }
}
