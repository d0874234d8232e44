//! `add_foreign_key_constraint`: make an existing column reference another
//! table. The constraint keeps the name given in the script.

use async_trait::async_trait;

use super::shadow::ShadowColumn;
use super::{Context, Strategy};
use crate::error::Result;
use crate::propagate;
use crate::schema;
use crate::script::{AddForeignKey, Functions, References};
use crate::sql;

pub struct AddForeignKeyStrategy<'a> {
    shadow: ShadowColumn,
    references: &'a References,
    functions: &'a Functions,
}

impl<'a> AddForeignKeyStrategy<'a> {
    pub fn new(info: &'a AddForeignKey, functions: &'a Functions) -> Self {
        Self {
            shadow: ShadowColumn::new(&info.schema, &info.table, &info.column.name),
            references: &info.column.references,
            functions,
        }
    }

    fn definition(&self) -> String {
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) NOT VALID",
            self.shadow.shadow,
            sql::qualified(&self.shadow.table.schema, &self.references.table),
            self.references.column
        )
    }
}

#[async_trait]
impl Strategy for AddForeignKeyStrategy<'_> {
    async fn expand(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;

        s.add_copy(cx).await?;
        s.create_views(cx).await?;
        s.sync(cx, &self.functions.up, &self.functions.down).await?;

        schema::add_constraint(cx.session, &s.table, &self.references.name, &self.definition()).await?;
        let propagated = propagate::propagate(cx.session, &s.table, &s.column).await?;
        s.backfill(cx, &self.functions.up).await?;

        schema::validate_constraint(cx.session, &s.table, &self.references.name).await?;
        propagate::validate(cx.session, &s.table, &propagated).await
    }

    async fn contract_step(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;
        s.swap(cx).await?;
        propagate::restore_names(cx.session, &s.table, &s.column).await
    }

    async fn rollback_step(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;
        schema::drop_constraint(cx.session, &s.table, &self.references.name).await?;
        s.drop(cx).await
    }
}
