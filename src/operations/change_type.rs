//! `change_column_type`: change the type of an existing column.
//!
//! Existing constraints are not copied to the new column; their definitions
//! may not hold for the new type.

use async_trait::async_trait;

use super::shadow::ShadowColumn;
use super::{Context, Strategy};
use crate::error::Result;
use crate::script::{ChangeType, Functions};

pub struct ChangeTypeStrategy<'a> {
    shadow: ShadowColumn,
    data_type: &'a str,
    functions: &'a Functions,
}

impl<'a> ChangeTypeStrategy<'a> {
    pub fn new(info: &'a ChangeType, functions: &'a Functions) -> Self {
        Self {
            shadow: ShadowColumn::new(&info.schema, &info.table, &info.column),
            data_type: &info.data_type,
            functions,
        }
    }
}

#[async_trait]
impl Strategy for ChangeTypeStrategy<'_> {
    async fn expand(&self, cx: &mut Context<'_>) -> Result<()> {
        let s = &self.shadow;
        s.add_with_type(cx, self.data_type).await?;
        s.create_views(cx).await?;
        s.sync(cx, &self.functions.up, &self.functions.down).await?;
        s.backfill(cx, &self.functions.up).await
    }

    async fn contract_step(&self, cx: &mut Context<'_>) -> Result<()> {
        self.shadow.swap(cx).await
    }

    async fn rollback_step(&self, cx: &mut Context<'_>) -> Result<()> {
        self.shadow.drop(cx).await
    }
}

#[cfg(test)]
mod tests {
    use crate::operations::tests::{Phase, fake_table, run};
    use pretty_assertions::assert_eq;

    const SCRIPT: &str = r#"{"name": "widen", "operation": "change_column_type",
        "info": {"schema": "public", "table": "t", "column": "c", "type": "varchar(20)"},
        "functions": {"up": "c::varchar(20)", "down": "c::text"}}"#;

    #[tokio::test]
    async fn test_shadow_has_new_type_and_no_copied_constraints() {
        let fake = fake_table();
        fake.add_constraint("public", "t", "c", "t_c_check", "CHECK ((length(c) > 0))");
        fake.set_default("public", "t", "c", "'none'::text");
        let statements = run(&fake, SCRIPT, Phase::Expand).await;

        assert_eq!(statements[0], "ALTER TABLE public.t ADD COLUMN laridae_new_c varchar(20)");
        assert!(!statements.iter().any(|s| s.contains("ADD CONSTRAINT")));
        assert!(statements.iter().any(|s| s.contains("NEW.c := laridae_new_c::text;")));
        assert!(statements.last().unwrap().starts_with("WITH laridae_batch"));
    }
}
