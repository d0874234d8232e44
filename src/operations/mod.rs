//! Operation strategies.
//!
//! One strategy per schema change. `expand` makes the new shape available
//! next to the old one; `contract` makes the change final; `rollback` undoes
//! `expand`, and must cope with an `expand` that stopped half way.
//!
//! Both `contract` and `rollback` first tear down the before, after and temp
//! schemas, so no client can still be reading through a view when the
//! underlying column changes.

mod add_check;
mod add_column;
mod add_foreign_key;
mod add_not_null;
mod add_unique;
mod change_type;
mod create_index;
mod drop_column;
mod rename_column;
mod shadow;

use async_trait::async_trait;
use tracing::info;

pub use add_check::AddCheckStrategy;
pub use add_column::AddColumnStrategy;
pub use add_foreign_key::AddForeignKeyStrategy;
pub use add_not_null::AddNotNullStrategy;
pub use add_unique::AddUniqueStrategy;
pub use change_type::ChangeTypeStrategy;
pub use create_index::CreateIndexStrategy;
pub use drop_column::DropColumnStrategy;
pub use rename_column::RenameColumnStrategy;

use crate::backfill::Batcher;
use crate::config::Config;
use crate::db::Session;
use crate::error::{Error, Result};
use crate::schema;
use crate::script::{Functions, MigrationScript, Operation};
use crate::sql;

/// What a strategy runs against.
pub struct Context<'a> {
    pub session: &'a mut Session,
    pub config: &'a Config,
    /// Migration name; decides the after schema.
    pub migration: &'a str,
}

impl<'a> Context<'a> {
    pub fn new(session: &'a mut Session, config: &'a Config, migration: &'a str) -> Self {
        Self {
            session,
            config,
            migration,
        }
    }

    pub fn after_schema(&self) -> String {
        sql::after_schema(self.migration)
    }

    pub fn batcher(&self) -> Batcher {
        Batcher::new(self.config)
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    async fn expand(&self, cx: &mut Context<'_>) -> Result<()>;

    /// Finalize, after the views and triggers are gone.
    async fn contract_step(&self, cx: &mut Context<'_>) -> Result<()>;

    /// Undo `expand`, after the views and triggers are gone. Every drop is
    /// guarded with `IF EXISTS`.
    async fn rollback_step(&self, cx: &mut Context<'_>) -> Result<()>;
}

/// Build the strategy for `script`.
pub fn strategy_for(script: &MigrationScript) -> Result<Box<dyn Strategy + '_>> {
    let functions = || required_functions(script);
    let strategy: Box<dyn Strategy + '_> = match &script.operation {
        Operation::AddColumn(info) => Box::new(AddColumnStrategy::new(info, script.functions.as_ref())),
        Operation::AddNotNull(info) => Box::new(AddNotNullStrategy::new(info, functions()?)),
        Operation::RenameColumn(info) => Box::new(RenameColumnStrategy::new(info)),
        Operation::DropColumn(info) => Box::new(DropColumnStrategy::new(info)),
        Operation::AddCheck(info) => Box::new(AddCheckStrategy::new(info, functions()?)),
        Operation::AddUnique(info) => Box::new(AddUniqueStrategy::new(info, functions()?)),
        Operation::AddForeignKey(info) => Box::new(AddForeignKeyStrategy::new(info, functions()?)),
        Operation::ChangeType(info) => Box::new(ChangeTypeStrategy::new(info, functions()?)),
        Operation::CreateIndex(info) => Box::new(CreateIndexStrategy::new(info)),
    };
    Ok(strategy)
}

fn required_functions(script: &MigrationScript) -> Result<&Functions> {
    script.functions.as_ref().ok_or_else(|| {
        Error::Validation(format!(
            "operation {} requires functions.up and functions.down",
            script.operation.kind()
        ))
    })
}

/// Tear down the views and triggers, then finalize.
pub async fn contract(strategy: &dyn Strategy, cx: &mut Context<'_>) -> Result<()> {
    schema::teardown_created_schemas(cx.session, cx.migration).await?;
    strategy.contract_step(cx).await?;
    info!(migration = cx.migration, "contract step finished");
    Ok(())
}

/// Tear down the views and triggers, then undo `expand`.
pub async fn rollback(strategy: &dyn Strategy, cx: &mut Context<'_>) -> Result<()> {
    schema::teardown_created_schemas(cx.session, cx.migration).await?;
    strategy.rollback_step(cx).await?;
    info!(migration = cx.migration, "rollback step finished");
    Ok(())
}
