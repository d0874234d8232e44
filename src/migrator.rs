//! Migration driver.
//!
//! Sequences ledger transitions around strategy runs:
//!
//! - `expand`: validate, check the ledger, record the migration as `aborted`,
//!   roll back the previous migration if it was left `aborted`, run the
//!   strategy, mark `expanded`.
//! - `contract` / `rollback`: require `expanded`, mark `aborted`, run the
//!   stored script's strategy, mark `contracted` / `rolled_back`.
//! - `restore`: require `aborted`, roll the stored script back. The row stays
//!   `aborted`.

use tracing::info;

use crate::config::Config;
use crate::db::{PgBackend, Session};
use crate::error::{Error, Result};
use crate::ledger::{self, InitOutcome, MigrationRecord, MigrationStatus};
use crate::operations::{self, Context};
use crate::script::MigrationScript;
use crate::sql;
use crate::validate::validate;

pub struct Migrator {
    session: Session,
    config: Config,
}

impl Migrator {
    pub fn new(session: Session, config: Config) -> Self {
        Self { session, config }
    }

    /// Open a PostgreSQL connection configured from `config`.
    pub async fn connect(url: &str, config: Config) -> Result<Self> {
        let backend = PgBackend::connect(url, config.lock_timeout_ms).await?;
        let session = Session::new(Box::new(backend), &config);
        Ok(Self::new(session, config))
    }

    pub async fn init(&mut self) -> Result<InitOutcome> {
        ledger::ensure_initialized(&mut self.session).await
    }

    /// The newest ledger row.
    pub async fn status(&mut self) -> Result<Option<MigrationRecord>> {
        ledger::last_migration(&mut self.session).await
    }

    pub async fn expand(&mut self, script: &MigrationScript) -> Result<()> {
        info!(migration = %script.name, operation = script.operation.kind(), "expand started");

        let validation = validate(&mut self.session, script).await?;
        if !validation.valid {
            return Err(Error::Validation(
                validation.message.unwrap_or_else(|| "invalid script".to_string()),
            ));
        }

        let last = ledger::last_migration(&mut self.session).await?;
        if !ledger::may_expand(last.as_ref(), &script.name) {
            return Err(refused("expand", last.as_ref()));
        }

        ledger::begin_expand(&mut self.session, &script.name, &script.to_json()?).await?;

        self.expand_steps(script, last)
            .await
            .map_err(|source| Error::PartialExpand {
                name: script.name.clone(),
                source: Box::new(source),
            })?;

        ledger::finish_expand(&mut self.session, &script.name).await?;
        info!(migration = %script.name, "expand finished");
        Ok(())
    }

    async fn expand_steps(&mut self, script: &MigrationScript, previous: Option<MigrationRecord>) -> Result<()> {
        if let Some(previous) = previous.filter(|r| r.status == MigrationStatus::Aborted) {
            info!(migration = %previous.name, "cleaning up aborted migration");
            self.roll_back_record(&previous).await?;
        }

        let strategy = operations::strategy_for(script)?;
        let mut cx = Context::new(&mut self.session, &self.config, &script.name);
        strategy.expand(&mut cx).await
    }

    /// Finalize the expanded migration. Returns its ledger row.
    pub async fn contract(&mut self) -> Result<MigrationRecord> {
        let record = self.gated_record("contract", ledger::may_contract).await?;
        let script = MigrationScript::from_json(&record.script)?;
        info!(migration = %record.name, "contract started");

        ledger::begin_contract(&mut self.session).await?;
        {
            let strategy = operations::strategy_for(&script)?;
            let mut cx = Context::new(&mut self.session, &self.config, &record.name);
            operations::contract(strategy.as_ref(), &mut cx).await?;
        }
        ledger::finish_contract(&mut self.session).await?;

        info!(migration = %record.name, "contract finished");
        Ok(record)
    }

    /// Undo the expanded migration. Returns its ledger row.
    pub async fn rollback(&mut self) -> Result<MigrationRecord> {
        let record = self.gated_record("rollback", ledger::may_rollback).await?;
        info!(migration = %record.name, "rollback started");

        ledger::begin_rollback(&mut self.session).await?;
        self.roll_back_record(&record).await?;
        ledger::finish_rollback(&mut self.session).await?;

        info!(migration = %record.name, "rollback finished");
        Ok(record)
    }

    /// Clean up after an aborted migration. The ledger row stays `aborted`.
    pub async fn restore(&mut self) -> Result<MigrationRecord> {
        let record = self.gated_record("restore", ledger::may_restore).await?;
        info!(migration = %record.name, "restore started");

        self.roll_back_record(&record).await?;

        info!(migration = %record.name, "restore finished");
        Ok(record)
    }

    async fn gated_record(
        &mut self,
        command: &str,
        allowed: fn(Option<&MigrationRecord>) -> bool,
    ) -> Result<MigrationRecord> {
        let last = ledger::last_migration(&mut self.session).await?;
        match last {
            Some(record) if allowed(Some(&record)) => Ok(record),
            other => Err(refused(command, other.as_ref())),
        }
    }

    async fn roll_back_record(&mut self, record: &MigrationRecord) -> Result<()> {
        let script = MigrationScript::from_json(&record.script)?;
        let strategy = operations::strategy_for(&script)?;
        let mut cx = Context::new(&mut self.session, &self.config, &record.name);
        operations::rollback(strategy.as_ref(), &mut cx).await
    }
}

fn refused(command: &str, last: Option<&MigrationRecord>) -> Error {
    Error::InvalidTransition(match last {
        None => format!("cannot {command}: no migrations have been run"),
        Some(record) => format!(
            "cannot {command}: last migration '{}' is {}",
            record.name, record.status
        ),
    })
}

/// `url` with a search path that puts the migration's after schema first.
pub fn search_path_url(url: &str, migration: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{url}{separator}options=-csearch_path%3D{},public",
        sql::after_schema(migration)
    )
}
