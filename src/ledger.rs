//! Migration ledger.
//!
//! One row per expand, kept in `laridae.migrations`. Only the newest row is
//! live; its status decides which command may run next.
//!
//! ```text
//!          begin_expand        finish_expand
//!   (new) ─────────────▶ aborted ─────────────▶ expanded
//!                           ▲                      │
//!                           │ begin_contract/      │
//!                           └──── begin_rollback ──┘
//!                           │
//!                           ├── finish_contract ──▶ contracted
//!                           └── finish_rollback ──▶ rolled_back
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use tracing::info;

use crate::db::{Row, Session};
use crate::error::{DbError, Error, Result};

pub(crate) const LEDGER_EXISTS: &str = "SELECT to_regclass('laridae.migrations')::text";

pub(crate) const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS laridae";

pub(crate) const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS laridae.migrations (
    id serial PRIMARY KEY,
    name text NOT NULL,
    created_at timestamp DEFAULT CURRENT_TIMESTAMP,
    script jsonb NOT NULL,
    status text CHECK (status IN ('expanded', 'contracted', 'rolled_back', 'aborted'))
)";

pub(crate) const LAST_MIGRATION: &str = "SELECT id::text AS id, name, created_at::text AS created_at, \
     script::text AS script, status \
     FROM laridae.migrations ORDER BY id DESC LIMIT 1";

pub(crate) const INSERT_MIGRATION: &str = "INSERT INTO laridae.migrations (name, script, status) \
     VALUES ($1, $2::jsonb, 'aborted') RETURNING id::text";

pub(crate) const FINISH_EXPAND: &str = "UPDATE laridae.migrations SET status = 'expanded' \
     WHERE id = (SELECT max(id) FROM laridae.migrations WHERE name = $1)";

pub(crate) const SET_LAST_STATUS: &str = "UPDATE laridae.migrations SET status = $1 \
     WHERE id = (SELECT max(id) FROM laridae.migrations)";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Expanded,
    Contracted,
    RolledBack,
    Aborted,
}

impl MigrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationStatus::Expanded => "expanded",
            MigrationStatus::Contracted => "contracted",
            MigrationStatus::RolledBack => "rolled_back",
            MigrationStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "expanded" => Ok(MigrationStatus::Expanded),
            "contracted" => Ok(MigrationStatus::Contracted),
            "rolled_back" => Ok(MigrationStatus::RolledBack),
            "aborted" => Ok(MigrationStatus::Aborted),
            other => Err(Error::Database(DbError::Statement(format!(
                "unknown migration status '{other}' in ledger"
            )))),
        }
    }
}

/// A ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub id: i64,
    pub name: String,
    pub created_at: Option<NaiveDateTime>,
    /// The script as stored, JSON text.
    pub script: String,
    pub status: MigrationStatus,
}

impl MigrationRecord {
    fn from_row(row: &Row) -> Result<Self> {
        let field = |name: &str| {
            row.get(name).ok_or_else(|| {
                Error::Database(DbError::Statement(format!(
                    "ledger row is missing {name}"
                )))
            })
        };

        let id = field("id")?;
        Ok(Self {
            id: id.parse().map_err(|_| {
                Error::Database(DbError::Statement(format!(
                    "invalid ledger id '{id}'"
                )))
            })?,
            name: field("name")?.to_string(),
            created_at: row
                .get("created_at")
                .and_then(|ts| NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok()),
            script: field("script")?.to_string(),
            status: field("status")?.parse()?,
        })
    }
}

/// Outcome of [`ensure_initialized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    AlreadyInitialized,
}

/// Create the ledger schema and table unless they exist.
pub async fn ensure_initialized(session: &mut Session) -> Result<InitOutcome> {
    if session.query_value(LEDGER_EXISTS, &[]).await?.is_some() {
        info!("ledger already initialized");
        return Ok(InitOutcome::AlreadyInitialized);
    }
    session.execute(CREATE_SCHEMA, &[]).await?;
    session.execute(CREATE_TABLE, &[]).await?;
    info!("ledger created");
    Ok(InitOutcome::Created)
}

/// The newest ledger row, if any.
pub async fn last_migration(session: &mut Session) -> Result<Option<MigrationRecord>> {
    let rows = session.query(LAST_MIGRATION, &[]).await?;
    rows.first().map(MigrationRecord::from_row).transpose()
}

/// Record a new migration, provisionally `aborted`.
pub async fn begin_expand(session: &mut Session, name: &str, script: &str) -> Result<()> {
    session.execute(INSERT_MIGRATION, &[name, script]).await?;
    info!(migration = name, status = %MigrationStatus::Aborted, "ledger row inserted");
    Ok(())
}

pub async fn finish_expand(session: &mut Session, name: &str) -> Result<()> {
    session.execute(FINISH_EXPAND, &[name]).await?;
    info!(migration = name, status = %MigrationStatus::Expanded, "ledger updated");
    Ok(())
}

async fn set_last_status(session: &mut Session, status: MigrationStatus) -> Result<()> {
    session.execute(SET_LAST_STATUS, &[status.as_str()]).await?;
    info!(%status, "ledger updated");
    Ok(())
}

pub async fn begin_contract(session: &mut Session) -> Result<()> {
    set_last_status(session, MigrationStatus::Aborted).await
}

pub async fn finish_contract(session: &mut Session) -> Result<()> {
    set_last_status(session, MigrationStatus::Contracted).await
}

pub async fn begin_rollback(session: &mut Session) -> Result<()> {
    set_last_status(session, MigrationStatus::Aborted).await
}

pub async fn finish_rollback(session: &mut Session) -> Result<()> {
    set_last_status(session, MigrationStatus::RolledBack).await
}

/// Whether a migration named `name` may be expanded after `last`.
pub fn may_expand(last: Option<&MigrationRecord>, name: &str) -> bool {
    let Some(last) = last else {
        return true;
    };
    let duplicate = last.name == name
        && !matches!(last.status, MigrationStatus::RolledBack | MigrationStatus::Aborted);
    !duplicate && last.status != MigrationStatus::Expanded
}

pub fn may_contract(last: Option<&MigrationRecord>) -> bool {
    last.is_some_and(|r| r.status == MigrationStatus::Expanded)
}

pub fn may_rollback(last: Option<&MigrationRecord>) -> bool {
    may_contract(last)
}

pub fn may_restore(last: Option<&MigrationRecord>) -> bool {
    last.is_some_and(|r| r.status == MigrationStatus::Aborted)
}
