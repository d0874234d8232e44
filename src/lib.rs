//! Zero-downtime schema migrations for PostgreSQL.
//!
//! A migration runs in two halves. `expand` makes the change additively: new
//! work lands in a shadow column kept in sync by triggers, and two views of
//! the table are published, one in `laridae_before` for existing clients and
//! one in `laridae_<name>` for clients that opted into the new shape.
//! `contract` then makes the change destructive and drops the scaffolding;
//! `rollback` discards it instead.
//!
//! ```ignore
//! use laridae::{Config, MigrationScript, Migrator};
//!
//! let mut migrator = Migrator::connect(url, Config::default()).await?;
//! migrator.init().await?;
//! migrator.expand(&MigrationScript::load("add_not_null.json")?).await?;
//! migrator.contract().await?;
//! ```

pub mod backfill;
pub mod config;
pub mod db;
pub mod error;
pub mod introspect;
pub mod ledger;
pub mod migrator;
pub mod operations;
pub mod propagate;
pub mod schema;
pub mod script;
pub mod sql;
pub mod validate;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{DbError, Error, Result};
pub use ledger::{InitOutcome, MigrationRecord, MigrationStatus};
pub use migrator::{Migrator, search_path_url};
pub use script::MigrationScript;
