//! Statement execution with lock-timeout retries.

use std::time::Duration;

use tracing::{debug, warn};

use super::{Backend, Row};
use crate::config::Config;
use crate::error::{DbError, Error, Result};

/// The connection handle every engine component issues statements through.
///
/// Each statement that times out waiting for a lock is rolled back by the
/// backend and re-issued after a fixed backoff. With no cap configured the
/// loop only ends when the statement succeeds or fails for another reason.
pub struct Session {
    backend: Box<dyn Backend>,
    backoff: Duration,
    max_retries: Option<u32>,
}

#[derive(Clone, Copy)]
enum Mode {
    Transaction,
    Lockable,
}

impl Session {
    pub fn new(backend: Box<dyn Backend>, config: &Config) -> Self {
        Self {
            backend,
            backoff: config.backoff(),
            max_retries: config.max_lock_retries,
        }
    }

    /// Run a read query in its own transaction.
    pub async fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>> {
        self.run(sql, params, Mode::Transaction).await
    }

    /// First column of the first row, if any.
    pub async fn query_value(&mut self, sql: &str, params: &[&str]) -> Result<Option<String>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.first().and_then(|row| row.first()).map(str::to_string))
    }

    /// Run a statement in its own transaction, discarding rows.
    pub async fn execute(&mut self, sql: &str, params: &[&str]) -> Result<()> {
        self.run(sql, params, Mode::Transaction).await.map(|_| ())
    }

    /// Run a statement that cannot live inside a transaction block.
    pub async fn execute_lockable(&mut self, sql: &str) -> Result<()> {
        self.run(sql, &[], Mode::Lockable).await.map(|_| ())
    }

    async fn run(&mut self, sql: &str, params: &[&str], mode: Mode) -> Result<Vec<Row>> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            debug!(sql = %sql.trim(), attempt = attempts, "executing");

            let outcome = match mode {
                Mode::Transaction => self.backend.transact(sql, params).await,
                Mode::Lockable => self
                    .backend
                    .execute_outside_transaction(sql)
                    .await
                    .map(|()| Vec::new()),
            };

            match outcome {
                Err(DbError::LockTimeout(msg)) => {
                    if let Some(max) = self.max_retries {
                        if attempts > max {
                            return Err(Error::LockRetriesExhausted { attempts });
                        }
                    }
                    warn!(attempt = attempts, "{msg}; retrying in {:?}", self.backoff);
                    tokio::time::sleep(self.backoff).await;
                }
                other => return other.map_err(Error::from),
            }
        }
    }
}
