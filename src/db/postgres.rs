//! [`Backend`] over a single sqlx PostgreSQL connection.

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, Connection, Executor, Row as _};
use tracing::debug;

use super::{Backend, Row};
use crate::error::DbError;

/// SQLSTATE for `lock_not_available`.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// SQLSTATE for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL connection used by the engine.
pub struct PgBackend {
    conn: PgConnection,
}

impl PgBackend {
    /// Connect and apply the session settings every statement relies on.
    pub async fn connect(url: &str, lock_timeout_ms: u64) -> Result<Self, DbError> {
        let mut conn = PgConnection::connect(url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        conn.execute(format!("SET lock_timeout TO {lock_timeout_ms}").as_str())
            .await
            .map_err(classify)?;
        conn.execute("SET client_min_messages TO WARNING")
            .await
            .map_err(classify)?;

        debug!(lock_timeout_ms, "connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn transact(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>, DbError> {
        let mut tx = self.conn.begin().await.map_err(classify)?;

        // DDL text is rarely repeated; keep it out of the statement cache.
        let mut query = sqlx::query(sql).persistent(false);
        for param in params {
            query = query.bind(*param);
        }

        match query.fetch_all(&mut *tx).await {
            Ok(rows) => {
                tx.commit().await.map_err(classify)?;
                rows.iter().map(decode_row).collect()
            }
            Err(e) => {
                // The statement error is the one worth reporting.
                let _ = tx.rollback().await;
                Err(classify(e))
            }
        }
    }

    async fn execute_outside_transaction(&mut self, sql: &str) -> Result<(), DbError> {
        self.conn.execute(sql).await.map_err(classify)?;
        Ok(())
    }
}

fn decode_row(row: &PgRow) -> Result<Row, DbError> {
    let mut columns = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let value: Option<String> = row
            .try_get(i)
            .map_err(|e| DbError::Statement(format!("column {}: {}", column.name(), e)))?;
        columns.push((column.name().to_string(), value));
    }
    Ok(Row::new(columns))
}

fn classify(e: sqlx::Error) -> DbError {
    match &e {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(LOCK_NOT_AVAILABLE) => DbError::LockTimeout(db.message().to_string()),
            Some(UNDEFINED_TABLE) => DbError::UndefinedTable(db.message().to_string()),
            _ => DbError::Statement(db.message().to_string()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => DbError::Connection(e.to_string()),
        _ => DbError::Statement(e.to_string()),
    }
}
