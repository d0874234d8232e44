//! Batched backfill of a new or shadow column.
//!
//! Rows are walked in primary key order, `batch_size` at a time, each batch a
//! separate transaction so row locks are held only briefly. Writes that land
//! while the backfill runs are covered by the sync trigger.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::Config;
use crate::db::Session;
use crate::error::Result;
use crate::introspect::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batcher {
    pub batch_size: u64,
    pub pause: Duration,
}

impl Batcher {
    pub fn new(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            pause: config.batch_pause(),
        }
    }

    /// Offsets of every batch for a table of `rows` rows.
    pub fn offsets(&self, rows: u64) -> impl Iterator<Item = u64> {
        (0..=rows).step_by(self.batch_size as usize)
    }

    pub fn batch_sql(&self, table: &Table, key: &str, target: &str, expr: &str, offset: u64) -> String {
        let qualified = table.qualified();
        format!(
            "WITH laridae_batch AS (SELECT {key} FROM {qualified} ORDER BY {key} LIMIT {} OFFSET {offset}) \
             UPDATE {qualified} SET {target} = {expr} \
             WHERE EXISTS (SELECT 1 FROM laridae_batch WHERE {qualified}.{key} = laridae_batch.{key})",
            self.batch_size
        )
    }

    /// Set `target = expr` on every row of `table`. Returns the number of
    /// batches issued.
    pub async fn run(&self, session: &mut Session, table: &Table, target: &str, expr: &str) -> Result<u64> {
        let key = table.pagination_key(session).await?;
        let rows = table.row_count(session).await?;
        info!(table = %table.qualified(), column = target, rows, "backfill started");

        let mut batches = 0;
        for offset in self.offsets(rows) {
            session
                .execute(&self.batch_sql(table, &key, target, expr, offset), &[])
                .await?;
            batches += 1;
            debug!(offset, "batch done");
            if !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        info!(table = %table.qualified(), column = target, batches, "backfill finished");
        Ok(batches)
    }
}
