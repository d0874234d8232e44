//! End-to-end migrations against a live PostgreSQL server.
//!
//! Skipped unless `LARIDAE_TEST_DATABASE_URL` points at a disposable
//! database. Each test works in its own schema; the ledger is shared, so
//! tests hold `SERIAL` for their whole run.

use laridae::backfill::Batcher;
use laridae::db::{PgBackend, Session};
use laridae::introspect::Table;
use laridae::{Config, Error, MigrationScript, MigrationStatus, Migrator};
use sqlx::{Connection, Executor, PgConnection, Row};
use tokio::sync::Mutex;

static SERIAL: Mutex<()> = Mutex::const_new(());

fn database_url() -> Option<String> {
    std::env::var("LARIDAE_TEST_DATABASE_URL").ok()
}

async fn raw(url: &str) -> PgConnection {
    PgConnection::connect(url).await.unwrap()
}

async fn reset(conn: &mut PgConnection, schema: &str) {
    conn.execute(
        format!(
            "DROP SCHEMA IF EXISTS laridae CASCADE;
             DROP SCHEMA IF EXISTS laridae_before CASCADE;
             DROP SCHEMA IF EXISTS laridae_temp CASCADE;
             DROP SCHEMA IF EXISTS {schema} CASCADE;
             CREATE SCHEMA {schema};
             CREATE TABLE {schema}.t (id integer PRIMARY KEY, c text);
             INSERT INTO {schema}.t SELECT i, CASE WHEN i % 2 = 0 THEN NULL ELSE 'v' || i END
                 FROM generate_series(1, 25) i;"
        )
        .as_str(),
    )
    .await
    .unwrap();
}

fn config() -> Config {
    Config {
        batch_size: 7,
        retry_backoff_ms: 10,
        ..Config::default()
    }
}

async fn migrator(url: &str) -> Migrator {
    Migrator::connect(url, config()).await.unwrap()
}

fn not_null_script(schema: &str, name: &str) -> MigrationScript {
    MigrationScript::from_json(&format!(
        r#"{{"name": "{name}", "operation": "add_not_null_constraint",
            "info": {{"schema": "{schema}", "table": "t", "column": "c"}},
            "functions": {{"up": "COALESCE(c, 'x')", "down": "c"}}}}"#
    ))
    .unwrap()
}

async fn column_names(conn: &mut PgConnection, schema: &str, table: &str) -> Vec<String> {
    sqlx::query(
        "SELECT column_name::text FROM information_schema.columns
         WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(conn)
    .await
    .unwrap()
    .iter()
    .map(|r| r.get::<String, _>(0))
    .collect()
}

#[tokio::test]
async fn test_add_not_null_expand_then_contract() {
    let Some(url) = database_url() else { return };
    let _guard = SERIAL.lock().await;
    let mut conn = raw(&url).await;
    reset(&mut conn, "e2e_nn").await;

    let mut m = migrator(&url).await;
    m.init().await.unwrap();
    m.expand(&not_null_script("e2e_nn", "n1")).await.unwrap();
    assert_eq!(m.status().await.unwrap().unwrap().status, MigrationStatus::Expanded);

    // Old clients still see NULLs, new clients see the backfilled value.
    let before: Option<String> = sqlx::query_scalar("SELECT c FROM laridae_before.t WHERE id = 2")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(before, None);
    let after: String = sqlx::query_scalar("SELECT c FROM laridae_n1.t WHERE id = 2")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(after, "x");

    // A write through the old view reaches the shadow column.
    conn.execute("INSERT INTO laridae_before.t (id, c) VALUES (100, NULL)")
        .await
        .unwrap();
    let synced: String = sqlx::query_scalar("SELECT c FROM laridae_n1.t WHERE id = 100")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(synced, "x");

    m.contract().await.unwrap();
    assert_eq!(m.status().await.unwrap().unwrap().status, MigrationStatus::Contracted);
    assert_eq!(column_names(&mut conn, "e2e_nn", "t").await, vec!["id", "c"]);

    let err = conn
        .execute("INSERT INTO e2e_nn.t (id, c) VALUES (101, NULL)")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("t_c_not_null"));
}

#[tokio::test]
async fn test_rollback_leaves_table_untouched() {
    let Some(url) = database_url() else { return };
    let _guard = SERIAL.lock().await;
    let mut conn = raw(&url).await;
    reset(&mut conn, "e2e_rb").await;

    let mut m = migrator(&url).await;
    m.init().await.unwrap();
    m.expand(&not_null_script("e2e_rb", "r1")).await.unwrap();
    m.rollback().await.unwrap();

    assert_eq!(column_names(&mut conn, "e2e_rb", "t").await, vec!["id", "c"]);
    let nulls: i64 = sqlx::query_scalar("SELECT count(*) FROM e2e_rb.t WHERE c IS NULL")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(nulls, 12);

    let leftover: Option<String> = sqlx::query_scalar("SELECT to_regnamespace('laridae_r1')::text")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(leftover, None);
}

#[tokio::test]
async fn test_second_expand_is_refused() {
    let Some(url) = database_url() else { return };
    let _guard = SERIAL.lock().await;
    let mut conn = raw(&url).await;
    reset(&mut conn, "e2e_busy").await;

    let mut m = migrator(&url).await;
    m.init().await.unwrap();
    m.expand(&not_null_script("e2e_busy", "b1")).await.unwrap();

    let err = m.expand(&not_null_script("e2e_busy", "b2")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition(_)));

    m.rollback().await.unwrap();
}

#[tokio::test]
async fn test_rename_column_views() {
    let Some(url) = database_url() else { return };
    let _guard = SERIAL.lock().await;
    let mut conn = raw(&url).await;
    reset(&mut conn, "e2e_mv").await;

    let script = MigrationScript::from_json(
        r#"{"name": "mv", "operation": "rename_column",
            "info": {"schema": "e2e_mv", "table": "t", "column": "c", "new_name": "label"}}"#,
    )
    .unwrap();

    let mut m = migrator(&url).await;
    m.init().await.unwrap();
    m.expand(&script).await.unwrap();
    assert_eq!(column_names(&mut conn, "laridae_mv", "t").await, vec!["id", "label"]);
    assert_eq!(column_names(&mut conn, "laridae_before", "t").await, vec!["id", "c"]);

    m.contract().await.unwrap();
    assert_eq!(column_names(&mut conn, "e2e_mv", "t").await, vec!["id", "label"]);
}

#[tokio::test]
async fn test_writes_through_new_view_reach_old_view() {
    let Some(url) = database_url() else { return };
    let _guard = SERIAL.lock().await;
    let mut conn = raw(&url).await;
    reset(&mut conn, "e2e_wr").await;

    let mut m = migrator(&url).await;
    m.init().await.unwrap();
    m.expand(&not_null_script("e2e_wr", "w1")).await.unwrap();

    conn.execute("SET search_path TO laridae_w1, public").await.unwrap();
    conn.execute("INSERT INTO t (id, c) VALUES (200, 'fromafter')").await.unwrap();
    conn.execute("UPDATE t SET c = 'upd' WHERE id = 2").await.unwrap();
    conn.execute("RESET search_path").await.unwrap();

    let rows: Vec<(i32, Option<String>)> =
        sqlx::query_as("SELECT id, c FROM laridae_before.t WHERE id IN (2, 200) ORDER BY id")
            .fetch_all(&mut conn)
            .await
            .unwrap();
    assert_eq!(
        rows,
        vec![(2, Some("upd".to_string())), (200, Some("fromafter".to_string()))]
    );

    m.rollback().await.unwrap();
}

#[tokio::test]
async fn test_backfill_twice_gives_the_same_values() {
    let Some(url) = database_url() else { return };
    let _guard = SERIAL.lock().await;
    let mut conn = raw(&url).await;
    reset(&mut conn, "e2e_bf").await;
    conn.execute("ALTER TABLE e2e_bf.t ADD COLUMN d text").await.unwrap();

    let config = config();
    let backend = PgBackend::connect(&url, config.lock_timeout_ms).await.unwrap();
    let mut session = Session::new(Box::new(backend), &config);
    let table = Table::new("e2e_bf", "t");
    let batcher = Batcher::new(&config);

    async fn values(conn: &mut PgConnection) -> Vec<(i32, Option<String>)> {
        sqlx::query_as("SELECT id, d FROM e2e_bf.t ORDER BY id")
            .fetch_all(conn)
            .await
            .unwrap()
    }

    batcher
        .run(&mut session, &table, "d", "COALESCE(c, 'x') || id")
        .await
        .unwrap();
    let first = values(&mut conn).await;
    assert_eq!(first.len(), 25);
    assert!(first.iter().all(|(_, d)| d.is_some()));

    batcher
        .run(&mut session, &table, "d", "COALESCE(c, 'x') || id")
        .await
        .unwrap();
    assert_eq!(values(&mut conn).await, first);
}
