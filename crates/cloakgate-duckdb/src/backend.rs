use std::sync::Arc;

use anyhow::Result;
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::schema::INIT_SQL;

/// DuckDB persistence for campaigns, streams, targeting rules, the
/// blacklist, and the append-only traffic/metric tables.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// cause contention. The connection lives behind `Arc<Mutex<_>>` so the sink
/// workers serialise their batch appends while the struct stays cheap to
/// clone into handlers and background loops.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) the database file at `path` and apply [`INIT_SQL`].
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(INIT_SQL)?;
        info!("DuckDB opened at {path}");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an **in-memory** database. Intended for tests — data is
    /// discarded when the struct is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(INIT_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT 1")?;
        let one: i64 = stmt.query_row([], |row| row.get(0))?;
        anyhow::ensure!(one == 1, "unexpected ping result");
        Ok(())
    }

    /// Test/provisioning access to the raw connection.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
