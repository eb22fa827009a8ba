use crate::error::{MailspoolError, Result};
use rusqlite::Connection;
use std::path::Path;
use tokio::task;

/// Database connection wrapper
pub struct Db {
    path: std::path::PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Open a new database connection with the standard pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(MailspoolError::Database)?;
        apply_pragmas(&conn)?;
        Ok(conn)
    }

    /// Execute a closure with a database connection in a blocking task
    ///
    /// SQLite calls are synchronous, so every ledger/store operation runs
    /// on the blocking pool and the async worker stays responsive.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = Connection::open(&path).map_err(MailspoolError::Database)?;
            apply_pragmas(&conn)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| MailspoolError::Config(format!("Database task panicked: {}", e)))?
    }
}

/// WAL for concurrent readers during the worker's writes, foreign keys for
/// the decoded-message/attachment ownership chain.
fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY; \
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

pub mod migrate;
