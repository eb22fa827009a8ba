use anyhow::Result;
use mailspool::db::{migrate, Db};
use mailspool::worker::{self, IngestionWorker, ProcessingTrigger};
use mailspool::{Config, IngestionLedger, ResultStore, UuidIdGenerator};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger from environment variable or default to info level
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", "info"),
    )
    .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    match command {
        "serve" => {
            run_worker().await?;
        }
        "verify" | _ => {
            // Default: verify database schema
            run_schema_verification().await?;
        }
    }

    Ok(())
}

async fn init_db(config: &Config) -> Result<Arc<Db>> {
    let db = Arc::new(Db::new(config.db_path()));
    let migrations_dir = Path::new("migrations").to_path_buf();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await?;
    log::info!("Database initialized successfully");
    Ok(db)
}

/// Run the ingestion worker until Ctrl-C.
async fn run_worker() -> Result<()> {
    log::info!("Starting Mailspool worker v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Database path: {}", config.db_path().display());

    let db = init_db(&config).await?;

    let ids: Arc<dyn mailspool::IdGenerator> = Arc::new(UuidIdGenerator);
    let ledger = Arc::new(IngestionLedger::new(db.clone(), ids.clone()));
    let store = Arc::new(ResultStore::new(db, ids));
    let ingestion_worker = Arc::new(IngestionWorker::new(
        ledger,
        store,
        Arc::new(ProcessingTrigger::new()),
        config.error_backoff(),
    ));

    let handle = worker::spawn(ingestion_worker);
    // Drain any records left in Processing by a previous run
    handle.notify();

    log::info!("Worker running (Ctrl+C to stop)");
    tokio::signal::ctrl_c().await?;

    log::info!("Shutting down");
    handle.stop().await;
    Ok(())
}

/// Run database schema verification
async fn run_schema_verification() -> Result<()> {
    log::info!("Starting Mailspool v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!("Database path: {}", config.db_path().display());

    let db = init_db(&config).await?;
    verify_database_schema(&db).await?;

    Ok(())
}

/// Verify that all expected database objects exist
async fn verify_database_schema(db: &Db) -> Result<()> {
    use mailspool::error::MailspoolError;

    db.with_connection(|conn| {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let expected_tables = vec![
            "attachments",
            "decoded_messages",
            "raw_messages",
            "schema_migrations",
        ];
        let mut all_tables_exist = true;

        for table in &expected_tables {
            if !tables.iter().any(|t| t == table) {
                log::error!("Missing table: {}", table);
                all_tables_exist = false;
            } else {
                log::debug!("✓ Table exists: {}", table);
            }
        }

        if !all_tables_exist {
            return Err(MailspoolError::Config(
                "Not all required tables exist".to_string(),
            ));
        }

        // Check indexes
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name",
        )?;
        let indexes: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        for index_name in ["idx_raw_messages_status", "idx_attachments_message"] {
            if indexes.iter().any(|i| i == index_name) {
                log::debug!("✓ Index exists: {}", index_name);
            } else {
                log::warn!("Index not found: {}", index_name);
            }
        }

        // Check migrations
        let applied = migrate::get_applied_migrations(conn)?;
        if applied.is_empty() {
            return Err(MailspoolError::Config(
                "No migrations applied".to_string(),
            ));
        }
        log::debug!("✓ {} migration(s) applied", applied.len());

        // Check pragmas
        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(MailspoolError::Config(format!(
                "Journal mode is not WAL: {}",
                journal_mode
            )));
        }
        log::debug!("✓ Journal mode: WAL");

        let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if foreign_keys != 1 {
            return Err(MailspoolError::Config(
                "Foreign keys not enabled".to_string(),
            ));
        }
        log::debug!("✓ Foreign keys enabled");

        // Integrity check
        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(MailspoolError::Config(format!(
                "Database integrity check failed: {}",
                integrity
            )));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    })
    .await?;

    log::info!("✓ Database schema verification complete");
    Ok(())
}
