//! Ingest .eml files from disk: create ledger records, run one batch pass,
//! and report per-record outcomes.

use anyhow::Result;
use clap::Parser;
use mailspool::db::{migrate, Db};
use mailspool::worker::{IngestionWorker, ProcessingTrigger};
use mailspool::{Config, IngestionLedger, RecordStatus, ResultStore, UuidIdGenerator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Ingest raw MIME messages (.eml files) into the mailspool database")]
struct Args {
    /// Message files to ingest
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", "info"),
    )
    .init();

    let args = Args::parse();

    log::info!("Starting Mailspool ingestion");

    let config = Config::load()?;
    log::info!("Database path: {}", config.db_path().display());

    let db = Arc::new(Db::new(config.db_path()));
    let migrations_dir = Path::new("migrations").to_path_buf();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await?;
    log::info!("Database initialized");

    let ids: Arc<dyn mailspool::IdGenerator> = Arc::new(UuidIdGenerator);
    let ledger = Arc::new(IngestionLedger::new(db.clone(), ids.clone()));
    let store = Arc::new(ResultStore::new(db, ids));
    let worker = IngestionWorker::new(
        ledger.clone(),
        store.clone(),
        Arc::new(ProcessingTrigger::new()),
        config.error_backoff(),
    );

    // Create a raw record per file
    let mut record_ids = Vec::new();
    for file in &args.files {
        let content = std::fs::read_to_string(file)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
        let record = ledger.create(&content).await?;
        log::info!("Queued {} as record {}", file.display(), record.id);
        record_ids.push((file.clone(), record.id));
    }

    // One batch pass over everything queued above (plus any leftovers from
    // previous runs still in Processing)
    let start = Instant::now();
    let attempted = worker.process_batch().await?;
    let elapsed = start.elapsed();

    let mut completed: usize = 0;
    let mut failed: usize = 0;

    for (file, record_id) in &record_ids {
        let record = ledger
            .get_by_id(record_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Record {} disappeared", record_id))?;
        match record.status {
            RecordStatus::Completed => {
                completed += 1;
                let message = store.get_for_record(record_id).await?;
                let attachments = match &message {
                    Some(m) => store.attachments_for_message(&m.id).await?.len(),
                    None => 0,
                };
                let subject = message.map(|m| m.subject).unwrap_or_default();
                log::info!(
                    "✓ {} (subject: {:?}, {} attachment(s))",
                    file.display(),
                    subject,
                    attachments
                );
            }
            RecordStatus::Failed => {
                failed += 1;
                log::error!("✗ {}: decode failed", file.display());
            }
            RecordStatus::Processing => {
                log::warn!(
                    "? {}: still processing (persistence error, will retry on next pass)",
                    file.display()
                );
            }
        }
    }

    log::info!("=== Ingestion Complete ===");
    log::info!("Records attempted: {}", attempted);
    log::info!(
        "Files: {} (completed: {}, failed: {})",
        record_ids.len(),
        completed,
        failed
    );
    log::info!("Time: {:?}", elapsed);

    if failed > 0 {
        log::warn!("Some messages failed to decode. Check logs above for details.");
    }

    Ok(())
}
