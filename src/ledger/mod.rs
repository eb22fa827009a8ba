//! Raw-message ledger: ingested MIME payloads and their processing status.

use crate::db::Db;
use crate::error::{MailspoolError, Result};
use crate::id::IdGenerator;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Processing status of a raw message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Waiting for (or currently undergoing) a decode pass
    Processing,
    /// Decoded successfully; a decoded_messages row exists
    Completed,
    /// Last decode attempt failed; any prior decoded result is untouched
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Processing => "processing",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
        }
    }

    fn from_db(s: &str) -> std::result::Result<Self, String> {
        match s {
            "processing" => Ok(RecordStatus::Processing),
            "completed" => Ok(RecordStatus::Completed),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(format!("unknown record status: {}", other)),
        }
    }
}

/// An ingested, unparsed MIME payload plus its processing status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub original_content: String,
    pub uploaded_at: DateTime<Utc>,
    pub status: RecordStatus,
}

/// CRUD + status queries over the raw_messages table.
///
/// Lookups against unknown ids return `None`/`false`, never errors.
pub struct IngestionLedger {
    db: Arc<Db>,
    ids: Arc<dyn IdGenerator>,
}

impl IngestionLedger {
    pub fn new(db: Arc<Db>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { db, ids }
    }

    /// Create a raw record with status Processing.
    ///
    /// Empty content is accepted; it will simply fail to decode later.
    pub async fn create(&self, content: &str) -> Result<RawRecord> {
        let record = RawRecord {
            id: self.ids.generate(),
            original_content: content.to_string(),
            uploaded_at: Utc::now(),
            status: RecordStatus::Processing,
        };

        let row = record.clone();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO raw_messages (id, original_content, uploaded_at, status)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        row.id,
                        row.original_content,
                        row.uploaded_at.to_rfc3339(),
                        row.status.as_str(),
                    ],
                )?;
                Ok(())
            })
            .await?;

        log::debug!("Created raw record {}", record.id);
        Ok(record)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<RawRecord>> {
        let id = id.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, original_content, uploaded_at, status
                     FROM raw_messages WHERE id = ?1",
                )?;
                let mut rows = stmt.query(params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_record(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// List records, newest upload first. `status` narrows to one status.
    pub async fn list(&self, status: Option<RecordStatus>) -> Result<Vec<RawRecord>> {
        self.db
            .with_connection(move |conn| {
                let mut records = Vec::new();
                // rowid breaks ties between identical timestamps (newest insert first)
                match status {
                    Some(status) => {
                        let mut stmt = conn.prepare(
                            "SELECT id, original_content, uploaded_at, status
                             FROM raw_messages WHERE status = ?1
                             ORDER BY uploaded_at DESC, rowid DESC",
                        )?;
                        let mut rows = stmt.query(params![status.as_str()])?;
                        while let Some(row) = rows.next()? {
                            records.push(row_to_record(row)?);
                        }
                    }
                    None => {
                        let mut stmt = conn.prepare(
                            "SELECT id, original_content, uploaded_at, status
                             FROM raw_messages
                             ORDER BY uploaded_at DESC, rowid DESC",
                        )?;
                        let mut rows = stmt.query([])?;
                        while let Some(row) = rows.next()? {
                            records.push(row_to_record(row)?);
                        }
                    }
                }
                Ok(records)
            })
            .await
    }

    /// Returns true if a matching record existed and was updated.
    pub async fn update_status(&self, id: &str, status: RecordStatus) -> Result<bool> {
        let id = id.to_string();
        let changed = self
            .db
            .with_connection(move |conn| {
                let n = conn.execute(
                    "UPDATE raw_messages SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), id],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    /// Returns true if the record was removed. The decoded result and its
    /// attachments go with it (foreign key cascade).
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        let removed = self
            .db
            .with_connection(move |conn| {
                let n = conn.execute("DELETE FROM raw_messages WHERE id = ?1", params![id])?;
                Ok(n)
            })
            .await?;
        Ok(removed > 0)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<RawRecord> {
    let uploaded_at: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(RawRecord {
        id: row.get(0)?,
        original_content: row.get(1)?,
        uploaded_at: DateTime::parse_from_rfc3339(&uploaded_at)
            .map_err(|e| MailspoolError::Invalid(format!("bad uploaded_at: {}", e)))?
            .with_timezone(&Utc),
        status: RecordStatus::from_db(&status).map_err(MailspoolError::Invalid)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
    use crate::id::SequenceIdGenerator;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn setup_ledger() -> (IngestionLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Db::new(temp_dir.path().join("test.db")));
        let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        let ledger = IngestionLedger::new(db, Arc::new(SequenceIdGenerator::new("raw")));
        (ledger, temp_dir)
    }

    #[tokio::test]
    async fn test_create_sets_processing_status() {
        let (ledger, _tmp) = setup_ledger().await;

        let record = ledger.create("From: a@b.c\r\n\r\nhi").await.unwrap();
        assert_eq!(record.id, "raw-1");
        assert_eq!(record.status, RecordStatus::Processing);

        let fetched = ledger.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched.original_content, "From: a@b.c\r\n\r\nhi");
        assert_eq!(fetched.status, RecordStatus::Processing);
    }

    #[tokio::test]
    async fn test_create_accepts_empty_content() {
        let (ledger, _tmp) = setup_ledger().await;
        let record = ledger.create("").await.unwrap();
        assert_eq!(record.original_content, "");
        assert_eq!(record.status, RecordStatus::Processing);
    }

    #[tokio::test]
    async fn test_get_by_id_missing_is_none() {
        let (ledger, _tmp) = setup_ledger().await;
        assert!(ledger.get_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_and_filters() {
        let (ledger, _tmp) = setup_ledger().await;

        let a = ledger.create("first").await.unwrap();
        let b = ledger.create("second").await.unwrap();
        let c = ledger.create("third").await.unwrap();
        ledger
            .update_status(&b.id, RecordStatus::Completed)
            .await
            .unwrap();

        let all = ledger.list(None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![c.id.as_str(), b.id.as_str(), a.id.as_str()]);

        let processing = ledger.list(Some(RecordStatus::Processing)).await.unwrap();
        let ids: Vec<_> = processing.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![c.id.as_str(), a.id.as_str()]);

        let completed = ledger.list(Some(RecordStatus::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, b.id);
    }

    #[tokio::test]
    async fn test_update_status_missing_returns_false() {
        let (ledger, _tmp) = setup_ledger().await;
        let updated = ledger
            .update_status("nope", RecordStatus::Failed)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_delete() {
        let (ledger, _tmp) = setup_ledger().await;
        let record = ledger.create("bye").await.unwrap();
        assert!(ledger.delete(&record.id).await.unwrap());
        assert!(!ledger.delete(&record.id).await.unwrap());
        assert!(ledger.get_by_id(&record.id).await.unwrap().is_none());
    }
}
