//! Decoded-result store: atomic delete-then-insert replacement keyed by raw
//! message id, plus the read surface for downstream consumers.

use crate::db::Db;
use crate::decode::DecodedEmail;
use crate::error::{MailspoolError, Result};
use crate::id::IdGenerator;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A stored decoded message (one per raw message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedMessage {
    pub id: String,
    pub raw_message_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A stored attachment, owned by its decoded message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub decoded_message_id: String,
    pub filename: String,
    pub mime_type: String,
    /// Base64 text
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct ResultStore {
    db: Arc<Db>,
    ids: Arc<dyn IdGenerator>,
}

impl ResultStore {
    pub fn new(db: Arc<Db>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { db, ids }
    }

    /// Replace the decoded result for a raw message in one transaction:
    /// delete old attachments, delete old message, insert new message,
    /// insert new attachments. Readers never observe zero rows for a
    /// previously decoded record, nor two rows at once.
    ///
    /// Returns the id of the new decoded message.
    pub async fn replace_for_record(
        &self,
        raw_message_id: &str,
        email: DecodedEmail,
    ) -> Result<String> {
        let message_id = self.ids.generate();
        let attachment_ids: Vec<String> =
            email.attachments.iter().map(|_| self.ids.generate()).collect();
        let created_at = Utc::now().to_rfc3339();
        let raw_message_id = raw_message_id.to_string();
        let result_id = message_id.clone();

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;

                // FK cascade would also clear attachments, but the replace is
                // spelled out so the whole unit of work is visible here.
                tx.execute(
                    "DELETE FROM attachments WHERE decoded_message_id IN
                         (SELECT id FROM decoded_messages WHERE raw_message_id = ?1)",
                    params![raw_message_id],
                )?;
                tx.execute(
                    "DELETE FROM decoded_messages WHERE raw_message_id = ?1",
                    params![raw_message_id],
                )?;

                tx.execute(
                    "INSERT INTO decoded_messages
                         (id, raw_message_id, from_address, to_address, subject,
                          date, body_text, body_html, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        message_id,
                        raw_message_id,
                        email.from,
                        email.to,
                        email.subject,
                        email.date.map(|d| d.to_rfc3339()),
                        email.body_text,
                        email.body_html,
                        created_at,
                    ],
                )?;

                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO attachments
                             (id, decoded_message_id, filename, mime_type, content, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for (attachment, id) in email.attachments.iter().zip(&attachment_ids) {
                        stmt.execute(params![
                            id,
                            message_id,
                            attachment.filename,
                            attachment.mime_type,
                            attachment.content,
                            created_at,
                        ])?;
                    }
                }

                tx.commit()?;
                Ok(())
            })
            .await?;

        log::debug!("Stored decoded message {}", result_id);
        Ok(result_id)
    }

    /// The current decoded message for a raw record, if any.
    pub async fn get_for_record(&self, raw_message_id: &str) -> Result<Option<DecodedMessage>> {
        let raw_message_id = raw_message_id.to_string();
        self.db
            .with_connection(move |conn| {
                query_message(
                    conn,
                    "SELECT id, raw_message_id, from_address, to_address, subject,
                            date, body_text, body_html, created_at
                     FROM decoded_messages WHERE raw_message_id = ?1",
                    &raw_message_id,
                )
            })
            .await
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<DecodedMessage>> {
        let id = id.to_string();
        self.db
            .with_connection(move |conn| {
                query_message(
                    conn,
                    "SELECT id, raw_message_id, from_address, to_address, subject,
                            date, body_text, body_html, created_at
                     FROM decoded_messages WHERE id = ?1",
                    &id,
                )
            })
            .await
    }

    pub async fn attachments_for_message(&self, message_id: &str) -> Result<Vec<Attachment>> {
        let message_id = message_id.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, decoded_message_id, filename, mime_type, content, created_at
                     FROM attachments WHERE decoded_message_id = ?1
                     ORDER BY rowid",
                )?;
                let mut rows = stmt.query(params![message_id])?;
                let mut attachments = Vec::new();
                while let Some(row) = rows.next()? {
                    attachments.push(row_to_attachment(row)?);
                }
                Ok(attachments)
            })
            .await
    }

    pub async fn get_attachment(&self, id: &str) -> Result<Option<Attachment>> {
        let id = id.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, decoded_message_id, filename, mime_type, content, created_at
                     FROM attachments WHERE id = ?1",
                )?;
                let mut rows = stmt.query(params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_attachment(row)?)),
                    None => Ok(None),
                }
            })
            .await
    }
}

fn query_message(
    conn: &rusqlite::Connection,
    sql: &str,
    key: &str,
) -> Result<Option<DecodedMessage>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_message(row)?)),
        None => Ok(None),
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| MailspoolError::Invalid(format!("bad timestamp: {}", e)))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<DecodedMessage> {
    let date: Option<String> = row.get(5)?;
    let created_at: String = row.get(8)?;
    Ok(DecodedMessage {
        id: row.get(0)?,
        raw_message_id: row.get(1)?,
        from: row.get(2)?,
        to: row.get(3)?,
        subject: row.get(4)?,
        date: date.map(parse_timestamp).transpose()?,
        body_text: row.get(6)?,
        body_html: row.get(7)?,
        created_at: parse_timestamp(created_at)?,
    })
}

fn row_to_attachment(row: &rusqlite::Row<'_>) -> Result<Attachment> {
    let created_at: String = row.get(5)?;
    Ok(Attachment {
        id: row.get(0)?,
        decoded_message_id: row.get(1)?,
        filename: row.get(2)?,
        mime_type: row.get(3)?,
        content: row.get(4)?,
        created_at: parse_timestamp(created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
    use crate::decode::DecodedAttachment;
    use crate::id::SequenceIdGenerator;
    use crate::ledger::IngestionLedger;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn setup() -> (IngestionLedger, ResultStore, Arc<Db>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Db::new(temp_dir.path().join("test.db")));
        let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        let ids: Arc<dyn crate::id::IdGenerator> = Arc::new(SequenceIdGenerator::new("id"));
        let ledger = IngestionLedger::new(db.clone(), ids.clone());
        let store = ResultStore::new(db.clone(), ids);
        (ledger, store, db, temp_dir)
    }

    fn sample_email(subject: &str, attachment_count: usize) -> DecodedEmail {
        DecodedEmail {
            from: "a@example.com".to_string(),
            to: "b@example.com".to_string(),
            subject: subject.to_string(),
            date: None,
            body_text: Some("body".to_string()),
            body_html: None,
            attachments: (0..attachment_count)
                .map(|i| DecodedAttachment {
                    filename: format!("file-{}.bin", i),
                    mime_type: "application/octet-stream".to_string(),
                    content: "aGVsbG8=".to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_replace_inserts_message_and_attachments() {
        let (ledger, store, _db, _tmp) = setup().await;
        let record = ledger.create("raw").await.unwrap();

        let message_id = store
            .replace_for_record(&record.id, sample_email("hello", 2))
            .await
            .unwrap();

        let message = store.get_for_record(&record.id).await.unwrap().unwrap();
        assert_eq!(message.id, message_id);
        assert_eq!(message.subject, "hello");
        assert_eq!(message.raw_message_id, record.id);

        let attachments = store.attachments_for_message(&message_id).await.unwrap();
        assert_eq!(attachments.len(), 2);
        assert!(attachments.iter().all(|a| a.decoded_message_id == message_id));

        // Lookup by own id, for downstream consumers
        let by_id = store.get_message(&message_id).await.unwrap().unwrap();
        assert_eq!(by_id.subject, "hello");
        let att = store.get_attachment(&attachments[0].id).await.unwrap().unwrap();
        assert_eq!(att.filename, "file-0.bin");
    }

    #[tokio::test]
    async fn test_replace_is_idempotent_per_record() {
        let (ledger, store, db, _tmp) = setup().await;
        let record = ledger.create("raw").await.unwrap();

        let first = store
            .replace_for_record(&record.id, sample_email("first", 3))
            .await
            .unwrap();
        let second = store
            .replace_for_record(&record.id, sample_email("second", 1))
            .await
            .unwrap();
        assert_ne!(first, second);

        // Exactly one decoded message, matching the second decode
        let message = store.get_for_record(&record.id).await.unwrap().unwrap();
        assert_eq!(message.id, second);
        assert_eq!(message.subject, "second");

        let record_id = record.id.clone();
        let (message_count, attachment_count) = db
            .with_connection(move |conn| {
                let m: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM decoded_messages WHERE raw_message_id = ?1",
                    params![record_id],
                    |r| r.get(0),
                )?;
                let a: i64 =
                    conn.query_row("SELECT COUNT(*) FROM attachments", [], |r| r.get(0))?;
                Ok((m, a))
            })
            .await
            .unwrap();
        assert_eq!(message_count, 1);
        // No orphans from the first decode's 3 attachments
        assert_eq!(attachment_count, 1);
    }

    #[tokio::test]
    async fn test_deletion_isolation_between_records() {
        let (ledger, store, _db, _tmp) = setup().await;
        let a = ledger.create("a").await.unwrap();
        let b = ledger.create("b").await.unwrap();
        let c = ledger.create("c").await.unwrap();

        for record in [&a, &b, &c] {
            store
                .replace_for_record(&record.id, sample_email("msg", 1))
                .await
                .unwrap();
        }

        assert!(ledger.delete(&b.id).await.unwrap());

        // A and C keep their decoded results and attachments
        for record in [&a, &c] {
            let message = store.get_for_record(&record.id).await.unwrap().unwrap();
            let attachments = store.attachments_for_message(&message.id).await.unwrap();
            assert_eq!(attachments.len(), 1);
        }
        // B's result is gone with the raw record (cascade)
        assert!(store.get_for_record(&b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_raw_record_delete_cascades_attachments() {
        let (ledger, store, db, _tmp) = setup().await;
        let record = ledger.create("raw").await.unwrap();
        let message_id = store
            .replace_for_record(&record.id, sample_email("msg", 2))
            .await
            .unwrap();

        assert!(ledger.delete(&record.id).await.unwrap());

        let orphans: i64 = db
            .with_connection(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM attachments WHERE decoded_message_id = ?1",
                    params![message_id],
                    |r| r.get(0),
                )?;
                Ok(n)
            })
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
