pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod id;
pub mod ledger;
pub mod store;
pub mod worker;

pub use config::Config;
pub use error::{MailspoolError, Result};
pub use id::{IdGenerator, SequenceIdGenerator, UuidIdGenerator};
pub use ledger::{IngestionLedger, RawRecord, RecordStatus};
pub use store::{Attachment, DecodedMessage, ResultStore};
pub use worker::{IngestionWorker, ProcessingTrigger, WorkerHandle};
