//! Identifier generation, injected by construction so tests can use
//! deterministic sequences instead of random UUIDs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of unique identifiers for new rows.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Production generator: random v4 UUIDs.
#[derive(Debug, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic generator: "{prefix}-1", "{prefix}-2", ...
///
/// Intended for tests that need to assert on generated ids.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequenceIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn generate(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.prefix, n)
    }
}
