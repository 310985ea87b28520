use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Source of keys for documents created without one.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    /// Returns a fresh key.
    fn generate(&self) -> String;

    /// Observes a key supplied by a caller.
    ///
    /// Generators that produce predictable keys use this to avoid handing
    /// out a key that is already taken.
    fn track(&self, key: &str) {
        let _ = key;
    }
}

/// Generates increasing decimal keys.
#[derive(Debug, Default)]
pub struct TraditionalKeyGenerator {
    last: AtomicU64,
}

impl TraditionalKeyGenerator {
    /// Creates a generator starting after zero.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyGenerator for TraditionalKeyGenerator {
    fn generate(&self) -> String {
        (self.last.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn track(&self, key: &str) {
        if let Ok(n) = key.parse::<u64>() {
            self.last.fetch_max(n, Ordering::SeqCst);
        }
    }
}

/// Generates random UUID v4 keys.
#[derive(Debug, Default)]
pub struct UuidKeyGenerator;

impl KeyGenerator for UuidKeyGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
