//! Surrogate key generation.

use deepsql_core::{KeyGeneration, format_uuid};
use rand::RngCore;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Produces fresh unique identifier values on demand.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    fn generate(&self, generation: KeyGeneration) -> serde_json::Value;
}

/// Random version 4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl KeyGenerator for UuidGenerator {
    fn generate(&self, generation: KeyGeneration) -> serde_json::Value {
        match generation {
            KeyGeneration::Uuid => {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes[6] = (bytes[6] & 0x0f) | 0x40;
                bytes[8] = (bytes[8] & 0x3f) | 0x80;
                serde_json::Value::String(format_uuid(&bytes))
            }
        }
    }
}

/// Deterministic UUIDs built from a counter, for reproducible plans.
#[derive(Debug, Default)]
pub struct SequentialGenerator {
    next: AtomicU64,
}

impl SequentialGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl KeyGenerator for SequentialGenerator {
    fn generate(&self, generation: KeyGeneration) -> serde_json::Value {
        match generation {
            KeyGeneration::Uuid => {
                let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
                let mut bytes = [0u8; 16];
                bytes[8..].copy_from_slice(&n.to_be_bytes());
                bytes[6] = 0x40;
                bytes[7] = 0x00;
                serde_json::Value::String(format_uuid(&bytes))
            }
        }
    }
}
