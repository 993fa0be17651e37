//! Request-scoped state threaded through one deep operation.
//!
//! Everything here belongs to a single request and is released with it.

use crate::config::DeepConfig;
use crate::keygen::{KeyGenerator, UuidGenerator};
use deepsql_core::KeyGeneration;
use std::collections::HashMap;
use std::sync::Arc;

/// A key generated while planning a request.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKey {
    pub entity: String,
    pub column: String,
    pub value: serde_json::Value,
}

/// Per-request context: key generator, generated keys and touched row counts.
#[derive(Debug, Clone)]
pub struct RequestContext {
    generator: Arc<dyn KeyGenerator>,
    auto_generate_keys: bool,
    single_block_capable: bool,
    generated: Vec<GeneratedKey>,
    touched: HashMap<String, u64>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(&DeepConfig::default())
    }
}

impl RequestContext {
    pub fn new(config: &DeepConfig) -> Self {
        Self {
            generator: Arc::new(UuidGenerator),
            auto_generate_keys: config.auto_generate_keys,
            single_block_capable: false,
            generated: Vec::new(),
            touched: HashMap::new(),
        }
    }

    /// Use a specific key generator (builder pattern).
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Record whether the executor can run single-block programs.
    #[must_use]
    pub fn single_block_capable(mut self, capable: bool) -> Self {
        self.single_block_capable = capable;
        self
    }

    pub fn auto_generate_keys(&self) -> bool {
        self.auto_generate_keys
    }

    pub fn supports_single_block(&self) -> bool {
        self.single_block_capable
    }

    /// Generate a fresh key for `entity.column` and remember it.
    pub fn generate_key(
        &mut self,
        entity: &str,
        column: &str,
        generation: KeyGeneration,
    ) -> serde_json::Value {
        let value = self.generator.generate(generation);
        tracing::trace!(entity = entity, column = column, key = %value, "generated key");
        self.generated.push(GeneratedKey {
            entity: entity.to_string(),
            column: column.to_string(),
            value: value.clone(),
        });
        value
    }

    /// Keys generated so far, in generation order.
    pub fn generated_keys(&self) -> &[GeneratedKey] {
        &self.generated
    }

    pub fn record_touched(&mut self, table: &str, rows: u64) {
        *self.touched.entry(table.to_string()).or_insert(0) += rows;
    }

    /// Rows written to or deleted from a table during this request.
    pub fn touched(&self, table: &str) -> u64 {
        self.touched.get(table).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::SequentialGenerator;

    #[test]
    fn records_generated_keys_and_touches() {
        let mut ctx = RequestContext::default().with_generator(Arc::new(SequentialGenerator::new()));
        let key = ctx.generate_key("Orders", "ID", KeyGeneration::Uuid);
        assert_eq!(ctx.generated_keys().len(), 1);
        assert_eq!(ctx.generated_keys()[0].value, key);

        ctx.record_touched("Orders", 2);
        ctx.record_touched("Orders", 1);
        assert_eq!(ctx.touched("Orders"), 3);
        assert_eq!(ctx.touched("Items"), 0);
    }

    #[test]
    fn follows_config() {
        let ctx = RequestContext::new(&DeepConfig::default().auto_generate_keys(false));
        assert!(!ctx.auto_generate_keys());
        assert!(!ctx.supports_single_block());
    }
}
