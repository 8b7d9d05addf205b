use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::processor::Processor;

/// Process-wide `method -> processor` mapping, populated at startup and
/// immutable thereafter. Reads are lock-free since the map itself is never
/// mutated after `ProcessorRegistry::build` returns — no interior mutability
/// needed.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

pub struct ProcessorRegistryBuilder {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn builder() -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder {
            processors: HashMap::new(),
        }
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(method).cloned()
    }
}

impl ProcessorRegistryBuilder {
    pub fn register(mut self, method: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
        self.processors.insert(method.into(), processor);
        self
    }

    pub fn build(self) -> ProcessorRegistry {
        ProcessorRegistry {
            processors: self.processors,
        }
    }
}
