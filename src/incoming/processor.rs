//! Processor chain

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{IncomingFile, IngestError};

/// Handles one parsed and audited file.
///
/// Processors may see the same file more than once and must key any side
/// effects on [`IncomingFile::hash`].
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, file: &IncomingFile) -> Result<(), IngestError>;
}

/// Processors run in insertion order
#[derive(Default)]
pub struct Processors {
    chain: Vec<Box<dyn Processor>>,
}

impl Processors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, processor: impl Processor + 'static) {
        self.chain.push(Box::new(processor));
    }

    pub fn with(mut self, processor: impl Processor + 'static) -> Self {
        self.push(processor);
        self
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.chain.iter().map(|p| p.name()).collect()
    }

    /// Run every processor. A failure does not stop the ones after it.
    pub async fn handle_all(&self, file: &IncomingFile) -> Result<(), IngestError> {
        let mut errors = Vec::new();
        for processor in &self.chain {
            debug!("processor {}: handling {}", processor.name(), file.filename);
            if let Err(e) = processor.handle(file).await {
                warn!("processor {} failed on {}: {}", processor.name(), file.filename, e);
                errors.push(e);
            }
        }
        IngestError::collect(errors)
    }
}
