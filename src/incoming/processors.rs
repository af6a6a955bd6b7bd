//! Built-in processors for corrections, returns and prenotes
//!
//! Each one inspects a file and, when it finds something, sends a single
//! [`IncomingEvent`] describing every matching entry to an [`EventSink`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::processor::Processor;
use super::{IncomingFile, IngestError};
use crate::ach::{Batch, EntryDetail};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correction {
    pub batch_id: Option<String>,
    pub entry_id: Option<String>,
    pub trace_number: String,
    pub change_code: String,
    pub original_trace: String,
    pub corrected_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnedEntry {
    pub batch_id: Option<String>,
    pub entry_id: Option<String>,
    pub trace_number: String,
    pub return_code: String,
    pub original_trace: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prenote {
    pub batch_id: Option<String>,
    pub entry_id: Option<String>,
    pub trace_number: String,
    pub transaction_code: u8,
    pub dfi_account_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingEvent {
    Corrections {
        filename: String,
        hostname: String,
        hash: String,
        corrections: Vec<Correction>,
    },
    Returns {
        filename: String,
        hostname: String,
        hash: String,
        returns: Vec<ReturnedEntry>,
    },
    Prenotes {
        filename: String,
        hostname: String,
        hash: String,
        prenotes: Vec<Prenote>,
    },
}

impl IncomingEvent {
    pub fn hash(&self) -> &str {
        match self {
            IncomingEvent::Corrections { hash, .. }
            | IncomingEvent::Returns { hash, .. }
            | IncomingEvent::Prenotes { hash, .. } => hash,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: IncomingEvent) -> Result<(), IngestError>;
}

#[async_trait]
impl EventSink for mpsc::Sender<IncomingEvent> {
    async fn send(&self, event: IncomingEvent) -> Result<(), IngestError> {
        mpsc::Sender::send(self, event)
            .await
            .map_err(|_| IngestError::SinkClosed)
    }
}

/// Collects events in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<IncomingEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<IncomingEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&self, event: IncomingEvent) -> Result<(), IngestError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Every entry in `file` paired with its batch
fn entries(file: &IncomingFile) -> impl Iterator<Item = (&Batch, &EntryDetail)> {
    file.file
        .batches
        .iter()
        .flat_map(|b| b.entries.iter().map(move |e| (b, e)))
}

/// Notifications of change (COR batches, addenda 98)
pub struct CorrectionProcessor {
    sink: Arc<dyn EventSink>,
}

impl CorrectionProcessor {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Processor for CorrectionProcessor {
    fn name(&self) -> &'static str {
        "corrections"
    }

    async fn handle(&self, file: &IncomingFile) -> Result<(), IngestError> {
        let corrections: Vec<Correction> = entries(file)
            .filter_map(|(batch, entry)| {
                let addenda = entry.addenda98.as_ref()?;
                Some(Correction {
                    batch_id: batch.id.clone(),
                    entry_id: entry.id.clone(),
                    trace_number: entry.trace_number.clone(),
                    change_code: addenda.change_code.clone(),
                    original_trace: addenda.original_trace.clone(),
                    corrected_data: addenda.corrected_data.clone(),
                })
            })
            .collect();

        if corrections.is_empty() {
            if file.file.batches.iter().any(|b| b.is_correction()) {
                debug!("{}: COR batch without change addenda", file.filename);
            }
            return Ok(());
        }

        info!(
            "{}: found {} correction(s) from {}",
            file.filename,
            corrections.len(),
            file.hostname
        );
        self.sink
            .send(IncomingEvent::Corrections {
                filename: file.filename.clone(),
                hostname: file.hostname.clone(),
                hash: file.hash.clone(),
                corrections,
            })
            .await
    }
}

/// Returned entries (addenda 99)
pub struct ReturnProcessor {
    sink: Arc<dyn EventSink>,
}

impl ReturnProcessor {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Processor for ReturnProcessor {
    fn name(&self) -> &'static str {
        "returns"
    }

    async fn handle(&self, file: &IncomingFile) -> Result<(), IngestError> {
        let returns: Vec<ReturnedEntry> = entries(file)
            .filter_map(|(batch, entry)| {
                let addenda = entry.addenda99.as_ref()?;
                Some(ReturnedEntry {
                    batch_id: batch.id.clone(),
                    entry_id: entry.id.clone(),
                    trace_number: entry.trace_number.clone(),
                    return_code: addenda.return_code.clone(),
                    original_trace: addenda.original_trace.clone(),
                    amount: entry.amount,
                })
            })
            .collect();
        if returns.is_empty() {
            return Ok(());
        }

        info!(
            "{}: found {} return(s) from {}",
            file.filename,
            returns.len(),
            file.hostname
        );
        self.sink
            .send(IncomingEvent::Returns {
                filename: file.filename.clone(),
                hostname: file.hostname.clone(),
                hash: file.hash.clone(),
                returns,
            })
            .await
    }
}

/// Prenote entries
pub struct PrenoteProcessor {
    sink: Arc<dyn EventSink>,
}

impl PrenoteProcessor {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Processor for PrenoteProcessor {
    fn name(&self) -> &'static str {
        "prenotes"
    }

    async fn handle(&self, file: &IncomingFile) -> Result<(), IngestError> {
        let prenotes: Vec<Prenote> = entries(file)
            .filter(|(_, entry)| entry.is_prenote())
            .map(|(batch, entry)| Prenote {
                batch_id: batch.id.clone(),
                entry_id: entry.id.clone(),
                trace_number: entry.trace_number.clone(),
                transaction_code: entry.transaction_code,
                dfi_account_number: entry.dfi_account_number.clone(),
            })
            .collect();
        if prenotes.is_empty() {
            return Ok(());
        }

        info!(
            "{}: found {} prenote(s) from {}",
            file.filename,
            prenotes.len(),
            file.hostname
        );
        self.sink
            .send(IncomingEvent::Prenotes {
                filename: file.filename.clone(),
                hostname: file.hostname.clone(),
                hash: file.hash.clone(),
                prenotes,
            })
            .await
    }
}
