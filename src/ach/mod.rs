//! NACHA formatted ACH files
//!
//! A compact reader and writer for the record types ODFI files carry:
//! file header/control (`1`/`9`), batch header/control (`5`/`8`), entry
//! details (`6`) and their addenda (`7`, types 05, 98 and 99).
//!
//! Reading never throws structure away. Field validation problems are
//! reported through [`ReadError`], which still carries every batch and
//! entry that could be recovered.

mod reader;
mod records;
#[cfg(test)]
pub(crate) mod testdata;
mod writer;

use serde::{Deserialize, Serialize};

pub use reader::{FieldError, ReadError, Reader};
pub use records::{
    check_digit, Addenda05, Addenda98, Addenda99, BatchControl, BatchHeader, EntryDetail,
    FileControl, FileHeader, RECORD_LENGTH,
};

/// SEC code of notification of change batches
pub const COR_SEC_CODE: &str = "COR";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Content identity, filled in during ingestion
    #[serde(skip)]
    pub id: Option<String>,
    pub header: BatchHeader,
    pub entries: Vec<EntryDetail>,
    pub control: BatchControl,
}

impl Batch {
    pub fn sec_code(&self) -> &str {
        &self.header.standard_entry_class_code
    }

    pub fn is_correction(&self) -> bool {
        self.sec_code() == COR_SEC_CODE
    }

    /// Entry plus addenda records in this batch
    pub fn entry_addenda_count(&self) -> u32 {
        self.entries
            .iter()
            .map(|e| 1 + e.addenda_count() as u32)
            .sum()
    }

    /// Sum of RDFI routing prefixes, truncated to ten digits
    pub fn entry_hash(&self) -> u64 {
        entry_hash(self.entries.iter())
    }

    pub fn total_debit(&self) -> u64 {
        self.entries.iter().filter(|e| e.is_debit()).map(|e| e.amount).sum()
    }

    pub fn total_credit(&self) -> u64 {
        self.entries.iter().filter(|e| e.is_credit()).map(|e| e.amount).sum()
    }

    /// Recompute the control record from the header and entries
    pub fn build_control(&mut self) {
        self.control = BatchControl {
            service_class_code: self.header.service_class_code,
            entry_addenda_count: self.entry_addenda_count(),
            entry_hash: self.entry_hash(),
            total_debit: self.total_debit(),
            total_credit: self.total_credit(),
            company_identification: self.header.company_identification.clone(),
            message_authentication_code: String::new(),
            odfi_identification: self.header.odfi_identification.clone(),
            batch_number: self.header.batch_number,
        };
    }
}

pub(crate) fn entry_hash<'a>(entries: impl Iterator<Item = &'a EntryDetail>) -> u64 {
    entries
        .map(|e| e.rdfi_identification.parse::<u64>().unwrap_or(0))
        .sum::<u64>()
        % 10_000_000_000
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Content identity, only set when the file header is valid
    #[serde(skip)]
    pub id: Option<String>,
    pub header: FileHeader,
    pub batches: Vec<Batch>,
    pub control: FileControl,
    #[serde(skip)]
    pub(crate) header_valid: bool,
}

impl File {
    pub fn new(header: FileHeader) -> Self {
        Self {
            header,
            header_valid: true,
            ..Default::default()
        }
    }

    /// Whether a file header was present and passed validation
    pub fn has_valid_header(&self) -> bool {
        self.header_valid
    }

    pub fn add_batch(&mut self, batch: Batch) {
        self.batches.push(batch);
    }

    pub fn entries(&self) -> impl Iterator<Item = &EntryDetail> {
        self.batches.iter().flat_map(|b| b.entries.iter())
    }

    /// Recompute every batch control and the file control
    pub fn build_controls(&mut self) {
        for batch in &mut self.batches {
            batch.build_control();
        }
        let records = 2 + self
            .batches
            .iter()
            .map(|b| 2 + b.entry_addenda_count())
            .sum::<u32>();
        self.control = FileControl {
            batch_count: self.batches.len() as u32,
            block_count: records.div_ceil(10),
            entry_addenda_count: self.batches.iter().map(|b| b.entry_addenda_count()).sum(),
            entry_hash: entry_hash(self.entries()),
            total_debit: self.batches.iter().map(|b| b.total_debit()).sum(),
            total_credit: self.batches.iter().map(|b| b.total_credit()).sum(),
        };
    }

    /// Render as NACHA text, padded to a multiple of ten records
    pub fn to_ach_string(&self) -> String {
        writer::write(self)
    }
}
