use std::fmt;

use thiserror::Error;
use tracing::debug;

use super::records::{
    Addenda, BatchControl, BatchHeader, EntryDetail, Fields, FileControl, FileHeader,
    RECORD_LENGTH,
};
use super::{entry_hash, Batch, File};

/// One field that failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// 1-based line number in the source
    pub line: usize,
    pub record: &'static str,
    pub field: &'static str,
    pub msg: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line:{} record:{} field:{} {}",
            self.line, self.record, self.field, self.msg
        )
    }
}

fn summarize(errors: &[FieldError]) -> String {
    match errors {
        [only] => only.to_string(),
        _ => format!(
            "{} errors: {}",
            errors.len(),
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        ),
    }
}

/// Validation failed. The recovered structure is kept alongside the errors.
#[derive(Debug, Error)]
#[error("{}", summarize(.errors))]
pub struct ReadError {
    partial: Box<File>,
    errors: Vec<FieldError>,
}

impl ReadError {
    /// Whatever could be parsed
    pub fn partial(&self) -> &File {
        &self.partial
    }

    pub fn into_partial(self) -> File {
        *self.partial
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// True if at least one batch was recovered
    pub fn has_batches(&self) -> bool {
        !self.partial.batches.is_empty()
    }
}

/// Incremental parse state
#[derive(Default)]
struct ReadState {
    file: File,
    errors: Vec<FieldError>,
    seen_header: bool,
    seen_control: bool,
    batch: Option<Batch>,
}

impl ReadState {
    fn error(&mut self, line: usize, record: &'static str, field: &'static str, msg: impl Into<String>) {
        self.errors.push(FieldError {
            line,
            record,
            field,
            msg: msg.into(),
        });
    }

    fn header(&mut self, line: &str, line_no: usize) {
        if self.seen_header {
            self.error(line_no, "FileHeader", "RecordType", "duplicate file header");
            return;
        }
        let mut fields = Fields::new(line, line_no, "FileHeader");
        self.file.header = FileHeader::parse(&mut fields);
        self.file.header_valid = fields.errors.is_empty();
        self.seen_header = true;
        self.errors.append(&mut fields.errors);
    }

    fn batch_header(&mut self, line: &str, line_no: usize) {
        if let Some(open) = self.batch.take() {
            self.error(line_no, "BatchControl", "RecordType", "batch control missing before next batch header");
            self.file.batches.push(open);
        }
        let mut fields = Fields::new(line, line_no, "BatchHeader");
        let header = BatchHeader::parse(&mut fields);
        self.errors.append(&mut fields.errors);
        self.batch = Some(Batch {
            header,
            ..Default::default()
        });
    }

    fn entry(&mut self, line: &str, line_no: usize) {
        let mut fields = Fields::new(line, line_no, "EntryDetail");
        let entry = EntryDetail::parse(&mut fields);
        self.errors.append(&mut fields.errors);
        match self.batch.as_mut() {
            Some(batch) => batch.entries.push(entry),
            None => self.error(line_no, "EntryDetail", "RecordType", "entry detail outside of a batch"),
        }
    }

    fn addenda(&mut self, line: &str, line_no: usize) {
        let mut fields = Fields::new(line, line_no, "Addenda");
        let addenda = Addenda::parse(&mut fields);
        self.errors.append(&mut fields.errors);
        let Some(addenda) = addenda else {
            return;
        };

        let Some(entry) = self.batch.as_mut().and_then(|b| b.entries.last_mut()) else {
            self.error(line_no, "Addenda", "RecordType", "addenda without a preceding entry detail");
            return;
        };
        if entry.addenda_record_indicator != 1 {
            let trace = entry.trace_number.clone();
            self.error(
                line_no,
                "Addenda",
                "AddendaRecordIndicator",
                format!("entry {} does not expect addenda", trace),
            );
            return;
        }
        match addenda {
            Addenda::Remittance(a) => entry.addenda05.push(a),
            Addenda::Change(a) => entry.addenda98 = Some(a),
            Addenda::Return(a) => entry.addenda99 = Some(a),
        }
    }

    fn batch_control(&mut self, line: &str, line_no: usize) {
        let mut fields = Fields::new(line, line_no, "BatchControl");
        let control = BatchControl::parse(&mut fields);
        self.errors.append(&mut fields.errors);

        let Some(mut batch) = self.batch.take() else {
            self.error(line_no, "BatchControl", "RecordType", "batch control without a batch header");
            return;
        };
        batch.control = control;
        self.check_batch(&batch, line_no);
        self.file.batches.push(batch);
    }

    fn check_batch(&mut self, batch: &Batch, line_no: usize) {
        let control = &batch.control;
        let mut mismatch = |field: &'static str, expected: u64, found: u64| {
            if expected != found {
                self.errors.push(FieldError {
                    line: line_no,
                    record: "BatchControl",
                    field,
                    msg: format!("{} does not match calculated {}", found, expected),
                });
            }
        };
        mismatch(
            "ServiceClassCode",
            u64::from(batch.header.service_class_code),
            u64::from(control.service_class_code),
        );
        mismatch(
            "EntryAddendaCount",
            u64::from(batch.entry_addenda_count()),
            u64::from(control.entry_addenda_count),
        );
        mismatch("EntryHash", batch.entry_hash(), control.entry_hash);
        mismatch("TotalDebitEntryDollarAmount", batch.total_debit(), control.total_debit);
        mismatch("TotalCreditEntryDollarAmount", batch.total_credit(), control.total_credit);
        mismatch(
            "BatchNumber",
            u64::from(batch.header.batch_number),
            u64::from(control.batch_number),
        );
    }

    fn file_control(&mut self, line: &str, line_no: usize) {
        if self.seen_control {
            self.error(line_no, "FileControl", "RecordType", "duplicate file control");
            return;
        }
        let mut fields = Fields::new(line, line_no, "FileControl");
        self.file.control = FileControl::parse(&mut fields);
        self.errors.append(&mut fields.errors);
        self.seen_control = true;

        let file = &self.file;
        let checks = [
            ("BatchCount", file.batches.len() as u64, u64::from(file.control.batch_count)),
            (
                "EntryAddendaCount",
                file.batches.iter().map(|b| u64::from(b.entry_addenda_count())).sum(),
                u64::from(file.control.entry_addenda_count),
            ),
            ("EntryHash", entry_hash(file.entries()), file.control.entry_hash),
            (
                "TotalDebitEntryDollarAmountInFile",
                file.batches.iter().map(|b| b.total_debit()).sum(),
                file.control.total_debit,
            ),
            (
                "TotalCreditEntryDollarAmountInFile",
                file.batches.iter().map(|b| b.total_credit()).sum(),
                file.control.total_credit,
            ),
        ];
        for (field, expected, found) in checks {
            if expected != found {
                self.error(
                    line_no,
                    "FileControl",
                    field,
                    format!("{} does not match calculated {}", found, expected),
                );
            }
        }
    }

    fn finish(mut self, last_line: usize) -> Result<File, ReadError> {
        if let Some(open) = self.batch.take() {
            self.error(last_line, "BatchControl", "RecordType", "batch control missing at end of file");
            self.file.batches.push(open);
        }
        if !self.seen_header {
            self.file.header_valid = false;
            self.error(1, "FileHeader", "RecordType", "file header is missing");
        }
        if !self.seen_control {
            self.error(last_line, "FileControl", "RecordType", "file control is missing");
        }

        if self.errors.is_empty() {
            Ok(self.file)
        } else {
            Err(ReadError {
                partial: Box::new(self.file),
                errors: self.errors,
            })
        }
    }
}

/// Split input into records. Files without line breaks are cut every 94 bytes.
fn records(text: &str) -> Vec<&str> {
    if !text.contains('\n') && text.len() > RECORD_LENGTH && text.len() % RECORD_LENGTH == 0 && text.is_ascii() {
        return (0..text.len())
            .step_by(RECORD_LENGTH)
            .map(|start| &text[start..start + RECORD_LENGTH])
            .collect();
    }
    text.split('\n').map(|l| l.trim_end_matches('\r')).collect()
}

/// NACHA file reader
pub struct Reader;

impl Reader {
    pub fn read(bytes: &[u8]) -> Result<File, ReadError> {
        let text = String::from_utf8_lossy(bytes);
        let mut state = ReadState::default();
        let mut last_line = 0;

        for (idx, line) in records(&text).into_iter().enumerate() {
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            last_line = line_no;

            if !line.is_ascii() || line.len() != RECORD_LENGTH {
                state.error(
                    line_no,
                    "Record",
                    "RecordLength",
                    format!("must be {} ASCII characters, found {}", RECORD_LENGTH, line.chars().count()),
                );
                continue;
            }
            // block padding
            if line.bytes().all(|b| b == b'9') {
                continue;
            }

            match line.as_bytes()[0] {
                b'1' => state.header(line, line_no),
                b'5' => state.batch_header(line, line_no),
                b'6' => state.entry(line, line_no),
                b'7' => state.addenda(line, line_no),
                b'8' => state.batch_control(line, line_no),
                b'9' => state.file_control(line, line_no),
                other => state.error(
                    line_no,
                    "Record",
                    "RecordType",
                    format!("unknown record type {:?}", other as char),
                ),
            }
        }

        let result = state.finish(last_line.max(1));
        if let Err(e) = &result {
            debug!(
                "ach: read {} batch(es) with {} error(s)",
                e.partial().batches.len(),
                e.errors().len()
            );
        }
        result
    }
}
