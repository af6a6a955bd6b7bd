//! Fixed-width NACHA records
//!
//! Every record is 94 ASCII characters. Positions below are 1-based and
//! inclusive, matching the NACHA operating rules.

use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::FieldError;

pub const RECORD_LENGTH: usize = 94;

/// Valid entry detail transaction codes
const TRANSACTION_CODES: &[u8] = &[
    21, 22, 23, 24, 26, 27, 28, 29, 31, 32, 33, 34, 36, 37, 38, 39, 41, 42, 43, 44, 46, 47, 48,
    49, 51, 52, 53, 54, 55, 56,
];

const SERVICE_CLASS_CODES: &[u16] = &[200, 220, 225, 280];

/// Field cursor over one validated 94 character line
pub(crate) struct Fields<'a> {
    line: &'a str,
    line_no: usize,
    record: &'static str,
    pub(crate) errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(line: &'a str, line_no: usize, record: &'static str) -> Self {
        Self {
            line,
            line_no,
            record,
            errors: Vec::new(),
        }
    }

    fn raw(&self, start: usize, end: usize) -> &'a str {
        &self.line[start - 1..end]
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.raw(start, end).trim().to_string()
    }

    /// Blank numeric fields read as zero
    fn number<T: FromStr + Default>(&mut self, start: usize, end: usize, field: &'static str) -> T {
        let raw = self.raw(start, end).trim();
        if raw.is_empty() {
            return T::default();
        }
        match raw.parse() {
            Ok(v) if raw.bytes().all(|b| b.is_ascii_digit()) => v,
            _ => {
                self.error(field, format!("{:?} is not numeric", raw));
                T::default()
            }
        }
    }

    fn error(&mut self, field: &'static str, msg: impl Into<String>) {
        self.errors.push(FieldError {
            line: self.line_no,
            record: self.record,
            field,
            msg: msg.into(),
        });
    }

    fn mandatory(&mut self, field: &'static str, value: &str) {
        if value.is_empty() {
            self.error(field, "is a mandatory field");
        }
    }

    fn digits(&mut self, field: &'static str, value: &str, len: usize) {
        if value.len() != len || !value.bytes().all(|b| b.is_ascii_digit()) {
            self.error(field, format!("{:?} must be {} digits", value, len));
        }
    }
}

fn alpha(value: &str, width: usize) -> String {
    format!("{:<width$.width$}", value, width = width)
}

fn numeric(value: impl std::fmt::Display, width: usize) -> String {
    format!("{:0>width$}", value.to_string(), width = width)
}

fn routing(value: &str) -> String {
    format!("{:>10.10}", value)
}

/// ABA check digit for the first eight digits of a routing number
pub fn check_digit(rdfi: &str) -> Option<u8> {
    const WEIGHTS: [u32; 8] = [3, 7, 1, 3, 7, 1, 3, 7];
    if rdfi.len() != 8 {
        return None;
    }
    let mut sum = 0;
    for (c, w) in rdfi.chars().zip(WEIGHTS) {
        sum += c.to_digit(10)? * w;
    }
    Some(((10 - sum % 10) % 10) as u8)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub priority_code: String,
    pub immediate_destination: String,
    pub immediate_origin: String,
    pub file_creation_date: String,
    pub file_creation_time: String,
    pub file_id_modifier: String,
    pub immediate_destination_name: String,
    pub immediate_origin_name: String,
    pub reference_code: String,
}

impl FileHeader {
    pub(crate) fn parse(f: &mut Fields<'_>) -> Self {
        let header = Self {
            priority_code: f.text(2, 3),
            immediate_destination: f.text(4, 13),
            immediate_origin: f.text(14, 23),
            file_creation_date: f.text(24, 29),
            file_creation_time: f.text(30, 33),
            file_id_modifier: f.text(34, 34),
            immediate_destination_name: f.text(41, 63),
            immediate_origin_name: f.text(64, 86),
            reference_code: f.text(87, 94),
        };

        if f.raw(35, 37) != "094" {
            f.error("RecordSize", format!("{:?} must be 094", f.raw(35, 37)));
        }
        if f.raw(38, 39) != "10" {
            f.error("BlockingFactor", format!("{:?} must be 10", f.raw(38, 39)));
        }
        if f.raw(40, 40) != "1" {
            f.error("FormatCode", format!("{:?} must be 1", f.raw(40, 40)));
        }
        header.validate(f);
        header
    }

    fn validate(&self, f: &mut Fields<'_>) {
        f.mandatory("ImmediateDestination", &self.immediate_destination);
        f.mandatory("ImmediateOrigin", &self.immediate_origin);
        if self.file_creation_date.is_empty() {
            f.error("FileCreationDate", "is a mandatory field");
        } else if NaiveDate::parse_from_str(&self.file_creation_date, "%y%m%d").is_err() {
            f.error(
                "FileCreationDate",
                format!("{:?} is not a YYMMDD date", self.file_creation_date),
            );
        }
        let modifier_ok = self.file_id_modifier.len() == 1
            && self
                .file_id_modifier
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        if !modifier_ok {
            f.error("FileIDModifier", "must be A-Z or 0-9");
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "1{}{}{}{}{}{}094101{}{}{}",
            numeric(&self.priority_code, 2),
            routing(&self.immediate_destination),
            routing(&self.immediate_origin),
            alpha(&self.file_creation_date, 6),
            alpha(&self.file_creation_time, 4),
            alpha(&self.file_id_modifier, 1),
            alpha(&self.immediate_destination_name, 23),
            alpha(&self.immediate_origin_name, 23),
            alpha(&self.reference_code, 8),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub service_class_code: u16,
    pub company_name: String,
    pub company_discretionary_data: String,
    pub company_identification: String,
    pub standard_entry_class_code: String,
    pub company_entry_description: String,
    pub company_descriptive_date: String,
    pub effective_entry_date: String,
    pub settlement_date: String,
    pub originator_status_code: String,
    pub odfi_identification: String,
    pub batch_number: u32,
}

impl BatchHeader {
    pub(crate) fn parse(f: &mut Fields<'_>) -> Self {
        let header = Self {
            service_class_code: f.number(2, 4, "ServiceClassCode"),
            company_name: f.text(5, 20),
            company_discretionary_data: f.text(21, 40),
            company_identification: f.text(41, 50),
            standard_entry_class_code: f.text(51, 53),
            company_entry_description: f.text(54, 63),
            company_descriptive_date: f.text(64, 69),
            effective_entry_date: f.text(70, 75),
            settlement_date: f.text(76, 78),
            originator_status_code: f.text(79, 79),
            odfi_identification: f.text(80, 87),
            batch_number: f.number(88, 94, "BatchNumber"),
        };

        if !SERVICE_CLASS_CODES.contains(&header.service_class_code) {
            f.error(
                "ServiceClassCode",
                format!("{} is not a valid service class code", header.service_class_code),
            );
        }
        let sec = &header.standard_entry_class_code;
        if sec.len() != 3 || !sec.bytes().all(|b| b.is_ascii_uppercase()) {
            f.error("StandardEntryClassCode", format!("{:?} is not a valid SEC code", sec));
        }
        f.mandatory("CompanyIdentification", &header.company_identification);
        f.digits("ODFIIdentification", &header.odfi_identification, 8);
        header
    }

    pub fn to_line(&self) -> String {
        format!(
            "5{}{}{}{}{}{}{}{}{}{}{}{}",
            numeric(self.service_class_code, 3),
            alpha(&self.company_name, 16),
            alpha(&self.company_discretionary_data, 20),
            alpha(&self.company_identification, 10),
            alpha(&self.standard_entry_class_code, 3),
            alpha(&self.company_entry_description, 10),
            alpha(&self.company_descriptive_date, 6),
            alpha(&self.effective_entry_date, 6),
            alpha(&self.settlement_date, 3),
            alpha(&self.originator_status_code, 1),
            alpha(&self.odfi_identification, 8),
            numeric(self.batch_number, 7),
        )
    }
}

/// Remittance information (`7` record, type code 05)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addenda05 {
    pub payment_related_information: String,
    pub sequence_number: u32,
    pub entry_detail_sequence_number: String,
}

/// Notification of change (`7` record, type code 98)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addenda98 {
    pub change_code: String,
    pub original_trace: String,
    pub original_dfi: String,
    pub corrected_data: String,
    pub trace_number: String,
}

/// Return (`7` record, type code 99)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addenda99 {
    pub return_code: String,
    pub original_trace: String,
    pub date_of_death: String,
    pub original_dfi: String,
    pub addenda_information: String,
    pub trace_number: String,
}

/// A parsed `7` record before it is attached to its entry
pub(crate) enum Addenda {
    Remittance(Addenda05),
    Change(Addenda98),
    Return(Addenda99),
}

impl Addenda {
    pub(crate) fn parse(f: &mut Fields<'_>) -> Option<Self> {
        match f.raw(2, 3) {
            "05" => Some(Addenda::Remittance(Addenda05 {
                payment_related_information: f.text(4, 83),
                sequence_number: f.number(84, 87, "SequenceNumber"),
                entry_detail_sequence_number: f.text(88, 94),
            })),
            "98" => {
                let addenda = Addenda98 {
                    change_code: f.text(4, 6),
                    original_trace: f.text(7, 21),
                    original_dfi: f.text(28, 35),
                    corrected_data: f.text(36, 64),
                    trace_number: f.text(80, 94),
                };
                if !is_reason_code(&addenda.change_code, 'C') {
                    f.error("ChangeCode", format!("{:?} is not a valid change code", addenda.change_code));
                }
                f.mandatory("CorrectedData", &addenda.corrected_data);
                Some(Addenda::Change(addenda))
            }
            "99" => {
                let addenda = Addenda99 {
                    return_code: f.text(4, 6),
                    original_trace: f.text(7, 21),
                    date_of_death: f.text(22, 27),
                    original_dfi: f.text(28, 35),
                    addenda_information: f.text(36, 79),
                    trace_number: f.text(80, 94),
                };
                if !is_reason_code(&addenda.return_code, 'R') {
                    f.error("ReturnCode", format!("{:?} is not a valid return code", addenda.return_code));
                }
                Some(Addenda::Return(addenda))
            }
            other => {
                f.error("TypeCode", format!("{:?} is not a supported addenda type", other));
                None
            }
        }
    }
}

fn is_reason_code(code: &str, prefix: char) -> bool {
    let mut chars = code.chars();
    chars.next() == Some(prefix) && code.len() == 3 && chars.all(|c| c.is_ascii_digit())
}

impl Addenda05 {
    pub fn to_line(&self) -> String {
        format!(
            "705{}{}{}",
            alpha(&self.payment_related_information, 80),
            numeric(self.sequence_number, 4),
            numeric(&self.entry_detail_sequence_number, 7),
        )
    }
}

impl Addenda98 {
    pub fn to_line(&self) -> String {
        format!(
            "798{}{}{}{}{}{}{}",
            alpha(&self.change_code, 3),
            alpha(&self.original_trace, 15),
            alpha("", 6),
            alpha(&self.original_dfi, 8),
            alpha(&self.corrected_data, 29),
            alpha("", 15),
            alpha(&self.trace_number, 15),
        )
    }
}

impl Addenda99 {
    pub fn to_line(&self) -> String {
        format!(
            "799{}{}{}{}{}{}",
            alpha(&self.return_code, 3),
            alpha(&self.original_trace, 15),
            alpha(&self.date_of_death, 6),
            alpha(&self.original_dfi, 8),
            alpha(&self.addenda_information, 44),
            alpha(&self.trace_number, 15),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDetail {
    /// Content identity, filled in during ingestion
    #[serde(skip)]
    pub id: Option<String>,

    pub transaction_code: u8,
    pub rdfi_identification: String,
    pub check_digit: String,
    pub dfi_account_number: String,
    /// Cents
    pub amount: u64,
    pub identification_number: String,
    pub individual_name: String,
    pub discretionary_data: String,
    pub addenda_record_indicator: u8,
    pub trace_number: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addenda05: Vec<Addenda05>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addenda98: Option<Addenda98>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addenda99: Option<Addenda99>,
}

impl EntryDetail {
    pub(crate) fn parse(f: &mut Fields<'_>) -> Self {
        let entry = Self {
            id: None,
            transaction_code: f.number(2, 3, "TransactionCode"),
            rdfi_identification: f.text(4, 11),
            check_digit: f.text(12, 12),
            dfi_account_number: f.text(13, 29),
            amount: f.number(30, 39, "Amount"),
            identification_number: f.text(40, 54),
            individual_name: f.text(55, 76),
            discretionary_data: f.text(77, 78),
            addenda_record_indicator: f.number(79, 79, "AddendaRecordIndicator"),
            trace_number: f.text(80, 94),
            addenda05: Vec::new(),
            addenda98: None,
            addenda99: None,
        };

        if !TRANSACTION_CODES.contains(&entry.transaction_code) {
            f.error(
                "TransactionCode",
                format!("{} is not a valid transaction code", entry.transaction_code),
            );
        }
        f.digits("RDFIIdentification", &entry.rdfi_identification, 8);
        match check_digit(&entry.rdfi_identification) {
            Some(expected) if entry.check_digit == expected.to_string() => {}
            Some(expected) => f.error(
                "CheckDigit",
                format!("{:?} does not match calculated check digit {}", entry.check_digit, expected),
            ),
            None => {}
        }
        f.mandatory("DFIAccountNumber", &entry.dfi_account_number);
        if entry.addenda_record_indicator > 1 {
            f.error("AddendaRecordIndicator", "must be 0 or 1");
        }
        f.digits("TraceNumber", &entry.trace_number, 15);
        if entry.is_prenote() && entry.amount != 0 {
            f.error("Amount", "prenote entries must have a zero amount");
        }
        entry
    }

    pub fn is_credit(&self) -> bool {
        matches!(self.transaction_code % 10, 1..=4)
    }

    pub fn is_debit(&self) -> bool {
        matches!(self.transaction_code % 10, 5..=9)
    }

    /// Zero dollar account validation entries
    pub fn is_prenote(&self) -> bool {
        matches!(self.transaction_code, 23 | 28 | 33 | 38 | 43 | 48 | 53)
    }

    /// Number of `7` records following this entry
    pub fn addenda_count(&self) -> usize {
        self.addenda05.len()
            + usize::from(self.addenda98.is_some())
            + usize::from(self.addenda99.is_some())
    }

    pub fn to_line(&self) -> String {
        format!(
            "6{}{}{}{}{}{}{}{}{}{}",
            numeric(self.transaction_code, 2),
            alpha(&self.rdfi_identification, 8),
            alpha(&self.check_digit, 1),
            alpha(&self.dfi_account_number, 17),
            numeric(self.amount, 10),
            alpha(&self.identification_number, 15),
            alpha(&self.individual_name, 22),
            alpha(&self.discretionary_data, 2),
            numeric(self.addenda_record_indicator, 1),
            numeric(&self.trace_number, 15),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchControl {
    pub service_class_code: u16,
    pub entry_addenda_count: u32,
    pub entry_hash: u64,
    pub total_debit: u64,
    pub total_credit: u64,
    pub company_identification: String,
    pub message_authentication_code: String,
    pub odfi_identification: String,
    pub batch_number: u32,
}

impl BatchControl {
    pub(crate) fn parse(f: &mut Fields<'_>) -> Self {
        Self {
            service_class_code: f.number(2, 4, "ServiceClassCode"),
            entry_addenda_count: f.number(5, 10, "EntryAddendaCount"),
            entry_hash: f.number(11, 20, "EntryHash"),
            total_debit: f.number(21, 32, "TotalDebitEntryDollarAmount"),
            total_credit: f.number(33, 44, "TotalCreditEntryDollarAmount"),
            company_identification: f.text(45, 54),
            message_authentication_code: f.text(55, 73),
            odfi_identification: f.text(80, 87),
            batch_number: f.number(88, 94, "BatchNumber"),
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "8{}{}{}{}{}{}{}{}{}{}",
            numeric(self.service_class_code, 3),
            numeric(self.entry_addenda_count, 6),
            numeric(self.entry_hash, 10),
            numeric(self.total_debit, 12),
            numeric(self.total_credit, 12),
            alpha(&self.company_identification, 10),
            alpha(&self.message_authentication_code, 19),
            alpha("", 6),
            alpha(&self.odfi_identification, 8),
            numeric(self.batch_number, 7),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileControl {
    pub batch_count: u32,
    pub block_count: u32,
    pub entry_addenda_count: u32,
    pub entry_hash: u64,
    pub total_debit: u64,
    pub total_credit: u64,
}

impl FileControl {
    pub(crate) fn parse(f: &mut Fields<'_>) -> Self {
        Self {
            batch_count: f.number(2, 7, "BatchCount"),
            block_count: f.number(8, 13, "BlockCount"),
            entry_addenda_count: f.number(14, 21, "EntryAddendaCount"),
            entry_hash: f.number(22, 31, "EntryHash"),
            total_debit: f.number(32, 43, "TotalDebitEntryDollarAmountInFile"),
            total_credit: f.number(44, 55, "TotalCreditEntryDollarAmountInFile"),
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "9{}{}{}{}{}{}{}",
            numeric(self.batch_count, 6),
            numeric(self.block_count, 6),
            numeric(self.entry_addenda_count, 8),
            numeric(self.entry_hash, 10),
            numeric(self.total_debit, 12),
            numeric(self.total_credit, 12),
            alpha("", 39),
        )
    }
}
