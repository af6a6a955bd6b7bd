//! Sample files shared by ACH and ingestion tests

use super::*;

pub(crate) fn file_header() -> FileHeader {
    FileHeader {
        priority_code: "01".to_string(),
        immediate_destination: "231380104".to_string(),
        immediate_origin: "121042882".to_string(),
        file_creation_date: "190816".to_string(),
        file_creation_time: "1055".to_string(),
        file_id_modifier: "A".to_string(),
        immediate_destination_name: "Federal Reserve Bank".to_string(),
        immediate_origin_name: "My Bank Name".to_string(),
        reference_code: String::new(),
    }
}

pub(crate) fn batch_header(sec: &str, service_class_code: u16, batch_number: u32) -> BatchHeader {
    BatchHeader {
        service_class_code,
        company_name: "Name on Account".to_string(),
        company_identification: "121042882".to_string(),
        standard_entry_class_code: sec.to_string(),
        company_entry_description: "PAYROLL".to_string(),
        effective_entry_date: "190816".to_string(),
        originator_status_code: "1".to_string(),
        odfi_identification: "12104288".to_string(),
        batch_number,
        ..Default::default()
    }
}

pub(crate) fn entry(transaction_code: u8, amount: u64, sequence: u32) -> EntryDetail {
    EntryDetail {
        transaction_code,
        rdfi_identification: "23138010".to_string(),
        check_digit: "4".to_string(),
        dfi_account_number: "81967038518".to_string(),
        amount,
        identification_number: "#83738AB#".to_string(),
        individual_name: "Steven Tander".to_string(),
        trace_number: format!("12104288{:07}", sequence),
        ..Default::default()
    }
}

fn single_batch_file(header: BatchHeader, entries: Vec<EntryDetail>) -> File {
    let mut file = File::new(file_header());
    file.add_batch(Batch {
        header,
        entries,
        ..Default::default()
    });
    file.build_controls();
    file
}

pub(crate) fn ppd_credit_file() -> File {
    let mut second = entry(22, 50_000, 2);
    second.addenda_record_indicator = 1;
    second.addenda05.push(Addenda05 {
        payment_related_information: "Payroll for March".to_string(),
        sequence_number: 1,
        entry_detail_sequence_number: "0000002".to_string(),
    });
    single_batch_file(
        batch_header("PPD", 220, 1),
        vec![entry(22, 100_000, 1), second],
    )
}

pub(crate) fn return_file() -> File {
    let mut returned = entry(21, 100_000, 1);
    returned.addenda_record_indicator = 1;
    returned.addenda99 = Some(Addenda99 {
        return_code: "R03".to_string(),
        original_trace: "121042880000001".to_string(),
        original_dfi: "23138010".to_string(),
        addenda_information: "No account located".to_string(),
        trace_number: returned.trace_number.clone(),
        ..Default::default()
    });
    single_batch_file(batch_header("PPD", 220, 1), vec![returned])
}

pub(crate) fn correction_file() -> File {
    let mut corrected = entry(21, 0, 1);
    corrected.addenda_record_indicator = 1;
    corrected.addenda98 = Some(Addenda98 {
        change_code: "C01".to_string(),
        original_trace: "121042880000001".to_string(),
        original_dfi: "23138010".to_string(),
        corrected_data: "1918171614".to_string(),
        trace_number: corrected.trace_number.clone(),
    });
    single_batch_file(batch_header("COR", 220, 1), vec![corrected])
}

pub(crate) fn prenote_file() -> File {
    single_batch_file(
        batch_header("PPD", 200, 1),
        vec![entry(23, 0, 1), entry(22, 12_500, 2)],
    )
}
