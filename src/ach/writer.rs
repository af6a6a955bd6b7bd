use super::records::RECORD_LENGTH;
use super::File;

const BLOCKING_FACTOR: usize = 10;

pub(crate) fn write(file: &File) -> String {
    let mut lines = vec![file.header.to_line()];
    for batch in &file.batches {
        lines.push(batch.header.to_line());
        for entry in &batch.entries {
            lines.push(entry.to_line());
            lines.extend(entry.addenda05.iter().map(|a| a.to_line()));
            lines.extend(entry.addenda98.iter().map(|a| a.to_line()));
            lines.extend(entry.addenda99.iter().map(|a| a.to_line()));
        }
        lines.push(batch.control.to_line());
    }
    lines.push(file.control.to_line());

    while lines.len() % BLOCKING_FACTOR != 0 {
        lines.push("9".repeat(RECORD_LENGTH));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
