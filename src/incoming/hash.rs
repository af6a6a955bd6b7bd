//! Content identities for parsed files
//!
//! Identities are hex SHA-256 digests over the JSON form of each record's
//! business fields. Identity fields are never part of their own input, so
//! the same bytes always produce the same ids regardless of filename, host or
//! time of processing.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ach::{BatchControl, BatchHeader, File, FileControl, FileHeader};

#[derive(Serialize)]
struct BatchIdentity<'a> {
    header: &'a BatchHeader,
    entries: Vec<&'a str>,
    control: &'a BatchControl,
}

#[derive(Serialize)]
struct FileIdentity<'a> {
    header: &'a FileHeader,
    batches: Vec<&'a str>,
    control: &'a FileControl,
}

pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn identity<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(digest(&serde_json::to_vec(value)?))
}

/// Write identities onto every entry and batch, and onto the file itself when
/// its header is valid. Runs on partially parsed files too.
pub fn populate_hashes(file: &mut File) -> Result<(), serde_json::Error> {
    for batch in &mut file.batches {
        for entry in &mut batch.entries {
            entry.id = Some(identity(&*entry)?);
        }
        let id = identity(&BatchIdentity {
            header: &batch.header,
            entries: batch
                .entries
                .iter()
                .map(|e| e.id.as_deref().unwrap_or_default())
                .collect(),
            control: &batch.control,
        })?;
        batch.id = Some(id);
    }

    file.id = if file.has_valid_header() {
        Some(identity(&FileIdentity {
            header: &file.header,
            batches: file
                .batches
                .iter()
                .map(|b| b.id.as_deref().unwrap_or_default())
                .collect(),
            control: &file.control,
        })?)
    } else {
        None
    };
    Ok(())
}
