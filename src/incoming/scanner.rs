//! Local directory scanning
//!
//! Every regular file in a staged directory is parsed, identified, audited and
//! then handed to the processor chain. One bad file never stops its siblings;
//! failures are collected and returned once the whole directory was visited.

use std::path::Path;

use tracing::{debug, info, warn};

use super::hash::{digest, populate_hashes};
use super::processor::Processors;
use super::{IncomingFile, IngestError};
use crate::ach::Reader;
use crate::audit::AuditSaver;

/// Parse, audit and process a single file.
///
/// A file with validation errors is still processed when at least one batch
/// could be read. Only files with nothing usable fail outright.
pub async fn process_file(
    path: &Path,
    saver: &AuditSaver,
    processors: &Processors,
) -> Result<(), IngestError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| IngestError::io(path, e))?;

    let (mut file, parse_errors) = match Reader::read(&bytes) {
        Ok(file) => (file, Vec::new()),
        Err(e) if e.has_batches() => {
            warn!("incoming: {}: continuing after {}", path.display(), e);
            let errors = e.errors().to_vec();
            (e.into_partial(), errors)
        }
        Err(source) => {
            return Err(IngestError::Parse {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    populate_hashes(&mut file).map_err(|source| IngestError::Hash {
        path: path.to_path_buf(),
        source,
    })?;
    let hash = match &file.id {
        Some(id) => id.clone(),
        None => digest(&bytes),
    };

    saver.save(&hash).await?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    debug!("incoming: {} is {}", filename, hash);
    let incoming = IncomingFile {
        filename,
        path: path.to_path_buf(),
        hostname: saver.hostname().to_string(),
        hash,
        file,
        parse_errors,
    };
    processors.handle_all(&incoming).await
}

/// Process every regular file directly inside `dir`, in name order.
pub async fn process_dir(
    dir: &Path,
    saver: &AuditSaver,
    processors: &Processors,
) -> Result<(), IngestError> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| IngestError::io(dir, e))?;

    let mut paths = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| IngestError::io(dir, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| IngestError::io(entry.path(), e))?;
        if file_type.is_dir() {
            debug!("incoming: skipping directory {}", entry.path().display());
            continue;
        }
        paths.push(entry.path());
    }
    paths.sort();

    let mut errors = Vec::new();
    for path in &paths {
        if let Err(e) = process_file(path, saver, processors).await {
            warn!("incoming: {}", e);
            errors.push(e);
        }
    }
    info!(
        "incoming: processed {} file(s) in {}, {} failed",
        paths.len(),
        dir.display(),
        errors.len()
    );
    IngestError::collect(errors)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::ach::testdata;
    use crate::audit::MemoryStorage;
    use crate::incoming::processor::tests::RecordingProcessor;
    use crate::incoming::processor::Processor;

    fn saver(storage: &Arc<MemoryStorage>) -> AuditSaver {
        AuditSaver::new(storage.clone(), "sftp.bank.example")
    }

    fn write(dir: &TempDir, name: &str, contents: impl AsRef<[u8]>) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "ppd.ach", testdata::ppd_credit_file().to_ach_string());
        let storage = Arc::new(MemoryStorage::new());
        let recorder = RecordingProcessor::new("recorder");
        let processors = Processors::new().with(recorder.clone());

        process_file(&path, &saver(&storage), &processors).await.unwrap();

        let seen = recorder.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].filename, "ppd.ach");
        assert_eq!(seen[0].hostname, "sftp.bank.example");
        assert_eq!(seen[0].file.id.as_deref(), Some(seen[0].hash.as_str()));
        assert!(seen[0].parse_errors.is_empty());
        assert!(storage.get(&seen[0].hash, "sftp.bank.example").is_some());
    }

    #[tokio::test]
    async fn test_invalid_header_is_still_processed() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = testdata::ppd_credit_file();
        source.header.file_creation_date = String::new();
        let contents = source.to_ach_string();
        let path = write(&dir, "no-date.ach", &contents);
        let storage = Arc::new(MemoryStorage::new());
        let recorder = RecordingProcessor::new("recorder");
        let processors = Processors::new().with(recorder.clone());

        process_file(&path, &saver(&storage), &processors).await.unwrap();

        let seen = recorder.seen();
        assert_eq!(seen.len(), 1);
        let incoming = &seen[0];
        assert!(incoming.file.id.is_none());
        assert_eq!(incoming.hash, digest(contents.as_bytes()));
        assert!(incoming
            .parse_errors
            .iter()
            .any(|e| e.field == "FileCreationDate"));
        for batch in &incoming.file.batches {
            assert!(batch.id.as_deref().is_some_and(|id| !id.is_empty()));
            for entry in &batch.entries {
                assert!(entry.id.as_deref().is_some_and(|id| !id.is_empty()));
            }
        }
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_garbage_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "garbage.ach", "invalid-ach-file");
        let storage = Arc::new(MemoryStorage::new());
        let recorder = RecordingProcessor::new("recorder");
        let processors = Processors::new().with(recorder.clone());

        let err = process_file(&path, &saver(&storage), &processors)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Parse { .. }), "{}", err);
        assert!(err.to_string().contains("garbage.ach"));
        assert!(recorder.seen().is_empty());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let err = process_file(&dir.path().join("nope.ach"), &saver(&storage), &Processors::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }

    /// Fails unless the file was audited first
    struct RequiresAudit(Arc<MemoryStorage>);

    #[async_trait]
    impl Processor for RequiresAudit {
        fn name(&self) -> &'static str {
            "requires-audit"
        }

        async fn handle(&self, file: &IncomingFile) -> Result<(), IngestError> {
            match self.0.get(&file.hash, &file.hostname) {
                Some(_) => Ok(()),
                None => Err(IngestError::processor(self.name(), "not audited")),
            }
        }
    }

    #[tokio::test]
    async fn test_audit_happens_before_processing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "return.ach", testdata::return_file().to_ach_string());
        let storage = Arc::new(MemoryStorage::new());
        let processors = Processors::new().with(RequiresAudit(storage.clone()));

        process_file(&path, &saver(&storage), &processors).await.unwrap();
    }

    #[tokio::test]
    async fn test_process_dir_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "a-garbage.ach", "invalid-ach-file");
        write(&dir, "b-ppd.ach", testdata::ppd_credit_file().to_ach_string());
        write(&dir, "c-garbage.ach", "also invalid");
        write(&dir, "d-return.ach", testdata::return_file().to_ach_string());
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested").join("prenote.ach"),
            testdata::prenote_file().to_ach_string(),
        )
        .unwrap();

        let storage = Arc::new(MemoryStorage::new());
        let recorder = RecordingProcessor::new("recorder");
        let processors = Processors::new().with(recorder.clone());

        let err = process_dir(dir.path(), &saver(&storage), &processors)
            .await
            .unwrap_err();
        assert_eq!(err.count(), 2);
        assert!(err.to_string().starts_with("2 error(s): "));

        let names: Vec<String> = recorder.seen().into_iter().map(|f| f.filename).collect();
        assert_eq!(names, vec!["b-ppd.ach", "d-return.ach"]);
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn test_process_dir_reports_processor_failures() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "ppd.ach", testdata::ppd_credit_file().to_ach_string());
        let storage = Arc::new(MemoryStorage::new());
        let after = RecordingProcessor::new("after");
        let processors = Processors::new()
            .with(RecordingProcessor::failing("first"))
            .with(after.clone());

        let err = process_dir(dir.path(), &saver(&storage), &processors)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Processor { name: "first", .. }));
        assert_eq!(after.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_process_dir_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let err = process_dir(&dir.path().join("absent"), &saver(&storage), &Processors::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }
}
