//! Append-only acknowledgment log shared by every completion and delivery callback.
//!
//! Each record is written and flushed under one lock so lines never interleave.
//! Write failures are logged and the record is dropped; the send and receive loops
//! never see them.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{error, info, warn};

use crate::error::StressError;
use crate::record::LogRecord;

pub struct AckLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl AckLog {
    /// create (or truncate) the log file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StressError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| StressError::LogOpen {
            path: path.clone(),
            source,
        })?;
        info!("Writing acknowledgment log to {}", path.display());

        Ok(AckLog {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// append one line; failures are reported and the record dropped
    pub fn write(&self, record: &LogRecord) {
        if let Err(e) = self.try_write(record) {
            error!(
                "failed writing record for message {} to {}: {}",
                record.id,
                self.path.display(),
                e
            );
        }
    }

    fn try_write(&self, record: &LogRecord) -> io::Result<()> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(writer) => {
                writeln!(writer, "{}", record)?;
                writer.flush()
            }
            None => {
                warn!(
                    "log {} already closed, dropping record for message {}",
                    self.path.display(),
                    record.id
                );
                Ok(())
            }
        }
    }

    /// flush and release the file; later calls do nothing
    pub fn close(&self) {
        let writer = self.lock().take();
        if let Some(mut writer) = writer {
            info!("Closing acknowledgment log {}", self.path.display());
            if let Err(e) = writer.flush() {
                error!("failed flushing {} on close: {}", self.path.display(), e);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

impl Drop for AckLog {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventKind;
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn concurrent_writes_never_interleave() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(AckLog::open(dir.path().join("sender.log")).unwrap());

        let writers: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..200 {
                        log.write(&LogRecord::acknowledged(format!("{}-{}", t, i)));
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        log.close();

        let content = fs::read_to_string(log.path()).unwrap();
        let records: Vec<LogRecord> = content.lines().map(|l| l.parse().unwrap()).collect();
        assert_eq!(records.len(), 8 * 200);
        assert!(records.iter().all(|r| r.kind == EventKind::Acknowledged));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn close_is_idempotent_and_flushes() {
        let dir = TempDir::new().unwrap();
        let log = AckLog::open(dir.path().join("receiver.log")).unwrap();
        log.write(&LogRecord::received("1"));
        log.close();
        log.close();
        assert!(log.is_closed());

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn close_without_writes_leaves_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.log");
        AckLog::open(&path).unwrap().close();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn writes_after_close_are_dropped() {
        let dir = TempDir::new().unwrap();
        let log = AckLog::open(dir.path().join("late.log")).unwrap();
        log.close();
        log.write(&LogRecord::received("late"));
        assert_eq!(fs::read_to_string(log.path()).unwrap(), "");
    }

    #[test]
    fn open_truncates_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.log");
        fs::write(&path, "stale\n").unwrap();
        AckLog::open(&path).unwrap().close();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn open_fails_for_missing_directory() {
        let dir = TempDir::new().unwrap();
        let result = AckLog::open(dir.path().join("nope").join("x.log"));
        assert!(matches!(result, Err(StressError::LogOpen { .. })));
    }
}
