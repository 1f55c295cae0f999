//! Buffered file writers.
//!
//! Both writers implement [`std::io::Write`] and buffer everything in
//! memory. Nothing reaches the store until `close()` is called:
//! [`SnapshotWriter::close`] commits the file and returns the new snapshot,
//! [`BatchWriter::close`] stages the file into its batch. A writer dropped
//! without `close()` discards its buffer, mirroring the no-commit-on-error
//! contract of the batch itself.

use std::io;

use crate::batch::Batch;
use crate::error::{Error, Result};
use crate::snapshot::{Snapshot, WriteOptions};

/// Buffered writer that commits one file when closed.
///
/// ```no_run
/// use std::io::Write;
/// use strata::{Store, OpenOptions};
///
/// let store = Store::open("/tmp/repo", OpenOptions::default()).unwrap();
/// let fs = store.branches().get("main").unwrap();
/// let mut w = fs.writer("output.bin").unwrap();
/// w.write_all(b"chunk 1").unwrap();
/// w.write_all(b"chunk 2").unwrap();
/// let fs2 = w.close().unwrap();
/// assert!(fs2.exists("output.bin").unwrap());
/// ```
pub struct SnapshotWriter {
    fs: Snapshot,
    path: String,
    buf: Vec<u8>,
    result: Option<Snapshot>,
}

impl SnapshotWriter {
    pub(crate) fn new(fs: Snapshot, path: String) -> Self {
        Self {
            fs,
            path,
            buf: Vec::new(),
            result: None,
        }
    }

    /// Whether `close()` has already committed.
    pub fn is_closed(&self) -> bool {
        self.result.is_some()
    }

    /// Commit the buffered bytes and return the new snapshot.
    ///
    /// Closing twice returns the snapshot from the first close without
    /// committing again.
    pub fn close(&mut self) -> Result<Snapshot> {
        if let Some(fs) = &self.result {
            return Ok(fs.clone());
        }
        let data = std::mem::take(&mut self.buf);
        let fs = self.fs.write(&self.path, &data, WriteOptions::default())?;
        self.result = Some(fs.clone());
        Ok(fs)
    }
}

impl io::Write for SnapshotWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.result.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                Error::invalid_state("write to closed writer"),
            ));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Buffered writer that stages one file into a [`Batch`] when closed.
///
/// ```no_run
/// use std::io::Write;
/// use strata::{Store, OpenOptions};
///
/// let store = Store::open("/tmp/repo", OpenOptions::default()).unwrap();
/// let fs = store.branches().get("main").unwrap();
/// let mut batch = fs.batch(Default::default()).unwrap();
/// {
///     let mut w = batch.writer("data.bin").unwrap();
///     w.write_all(b"chunk").unwrap();
///     w.close().unwrap();
/// }
/// let fs2 = batch.commit().unwrap();
/// assert!(fs2.exists("data.bin").unwrap());
/// ```
pub struct BatchWriter<'a> {
    batch: &'a mut Batch,
    path: String,
    buf: Vec<u8>,
    closed: bool,
}

impl<'a> BatchWriter<'a> {
    pub(crate) fn new(batch: &'a mut Batch, path: String) -> Self {
        Self {
            batch,
            path,
            buf: Vec::new(),
            closed: false,
        }
    }

    /// Whether `close()` has already staged the file.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stage the buffered bytes into the batch. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let data = std::mem::take(&mut self.buf);
        self.batch.write(&self.path, &data)?;
        self.closed = true;
        Ok(())
    }
}

impl io::Write for BatchWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                Error::invalid_state("write to closed writer"),
            ));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
