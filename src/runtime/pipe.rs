//! Fixed-capacity typed pipes with one writer and many readers
//!
//! A [`PipeBuf`] owns a contiguous buffer, a write cursor, and one cursor per
//! attached reader. Stages exchange data through [`PipeWriter`] and
//! [`PipeReader`] handles that share the buffer; nothing is copied between
//! producer and consumers.
//!
//! Storage is reclaimed by compaction: when the writer asks for space and the
//! tail holds less than its minimum batch, data no reader still needs is
//! dropped and the live region slides to the front of the buffer. A slow
//! reader therefore throttles the writer instead of losing data.

use std::cell::RefCell;
use std::fmt;
use std::mem::size_of;
use std::rc::Rc;

use tracing::debug;

use super::errors::ConfigError;
use super::reader::PipeReader;
use super::writer::PipeWriter;

/// Default bound on readers attached to one pipe
pub const MAX_READERS: usize = 8;

/// Shared state behind every handle of one pipe
pub(crate) struct PipeState<T> {
    pub(crate) name: String,
    pub(crate) buf: Vec<T>,
    pub(crate) wr: usize,
    pub(crate) rds: Vec<usize>,
    pub(crate) max_readers: usize,
    pub(crate) min_write: usize,
    pub(crate) has_writer: bool,
    pub(crate) total_written: u64,
    pub(crate) total_read: u64,
}

impl<T: Copy> PipeState<T> {
    /// Free space at the tail, without compaction
    pub(crate) fn free(&self) -> usize {
        self.buf.len() - self.wr
    }

    /// Lowest position any reader still needs
    fn low_water(&self) -> usize {
        self.rds.iter().copied().fold(self.wr, usize::min)
    }

    /// Slide the live region to the front of the buffer.
    ///
    /// Returns the number of reclaimed elements.
    pub(crate) fn pack(&mut self) -> usize {
        let low = self.low_water();
        if low == 0 {
            return 0;
        }
        self.buf.copy_within(low..self.wr, 0);
        self.wr -= low;
        for rd in &mut self.rds {
            *rd -= low;
        }
        low
    }

    fn report(&self) -> PipeReport {
        let free = self.free();
        // What the writer would see on its next writable() call
        let writable = if free < self.min_write {
            self.buf.len() - (self.wr - self.low_water())
        } else {
            free
        };
        PipeReport {
            name: self.name.clone(),
            total_read: self.total_read,
            total_written: self.total_written,
            writable,
            min_write: self.min_write,
            unread: self.rds.iter().map(|rd| self.wr - rd).collect(),
            buffer_bytes: self.buf.len() * size_of::<T>(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PipeBuf
// ────────────────────────────────────────────────────────────────────────────

/// A fixed-capacity pipe of `T`.
///
/// Cloning the handle shares the same pipe. Pipes are created directly for
/// standalone use, or through [`Scheduler::pipe`](super::Scheduler::pipe) so
/// they take part in quiescence detection and diagnostics.
pub struct PipeBuf<T> {
    state: Rc<RefCell<PipeState<T>>>,
}

impl<T> Clone for PipeBuf<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Copy + Default + 'static> PipeBuf<T> {
    /// Create a pipe holding up to `capacity` elements
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self::with_max_readers(name, capacity, MAX_READERS)
    }

    /// Create a pipe with a custom bound on attached readers
    pub fn with_max_readers(name: impl Into<String>, capacity: usize, max_readers: usize) -> Self {
        let name = name.into();
        debug!("Creating pipe '{}' with capacity {}", name, capacity);
        Self {
            state: Rc::new(RefCell::new(PipeState {
                name,
                buf: vec![T::default(); capacity],
                wr: 0,
                rds: Vec::new(),
                max_readers,
                min_write: 1,
                has_writer: false,
                total_written: 0,
                total_read: 0,
            })),
        }
    }

    /// Attach a new reader.
    ///
    /// The reader only sees data written after this call.
    pub fn add_reader(&self) -> Result<PipeReader<T>, ConfigError> {
        let mut state = self.state.borrow_mut();
        if state.rds.len() >= state.max_readers {
            return Err(ConfigError::TooManyReaders {
                pipe: state.name.clone(),
                limit: state.max_readers,
            });
        }
        let id = state.rds.len();
        let start = state.wr;
        state.rds.push(start);
        Ok(PipeReader::new(Rc::clone(&self.state), id))
    }

    /// Attach the writer with a minimum batch of one element
    pub fn writer(&self) -> Result<PipeWriter<T>, ConfigError> {
        self.writer_with_min(1)
    }

    /// Attach the writer, declaring the smallest batch it ever needs to write.
    ///
    /// The pipe compacts whenever fewer than `min_write` elements are free at
    /// the tail, so a stage can always expect `min_write` contiguous slots
    /// once readers have caught up.
    pub fn writer_with_min(&self, min_write: usize) -> Result<PipeWriter<T>, ConfigError> {
        let mut state = self.state.borrow_mut();
        if state.has_writer {
            return Err(ConfigError::WriterAlreadyAttached(state.name.clone()));
        }
        if min_write > state.buf.len() {
            return Err(ConfigError::InvalidParameter {
                name: "min_write",
                reason: format!(
                    "pipe '{}' holds {} elements, writer needs {}",
                    state.name,
                    state.buf.len(),
                    min_write
                ),
            });
        }
        state.has_writer = true;
        state.min_write = state.min_write.max(min_write);
        Ok(PipeWriter::new(Rc::clone(&self.state)))
    }

    pub fn name(&self) -> String {
        self.state.borrow().name.clone()
    }

    pub fn capacity(&self) -> usize {
        self.state.borrow().buf.len()
    }

    pub fn num_readers(&self) -> usize {
        self.state.borrow().rds.len()
    }

    pub fn total_written(&self) -> u64 {
        self.state.borrow().total_written
    }

    pub fn total_read(&self) -> u64 {
        self.state.borrow().total_read
    }

    /// Progress fingerprint: total elements written plus total elements read
    pub fn hash(&self) -> u64 {
        PipeStats::hash(&*self.state)
    }

    /// Snapshot of the pipe's utilization
    pub fn report(&self) -> PipeReport {
        self.state.borrow().report()
    }

    /// Type-erased statistics handle for the scheduler
    pub(crate) fn stats_handle(&self) -> Rc<dyn PipeStats> {
        self.state.clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Type-erased statistics
// ────────────────────────────────────────────────────────────────────────────

/// Element-type independent view of a pipe, used for hashing and diagnostics
pub trait PipeStats {
    fn name(&self) -> String;
    fn hash(&self) -> u64;
    fn report(&self) -> PipeReport;
}

impl<T: Copy + 'static> PipeStats for RefCell<PipeState<T>> {
    fn name(&self) -> String {
        self.borrow().name.clone()
    }

    fn hash(&self) -> u64 {
        let state = self.borrow();
        state.total_written.wrapping_add(state.total_read)
    }

    fn report(&self) -> PipeReport {
        self.borrow().report()
    }
}

/// Utilization snapshot of one pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeReport {
    pub name: String,
    pub total_read: u64,
    pub total_written: u64,
    /// Space the writer gets on its next request
    pub writable: usize,
    pub min_write: usize,
    /// Unread element count per reader
    pub unread: Vec<usize>,
    pub buffer_bytes: usize,
}

impl PipeReport {
    /// True when the writer cannot get its minimum batch
    pub fn starved(&self) -> bool {
        self.writable < self.min_write
    }
}

/// Abbreviate a count: raw below 10 000, thousands below one million, else millions
pub fn abbreviate(n: u64) -> String {
    if n < 10_000 {
        format!("{}", n)
    } else if n < 1_000_000 {
        format!("{}k", n / 1_000)
    } else {
        format!("{}M", n / 1_000_000)
    }
}

impl fmt::Display for PipeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unread: Vec<String> = self.unread.iter().map(|n| abbreviate(*n as u64)).collect();
        write!(
            f,
            "{:>16} {:>6}/{:<6} W{}{} R[{}]",
            self.name,
            abbreviate(self.total_read),
            abbreviate(self.total_written),
            abbreviate(self.writable as u64),
            if self.starved() { "!" } else { "" },
            unread.join(",")
        )
    }
}
