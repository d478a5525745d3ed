//! The writer handle of a pipe
//!
//! A pipe has exactly one [`PipeWriter`]. The writer asks for contiguous
//! space with [`writable`](PipeWriter::writable), fills the slice returned by
//! [`wr`](PipeWriter::wr) in place, then commits with
//! [`written`](PipeWriter::written). Committing more than was free is a
//! programming error and is reported, never clipped.

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use super::errors::{WorkError, WorkResult};
use super::pipe::PipeState;

/// The producer's view of a pipe
pub struct PipeWriter<T> {
    state: Rc<RefCell<PipeState<T>>>,
}

impl<T: Copy> PipeWriter<T> {
    pub(crate) fn new(state: Rc<RefCell<PipeState<T>>>) -> Self {
        Self { state }
    }

    pub fn pipe_name(&self) -> String {
        self.state.borrow().name.clone()
    }

    /// Minimum batch the pipe keeps room for
    pub fn min_write(&self) -> usize {
        self.state.borrow().min_write
    }

    /// Contiguous space available at the write cursor.
    ///
    /// Compacts the buffer first when less than the minimum batch is free.
    pub fn writable(&self) -> usize {
        let mut state = self.state.borrow_mut();
        if state.free() < state.min_write {
            state.pack();
        }
        state.free()
    }

    /// Borrow the free region after the write cursor.
    ///
    /// Call [`writable`](Self::writable) first so compaction has happened.
    pub fn wr(&self) -> RefMut<'_, [T]> {
        RefMut::map(self.state.borrow_mut(), |state| {
            let wr = state.wr;
            &mut state.buf[wr..]
        })
    }

    /// Commit `n` elements filled through [`wr`](Self::wr)
    pub fn written(&mut self, n: usize) -> WorkResult {
        let mut state = self.state.borrow_mut();
        let available = state.free();
        if n > available {
            return Err(WorkError::Overflow {
                pipe: state.name.clone(),
                requested: n,
                available,
            });
        }
        state.wr += n;
        state.total_written += n as u64;
        Ok(())
    }

    /// Append one element
    pub fn write(&mut self, value: T) -> WorkResult {
        self.write_slice(&[value])
    }

    /// Append a slice, all or nothing.
    ///
    /// Compacts when the slice does not fit the free tail, even if it is
    /// smaller than the minimum batch.
    pub fn write_slice(&mut self, values: &[T]) -> WorkResult {
        let available = {
            let mut state = self.state.borrow_mut();
            if state.free() < values.len().max(state.min_write) {
                state.pack();
            }
            state.free()
        };
        if values.len() > available {
            return Err(WorkError::Overflow {
                pipe: self.pipe_name(),
                requested: values.len(),
                available,
            });
        }
        self.wr()[..values.len()].copy_from_slice(values);
        self.written(values.len())
    }
}

/// Helpers for outputs that may be left unconnected
pub trait OptionalWriter<T> {
    /// True when the output is absent or has room for `n` elements
    fn opt_writable(&self, n: usize) -> bool;

    /// Append one element if the output is connected
    fn opt_write(&mut self, value: T) -> WorkResult;
}

impl<T: Copy> OptionalWriter<T> for Option<PipeWriter<T>> {
    fn opt_writable(&self, n: usize) -> bool {
        self.as_ref().is_none_or(|w| w.writable() >= n)
    }

    fn opt_write(&mut self, value: T) -> WorkResult {
        match self {
            Some(w) => w.write(value),
            None => Ok(()),
        }
    }
}
