//! Reader handles onto a pipe
//!
//! Each [`PipeReader`] owns one cursor into the shared buffer. Readers of the
//! same pipe progress independently; the slowest one decides how much space
//! the writer can reclaim.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use super::errors::{WorkError, WorkResult};
use super::pipe::PipeState;

/// One consumer's view of a pipe
pub struct PipeReader<T> {
    state: Rc<RefCell<PipeState<T>>>,
    id: usize,
}

impl<T: Copy> PipeReader<T> {
    pub(crate) fn new(state: Rc<RefCell<PipeState<T>>>, id: usize) -> Self {
        Self { state, id }
    }

    /// Index of this reader within its pipe
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn pipe_name(&self) -> String {
        self.state.borrow().name.clone()
    }

    /// Number of elements written but not yet consumed by this reader
    pub fn readable(&self) -> usize {
        let state = self.state.borrow();
        state.wr - state.rds[self.id]
    }

    /// Borrow the unread elements.
    ///
    /// The guard must be dropped before [`read`](Self::read) is called and
    /// before the pipe's writer asks for space.
    pub fn rd(&self) -> Ref<'_, [T]> {
        Ref::map(self.state.borrow(), |state| {
            &state.buf[state.rds[self.id]..state.wr]
        })
    }

    /// First unread element, if any
    pub fn peek(&self) -> Option<T> {
        self.rd().first().copied()
    }

    /// Mark `n` elements as consumed
    pub fn read(&mut self, n: usize) -> WorkResult {
        let mut state = self.state.borrow_mut();
        let available = state.wr - state.rds[self.id];
        if n > available {
            return Err(WorkError::Underflow {
                pipe: state.name.clone(),
                requested: n,
                available,
            });
        }
        state.rds[self.id] += n;
        state.total_read += n as u64;
        Ok(())
    }
}
