use super::Handle;
use crate::constants::READ_HANDLE_CAPACITY;
use crate::error::{Result, StreamError};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Unknown,
    Ok,
    Exception,
}

/// What a read-side handle is bound to.
#[derive(Debug, Clone)]
pub(crate) enum ReadEntry {
    /// A value (possibly `Value::Null` while still under construction).
    Object(Value),
    /// Read unshared; back-references to it are illegal.
    Unshared,
    /// A class descriptor whose body is still being read.
    Pending,
    /// Deferred class resolution failure.
    Failed(StreamError),
}

/// Handle table of the reader, with deferred exception propagation.
///
/// Each handle is `Unknown` while open, then `Ok` or `Exception`. A dependency of an open handle
/// on another open handle is recorded so that a failure of the target, raised later, reaches
/// the dependent too. Handles must be finished in reverse order of assignment; the table keeps
/// the open handles on a stack and rejects any other order.
#[derive(Debug)]
pub(crate) struct ReadHandles {
    status: Vec<Status>,
    entries: Vec<ReadEntry>,
    deps: Vec<Option<Vec<usize>>>,
    low_dep: Option<usize>,
    open: Vec<usize>,
}

impl ReadHandles {
    pub(crate) fn new() -> Self {
        Self {
            status: Vec::with_capacity(READ_HANDLE_CAPACITY),
            entries: Vec::with_capacity(READ_HANDLE_CAPACITY),
            deps: Vec::with_capacity(READ_HANDLE_CAPACITY),
            low_dep: None,
            open: Vec::new(),
        }
    }

    /// Opens a new handle in the `Unknown` state.
    pub(crate) fn assign(&mut self, entry: ReadEntry) -> Handle {
        let handle = self.entries.len();
        self.status.push(Status::Unknown);
        self.entries.push(entry);
        self.deps.push(None);
        self.open.push(handle);
        log::trace!("[reader] assigned handle {handle}");
        Handle::new(handle)
    }

    /// Records that `dependent` relies on `target`.
    pub(crate) fn mark_dependency(
        &mut self,
        dependent: Option<Handle>,
        target: Option<Handle>,
    ) -> Result<()> {
        let (Some(dep), Some(tgt)) = (dependent, target) else {
            return Ok(());
        };
        let (dep, tgt) = (dep.index(), tgt.index());
        match self.status_of(dep)? {
            Status::Unknown => match self.status_of(tgt)? {
                Status::Ok => {}
                Status::Exception => {
                    if let ReadEntry::Failed(err) = &self.entries[tgt] {
                        let err = err.clone();
                        self.mark_exception(Handle::new(dep), err)?;
                    }
                }
                Status::Unknown => {
                    self.deps[tgt].get_or_insert_with(Vec::new).push(dep);
                    if self.low_dep.is_none_or(|low| low > tgt) {
                        self.low_dep = Some(tgt);
                    }
                }
            },
            Status::Exception => {}
            Status::Ok => {
                return Err(StreamError::Internal(format!(
                    "dependency recorded on finished handle {dep}"
                )));
            }
        }
        Ok(())
    }

    /// Fails `handle` and, transitively, everything that depends on it.
    pub(crate) fn mark_exception(&mut self, handle: Handle, err: StreamError) -> Result<()> {
        let mut work = vec![handle.index()];
        while let Some(h) = work.pop() {
            match self.status_of(h)? {
                Status::Unknown => {
                    self.status[h] = Status::Exception;
                    self.entries[h] = ReadEntry::Failed(err.clone());
                    if let Some(dependents) = self.deps[h].take() {
                        work.extend(dependents);
                    }
                }
                Status::Exception => {}
                Status::Ok => {
                    return Err(StreamError::Internal(format!(
                        "exception marked on finished handle {h}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Closes `handle`.
    ///
    /// If no lower handle is still needed by a dependency, every open handle from `handle` up
    /// becomes `Ok`; otherwise promotion waits until that lower handle is finished.
    pub(crate) fn finish(&mut self, handle: Handle) -> Result<()> {
        let h = handle.index();
        if self.open.last() != Some(&h) {
            return Err(StreamError::Internal(format!(
                "handle finished out of order: {h}"
            )));
        }
        self.open.pop();

        let end = match self.low_dep {
            None => h + 1,
            Some(low) if low >= h => {
                self.low_dep = None;
                self.entries.len()
            }
            Some(_) => return Ok(()),
        };
        for i in h..end {
            if self.status[i] == Status::Unknown {
                self.status[i] = Status::Ok;
                self.deps[i] = None;
            }
        }
        Ok(())
    }

    /// Binds `handle` to `value`, unless it already failed. An unshared marker is kept.
    pub(crate) fn set_object(&mut self, handle: Handle, value: Value) -> Result<()> {
        let h = handle.index();
        match self.status_of(h)? {
            Status::Unknown | Status::Ok => {
                if !matches!(self.entries[h], ReadEntry::Unshared) {
                    self.entries[h] = ReadEntry::Object(value);
                }
            }
            Status::Exception => {}
        }
        Ok(())
    }

    /// Bound value; `None` if the handle failed (or holds no value).
    pub(crate) fn lookup_object(&self, handle: Handle) -> Option<&ReadEntry> {
        let h = handle.index();
        match self.status.get(h) {
            Some(Status::Exception) | None => None,
            Some(_) => self.entries.get(h),
        }
    }

    /// Deferred failure of `handle`, if any.
    pub(crate) fn lookup_exception(&self, handle: Option<Handle>) -> Option<StreamError> {
        let h = handle?.index();
        match (self.status.get(h), self.entries.get(h)) {
            (Some(Status::Exception), Some(ReadEntry::Failed(err))) => Some(err.clone()),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.status.clear();
        self.entries.clear();
        self.deps.clear();
        self.low_dep = None;
        self.open.clear();
    }

    /// Number of handles currently open.
    pub(crate) fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Forgets the open handles an aborted read left above the first `keep`.
    pub(crate) fn abandon_open(&mut self, keep: usize) {
        self.open.truncate(keep);
    }

    fn status_of(&self, h: usize) -> Result<Status> {
        self.status
            .get(h)
            .copied()
            .ok_or_else(|| StreamError::Internal(format!("no such handle: {h}")))
    }
}
