use crate::error::Result;
use crate::hooks::ObjectInputValidation;

/// Callbacks registered during a top-level read, kept in descending priority order.
///
/// Callbacks of equal priority run in reverse order of registration.
#[derive(Default)]
pub(crate) struct ValidationList {
    entries: Vec<(i32, Box<dyn ObjectInputValidation>)>,
}

impl ValidationList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, callback: Box<dyn ObjectInputValidation>, priority: i32) {
        let at = self
            .entries
            .iter()
            .position(|(p, _)| *p <= priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, (priority, callback));
    }

    /// Runs and removes every callback, highest priority first. The first failure stops the run.
    pub(crate) fn run(&mut self) -> Result<()> {
        let entries = std::mem::take(&mut self.entries);
        if !entries.is_empty() {
            log::trace!("[reader] running {} validation callbacks", entries.len());
        }
        for (_, callback) in entries {
            callback.validate_object()?;
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl std::fmt::Debug for ValidationList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(p, _)| p))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::error::StreamError;

    fn recorder(
        log: &Rc<RefCell<Vec<&'static str>>>,
        tag: &'static str,
    ) -> Box<dyn ObjectInputValidation> {
        let log = log.clone();
        Box::new(move || -> Result<()> {
            log.borrow_mut().push(tag);
            Ok(())
        })
    }

    #[test]
    fn highest_priority_first_and_latest_among_equals() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut list = ValidationList::new();
        list.register(recorder(&log, "low"), -5);
        list.register(recorder(&log, "mid-1"), 3);
        list.register(recorder(&log, "high"), 10);
        list.register(recorder(&log, "mid-2"), 3);
        list.run().unwrap();
        assert_eq!(*log.borrow(), vec!["high", "mid-2", "mid-1", "low"]);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn failure_stops_the_run_and_empties_the_list() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut list = ValidationList::new();
        list.register(recorder(&log, "after"), 0);
        list.register(
            Box::new(|| -> Result<()> { Err(StreamError::InvalidObject("bad graph".to_string())) }),
            1,
        );
        assert!(matches!(list.run(), Err(StreamError::InvalidObject(_))));
        assert!(log.borrow().is_empty());
        assert_eq!(list.len(), 0);
    }
}
