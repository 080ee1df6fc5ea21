use std::hash::{Hash, Hasher};
use std::sync::Arc;

use twox_hash::XxHash64;

use super::Handle;
use crate::constants::{HANDLE_TABLE_CAPACITY, HANDLE_TABLE_LOAD_FACTOR};
use crate::value::Value;

/// Identity of a written referent.
///
/// Pointer identities are only meaningful while the referent is alive, which the table
/// guarantees by holding a clone of every assigned value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Identity {
    Ptr { kind: u8, addr: usize },
    Enum(Arc<str>, &'static str),
}

impl Identity {
    /// `None` for [`Value::Null`], which never gets a handle.
    pub(crate) fn of(value: &Value) -> Option<Self> {
        let (kind, addr) = match value {
            Value::Null => return None,
            Value::Str(s) => (0, std::rc::Rc::as_ptr(s) as *const u8 as usize),
            Value::Object(o) => (1, o.addr()),
            Value::Array(a) => (2, a.addr()),
            Value::Enum(e) => return Some(Self::Enum(e.type_name.clone(), e.name)),
            Value::Class(c) => (3, Arc::as_ptr(c) as usize),
            Value::Desc(c) => (4, Arc::as_ptr(c) as usize),
        };
        Some(Self::Ptr { kind, addr })
    }

    /// Identity of an interned field type string.
    pub(crate) fn type_string(s: &Arc<str>) -> Self {
        Self::Ptr {
            kind: 5,
            addr: Arc::as_ptr(s) as *const u8 as usize,
        }
    }

    fn bucket(&self, spine_len: usize) -> usize {
        let mut hasher = XxHash64::with_seed(0);
        self.hash(&mut hasher);
        (hasher.finish() % spine_len as u64) as usize
    }
}

/// What a table entry keeps alive.
#[derive(Debug, Clone)]
pub(crate) enum Held {
    Value(Value),
    TypeString(Arc<str>),
}

/// Identity-keyed handle table of the writer.
///
/// Open hashing over a bucket spine; `next` chains entries that share a bucket. The spine is
/// rebuilt with `(len << 1) + 1` buckets once the entry count reaches the load threshold.
#[derive(Debug)]
pub(crate) struct WriteHandles {
    size: usize,
    threshold: usize,
    spine: Vec<i32>,
    next: Vec<i32>,
    keys: Vec<Option<Identity>>,
    held: Vec<Option<Held>>,
}

impl WriteHandles {
    pub(crate) fn new() -> Self {
        Self {
            size: 0,
            threshold: (HANDLE_TABLE_CAPACITY as f32 * HANDLE_TABLE_LOAD_FACTOR) as usize,
            spine: vec![-1; HANDLE_TABLE_CAPACITY],
            next: vec![-1; HANDLE_TABLE_CAPACITY],
            keys: vec![None; HANDLE_TABLE_CAPACITY],
            held: vec![None; HANDLE_TABLE_CAPACITY],
        }
    }

    /// Assigns the next handle. `None` consumes a handle that can never be looked up (unshared).
    pub(crate) fn assign(&mut self, key: Option<(Identity, Held)>) -> Handle {
        if self.size >= self.next.len() {
            self.grow_entries();
        }
        if self.size >= self.threshold {
            self.grow_spine();
        }
        let handle = self.size;
        match key {
            Some((id, held)) => {
                self.insert(&id, handle);
                self.keys[handle] = Some(id);
                self.held[handle] = Some(held);
            }
            None => {
                self.next[handle] = -1;
                self.keys[handle] = None;
                self.held[handle] = None;
            }
        }
        self.size += 1;
        log::trace!("[writer] assigned handle {handle}");
        Handle::new(handle)
    }

    pub(crate) fn assign_value(&mut self, value: &Value, unshared: bool) -> Handle {
        let key = if unshared {
            None
        } else {
            Identity::of(value).map(|id| (id, Held::Value(value.clone())))
        };
        self.assign(key)
    }

    /// Assigns a handle to a field type string written by a descriptor.
    pub(crate) fn assign_type_string(&mut self, s: &Arc<str>) -> Handle {
        self.assign(Some((Identity::type_string(s), Held::TypeString(s.clone()))))
    }

    pub(crate) fn lookup(&self, id: &Identity) -> Option<Handle> {
        if self.size == 0 {
            return None;
        }
        let mut i = self.spine[id.bucket(self.spine.len())];
        while i >= 0 {
            let idx = i as usize;
            if self.keys[idx].as_ref() == Some(id) {
                return Some(Handle::new(idx));
            }
            i = self.next[idx];
        }
        None
    }

    pub(crate) fn lookup_value(&self, value: &Value) -> Option<Handle> {
        Identity::of(value).and_then(|id| self.lookup(&id))
    }

    pub(crate) fn len(&self) -> usize {
        self.size
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub(crate) fn clear(&mut self) {
        self.spine.fill(-1);
        for i in 0..self.size {
            self.keys[i] = None;
            self.held[i] = None;
        }
        self.size = 0;
    }

    fn insert(&mut self, id: &Identity, handle: usize) {
        let index = id.bucket(self.spine.len());
        self.next[handle] = self.spine[index];
        self.spine[index] = handle as i32;
    }

    fn grow_spine(&mut self) {
        let len = (self.spine.len() << 1) + 1;
        self.spine = vec![-1; len];
        self.threshold = (len as f32 * HANDLE_TABLE_LOAD_FACTOR) as usize;
        for i in 0..self.size {
            if let Some(id) = self.keys[i].clone() {
                self.insert(&id, i);
            } else {
                self.next[i] = -1;
            }
        }
    }

    fn grow_entries(&mut self) {
        let len = (self.next.len() << 1) + 1;
        self.next.resize(len, -1);
        self.keys.resize(len, None);
        self.held.resize(len, None);
    }
}

/// Permanent original-to-substitute mapping of a write session.
#[derive(Debug)]
pub(crate) struct ReplaceTable {
    handles: WriteHandles,
    reps: Vec<Value>,
}

impl ReplaceTable {
    pub(crate) fn new() -> Self {
        Self {
            handles: WriteHandles::new(),
            reps: Vec::new(),
        }
    }

    pub(crate) fn assign(&mut self, orig: &Value, rep: &Value) {
        let Some(id) = Identity::of(orig) else {
            return;
        };
        let index = self.handles.assign(Some((id, Held::Value(orig.clone())))).index();
        if index >= self.reps.len() {
            self.reps.resize(index + 1, Value::Null);
        }
        self.reps[index] = rep.clone();
    }

    /// The substitute recorded for `value`, or `value` itself.
    pub(crate) fn lookup(&self, value: &Value) -> Value {
        match self.handles.lookup_value(value) {
            Some(h) => self.reps[h.index()].clone(),
            None => value.clone(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.handles.clear();
        self.reps.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identity_not_equality() {
        let mut t = WriteHandles::new();
        let a = Value::from("same");
        let b = Value::from("same");
        let ha = t.assign_value(&a, false);
        assert_eq!(t.lookup_value(&a), Some(ha));
        assert_eq!(t.lookup_value(&b), None);
        assert_eq!(t.lookup_value(&a.clone()), Some(ha));
    }

    #[test]
    fn handles_are_dense_across_growth() {
        let mut t = WriteHandles::new();
        let values: Vec<Value> = (0..500).map(|i| Value::from(format!("v{i}"))).collect();
        for (i, v) in values.iter().enumerate() {
            assert_eq!(t.assign_value(v, false).index(), i);
        }
        for (i, v) in values.iter().enumerate() {
            assert_eq!(t.lookup_value(v).unwrap().index(), i);
        }
        assert_eq!(t.len(), 500);
    }

    #[test]
    fn unshared_assignments_are_invisible() {
        let mut t = WriteHandles::new();
        let v = Value::from("x");
        assert_eq!(t.assign_value(&v, true).index(), 0);
        assert_eq!(t.lookup_value(&v), None);
        assert_eq!(t.assign_value(&v, false).index(), 1);
    }

    #[test]
    fn clear_resets() {
        let mut t = WriteHandles::new();
        let v = Value::from("x");
        t.assign_value(&v, false);
        t.clear();
        assert!(t.is_empty());
        assert_eq!(t.lookup_value(&v), None);
        assert_eq!(t.assign_value(&v, false).index(), 0);
    }

    #[test]
    fn replacement_lookup() {
        let mut r = ReplaceTable::new();
        let orig = Value::from("orig");
        let rep = Value::from("rep");
        r.assign(&orig, &rep);
        assert!(r.lookup(&orig).ptr_eq(&rep));
        let other = Value::from("other");
        assert!(r.lookup(&other).ptr_eq(&other));
    }
}
