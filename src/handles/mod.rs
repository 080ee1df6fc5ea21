//! Handle tables.
//!
//! Every object, string, array, enum constant, class and descriptor gets a handle the first time
//! it appears in a stream session. Handles are dense and assigned in ascending order; a
//! `TC_REFERENCE` record carries `BASE_WIRE_HANDLE + handle`.

mod read;
mod write;

use std::fmt;

pub(crate) use read::{ReadHandles, ReadEntry};
pub(crate) use write::{Identity, ReplaceTable, WriteHandles};

use crate::format::BASE_WIRE_HANDLE;

/// Index of an entry in a handle table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position in the table.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Value written after `TC_REFERENCE`.
    pub fn to_wire(&self) -> i32 {
        BASE_WIRE_HANDLE.wrapping_add(self.0 as i32)
    }

    /// Inverse of [`Handle::to_wire`]. `None` for values below the base.
    pub fn from_wire(wire: i32) -> Option<Self> {
        wire.checked_sub(BASE_WIRE_HANDLE)
            .and_then(|h| u32::try_from(h).ok())
            .map(Self)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_offset() {
        let h = Handle::new(3);
        assert_eq!(h.to_wire(), 0x7E_0003);
        assert_eq!(Handle::from_wire(0x7E_0003), Some(h));
        assert_eq!(Handle::from_wire(0x10), None);
    }
}
