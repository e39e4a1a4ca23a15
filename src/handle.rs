//! Field handle - small stable identifier for a named record field.
//!
//! A `FieldHandle` is a 16-bit key assigned by the
//! [`FieldRegistry`](crate::registry::FieldRegistry) and used to address
//! values in a [`FieldTable`](crate::table::FieldTable). Handle 0 is the
//! "no handle" sentinel; valid handles range over `1..=65535`.
//!
//! Ordering follows assignment order, not field semantics: handles assigned
//! earlier compare lower, which is only meaningful for distinguishing the
//! static range (assigned at registry construction) from dynamic handles.

use std::fmt;

/// 16-bit key for a named record field.
///
/// Copyable and cheap to pass by value. Handle 0 ([`FieldHandle::NONE`])
/// means "no handle" and is never assigned to a field.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct FieldHandle(u16);

impl FieldHandle {
    /// The "no handle" sentinel.
    pub const NONE: FieldHandle = FieldHandle(0);

    /// Highest assignable handle value.
    pub const MAX: u16 = u16::MAX;

    /// Construct from a raw 16-bit value.
    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw 16-bit value.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// True for the "no handle" sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for FieldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldHandle({})", self.0)
    }
}

impl fmt::Display for FieldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<FieldHandle> for u16 {
    fn from(handle: FieldHandle) -> u16 {
        handle.0
    }
}
