//! Error types for fieldstore

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
///
/// All table write failures are atomic: when an operation returns an error,
/// no partial mutation has happened and any prior value is intact.
///
/// Growth exhaustion is deliberately not represented here: a table that can
/// no longer grow is signaled by [`FieldTable::realloc`] returning `false`
/// (a distinguishable "no table" result), forcing the caller into an
/// explicit drop/truncate/reject decision instead of an error path.
///
/// [`FieldTable::realloc`]: crate::table::FieldTable::realloc
#[derive(Error, Debug)]
pub enum Error {
    /// Field name or alias is empty or longer than 255 bytes
    #[error("invalid field name: length {0} outside 1..=255 bytes")]
    InvalidName(usize),

    /// All 65535 handles have already been assigned
    #[error("field registry full: all {} handles assigned", u16::MAX)]
    RegistryFull,

    /// Reverse lookup on an unassigned or out-of-range handle
    #[error("no field registered under handle {0}")]
    HandleNotFound(u16),

    /// A table write (value or index growth) does not fit in the free bytes
    #[error("table capacity exceeded: {needed} bytes needed, {free} free")]
    CapacityExceeded { needed: u32, free: u32 },

    /// Alias name is already bound to a different handle
    #[error("alias {alias:?} is already bound to a different handle")]
    AliasConflict { alias: String },
}
