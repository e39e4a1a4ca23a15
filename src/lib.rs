//! # Fieldstore
//!
//! Compact, handle-indexed value store for the fields of a structured log
//! record, avoiding per-field string-map overhead.
//!
//! This crate provides:
//! - [`FieldRegistry`]: maps field names (and aliases) to small stable
//!   16-bit [`FieldHandle`]s, assigned monotonically
//! - [`FieldTable`]: a packed, reference-counted table mapping handles to
//!   byte values, with inline ("direct") entries and byte-range views into
//!   other entries ("indirect")
//! - Explicit growth: writes that do not fit fail locally with
//!   [`Error::CapacityExceeded`]; the caller invokes
//!   [`FieldTable::realloc`] and retries, or gives up when the table has
//!   hit its size ceiling
//!
//! ## Design Principles
//!
//! 1. **Handles, not names, at the hot path**: callers resolve a name once
//!    through the registry and address the table by handle thereafter
//! 2. **Offsets, not pointers**: all arena layout arithmetic is private to
//!    the table module; aliasing is a `(handle, offset, length)` value
//! 3. **Copy-on-write at both granularities**: values targeted by indirect
//!    entries are never overwritten in place, and a shared table is never
//!    grown in place — other owners always keep a valid, unchanged view
//!
//! ## Concurrency
//!
//! No internal synchronization. Mutation takes `&mut`, so exclusive intent
//! is enforced by the borrow checker; sharing a [`FieldTable`] across
//! owners goes through `Arc`, and any cross-thread locking is the caller's
//! responsibility.
//!
//! ## Example
//!
//! ```
//! use fieldstore::{FieldRegistry, FieldTable};
//!
//! # fn main() -> fieldstore::Result<()> {
//! let mut registry = FieldRegistry::new(&["HOST", "PROGRAM", "MESSAGE"]);
//! let handle = registry.alloc_handle("custom.field")?;
//!
//! let mut table = FieldTable::new(registry.num_static(), 8, 1024);
//! table.add_value(handle, b"backend-7")?;
//! assert_eq!(table.get_value(handle), b"backend-7");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handle;
pub mod registry;
pub mod table;

// Re-export main types
pub use error::{Error, Result};
pub use handle::FieldHandle;
pub use registry::{FieldRegistry, MAX_NAME_LEN};
pub use table::{FieldTable, TABLE_MAX_BYTES};
