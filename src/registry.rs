//! Field name registry: name ↔ handle bijection plus aliases.
//!
//! The registry owns the mapping between field names and the small numeric
//! [`FieldHandle`]s that address values in a [`FieldTable`]. Handles are
//! assigned monotonically starting at 1; the names supplied at construction
//! receive the lowest handles in the order given and form the "static"
//! range that every table keeps a fixed index slot for.
//!
//! # Key invariants
//!
//! - Every assigned handle has exactly one canonical name; alias names only
//!   ever appear in the lookup index, never as canonical names.
//! - `alloc_handle` is idempotent: re-registering a name (or any alias of
//!   it) returns the identical handle, however many times and in whatever
//!   order it is called.
//! - The handle counter never exceeds 65535. Exhaustion is surfaced once as
//!   an operational diagnostic and then reported as [`Error::RegistryFull`];
//!   callers are expected to tolerate the dropped field.
//!
//! The registry is built once and then read-mostly. There is no internal
//! locking: concurrent registration requires external synchronization
//! (see the crate-level concurrency notes).
//!
//! [`FieldTable`]: crate::table::FieldTable

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::warn;

use crate::error::{Error, Result};
use crate::handle::FieldHandle;

/// Maximum length of a field name or alias, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Registry assigning stable [`FieldHandle`]s to field names.
#[derive(Clone, Debug, Default)]
pub struct FieldRegistry {
    /// Lookup index: canonical names and aliases → handle.
    lookup: HashMap<Box<str>, FieldHandle>,
    /// Dense canonical-name array, indexed by `handle - 1`.
    names: Vec<Arc<str>>,
    /// Number of static handles (assigned at construction).
    num_static: u16,
    /// Whether the one-shot exhaustion diagnostic has been emitted.
    full_reported: bool,
}

impl FieldRegistry {
    /// Create a registry, pre-registering `static_names` in order.
    ///
    /// The given names receive handles 1, 2, 3, … and become the static
    /// handle range. An unusable static name (empty or over-long) is
    /// skipped with a warning rather than aborting construction.
    pub fn new(static_names: &[&str]) -> Self {
        let mut registry = Self::default();
        for name in static_names {
            if let Err(err) = registry.alloc_handle(name) {
                warn!(name = *name, %err, "skipping unusable static field name");
            }
        }
        registry.num_static = registry.names.len() as u16;
        registry
    }

    /// Look up or assign the handle for `name`.
    ///
    /// Returns the existing handle if `name` (or an alias resolving to it)
    /// is already registered. Otherwise assigns the next sequential handle.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidName`] if `name` is empty or longer than
    ///   [`MAX_NAME_LEN`] bytes.
    /// - [`Error::RegistryFull`] if all 65535 handles are assigned. The
    ///   first occurrence per registry also emits a `warn!` diagnostic.
    pub fn alloc_handle(&mut self, name: &str) -> Result<FieldHandle> {
        if let Some(&handle) = self.lookup.get(name) {
            return Ok(handle);
        }
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidName(name.len()));
        }
        if self.names.len() >= FieldHandle::MAX as usize {
            if !self.full_reported {
                self.full_reported = true;
                warn!(
                    name,
                    max = FieldHandle::MAX,
                    "field registry full, dropping field registration"
                );
            }
            return Err(Error::RegistryFull);
        }

        let handle = FieldHandle::new(self.names.len() as u16 + 1);
        self.names.push(Arc::from(name));
        self.lookup.insert(name.into(), handle);
        Ok(handle)
    }

    /// Register `alias` as an additional lookup key for `handle`.
    ///
    /// Does not consume a handle slot: a later `alloc_handle(alias)`
    /// returns `handle`. Re-registering the same binding is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidName`] for an empty or over-long alias.
    /// - [`Error::HandleNotFound`] if `handle` has never been assigned.
    /// - [`Error::AliasConflict`] if `alias` already resolves to a
    ///   different handle (canonical names can never be rebound).
    pub fn add_alias(&mut self, handle: FieldHandle, alias: &str) -> Result<()> {
        if alias.is_empty() || alias.len() > MAX_NAME_LEN {
            return Err(Error::InvalidName(alias.len()));
        }
        if handle.is_none() || handle.get() as usize > self.names.len() {
            return Err(Error::HandleNotFound(handle.get()));
        }
        match self.lookup.get(alias) {
            Some(&existing) if existing == handle => Ok(()),
            Some(_) => Err(Error::AliasConflict {
                alias: alias.to_string(),
            }),
            None => {
                self.lookup.insert(alias.into(), handle);
                Ok(())
            }
        }
    }

    /// Canonical name for `handle`.
    ///
    /// # Errors
    ///
    /// [`Error::HandleNotFound`] for the null handle, an out-of-range
    /// handle, or one that was never assigned.
    pub fn handle_name(&self, handle: FieldHandle) -> Result<&str> {
        if handle.is_none() {
            return Err(Error::HandleNotFound(0));
        }
        self.names
            .get(handle.get() as usize - 1)
            .map(|name| name.as_ref())
            .ok_or(Error::HandleNotFound(handle.get()))
    }

    /// Number of assigned handles (aliases do not count).
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if no handles have been assigned.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of static handles, i.e. the size of the range `1..=num_static`.
    pub fn num_static(&self) -> u16 {
        self.num_static
    }
}
