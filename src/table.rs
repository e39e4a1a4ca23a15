//! Packed field-value table: handle-indexed byte storage with copy-on-write
//! growth.
//!
//! A `FieldTable` maps [`FieldHandle`]s to byte values inside one fixed-size
//! accounting region, laid out as header + entry index + payload arena. Two
//! entry kinds exist:
//!
//! - **direct**: the value's bytes live inline in the arena;
//! - **indirect**: the value is a byte-range view into another (direct)
//!   entry's bytes, bound at creation time.
//!
//! # Space accounting
//!
//! The accounting constants are a binding layout contract shared with the
//! surrounding record representation, not an implementation detail:
//!
//! ```text
//! direct entry    3 bytes header + value length
//! indirect entry  4 bytes header, no payload
//! table header    8 bytes
//! index slot      2 bytes (static), 4 bytes (dynamic)
//! ```
//!
//! `used` tracks committed footprints against the table's total byte
//! capacity. Writes never grow the table: a write that does not fit fails
//! with [`Error::CapacityExceeded`] and leaves the table unchanged, which is
//! the caller's signal to invoke [`FieldTable::realloc`] and retry.
//!
//! # Key invariants
//!
//! - `used <= size` at all times; failed writes commit nothing.
//! - Static handles `1..=num_static` always have an index slot with O(1)
//!   addressing; dynamic slots are allocated on demand and never freed.
//! - An indirect entry never targets another indirect entry: chains are
//!   flattened to the ultimate direct target at creation, offsets summed,
//!   so resolution is always a single hop.
//! - Once an entry is the target of an indirect entry it is marked
//!   `referenced`, permanently. Direct writes to a referenced handle always
//!   allocate fresh arena space, so indirect readers bound to the old byte
//!   range keep seeing the value that existed when they were created.
//!
//! The arena is append-only and entries hold integer offsets, never
//! pointers; bytes are only ever rewritten inside a direct entry's own
//! allocated footprint. Offsets therefore cannot dangle, and all offset
//! arithmetic stays private to this module — the public API is strictly
//! handle-keyed.
//!
//! Abandoned footprints (from copy-on-write rewrites and entry growth) are
//! unreclaimable slack for the lifetime of a table instance; whole-table
//! growth repacks entries tightly and is the only defragmentation there is.

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::handle::FieldHandle;

/// Hard ceiling on table capacity; growth never exceeds this.
pub const TABLE_MAX_BYTES: u32 = 65_535;

/// Accounted size of the table header.
const TABLE_HEADER_SIZE: u32 = 8;
/// Accounted size of one static index slot.
const STATIC_SLOT_SIZE: u32 = 2;
/// Accounted size of one dynamic index slot.
const DYN_SLOT_SIZE: u32 = 4;
/// Header overhead of a direct entry; footprint = this + value length.
const DIRECT_ENTRY_OVERHEAD: u32 = 3;
/// Full footprint of an indirect entry (header only, zero payload).
const INDIRECT_ENTRY_SIZE: u32 = 4;

/// Byte range in the arena captured as an indirect entry's target.
///
/// `len == 0` marks an unresolved target (the referenced handle had no
/// entry when the indirect entry was created); it reads as empty forever,
/// with no retroactive fix-up if the handle later gets content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ValueRef {
    ofs: u32,
    len: u16,
}

impl ValueRef {
    const EMPTY: ValueRef = ValueRef { ofs: 0, len: 0 };
}

#[derive(Clone, Copy, Debug)]
enum EntryKind {
    /// Bytes stored inline: `cap` is the allocated payload footprint at
    /// `ofs`, a high-water mark reusable by smaller overwrites.
    Direct { ofs: u32, len: u16, cap: u16 },
    /// Byte-range view into `target`, which is always a direct entry's
    /// bytes (or empty if unresolved). `ref_handle` records the ultimate
    /// referenced handle after flattening.
    Indirect {
        ref_handle: FieldHandle,
        target: ValueRef,
        rel_ofs: u16,
        rel_len: u16,
    },
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    kind: EntryKind,
    /// Sticky: set once any indirect entry targets this one, never cleared.
    referenced: bool,
}

/// Resolved binding for a new indirect entry, computed before any mutation
/// so capacity failures stay side-effect free.
struct Binding {
    ref_handle: FieldHandle,
    target: ValueRef,
    rel_ofs: u16,
    rel_len: u16,
    /// Handle whose entry gets the `referenced` flag on commit.
    mark: Option<FieldHandle>,
}

/// Handle-indexed value table over a single growable accounting region.
#[derive(Clone, Debug)]
pub struct FieldTable {
    /// Total byte capacity (header + index + payload).
    size: u32,
    /// Committed footprint bytes, including unreclaimable slack.
    used: u32,
    num_static: u16,
    /// Dynamic index slots paid for at construction.
    dyn_prealloc: u16,
    static_entries: Vec<Option<Entry>>,
    dyn_entries: HashMap<u16, Entry>,
    arena: Vec<u8>,
}

impl FieldTable {
    /// Create a table with `num_static` always-present index slots,
    /// `num_dyn_prealloc` dynamic slots paid for up front, and a total
    /// accounting capacity of `byte_capacity` (clamped to
    /// [`TABLE_MAX_BYTES`]).
    pub fn new(num_static: u16, num_dyn_prealloc: u16, byte_capacity: u32) -> Self {
        Self {
            size: byte_capacity.min(TABLE_MAX_BYTES),
            used: 0,
            num_static,
            dyn_prealloc: num_dyn_prealloc,
            static_entries: vec![None; num_static as usize],
            dyn_entries: HashMap::new(),
            arena: Vec::new(),
        }
    }

    /// Total byte capacity.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Committed footprint bytes (entry headers + payloads + slack).
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Number of always-present static index slots.
    pub fn num_static(&self) -> u16 {
        self.num_static
    }

    /// Bytes accounted to the header and entry index.
    fn index_bytes(&self) -> u32 {
        let dyn_slots = self.dyn_entries.len().max(self.dyn_prealloc as usize) as u32;
        TABLE_HEADER_SIZE + self.num_static as u32 * STATIC_SLOT_SIZE + dyn_slots * DYN_SLOT_SIZE
    }

    /// Bytes still available for new footprints and index slots.
    fn free_bytes(&self) -> u32 {
        self.size.saturating_sub(self.index_bytes() + self.used)
    }

    /// Extra index bytes a write to `handle` would consume.
    fn slot_cost(&self, handle: FieldHandle) -> u32 {
        let raw = handle.get();
        let is_new_dyn = raw > self.num_static && !self.dyn_entries.contains_key(&raw);
        if is_new_dyn && self.dyn_entries.len() >= self.dyn_prealloc as usize {
            DYN_SLOT_SIZE
        } else {
            0
        }
    }

    fn capacity_error(&self, needed: u32) -> Error {
        Error::CapacityExceeded {
            needed,
            free: self.free_bytes(),
        }
    }

    fn entry(&self, handle: FieldHandle) -> Option<&Entry> {
        let raw = handle.get();
        if raw == 0 {
            None
        } else if raw <= self.num_static {
            self.static_entries[raw as usize - 1].as_ref()
        } else {
            self.dyn_entries.get(&raw)
        }
    }

    fn entry_mut(&mut self, handle: FieldHandle) -> Option<&mut Entry> {
        let raw = handle.get();
        if raw == 0 {
            None
        } else if raw <= self.num_static {
            self.static_entries[raw as usize - 1].as_mut()
        } else {
            self.dyn_entries.get_mut(&raw)
        }
    }

    fn set_entry(&mut self, handle: FieldHandle, entry: Entry) {
        let raw = handle.get();
        if raw <= self.num_static {
            self.static_entries[raw as usize - 1] = Some(entry);
        } else {
            self.dyn_entries.insert(raw, entry);
        }
    }

    /// Append payload bytes to the arena, returning their offset.
    fn alloc_payload(&mut self, bytes: &[u8]) -> u32 {
        let ofs = self.arena.len() as u32;
        self.arena.extend_from_slice(bytes);
        ofs
    }

    /// Store `value` under `handle` as a direct entry.
    ///
    /// Overwrites of an unreferenced direct entry reuse its allocated
    /// footprint in place when the new value fits; everything else commits
    /// a fresh allocation, leaving any old footprint as slack. Writes to a
    /// referenced handle always allocate fresh space, preserving the byte
    /// ranges indirect readers were bound to.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityExceeded`] when the value (plus any new index slot)
    /// does not fit in the free bytes; the table is left unchanged. The
    /// table never grows itself — see [`FieldTable::realloc`].
    pub fn add_value(&mut self, handle: FieldHandle, value: &[u8]) -> Result<()> {
        if handle.is_none() {
            return Err(Error::HandleNotFound(0));
        }
        if value.len() > u16::MAX as usize {
            return Err(self.capacity_error(DIRECT_ENTRY_OVERHEAD.saturating_add(value.len() as u32)));
        }
        let value_len = value.len() as u16;
        let footprint = DIRECT_ENTRY_OVERHEAD + value_len as u32;

        match self.entry(handle).copied() {
            None => {
                let needed = self.slot_cost(handle) + footprint;
                if needed > self.free_bytes() {
                    return Err(self.capacity_error(needed));
                }
                let ofs = self.alloc_payload(value);
                self.used += footprint;
                self.set_entry(
                    handle,
                    Entry {
                        kind: EntryKind::Direct {
                            ofs,
                            len: value_len,
                            cap: value_len,
                        },
                        referenced: false,
                    },
                );
            }
            Some(Entry {
                kind: EntryKind::Direct { ofs, cap, .. },
                referenced,
            }) => {
                if !referenced && value_len <= cap {
                    // reuse the existing footprint in place
                    let start = ofs as usize;
                    self.arena[start..start + value.len()].copy_from_slice(value);
                    if let Some(entry) = self.entry_mut(handle) {
                        entry.kind = EntryKind::Direct {
                            ofs,
                            len: value_len,
                            cap,
                        };
                    }
                } else {
                    if footprint > self.free_bytes() {
                        return Err(self.capacity_error(footprint));
                    }
                    let new_ofs = self.alloc_payload(value);
                    self.used += footprint;
                    self.set_entry(
                        handle,
                        Entry {
                            kind: EntryKind::Direct {
                                ofs: new_ofs,
                                len: value_len,
                                cap: value_len,
                            },
                            referenced,
                        },
                    );
                }
            }
            Some(Entry {
                kind: EntryKind::Indirect { .. },
                referenced,
            }) => {
                let delta = footprint as i64 - INDIRECT_ENTRY_SIZE as i64;
                if delta > self.free_bytes() as i64 {
                    return Err(self.capacity_error(delta.max(0) as u32));
                }
                let ofs = self.alloc_payload(value);
                self.used = (self.used as i64 + delta) as u32;
                self.set_entry(
                    handle,
                    Entry {
                        kind: EntryKind::Direct {
                            ofs,
                            len: value_len,
                            cap: value_len,
                        },
                        referenced,
                    },
                );
            }
        }
        Ok(())
    }

    /// Store an indirect entry under `handle`: a `[rel_ofs, rel_ofs +
    /// rel_len)` view into `ref_handle`'s bytes as they are right now.
    ///
    /// If `ref_handle` currently holds an indirect entry, the new entry is
    /// flattened onto its ultimate direct target with offsets summed. If
    /// `ref_handle` has no entry, the indirect entry is created unresolved
    /// and permanently reads empty. The range is not validated against the
    /// target's content size; out-of-range views read as empty.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityExceeded`] when the entry (plus any new index slot)
    /// does not fit; the table is left unchanged, including `referenced`
    /// flags.
    pub fn add_value_indirect(
        &mut self,
        handle: FieldHandle,
        ref_handle: FieldHandle,
        rel_ofs: u16,
        rel_len: u16,
    ) -> Result<()> {
        if handle.is_none() {
            return Err(Error::HandleNotFound(0));
        }

        let binding = match self.entry(ref_handle).copied() {
            Some(Entry {
                kind: EntryKind::Direct { ofs, len, .. },
                ..
            }) => Binding {
                ref_handle,
                target: ValueRef { ofs, len },
                rel_ofs,
                rel_len,
                mark: Some(ref_handle),
            },
            Some(Entry {
                kind:
                    EntryKind::Indirect {
                        ref_handle: ultimate,
                        target,
                        rel_ofs: inner_ofs,
                        ..
                    },
                ..
            }) => Binding {
                // flatten onto the ultimate direct target, offsets summed
                ref_handle: ultimate,
                target,
                rel_ofs: inner_ofs.saturating_add(rel_ofs),
                rel_len,
                mark: Some(ultimate),
            },
            None => Binding {
                ref_handle,
                target: ValueRef::EMPTY,
                rel_ofs,
                rel_len,
                mark: None,
            },
        };

        let existing = self.entry(handle).copied();
        let (needed, delta) = match existing {
            None => (
                self.slot_cost(handle) + INDIRECT_ENTRY_SIZE,
                INDIRECT_ENTRY_SIZE as i64,
            ),
            // an indirect entry fits exactly in an indirect slot
            Some(Entry {
                kind: EntryKind::Indirect { .. },
                ..
            }) => (0, 0),
            Some(Entry {
                kind: EntryKind::Direct { cap, .. },
                referenced,
            }) => {
                if referenced {
                    // old bytes stay pinned for existing readers
                    (INDIRECT_ENTRY_SIZE, INDIRECT_ENTRY_SIZE as i64)
                } else {
                    let delta = INDIRECT_ENTRY_SIZE as i64
                        - (DIRECT_ENTRY_OVERHEAD + cap as u32) as i64;
                    (delta.max(0) as u32, delta)
                }
            }
        };
        if needed > self.free_bytes() {
            return Err(self.capacity_error(needed));
        }

        if let Some(mark) = binding.mark {
            if let Some(entry) = self.entry_mut(mark) {
                entry.referenced = true;
            }
        }
        let referenced = existing.map_or(false, |e| e.referenced)
            || binding.mark == Some(handle);
        self.set_entry(
            handle,
            Entry {
                kind: EntryKind::Indirect {
                    ref_handle: binding.ref_handle,
                    target: binding.target,
                    rel_ofs: binding.rel_ofs,
                    rel_len: binding.rel_len,
                },
                referenced,
            },
        );
        self.used = (self.used as i64 + delta) as u32;
        Ok(())
    }

    /// Bytes stored under `handle`.
    ///
    /// A missing entry reads as empty, never as an error. An indirect
    /// entry whose view falls outside its bound target range also reads as
    /// empty rather than faulting.
    pub fn get_value(&self, handle: FieldHandle) -> &[u8] {
        match self.entry(handle) {
            None => &[],
            Some(Entry {
                kind: EntryKind::Direct { ofs, len, .. },
                ..
            }) => {
                let start = *ofs as usize;
                self.arena.get(start..start + *len as usize).unwrap_or(&[])
            }
            Some(Entry {
                kind:
                    EntryKind::Indirect {
                        target,
                        rel_ofs,
                        rel_len,
                        ..
                    },
                ..
            }) => {
                let end = *rel_ofs as u32 + *rel_len as u32;
                if end > target.len as u32 {
                    return &[];
                }
                let start = target.ofs as usize + *rel_ofs as usize;
                self.arena
                    .get(start..start + *rel_len as usize)
                    .unwrap_or(&[])
            }
        }
    }

    /// Ultimate referenced handle of an indirect entry, if `handle` holds
    /// one. Always a flattened, single-hop reference.
    pub fn indirect_ref(&self, handle: FieldHandle) -> Option<FieldHandle> {
        match self.entry(handle) {
            Some(Entry {
                kind: EntryKind::Indirect { ref_handle, .. },
                ..
            }) => Some(*ref_handle),
            _ => None,
        }
    }

    /// Grow a possibly shared table to double capacity, capped at
    /// [`TABLE_MAX_BYTES`], repacking all entries tightly (slack from
    /// copy-on-write rewrites is reclaimed).
    ///
    /// A sole owner's storage is replaced behind its own `Arc`; a shared
    /// table is never mutated — `table` is rebound to an independent grown
    /// instance and every other owner keeps its valid, unchanged view.
    ///
    /// Returns `false` if the table is already at maximum size, in which
    /// case growth is impossible and the caller must drop, truncate, or
    /// reject the pending write rather than retry.
    pub fn realloc(table: &mut Arc<FieldTable>) -> bool {
        let Some(grown) = table.grown() else {
            debug!(size = table.size, "field table already at maximum size");
            return false;
        };
        let shared = Arc::strong_count(table) > 1;
        debug!(
            old_size = table.size,
            new_size = grown.size,
            shared,
            "growing field table"
        );
        match Arc::get_mut(table) {
            Some(owned) => *owned = grown,
            None => *table = Arc::new(grown),
        }
        true
    }

    /// Repacked copy at double capacity, or `None` at the size ceiling.
    fn grown(&self) -> Option<FieldTable> {
        if self.size >= TABLE_MAX_BYTES {
            return None;
        }
        let new_size = (self.size * 2).clamp(self.size + 1, TABLE_MAX_BYTES);
        let mut grown = FieldTable::new(self.num_static, self.dyn_prealloc, new_size);

        // Pass 1: repack direct entries tightly, remembering where each
        // live byte range lands.
        let mut moved: HashMap<ValueRef, u32> = HashMap::new();
        for (handle, entry) in self.entries() {
            if let EntryKind::Direct { ofs, len, .. } = entry.kind {
                let start = ofs as usize;
                let bytes = self.arena.get(start..start + len as usize).unwrap_or(&[]);
                let new_ofs = grown.alloc_payload(bytes);
                moved.insert(ValueRef { ofs, len }, new_ofs);
                grown.used += DIRECT_ENTRY_OVERHEAD + len as u32;
                grown.set_entry(
                    handle,
                    Entry {
                        kind: EntryKind::Direct {
                            ofs: new_ofs,
                            len,
                            cap: len,
                        },
                        referenced: entry.referenced,
                    },
                );
            }
        }

        // Pass 2: rebind indirect entries. A target range whose direct
        // entry was rewritten after referencing has no owner anymore; copy
        // such orphaned snapshot ranges so their readers survive the move.
        for (handle, entry) in self.entries() {
            if let EntryKind::Indirect {
                ref_handle,
                target,
                rel_ofs,
                rel_len,
            } = entry.kind
            {
                let new_target = if target.len == 0 {
                    ValueRef::EMPTY
                } else if let Some(&new_ofs) = moved.get(&target) {
                    ValueRef {
                        ofs: new_ofs,
                        len: target.len,
                    }
                } else {
                    let start = target.ofs as usize;
                    let bytes = self
                        .arena
                        .get(start..start + target.len as usize)
                        .unwrap_or(&[]);
                    let new_ofs = grown.alloc_payload(bytes);
                    moved.insert(target, new_ofs);
                    ValueRef {
                        ofs: new_ofs,
                        len: bytes.len() as u16,
                    }
                };
                grown.used += INDIRECT_ENTRY_SIZE;
                grown.set_entry(
                    handle,
                    Entry {
                        kind: EntryKind::Indirect {
                            ref_handle,
                            target: new_target,
                            rel_ofs,
                            rel_len,
                        },
                        referenced: entry.referenced,
                    },
                );
            }
        }
        Some(grown)
    }

    /// All populated entries, static range first.
    fn entries(&self) -> impl Iterator<Item = (FieldHandle, &Entry)> + '_ {
        let statics = self
            .static_entries
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (FieldHandle::new(i as u16 + 1), e)));
        let dynamics = self
            .dyn_entries
            .iter()
            .map(|(&raw, e)| (FieldHandle::new(raw), e));
        statics.chain(dynamics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: FieldHandle = FieldHandle::new(1);
    const B: FieldHandle = FieldHandle::new(5);
    const C: FieldHandle = FieldHandle::new(6);

    /// 'A'..'Z' repeating test payload.
    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| b'A' + (i % 26) as u8).collect()
    }

    #[test]
    fn test_direct_value_round_trip() {
        let mut tab = FieldTable::new(4, 4, 256);
        tab.add_value(A, &pattern(128)).unwrap();
        assert_eq!(tab.get_value(A), &pattern(128)[..]);
        assert_eq!(tab.used(), 131);
    }

    #[test]
    fn test_direct_value_too_large_leaves_no_entry() {
        let mut tab = FieldTable::new(4, 4, 256);
        assert!(matches!(
            tab.add_value(A, &pattern(512)),
            Err(Error::CapacityExceeded { needed: 515, .. })
        ));
        assert_eq!(tab.get_value(A), b"");
        assert_eq!(tab.used(), 0);
    }

    #[test]
    fn test_overwrite_smaller_reuses_footprint_in_place() {
        // capacity 192, one static slot: the literal boundary scenario
        let mut tab = FieldTable::new(1, 0, 192);
        tab.add_value(A, &pattern(128)).unwrap();
        let used = tab.used();

        tab.add_value(A, &pattern(64)).unwrap();
        assert_eq!(tab.used(), used);
        assert_eq!(tab.get_value(A), &pattern(64)[..]);
    }

    #[test]
    fn test_overwrite_too_large_for_table_fails_atomically() {
        let mut tab = FieldTable::new(1, 0, 192);
        tab.add_value(A, &pattern(128)).unwrap();

        assert!(tab.add_value(A, &pattern(512)).is_err());
        assert_eq!(tab.get_value(A), &pattern(128)[..]);
        assert_eq!(tab.used(), 131);
    }

    #[test]
    fn test_overwrite_larger_allocates_fresh_footprint() {
        let mut tab = FieldTable::new(1, 0, 256);
        tab.add_value(A, &pattern(64)).unwrap();
        let used = tab.used();

        tab.add_value(A, &pattern(128)).unwrap();
        assert!(tab.used() > used, "old footprint becomes slack");
        assert_eq!(tab.get_value(A), &pattern(128)[..]);
    }

    #[test]
    fn test_zero_length_value_is_an_entry() {
        let mut tab = FieldTable::new(4, 4, 256);
        tab.add_value(A, b"").unwrap();
        assert_eq!(tab.used(), 3);
        assert_eq!(tab.get_value(A), b"");

        // growing out of a zero-cap footprint allocates fresh space
        tab.add_value(A, &pattern(64)).unwrap();
        assert_eq!(tab.used(), 70);
        assert_eq!(tab.get_value(A), &pattern(64)[..]);
    }

    #[test]
    fn test_null_handle_is_rejected() {
        let mut tab = FieldTable::new(4, 4, 256);
        assert!(matches!(
            tab.add_value(FieldHandle::NONE, b"x"),
            Err(Error::HandleNotFound(0))
        ));
        assert_eq!(tab.get_value(FieldHandle::NONE), b"");
    }

    #[test]
    fn test_indirect_view_into_direct_entry() {
        let mut tab = FieldTable::new(4, 4, 256);
        let value = pattern(128);
        tab.add_value(A, &value).unwrap();

        tab.add_value_indirect(B, A, 1, 126).unwrap();
        assert_eq!(tab.get_value(A), &value[..]);
        assert_eq!(tab.get_value(B), &value[1..127]);
        assert_eq!(tab.used(), 135);
        assert_eq!(tab.indirect_ref(B), Some(A));
    }

    #[test]
    fn test_indirect_entry_that_does_not_fit() {
        // sized to admit exactly one 128-byte direct entry and nothing more
        let mut tab = FieldTable::new(1, 0, 141);
        tab.add_value(A, &pattern(128)).unwrap();

        assert!(tab.add_value_indirect(B, A, 1, 126).is_err());
        assert_eq!(tab.get_value(A), &pattern(128)[..]);
        assert_eq!(tab.get_value(B), b"");
        assert_eq!(tab.used(), 131);
    }

    #[test]
    fn test_overwrite_indirect_with_indirect_reuses_slot() {
        let mut tab = FieldTable::new(4, 4, 256);
        let value = pattern(128);
        tab.add_value(A, &value).unwrap();
        tab.add_value_indirect(B, A, 1, 126).unwrap();
        let used = tab.used();

        tab.add_value_indirect(B, A, 1, 62).unwrap();
        assert_eq!(tab.used(), used);
        assert_eq!(tab.get_value(B), &value[1..63]);
    }

    #[test]
    fn test_overwrite_direct_with_indirect_reclaims_payload() {
        let mut tab = FieldTable::new(4, 4, 256);
        let value = pattern(128);
        tab.add_value(A, &value).unwrap();
        tab.add_value(B, &pattern(64)).unwrap();
        let used = tab.used();
        assert_eq!(used, 198);

        tab.add_value_indirect(B, A, 1, 62).unwrap();
        // 67-byte direct footprint swapped for a 4-byte indirect one
        assert_eq!(tab.used(), used - 67 + 4);
        assert_eq!(tab.get_value(B), &value[1..63]);
        assert_eq!(tab.get_value(A), &value[..]);
    }

    #[test]
    fn test_overwrite_indirect_with_direct_delta_accounting() {
        let mut tab = FieldTable::new(4, 4, 256);
        tab.add_value(A, &pattern(128)).unwrap();
        tab.add_value_indirect(B, A, 1, 126).unwrap();
        let used = tab.used();

        // 4-byte indirect slot swapped for a 3+1 byte direct footprint
        tab.add_value(B, &pattern(1)).unwrap();
        assert_eq!(tab.used(), used);
        assert_eq!(tab.get_value(B), &pattern(1)[..]);
        assert_eq!(tab.get_value(A), &pattern(128)[..]);
    }

    #[test]
    fn test_overwrite_indirect_with_direct_too_large() {
        let mut tab = FieldTable::new(1, 1, 160);
        tab.add_value(A, &pattern(128)).unwrap();
        tab.add_value_indirect(FieldHandle::new(2), A, 1, 126).unwrap();
        let used = tab.used();

        let err = tab.add_value(FieldHandle::new(2), &pattern(128));
        assert!(matches!(err, Err(Error::CapacityExceeded { .. })));
        assert_eq!(tab.used(), used);
        assert_eq!(tab.get_value(FieldHandle::new(2)), &pattern(128)[1..127]);
    }

    #[test]
    fn test_referenced_entry_is_copy_on_write() {
        let mut tab = FieldTable::new(4, 4, 256);
        let value = pattern(128);
        tab.add_value(A, &value).unwrap();
        tab.add_value_indirect(B, A, 1, 126).unwrap();
        let used = tab.used();

        // 64 bytes would fit A's footprint in place, but A is referenced:
        // the write must go to fresh space so B keeps its snapshot
        tab.add_value(A, &pattern(64)).unwrap();
        assert!(tab.used() > used);
        assert_eq!(tab.get_value(A), &pattern(64)[..]);
        assert_eq!(tab.get_value(B), &value[1..127]);
    }

    #[test]
    fn test_referenced_overwrite_that_does_not_fit() {
        let mut tab = FieldTable::new(1, 1, 160);
        let value = pattern(128);
        tab.add_value(A, &value).unwrap();
        tab.add_value_indirect(FieldHandle::new(2), A, 1, 126).unwrap();
        let used = tab.used();

        assert!(tab.add_value(A, &pattern(32)).is_err());
        assert_eq!(tab.used(), used);
        assert_eq!(tab.get_value(A), &value[..]);
        assert_eq!(tab.get_value(FieldHandle::new(2)), &value[1..127]);
    }

    #[test]
    fn test_indirect_chain_flattens_to_direct_target() {
        let mut tab = FieldTable::new(4, 4, 256);
        let value = pattern(128);
        tab.add_value(A, &value).unwrap();
        tab.add_value_indirect(B, A, 1, 126).unwrap();

        // C nominally targets B; it must be rewritten onto A with offsets
        // summed, capping resolution at one hop
        tab.add_value_indirect(C, B, 1, 122).unwrap();
        assert_eq!(tab.indirect_ref(C), Some(A));
        assert_eq!(tab.get_value(A), &value[..]);
        assert_eq!(tab.get_value(B), &value[1..127]);
        assert_eq!(tab.get_value(C), &value[2..124]);
    }

    #[test]
    fn test_unresolved_indirect_reads_empty_forever() {
        let mut tab = FieldTable::new(4, 4, 256);
        tab.add_value_indirect(B, A, 1, 126).unwrap();
        assert_eq!(tab.get_value(B), b"");

        // later content under A does not retroactively resolve B
        tab.add_value(A, &pattern(128)).unwrap();
        assert_eq!(tab.get_value(A), &pattern(128)[..]);
        assert_eq!(tab.get_value(B), b"");
    }

    #[test]
    fn test_out_of_range_view_reads_empty() {
        let mut tab = FieldTable::new(4, 4, 256);
        tab.add_value(A, &pattern(16)).unwrap();
        tab.add_value_indirect(B, A, 8, 64).unwrap();
        assert_eq!(tab.get_value(B), b"");
    }

    #[test]
    fn test_randomized_dynamic_handle_population() {
        let mut state: u32 = 0x2545_f491;
        let mut next = move || {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };

        for _ in 0..10 {
            let mut tab = FieldTable::new(16, 16, 4096);
            let mut handles = Vec::new();
            for _ in 0..100 {
                let raw = loop {
                    let raw = (next() & 0x8FFF) as u16;
                    if raw != 0 {
                        break raw;
                    }
                };
                let handle = FieldHandle::new(raw);
                let value = format!("VAL{raw}");
                tab.add_value(handle, value.as_bytes()).unwrap();
                handles.push(handle);
            }
            for handle in handles.iter().rev() {
                let expected = format!("VAL{handle}");
                assert_eq!(tab.get_value(*handle), expected.as_bytes());
            }
        }
    }

    #[test]
    fn test_realloc_doubles_until_max() {
        let mut table = Arc::new(FieldTable::new(16, 0, TABLE_MAX_BYTES / 2 + 1));
        Arc::get_mut(&mut table)
            .unwrap()
            .add_value(A, b"Test Static Value")
            .unwrap();
        let old_size = table.size();

        assert!(FieldTable::realloc(&mut table));
        assert!(table.size() > old_size);
        assert_eq!(table.size(), TABLE_MAX_BYTES);
        assert_eq!(table.get_value(A), b"Test Static Value");

        // already at the ceiling: growth refused, table stays valid
        assert!(!FieldTable::realloc(&mut table));
        assert_eq!(table.get_value(A), b"Test Static Value");
    }

    #[test]
    fn test_realloc_shared_leaves_other_owner_untouched() {
        let mut mine = Arc::new(FieldTable::new(16, 0, TABLE_MAX_BYTES / 2 + 1));
        Arc::get_mut(&mut mine)
            .unwrap()
            .add_value(A, b"Test Static Value")
            .unwrap();
        let theirs = Arc::clone(&mine);

        assert!(FieldTable::realloc(&mut mine));
        assert!(!Arc::ptr_eq(&mine, &theirs));
        assert_eq!(theirs.size(), TABLE_MAX_BYTES / 2 + 1);
        assert_eq!(theirs.get_value(A), b"Test Static Value");
        assert_eq!(mine.size(), TABLE_MAX_BYTES);
        assert_eq!(mine.get_value(A), b"Test Static Value");
    }

    #[test]
    fn test_realloc_repacks_away_slack() {
        let mut table = {
            let mut tab = FieldTable::new(1, 0, 256);
            tab.add_value(A, &pattern(64)).unwrap();
            tab.add_value(A, &pattern(128)).unwrap();
            assert_eq!(tab.used(), 67 + 131);
            Arc::new(tab)
        };

        assert!(FieldTable::realloc(&mut table));
        assert_eq!(table.used(), 131);
        assert_eq!(table.get_value(A), &pattern(128)[..]);
    }

    #[test]
    fn test_realloc_preserves_snapshot_views() {
        let value = pattern(128);
        let mut table = {
            let mut tab = FieldTable::new(4, 4, 256);
            tab.add_value(A, &value).unwrap();
            tab.add_value_indirect(B, A, 1, 126).unwrap();
            // copy-on-write rewrite orphans B's target range
            tab.add_value(A, &pattern(32)).unwrap();
            Arc::new(tab)
        };

        assert!(FieldTable::realloc(&mut table));
        assert_eq!(table.get_value(A), &pattern(32)[..]);
        assert_eq!(table.get_value(B), &value[1..127]);
    }

    #[test]
    fn test_realloc_preserves_shared_and_unresolved_targets() {
        let value = pattern(128);
        let mut table = {
            let mut tab = FieldTable::new(4, 4, 512);
            tab.add_value(A, &value).unwrap();
            tab.add_value_indirect(B, A, 1, 126).unwrap();
            tab.add_value_indirect(C, B, 1, 122).unwrap();
            tab.add_value_indirect(FieldHandle::new(7), FieldHandle::new(9), 0, 8)
                .unwrap();
            Arc::new(tab)
        };

        assert!(FieldTable::realloc(&mut table));
        assert_eq!(table.get_value(B), &value[1..127]);
        assert_eq!(table.get_value(C), &value[2..124]);
        assert_eq!(table.get_value(FieldHandle::new(7)), b"");
    }
}
