// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Source identity and view handle types.

use core::fmt;

/// Opaque identity of a source object.
///
/// Source objects are owned outside the engine. A `SourceKey` names one of
/// them without ever being dereferenced: it is either an explicit stable
/// handle chosen by the caller (an arena slot, a database row id) or an
/// address taken with [`SourceKey::of`] and used purely as a number.
///
/// Identity is reference identity, not value equality: two structurally equal
/// source objects at different addresses get different keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey(u64);

impl SourceKey {
    /// Creates a key from an explicit stable handle.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Creates a key from the address of `source`.
    ///
    /// The key is only meaningful while `source` stays at that address. Once
    /// the object is freed, a new object allocated at the same address would
    /// be treated as the same source, so callers that free and reallocate
    /// source objects between rebuilds should prefer [`SourceKey::new`] with
    /// a handle that is never reused.
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized>(source: &T) -> Self {
        let addr = core::ptr::from_ref(source).cast::<()>().addr();
        Self(addr as u64)
    }

    /// Returns the raw key value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceKey({:#x})", self.0)
    }
}

/// A handle to one view-object instance owned by an
/// [`IdentityMap`](crate::map::IdentityMap).
///
/// Contains both a slot index and a generation counter. Whenever the instance
/// in a slot is dropped (swept, rejected, or rolled back) the generation is
/// bumped, so a stale handle never resolves to a later instance. Two equal
/// `ViewId`s therefore always name the same instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId {
    /// Slot index into the map's slot array.
    pub(crate) idx: u32,
    /// Generation counter; must match the slot's generation.
    pub(crate) generation: u32,
}

impl ViewId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self { idx, generation }
    }

    /// Returns the raw slot index (for diagnostics only).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.idx
    }

    /// Returns the generation counter.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Reassembles a handle from its parts.
    ///
    /// Intended for decoding recorded traces; a handle built this way is only
    /// valid if the parts came from a live handle of the same map.
    #[inline]
    #[must_use]
    pub const fn from_parts(index: u32, generation: u32) -> Self {
        Self::new(index, generation)
    }
}

impl fmt::Debug for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewId({}@gen{})", self.idx, self.generation)
    }
}
