// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Identity-keyed view storage with mark-and-sweep update windows.
//!
//! An [`IdentityMap`] owns one view object per source key. A rebuild brackets
//! its traversal with [`begin_update`](IdentityMap::begin_update) and
//! [`end_update`](IdentityMap::end_update):
//!
//! 1. `begin_update` starts a new epoch. Every existing entry is now *dirty*
//!    because its confirmation belongs to an older epoch. No pass over the
//!    entries is needed.
//! 2. The traversal [`commit`](IdentityMap::commit)s (or, through
//!    [`UpdateContext`](crate::context::UpdateContext), reconfirms) each entry
//!    it reaches, stamping it with the current epoch.
//! 3. `end_update` drops every entry still carrying an older stamp.
//!
//! Reachability is thereby discovered as a side effect of the traversal; the
//! caller never diffs old and new reachable sets.
//!
//! Views live in a slot array addressed by generational [`ViewId`] handles.
//! Dropped slots are recycled through a free list and their generation is
//! bumped so stale handles stop resolving.

use alloc::vec::Vec;
use core::fmt;
use core::hash::Hash;

use hashbrown::HashMap;

use crate::ReconcileError;
use crate::id::ViewId;

/// Result of [`IdentityMap::lookup`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Lookup {
    /// The mapped view.
    pub id: ViewId,
    /// Whether the entry has not yet been reconfirmed in the open update
    /// window. Always `false` outside a window.
    pub dirty: bool,
}

/// An entry removed by [`IdentityMap::end_update`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Swept<K> {
    /// The source key of the removed entry, or `None` for unkeyed entries.
    pub key: Option<K>,
    /// The handle of the dropped view (now stale).
    pub id: ViewId,
}

#[derive(Debug)]
struct Slot<K, V> {
    generation: u32,
    occupied: bool,
    key: Option<K>,
    // `None` while free or while checked out for an update.
    value: Option<V>,
    confirmed: u64,
}

/// Keyed store from source identity to an owned view object, with
/// epoch-based dirty tracking.
///
/// `K` is the source identity (normally [`SourceKey`](crate::SourceKey)); the
/// map only hashes and compares it. `V` is the owned view object, typically a
/// `Box<dyn Trait>`.
pub struct IdentityMap<K, V> {
    slots: Vec<Slot<K, V>>,
    index: HashMap<K, u32>,
    free_list: Vec<u32>,
    live: usize,
    epoch: u64,
    updating: bool,
}

impl<K, V> fmt::Debug for IdentityMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMap")
            .field("live", &self.live)
            .field("epoch", &self.epoch)
            .field("updating", &self.updating)
            .finish_non_exhaustive()
    }
}

impl<K: Copy + Eq + Hash, V> Default for IdentityMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash, V> IdentityMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty map with room for `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            free_list: Vec::new(),
            live: 0,
            epoch: 0,
            updating: false,
        }
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns whether an update window is open.
    #[must_use]
    pub fn is_updating(&self) -> bool {
        self.updating
    }

    /// Returns the epoch of the most recently opened update window.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    // -- Update window --

    /// Opens an update window, marking every existing entry dirty.
    ///
    /// Returns the new epoch.
    pub fn begin_update(&mut self) -> Result<u64, ReconcileError> {
        if self.updating {
            return Err(ReconcileError::AlreadyUpdating);
        }
        self.epoch += 1;
        self.updating = true;
        Ok(self.epoch)
    }

    /// Closes the update window, dropping every entry that was not
    /// reconfirmed since [`begin_update`](Self::begin_update).
    pub fn end_update(&mut self) -> Result<Vec<Swept<K>>, ReconcileError> {
        if !self.updating {
            return Err(ReconcileError::NoUpdateOpen);
        }
        let mut swept = Vec::new();
        for idx in 0..self.slots.len() {
            let slot = &self.slots[idx];
            if slot.occupied && slot.confirmed != self.epoch {
                let key = slot.key;
                let id = ViewId::new(to_index(idx), slot.generation);
                self.release(id.idx);
                swept.push(Swept { key, id });
            }
        }
        self.updating = false;
        Ok(swept)
    }

    // -- Keyed access --

    /// Looks up the entry for `key`.
    ///
    /// Legal at any time. Outside an update window the entry is never dirty,
    /// since the sweep already ran.
    #[must_use]
    pub fn lookup(&self, key: &K) -> Option<Lookup> {
        let idx = *self.index.get(key)?;
        let slot = &self.slots[idx as usize];
        Some(Lookup {
            id: ViewId::new(idx, slot.generation),
            dirty: self.is_dirty(slot),
        })
    }

    /// Returns `true` if `key` has an entry.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the view mapped to `key`, if any.
    ///
    /// Returns `None` for an entry whose view is currently checked out for an
    /// update.
    #[must_use]
    pub fn get_by_key(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.slots[idx as usize].value.as_ref()
    }

    /// Inserts `value` for `key`, or replaces the existing entry.
    ///
    /// This is the operation that reconfirms a key: the entry is stamped with
    /// the current epoch and survives the next sweep. A replaced view is
    /// dropped and the new one gets a fresh [`ViewId`].
    pub fn commit(&mut self, key: K, value: V) -> Result<ViewId, ReconcileError> {
        let id = self.reserve(Some(key))?;
        self.checkin(id, value);
        Ok(id)
    }

    /// Inserts a view that has no source key of its own.
    ///
    /// Unkeyed entries are confirmed for the current window only; they are
    /// swept by the next window unless inserted again.
    pub fn insert_unkeyed(&mut self, value: V) -> Result<ViewId, ReconcileError> {
        let id = self.reserve(None)?;
        self.checkin(id, value);
        Ok(id)
    }

    // -- Handle access --

    /// Returns whether `id` refers to a live entry.
    #[must_use]
    pub fn is_alive(&self, id: ViewId) -> bool {
        self.slot(id).is_some()
    }

    /// Returns the view behind `id`.
    #[must_use]
    pub fn get(&self, id: ViewId) -> Option<&V> {
        self.slot(id)?.value.as_ref()
    }

    /// Returns the view behind `id` mutably.
    #[must_use]
    pub fn get_mut(&mut self, id: ViewId) -> Option<&mut V> {
        let slot = self.slots.get_mut(id.idx as usize)?;
        if !slot.occupied || slot.generation != id.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Returns the source key of the entry behind `id`.
    #[must_use]
    pub fn key_of(&self, id: ViewId) -> Option<K> {
        self.slot(id)?.key
    }

    /// Iterates over all readable entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ViewId, &V)> + '_ {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| {
            let value = slot.value.as_ref()?;
            Some((ViewId::new(to_index(idx), slot.generation), value))
        })
    }

    // -- Crate-internal primitives --

    /// Allocates a confirmed entry for `key` with no value yet.
    ///
    /// An existing entry for `key` is dropped first.
    pub(crate) fn reserve(&mut self, key: Option<K>) -> Result<ViewId, ReconcileError> {
        if !self.updating {
            return Err(ReconcileError::UpdateWindowClosed);
        }
        if let Some(key) = key
            && let Some(&old) = self.index.get(&key)
        {
            self.release(old);
        }

        let idx = if let Some(idx) = self.free_list.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.occupied = true;
            slot.key = key;
            slot.confirmed = self.epoch;
            idx
        } else {
            let idx = to_index(self.slots.len());
            self.slots.push(Slot {
                generation: 0,
                occupied: true,
                key,
                value: None,
                confirmed: self.epoch,
            });
            idx
        };

        if let Some(key) = key {
            self.index.insert(key, idx);
        }
        self.live += 1;
        Ok(ViewId::new(idx, self.slots[idx as usize].generation))
    }

    /// Takes the view out of its slot, leaving the entry in place.
    pub(crate) fn checkout(&mut self, id: ViewId) -> Option<V> {
        let slot = self.slots.get_mut(id.idx as usize)?;
        if !slot.occupied || slot.generation != id.generation {
            return None;
        }
        slot.value.take()
    }

    /// Puts a view back into the slot it was checked out from.
    ///
    /// # Panics
    ///
    /// Panics if `id` is stale or the slot already holds a view.
    pub(crate) fn checkin(&mut self, id: ViewId, value: V) {
        let slot = &mut self.slots[id.idx as usize];
        assert!(
            slot.occupied && slot.generation == id.generation,
            "checkin with stale handle {id:?}"
        );
        assert!(slot.value.is_none(), "slot for {id:?} is not checked out");
        slot.value = Some(value);
    }

    /// Stamps the entry with the current epoch, returning its previous stamp.
    pub(crate) fn confirm(&mut self, id: ViewId) -> u64 {
        debug_assert!(self.updating, "confirm outside of an update window");
        let slot = &mut self.slots[id.idx as usize];
        debug_assert_eq!(slot.generation, id.generation, "confirm with stale handle");
        core::mem::replace(&mut slot.confirmed, self.epoch)
    }

    /// Restores a stamp returned by [`confirm`](Self::confirm).
    pub(crate) fn restore(&mut self, id: ViewId, confirmed: u64) {
        if let Some(slot) = self.slots.get_mut(id.idx as usize)
            && slot.occupied
            && slot.generation == id.generation
        {
            slot.confirmed = confirmed;
        }
    }

    /// Drops the entry behind `id`, returning its view if it was checked in.
    pub(crate) fn remove(&mut self, id: ViewId) -> Option<V> {
        self.slot(id)?;
        self.release(id.idx)
    }

    // -- Internals --

    fn slot(&self, id: ViewId) -> Option<&Slot<K, V>> {
        let slot = self.slots.get(id.idx as usize)?;
        (slot.occupied && slot.generation == id.generation).then_some(slot)
    }

    fn is_dirty(&self, slot: &Slot<K, V>) -> bool {
        self.updating && slot.confirmed != self.epoch
    }

    fn release(&mut self, idx: u32) -> Option<V> {
        let slot = &mut self.slots[idx as usize];
        debug_assert!(slot.occupied, "release of a free slot");
        if let Some(key) = slot.key.take() {
            self.index.remove(&key);
        }
        // Bump generation so old handles immediately fail validation.
        slot.generation = slot.generation.wrapping_add(1);
        slot.occupied = false;
        let value = slot.value.take();
        self.free_list.push(idx);
        self.live -= 1;
        value
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "slot indices are handed out as u32 and never exceed u32::MAX"
)]
const fn to_index(idx: usize) -> u32 {
    idx as u32
}
