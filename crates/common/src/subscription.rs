//! Subscription sets over the closed [`UpdateType`] enumeration.
//!
//! With only four update types a set fits in one byte, so the shared variant
//! can be updated with single atomic operations instead of a lock.

use crate::messages::UpdateType;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Set of update types a client is interested in.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SubscriptionSet(u8);

impl SubscriptionSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a type. Returns true if it was not already present.
    pub fn insert(&mut self, update_type: UpdateType) -> bool {
        let added = !self.contains(update_type);
        self.0 |= update_type.bit();
        added
    }

    /// Remove a type. Returns true if it was present.
    pub fn remove(&mut self, update_type: UpdateType) -> bool {
        let removed = self.contains(update_type);
        self.0 &= !update_type.bit();
        removed
    }

    pub fn contains(&self, update_type: UpdateType) -> bool {
        self.0 & update_type.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate the contained types in wire order.
    pub fn iter(&self) -> impl Iterator<Item = UpdateType> + '_ {
        UpdateType::ALL.into_iter().filter(|t| self.contains(*t))
    }

    pub fn to_vec(&self) -> Vec<UpdateType> {
        self.iter().collect()
    }

    fn bits(types: impl IntoIterator<Item = UpdateType>) -> u8 {
        types.into_iter().fold(0, |acc, t| acc | t.bit())
    }
}

impl FromIterator<UpdateType> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = UpdateType>>(iter: I) -> Self {
        Self(Self::bits(iter))
    }
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A [`SubscriptionSet`] that can be mutated concurrently.
///
/// Concurrent adds and removes of different types are never lost, and a reader
/// always sees a complete set.
#[derive(Debug, Default)]
pub struct SharedSubscriptions(AtomicU8);

impl SharedSubscriptions {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Add every type in `types`.
    pub fn add(&self, types: impl IntoIterator<Item = UpdateType>) {
        self.0
            .fetch_or(SubscriptionSet::bits(types), Ordering::AcqRel);
    }

    /// Remove every type in `types`.
    pub fn remove(&self, types: impl IntoIterator<Item = UpdateType>) {
        self.0
            .fetch_and(!SubscriptionSet::bits(types), Ordering::AcqRel);
    }

    pub fn contains(&self, update_type: UpdateType) -> bool {
        self.snapshot().contains(update_type)
    }

    /// Current contents.
    pub fn snapshot(&self) -> SubscriptionSet {
        SubscriptionSet(self.0.load(Ordering::Acquire))
    }

    /// Empty the set, returning what it held.
    pub fn take(&self) -> SubscriptionSet {
        SubscriptionSet(self.0.swap(0, Ordering::AcqRel))
    }
}
