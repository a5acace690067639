//! ID-keyed storage for registry-owned values.

use std::{collections::BTreeMap, ops::Index};

/// An ordered map from stable IDs to values that hands out fresh IDs on
/// [`Arena::push`].
///
/// Iteration is in ascending ID order, which keeps every pass over the
/// registry deterministic.
#[derive(Clone, Debug, PartialEq)]
pub struct Arena<Id: IdLike + Ord + Copy, T> {
    inner: BTreeMap<Id, T>,
    next_id: u64,
}

impl<Id: IdLike + Ord + Copy, T> Arena<Id, T> {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.inner.contains_key(&id)
    }

    /// Allocate a new ID without storing anything under it yet.
    pub fn reserve_id(&mut self) -> Id {
        let id = Id::from_raw(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    pub fn push(&mut self, x: T) -> Id {
        let id = self.reserve_id();
        self.inner.insert(id, x);
        id
    }

    /// Store `x` under an explicit ID, e.g. when restoring a save. Later
    /// [`Arena::push`] calls never reuse it, unless it is [`u64::MAX`],
    /// which callers restoring untrusted IDs should refuse.
    pub fn insert(&mut self, id: Id, x: T) -> Option<T> {
        self.next_id = self.next_id.max(id.into_raw().saturating_add(1));
        self.inner.insert(id, x)
    }

    pub fn remove(&mut self, id: Id) -> Option<T> {
        self.inner.remove(&id)
    }

    pub fn get(&self, id: Id) -> Option<&T> {
        self.inner.get(&id)
    }

    pub fn get_mut(&mut self, id: Id) -> Option<&mut T> {
        self.inner.get_mut(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.inner.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id, &T)> {
        self.inner.iter().map(|(i, v)| (*i, v))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.inner.values()
    }
}

impl<Id: IdLike + Ord + Copy, T> Default for Arena<Id, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: IdLike + Ord + Copy, T> Index<Id> for Arena<Id, T> {
    type Output = T;

    fn index(&self, index: Id) -> &Self::Output {
        &self.inner[&index]
    }
}

pub trait IdLike {
    fn from_raw(index: u64) -> Self;
    fn into_raw(self) -> u64;
}
