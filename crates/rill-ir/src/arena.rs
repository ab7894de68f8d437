//! Typed-index arenas backing the IR.
//!
//! Blocks, values, and instructions all live in per-function arenas and are
//! referred to by dense `u32` handles. Each handle kind is its own newtype,
//! declared with [`define_id!`], so a block index can never be mistaken for
//! a value index.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// A typed handle into an [`Arena`].
pub trait Id: Copy + Eq + std::hash::Hash + std::fmt::Debug {
    fn from_u32(raw: u32) -> Self;
    fn as_u32(self) -> u32;
}

/// Declare a handle type usable as an [`Arena`] key.
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
        pub struct $name(u32);

        impl $crate::arena::Id for $name {
            fn from_u32(raw: u32) -> Self {
                Self(raw)
            }
            fn as_u32(self) -> u32 {
                self.0
            }
        }
    };
}

/// Append-only storage addressed by typed handles.
///
/// Handles are allocated in insertion order and only ever produced by the
/// arena that owns the item, so indexing cannot miss. Serializes as the bare
/// item vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arena<K: Id, V> {
    items: Vec<V>,
    #[serde(skip)]
    marker: PhantomData<fn(K) -> K>,
}

impl<K: Id, V> Arena<K, V> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            marker: PhantomData,
        }
    }

    /// Store an item and hand back its handle.
    pub fn push(&mut self, item: V) -> K {
        let id = K::from_u32(self.items.len() as u32);
        self.items.push(item);
        id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Handle/item pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (K::from_u32(i as u32), item))
    }

    /// Items alone, in insertion order.
    pub fn values(&self) -> std::slice::Iter<'_, V> {
        self.items.iter()
    }
}

impl<K: Id, V> std::ops::Index<K> for Arena<K, V> {
    type Output = V;
    fn index(&self, id: K) -> &V {
        &self.items[id.as_u32() as usize]
    }
}

impl<K: Id, V> std::ops::IndexMut<K> for Arena<K, V> {
    fn index_mut(&mut self, id: K) -> &mut V {
        &mut self.items[id.as_u32() as usize]
    }
}
