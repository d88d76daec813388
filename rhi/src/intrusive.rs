//! Index-based intrusive doubly-linked lists.
//!
//! Nodes live in a [`SlotMap`] arena owned by someone else and embed a
//! [`Link`]; the [`ListHead`] lives in the owner of the list. Linking and
//! unlinking are O(1) and never allocate, which is what the view lists on
//! textures and the active query and fence lists need.

use slotmap::{Key, SlotMap};

/// Per-node link storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link<K: Key> {
    prev: Option<K>,
    next: Option<K>,
    linked: bool,
}

impl<K: Key> Default for Link<K> {
    fn default() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
        }
    }
}

impl<K: Key> Link<K> {
    /// Returns true if the node is currently on a list.
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Access to the link embedded in a node.
pub trait Linked<K: Key> {
    fn link(&self) -> &Link<K>;
    fn link_mut(&mut self) -> &mut Link<K>;
}

/// Head of an intrusive list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHead<K: Key> {
    head: Option<K>,
    tail: Option<K>,
    len: usize,
}

impl<K: Key> Default for ListHead<K> {
    fn default() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }
}

impl<K: Key> ListHead<K> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First node of the list.
    pub fn front(&self) -> Option<K> {
        self.head
    }

    /// Append a node. Returns false if the key is stale or the node is already linked.
    pub fn push_back<V: Linked<K>>(&mut self, arena: &mut SlotMap<K, V>, key: K) -> bool {
        let old_tail = self.tail;
        let Some(node) = arena.get_mut(key) else {
            return false;
        };
        if node.link().linked {
            return false;
        }
        *node.link_mut() = Link {
            prev: old_tail,
            next: None,
            linked: true,
        };

        match old_tail.and_then(|tail| arena.get_mut(tail)) {
            Some(tail) => tail.link_mut().next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.len += 1;
        true
    }

    /// Remove a node. Returns false if the key is stale or the node is not linked.
    ///
    /// The node must belong to this list; unlinking a node of another list
    /// corrupts both.
    pub fn unlink<V: Linked<K>>(&mut self, arena: &mut SlotMap<K, V>, key: K) -> bool {
        let Some(node) = arena.get_mut(key) else {
            return false;
        };
        let link = *node.link();
        if !link.linked {
            return false;
        }
        *node.link_mut() = Link::default();

        match link.prev.and_then(|prev| arena.get_mut(prev)) {
            Some(prev) => prev.link_mut().next = link.next,
            None => self.head = link.next,
        }
        match link.next.and_then(|next| arena.get_mut(next)) {
            Some(next) => next.link_mut().prev = link.prev,
            None => self.tail = link.prev,
        }
        self.len -= 1;
        true
    }

    /// Remove and return the first node.
    pub fn pop_front<V: Linked<K>>(&mut self, arena: &mut SlotMap<K, V>) -> Option<K> {
        let key = self.head?;
        self.unlink(arena, key);
        Some(key)
    }

    /// Iterate over node keys from front to back.
    pub fn iter<'a, V: Linked<K>>(&self, arena: &'a SlotMap<K, V>) -> ListIter<'a, K, V> {
        ListIter {
            arena,
            next: self.head,
        }
    }

    /// Collect the keys into a vector, for walks that mutate the list.
    pub fn keys<V: Linked<K>>(&self, arena: &SlotMap<K, V>) -> Vec<K> {
        self.iter(arena).collect()
    }
}

/// Iterator over the keys of an intrusive list.
pub struct ListIter<'a, K: Key, V> {
    arena: &'a SlotMap<K, V>,
    next: Option<K>,
}

impl<K: Key, V: Linked<K>> Iterator for ListIter<'_, K, V> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        let key = self.next?;
        self.next = self.arena.get(key).and_then(|node| node.link().next);
        Some(key)
    }
}
