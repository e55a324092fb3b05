use std::mem;

/// A stable key into a [`Slab`].
///
/// The key pairs a slot index with the generation of the value stored in it.
/// Once the value is removed the slot's generation moves forward, so an old
/// key can never observe a value inserted later into the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Key {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// A generational slab allocator.
///
/// A `Slab` stores values of type `T` in a contiguous array and hands out
/// [`Key`]s that stay valid until the value is removed. Freed slots are
/// reused, but every reuse bumps the slot generation.
///
/// The reactor uses it as its connection arena: callbacks hold keys rather
/// than references, and a key to a destroyed connection simply stops
/// resolving.
pub(crate) struct Slab<T> {
    /// Storage for values and vacant slots.
    entries: Vec<Entry<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a new `Slab` with room for `capacity` values before growing.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let slab = Slab::<i32>::new(16);
    /// ```
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Inserts a value into the slab and returns its key.
    ///
    /// If a free slot is available, it is reused with a fresh generation.
    /// Otherwise, the slab grows by one slot.
    pub(crate) fn insert(&mut self, value: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            let generation = match *entry {
                Entry::Vacant { generation } => generation,
                Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };

            *entry = Entry::Occupied { generation, value };

            return Key { index, generation };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });

        Key {
            index,
            generation: 0,
        }
    }

    /// Removes and returns the value stored under `key`.
    ///
    /// Returns `None` if the key is stale or was never issued.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let entry = self.entries.get_mut(key.index as usize)?;

        match *entry {
            Entry::Occupied { generation, .. } if generation == key.generation => {}
            _ => return None,
        }

        let next = Entry::Vacant {
            generation: key.generation.wrapping_add(1),
        };

        let Entry::Occupied { value, .. } = mem::replace(entry, next) else {
            unreachable!("entry was checked to be occupied");
        };

        self.free.push(key.index);
        self.len -= 1;

        Some(value)
    }

    /// Returns a reference to the value stored under `key`.
    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        match self.entries.get(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.entries.get_mut(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Returns `true` if `key` refers to a live value.
    pub(crate) fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Returns the number of live values.
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
