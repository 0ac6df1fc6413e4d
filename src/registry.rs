//! The handle registry: an open-addressed table mapping live handles to their
//! [`ServiceContext`], plus a sorted, bind-once name table.

use std::sync::{Arc, RwLock};

use crate::context::ServiceContext;
use crate::handle::Handle;

const INITIAL_CAPACITY: usize = 16;
const MAX_LOAD_FACTOR_NUM: usize = 3;
const MAX_LOAD_FACTOR_DEN: usize = 4;

#[derive(Clone)]
enum Slot {
    Empty,
    Occupied(Arc<ServiceContext>),
    /// A removed entry. Kept as a distinct state (rather than reverting to `Empty`) so probing
    /// past a retired handle still finds later entries that hashed to the same bucket.
    Tombstone,
}

struct Table {
    slots: Vec<Slot>,
    len: usize,
}

impl Table {
    fn with_capacity(cap: usize) -> Self {
        Table {
            slots: vec![Slot::Empty; cap],
            len: 0,
        }
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn bucket_of(&self, service_id: u32) -> usize {
        // A cheap avalanche so sequential service ids (the common case, since the allocator is
        // a monotonic counter) don't cluster in adjacent buckets.
        let mut x = service_id as u64;
        x ^= x >> 16;
        x = x.wrapping_mul(0x85eb_ca6b);
        x ^= x >> 13;
        (x as usize) & self.mask()
    }

    fn needs_growth(&self) -> bool {
        self.len * MAX_LOAD_FACTOR_DEN >= self.slots.len() * MAX_LOAD_FACTOR_NUM
    }

    fn grow(&mut self) {
        let new_cap = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; new_cap]);
        self.len = 0;
        for slot in old {
            if let Slot::Occupied(ctx) = slot {
                self.insert_fresh(ctx);
            }
        }
    }

    /// Insert into a table known to have room and no existing entry for this handle (used
    /// during rehash, where every entry is by construction unique and present already).
    fn insert_fresh(&mut self, ctx: Arc<ServiceContext>) {
        let start = self.bucket_of(ctx.handle().service_id());
        let mask = self.mask();
        let mut i = start;
        loop {
            if let Slot::Empty = self.slots[i] {
                self.slots[i] = Slot::Occupied(ctx);
                self.len += 1;
                return;
            }
            i = (i + 1) & mask;
        }
    }

    /// Find a free (Empty or Tombstone) slot for `service_id`, starting from its natural
    /// bucket. Returns `None` if the table is completely full (shouldn't happen once `grow`
    /// keeps load factor bounded, but probing is still capped defensively).
    fn find_free_slot(&self, service_id: u32) -> Option<usize> {
        let start = self.bucket_of(service_id);
        let mask = self.mask();
        let mut i = start;
        for _ in 0..self.slots.len() {
            match self.slots[i] {
                Slot::Empty | Slot::Tombstone => return Some(i),
                Slot::Occupied(_) => {}
            }
            i = (i + 1) & mask;
        }
        None
    }

    fn find_occupied(&self, handle: Handle) -> Option<usize> {
        let start = self.bucket_of(handle.service_id());
        let mask = self.mask();
        let mut i = start;
        for _ in 0..self.slots.len() {
            match &self.slots[i] {
                Slot::Occupied(ctx) if ctx.handle() == handle => return Some(i),
                Slot::Empty => return None,
                _ => {}
            }
            i = (i + 1) & mask;
        }
        None
    }
}

/// Allocates handles and maps them to live contexts. Growth doubles the table in place under
/// the write lock; readers block for the duration of a rehash.
pub struct HandleRegistry {
    node_id: u8,
    next_service_id: std::sync::atomic::AtomicU32,
    table: RwLock<Table>,
}

impl HandleRegistry {
    pub fn new(node_id: u8) -> Self {
        HandleRegistry {
            node_id,
            next_service_id: std::sync::atomic::AtomicU32::new(1),
            table: RwLock::new(Table::with_capacity(INITIAL_CAPACITY)),
        }
    }

    /// Assign the next free handle and register a context for it. `build` is called with the
    /// chosen handle while the write lock is held, so the context it returns is constructed
    /// already knowing its own handle — there is no separate "reserve, then build, then insert"
    /// window in which another thread could observe or steal the handle.
    ///
    /// The low 24 bits of the service id advance monotonically (wrapping), which combined with
    /// a large address space makes immediate reuse of a just-retired handle rare without
    /// needing an explicit free list.
    pub fn register_with(
        &self,
        build: impl FnOnce(Handle) -> Arc<ServiceContext>,
    ) -> Option<(Handle, Arc<ServiceContext>)> {
        let mut table = self.table.write().unwrap();
        if table.needs_growth() {
            table.grow();
        }
        for _ in 0..crate::handle::SERVICE_ID_MASK {
            let service_id = self
                .next_service_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                & crate::handle::SERVICE_ID_MASK;
            if service_id == 0 {
                continue; // reserve 0 as the "no handle" sentinel
            }
            let handle = Handle::new(self.node_id, service_id);
            if table.find_occupied(handle).is_some() {
                continue; // a live handle already occupies this service id; try the next one
            }
            let Some(slot) = table.find_free_slot(service_id) else {
                return None; // table exhausted even after growth attempt
            };
            let ctx = build(handle);
            debug_assert_eq!(ctx.handle(), handle, "build() returned the wrong handle");
            table.slots[slot] = Slot::Occupied(ctx.clone());
            table.len += 1;
            return Some((handle, ctx));
        }
        None
    }

    /// Remove the mapping for `handle`. Returns whether it was live.
    pub fn retire(&self, handle: Handle) -> bool {
        let mut table = self.table.write().unwrap();
        if let Some(idx) = table.find_occupied(handle) {
            table.slots[idx] = Slot::Tombstone;
            table.len -= 1;
            true
        } else {
            false
        }
    }

    /// Acquire a fresh `Arc` reference to the context for `handle`, if it's live.
    pub fn lookup(&self, handle: Handle) -> Option<Arc<ServiceContext>> {
        let table = self.table.read().unwrap();
        let idx = table.find_occupied(handle)?;
        match &table.slots[idx] {
            Slot::Occupied(ctx) => Some(ctx.clone()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A sorted, append-only table mapping short names to handles. First writer for a name wins;
/// names are never rebound or removed for the life of the registry.
pub struct NameTable {
    entries: RwLock<Vec<(Box<str>, Handle)>>,
}

impl NameTable {
    pub fn new() -> Self {
        NameTable {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Bind `name` to `handle` iff it isn't already bound. Returns whether the bind succeeded.
    pub fn bind(&self, name: &str, handle: Handle) -> bool {
        let mut entries = self.entries.write().unwrap();
        match entries.binary_search_by(|(n, _)| n.as_ref().cmp(name)) {
            Ok(_) => false,
            Err(idx) => {
                entries.insert(idx, (Box::from(name), handle));
                true
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<Handle> {
        let entries = self.entries.read().unwrap();
        entries
            .binary_search_by(|(n, _)| n.as_ref().cmp(name))
            .ok()
            .map(|idx| entries[idx].1)
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}
