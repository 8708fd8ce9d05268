//! Foreign object table
//!
//! Every foreign object created while the runtime is running lives in one
//! table owned by the running session. Callers only ever hold:
//!
//! - [`Owned`]: one counted reference, released exactly once on `Drop`
//! - [`Borrowed`]: a view whose lifetime is tied to an owned handle; never
//!   released on its own
//!
//! The table counts every reference taken and every reference released, so a
//! balanced operation leaves [`HandleStats::live`] where it started.
//!
//! A module object owns the store its instance lives in, so releasing the
//! last module reference frees the instance and its linear memory.

use std::cell::RefCell;
use std::marker::PhantomData;

use wasmtime::{Func, Instance, Store, Val};

use super::Session;

/// Slot index into the object table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObjectId(usize);

/// Foreign object payloads
pub(crate) enum ForeignObject {
    /// Imported, instantiated module together with its store
    Module {
        name: String,
        store: Store<()>,
        instance: Instance,
    },
    /// Single marshalled argument
    Value(Val),
    /// Ordered argument container
    Tuple(Vec<Val>),
    /// Values returned by a call
    Results(Vec<Val>),
}

/// Object kind, mostly for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Module,
    Value,
    Tuple,
    Results,
}

impl std::fmt::Debug for ForeignObject {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ForeignObject::Module { name, .. } => {
                f.debug_struct("Module").field("name", name).finish_non_exhaustive()
            }
            ForeignObject::Value(val) => f.debug_tuple("Value").field(val).finish(),
            ForeignObject::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            ForeignObject::Results(items) => f.debug_tuple("Results").field(items).finish(),
        }
    }
}

impl ForeignObject {
    pub(crate) fn kind(&self) -> ObjectKind {
        match self {
            ForeignObject::Module { .. } => ObjectKind::Module,
            ForeignObject::Value(_) => ObjectKind::Value,
            ForeignObject::Tuple(_) => ObjectKind::Tuple,
            ForeignObject::Results(_) => ObjectKind::Results,
        }
    }
}

/// Leak-detection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleStats {
    /// References handed out
    pub acquired: u64,
    /// References given back
    pub released: u64,
}

impl HandleStats {
    /// References currently outstanding
    pub fn live(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

#[derive(Debug)]
struct Slot {
    refcount: usize,
    object: ForeignObject,
}

/// Reference-counted slab of foreign objects
#[derive(Debug, Default)]
pub(crate) struct ObjectTable {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    stats: HandleStats,
    #[cfg(test)]
    pub(crate) freed: Vec<ObjectKind>,
}

impl ObjectTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store a new object with one reference
    pub(crate) fn insert(
        &mut self,
        object: ForeignObject,
    ) -> ObjectId {
        let slot = Slot {
            refcount: 1,
            object,
        };
        self.stats.acquired += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                ObjectId(index)
            }
            None => {
                self.slots.push(Some(slot));
                ObjectId(self.slots.len() - 1)
            }
        }
    }

    pub(crate) fn get(
        &self,
        id: ObjectId,
    ) -> Option<&ForeignObject> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .map(|slot| &slot.object)
    }

    pub(crate) fn get_mut(
        &mut self,
        id: ObjectId,
    ) -> Option<&mut ForeignObject> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|slot| &mut slot.object)
    }

    /// Take one more reference to a live object
    pub(crate) fn incref(
        &mut self,
        id: ObjectId,
    ) -> bool {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(slot) => {
                slot.refcount += 1;
                self.stats.acquired += 1;
                true
            }
            None => false,
        }
    }

    /// Give back one reference; the object is removed at zero and returned.
    pub(crate) fn decref(
        &mut self,
        id: ObjectId,
    ) -> Option<ForeignObject> {
        let slot = self.slots.get_mut(id.0)?;
        let remaining = {
            let live = slot.as_mut()?;
            live.refcount -= 1;
            live.refcount
        };
        self.stats.released += 1;
        if remaining > 0 {
            return None;
        }

        let freed = slot.take().map(|slot| slot.object);
        self.free.push(id.0);
        #[cfg(test)]
        if let Some(object) = &freed {
            self.freed.push(object.kind());
        }
        freed
    }

    pub(crate) fn stats(&self) -> HandleStats {
        self.stats
    }

    /// Number of objects still stored
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// An owned reference to a foreign object.
///
/// Dropping it releases the reference. It borrows the running session, so
/// the runtime cannot be finalized while any owned handle is alive.
#[derive(Debug)]
pub struct Owned<'rt> {
    table: &'rt RefCell<ObjectTable>,
    id: ObjectId,
    kind: ObjectKind,
}

impl<'rt> Owned<'rt> {
    pub(crate) fn acquire(
        session: &'rt Session,
        object: ForeignObject,
    ) -> Self {
        let kind = object.kind();
        let id = session.objects.borrow_mut().insert(object);
        Self {
            table: &session.objects,
            id,
            kind,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Take an additional owned reference to the same object
    pub fn clone_ref(&self) -> Owned<'rt> {
        self.table.borrow_mut().incref(self.id);
        Owned {
            table: self.table,
            id: self.id,
            kind: self.kind,
        }
    }

    /// Inspect the object
    pub(crate) fn with<R>(
        &self,
        f: impl FnOnce(&ForeignObject) -> R,
    ) -> R {
        let table = self.table.borrow();
        let object = table
            .get(self.id)
            .unwrap_or_else(|| unreachable!("owned handle {:?} outlived its object", self.id));
        f(object)
    }

    pub(crate) fn with_mut<R>(
        &self,
        f: impl FnOnce(&mut ForeignObject) -> R,
    ) -> R {
        let mut table = self.table.borrow_mut();
        let object = table
            .get_mut(self.id)
            .unwrap_or_else(|| unreachable!("owned handle {:?} outlived its object", self.id));
        f(object)
    }

    /// Give this reference to `target`, which takes over the value.
    ///
    /// Only argument values can be stolen, and only into a tuple.
    pub(crate) fn steal_into(
        self,
        target: &Owned<'rt>,
    ) {
        let value = self.with(|object| match object {
            ForeignObject::Value(val) => Some(val.clone()),
            _ => None,
        });
        if let Some(val) = value {
            target.with_mut(|object| {
                if let ForeignObject::Tuple(items) = object {
                    items.push(val);
                }
            });
        }
        // self drops here and releases the stolen reference
    }
}

impl Drop for Owned<'_> {
    fn drop(&mut self) {
        // A panic while the table is borrowed must not turn into a double panic
        if let Ok(mut table) = self.table.try_borrow_mut() {
            table.decref(self.id);
        }
    }
}

/// A borrowed callable, valid only while its owning module handle lives
#[derive(Debug, Clone, Copy)]
pub struct Borrowed<'m> {
    func: Func,
    _owner: PhantomData<&'m ()>,
}

impl<'m> Borrowed<'m> {
    pub(crate) fn new<'rt>(
        _owner: &'m Owned<'rt>,
        func: Func,
    ) -> Self {
        Self {
            func,
            _owner: PhantomData,
        }
    }

    pub(crate) fn func(&self) -> Func {
        self.func
    }
}
