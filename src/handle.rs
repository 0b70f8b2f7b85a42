//! Driver object handles.
//!
//! Every resource object that can be referenced from an update-template data blob carries a
//! process-unique 64-bit handle. The [`HandleTable`] maps raw handle values back to live objects;
//! each [`Device`](crate::device::Device) owns exactly one table, so handle resolution is never
//! ambient global state.

use crate::RuntimeError;
use foldhash::HashMap;
use parking_lot::RwLock;
use std::{
    any::Any,
    num::NonZeroU64,
    sync::{Arc, Weak},
};

/// A raw driver handle to a resource object.
///
/// Handles are never reused within a process. The zero value is reserved as a null sentinel and
/// is never a valid handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Returns the raw value of the handle.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0.get()
    }

    pub(crate) fn from_id(id: NonZeroU64) -> Self {
        Self(id)
    }
}

/// Maps raw handle values to live resource objects.
///
/// The table holds weak references only: it never extends an object's lifetime, and resolving the
/// handle of a destroyed object fails with [`RuntimeError::InvalidExternalHandle`].
#[derive(Debug, Default)]
pub struct HandleTable {
    objects: RwLock<HashMap<u64, Weak<dyn Any + Send + Sync>>>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `object` under its id and returns the handle.
    pub(crate) fn register<T>(&self, id: NonZeroU64, object: &Arc<T>) -> Handle
    where
        T: Any + Send + Sync,
    {
        let weak = Arc::downgrade(object) as Weak<dyn Any + Send + Sync>;
        self.objects.write().insert(id.get(), weak);

        Handle(id)
    }

    pub(crate) fn unregister(&self, id: NonZeroU64) {
        self.objects.write().remove(&id.get());
    }

    /// Resolves a raw handle value to a live object of type `T`.
    ///
    /// Fails with [`RuntimeError::InvalidExternalHandle`] if the value was never registered, if
    /// the object has since been destroyed, or if it is not a `T`.
    pub fn lookup<T>(&self, raw: u64) -> Result<Arc<T>, RuntimeError>
    where
        T: Any + Send + Sync,
    {
        let objects = self.objects.read();
        let weak = objects.get(&raw).ok_or(RuntimeError::InvalidExternalHandle)?;
        let object = weak.upgrade().ok_or(RuntimeError::InvalidExternalHandle)?;

        object
            .downcast::<T>()
            .map_err(|_| RuntimeError::InvalidExternalHandle)
    }
}
