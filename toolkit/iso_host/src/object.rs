//! Handles to objects living inside an environment.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{Environment, HostError, HostResult};

/// Identifier of an object in an environment's object table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ObjectId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Handle to a `T` constructed inside an environment.
///
/// The handle itself can cross into any environment; every use of the
/// object is marshalled back onto the owning environment with
/// [`ObjectRef::invoke`]. The object lives until [`ObjectRef::release`] or
/// until its environment is unloaded, whichever comes first.
pub struct ObjectRef<T> {
    environment: Environment,
    id: ObjectId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectRef<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(environment: Environment, id: ObjectId) -> Self {
        ObjectRef {
            environment,
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The environment the object lives in.
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Run `f` against the object inside its environment.
    pub fn invoke<R, F>(&self, f: F) -> HostResult<R>
    where
        F: FnOnce(&Arc<T>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let environment = self.environment.clone();
        let id = self.id;
        self.environment
            .execute(move || environment.object::<T>(id).map(|object| f(&object)))?
    }

    /// Drop the environment's reference to the object.
    ///
    /// Returns `false` if it was already released or the environment is
    /// gone.
    pub fn release(&self) -> HostResult<bool> {
        if self.environment.is_unloaded() {
            return Ok(false);
        }
        let environment = self.environment.clone();
        let id = self.id;
        match self
            .environment
            .execute(move || environment.remove_object(id))
        {
            Ok(released) => Ok(released),
            Err(HostError::Unloaded { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<T> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        ObjectRef {
            environment: self.environment.clone(),
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.id)
            .field("type", &std::any::type_name::<T>())
            .field("environment", &self.environment.name())
            .finish()
    }
}
