//! Cross-environment proxies.
//!
//! [`Remote<T>`] constructs a `T` inside a target environment and holds a
//! handle to it. Every call on the handle runs inside that environment.

use std::fmt;
use std::sync::Arc;

use iso_host::{Environment, EnvironmentSetup, ObjectRef};
use tracing::{debug, trace};

use crate::disposable::DisposableEnvironment;
use crate::{ToolkitError, ToolkitResult};

/// A type that can be constructed inside another environment.
///
/// `Args` crosses the boundary by value, so it must be `Send`. Use `()` for
/// types with a default constructor.
pub trait RemoteConstruct: Send + Sync + Sized + 'static {
    type Args: Send + 'static;

    fn construct(args: Self::Args) -> Self;
}

/// Disposable handle to a `T` living in another environment.
pub struct Remote<T: RemoteConstruct> {
    domain: Arc<DisposableEnvironment>,
    object: Option<ObjectRef<T>>,
}

impl<T: RemoteConstruct> Remote<T> {
    /// Construct a `T` inside `environment`.
    ///
    /// The proxy never unloads `environment`.
    pub fn create_proxy(environment: &Environment, args: T::Args) -> ToolkitResult<Self> {
        if environment.is_unloaded() {
            return Err(ToolkitError::disposed(format!(
                "environment `{}`",
                environment.name()
            )));
        }
        Self::create_in(Arc::new(DisposableEnvironment::wrap(environment.clone())), args)
    }

    /// Construct a `T` inside a fresh environment owned by the proxy.
    ///
    /// Disposing the proxy unloads the environment.
    pub fn create_isolated(setup: EnvironmentSetup, args: T::Args) -> ToolkitResult<Self> {
        Self::create_in(Arc::new(DisposableEnvironment::create(setup)?), args)
    }

    /// Construct a `T` inside a wrapper shared with other proxies.
    pub(crate) fn create_in(
        domain: Arc<DisposableEnvironment>,
        args: T::Args,
    ) -> ToolkitResult<Self> {
        let environment = domain.environment()?;
        let object = environment.construct(move || T::construct(args))?;
        debug!(
            environment = environment.name(),
            ty = std::any::type_name::<T>(),
            "remote object created"
        );
        Ok(Remote {
            domain,
            object: Some(object),
        })
    }

    /// Handle to the remote object.
    pub fn remote_object(&self) -> ToolkitResult<&ObjectRef<T>> {
        self.object
            .as_ref()
            .ok_or_else(|| ToolkitError::disposed(std::any::type_name::<Self>()))
    }

    /// The environment the object lives in.
    pub fn environment(&self) -> ToolkitResult<Environment> {
        if self.object.is_none() {
            return Err(ToolkitError::disposed(std::any::type_name::<Self>()));
        }
        self.domain.environment()
    }

    /// Run `f` against the remote object inside its environment.
    pub fn invoke<R, F>(&self, f: F) -> ToolkitResult<R>
    where
        F: FnOnce(&Arc<T>) -> R + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.remote_object()?.invoke(f)?)
    }

    pub fn is_disposed(&self) -> bool {
        self.object.is_none()
    }

    /// Release the remote object and dispose the environment wrapper.
    /// Idempotent; tolerates an environment that is already gone.
    pub fn dispose(&mut self) {
        let Some(object) = self.object.take() else {
            return;
        };
        if !object.environment().is_unloaded() {
            if let Err(e) = object.release() {
                trace!(error = %e, "remote object release failed");
            }
        }
        self.domain.dispose();
        trace!(ty = std::any::type_name::<T>(), "remote proxy disposed");
    }
}

impl<T: RemoteConstruct> Drop for Remote<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: RemoteConstruct> fmt::Debug for Remote<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("object", &self.object)
            .field("domain", &self.domain)
            .finish()
    }
}
