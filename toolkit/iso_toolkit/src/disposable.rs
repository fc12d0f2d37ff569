//! Environment wrapper with an ownership-aware teardown.

use iso_host::{Environment, EnvironmentSetup};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{ToolkitError, ToolkitResult};

/// Wraps an [`Environment`] and tears it down at most once.
///
/// The wrapper unloads the environment on disposal only if it created it.
/// Wrapping an existing environment never unloads it, and the home
/// environment is never unloaded at all.
#[derive(Debug)]
pub struct DisposableEnvironment {
    environment: Mutex<Option<Environment>>,
    owned: bool,
}

impl DisposableEnvironment {
    /// Create and own a fresh environment.
    pub fn create(setup: EnvironmentSetup) -> ToolkitResult<Self> {
        let environment = Environment::create(setup)?;
        Ok(DisposableEnvironment {
            environment: Mutex::new(Some(environment)),
            owned: true,
        })
    }

    /// Borrow an existing environment without taking ownership.
    pub fn wrap(environment: Environment) -> Self {
        DisposableEnvironment {
            environment: Mutex::new(Some(environment)),
            owned: false,
        }
    }

    /// The wrapped environment.
    pub fn environment(&self) -> ToolkitResult<Environment> {
        self.environment
            .lock()
            .clone()
            .ok_or_else(|| ToolkitError::disposed("environment wrapper"))
    }

    /// Whether disposal will unload the environment.
    pub fn owns_environment(&self) -> bool {
        self.owned
    }

    pub fn is_disposed(&self) -> bool {
        self.environment.lock().is_none()
    }

    /// Release the environment, unloading it if owned. Idempotent.
    pub fn dispose(&self) {
        let Some(environment) = self.environment.lock().take() else {
            return;
        };
        if !self.owned || environment.is_home() {
            return;
        }
        match environment.unload() {
            Ok(()) => debug!(environment = environment.name(), "owned environment unloaded"),
            Err(e) => warn!(environment = environment.name(), error = %e, "unload failed"),
        }
    }
}

impl Drop for DisposableEnvironment {
    fn drop(&mut self) {
        self.dispose();
    }
}
