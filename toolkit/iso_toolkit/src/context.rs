//! Isolation contexts.
//!
//! An [`IsolationContext`] owns one isolated environment and everything
//! needed to load modules into it:
//!
//! - a home-side [`PathResolver`] (the *importer*) hooked into the home
//!   environment, so references that surface on the caller's side resolve
//!   from the same probe paths
//! - a remote [`PathResolver`] living in the isolated environment and
//!   hooked into it
//! - a remote [`TargetLoader`] that performs loads inside the environment
//!
//! ```text
//! let mut context = IsolationContext::create()?;
//! context.add_probe_path("/opt/plugins")?;
//! let target = context.load_module(LoadStrategy::LoadBytes, path, None)?;
//! context.dispose(); // unloads everything loaded inside
//! ```
//!
//! Disposal is idempotent and also happens on drop. The home environment
//! can be wrapped but is never unloaded.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use iso_host::{Environment, EnvironmentSetup, HookId, ObjectRef, ResolveHook};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::disposable::DisposableEnvironment;
use crate::loader::TargetLoader;
use crate::remote::Remote;
use crate::resolver::{normalize, PathResolver, RemoteStrategyOverride};
use crate::{ContextConfig, LoadStrategy, ModuleTarget, ToolkitError, ToolkitResult};

/// An isolated environment plus the machinery to load modules into it.
pub struct IsolationContext {
    id: Uuid,
    domain: Arc<DisposableEnvironment>,
    importer: Option<Arc<PathResolver>>,
    importer_hook: Option<HookId>,
    remote_hook: Option<HookId>,
    loader: Remote<TargetLoader>,
    resolver: Remote<PathResolver>,
    disposed: bool,
}

impl IsolationContext {
    /// Create a context around a fresh environment with default settings.
    pub fn create() -> ToolkitResult<Self> {
        Self::create_with(EnvironmentSetup::default())
    }

    /// Create a context around a fresh environment.
    ///
    /// Missing settings are filled in: the name becomes `iso-env-{id}`, the
    /// application base the directory of the running executable, and the
    /// private bin path the application base.
    pub fn create_with(setup: EnvironmentSetup) -> ToolkitResult<Self> {
        let id = Uuid::new_v4();
        let setup = complete_setup(setup, id);
        let domain = DisposableEnvironment::create(setup.clone())?;
        Self::build(id, domain, &setup)
    }

    /// Create a context from a [`ContextConfig`].
    pub fn create_from_config(config: &ContextConfig) -> ToolkitResult<Self> {
        let context = Self::create_with(config.setup())?;
        for path in &config.probe_paths {
            context.add_probe_path(path)?;
        }
        context.set_resolver_strategy(config.strategy)?;
        Ok(context)
    }

    /// Build a context around an existing environment. Disposing the context
    /// leaves the environment loaded.
    pub fn wrap(environment: &Environment) -> ToolkitResult<Self> {
        if environment.is_unloaded() {
            return Err(ToolkitError::disposed(format!(
                "environment `{}`",
                environment.name()
            )));
        }
        let setup = environment.setup().clone();
        let domain = DisposableEnvironment::wrap(environment.clone());
        Self::build(Uuid::new_v4(), domain, &setup)
    }

    fn build(id: Uuid, domain: DisposableEnvironment, setup: &EnvironmentSetup) -> ToolkitResult<Self> {
        let domain = Arc::new(domain);
        let environment = domain.environment()?;

        let importer = Arc::new(PathResolver::new());
        apply_paths(
            &importer,
            setup.application_base.as_deref(),
            setup.private_bin_path.as_deref(),
        );
        let home = Environment::home();
        let importer_hook = home.add_resolve_hook(importer.clone())?;

        let proxies = Remote::<TargetLoader>::create_in(Arc::clone(&domain), ()).and_then(|loader| {
            let resolver = Remote::<PathResolver>::create_in(Arc::clone(&domain), ())?;
            Ok((loader, resolver))
        });
        let (loader, resolver) = match proxies {
            Ok(proxies) => proxies,
            Err(e) => {
                home.remove_resolve_hook(importer_hook);
                return Err(e);
            }
        };

        // From here on, dropping `context` unwinds whatever was built.
        let mut context = IsolationContext {
            id,
            domain,
            importer: Some(importer),
            importer_hook: Some(importer_hook),
            remote_hook: None,
            loader,
            resolver,
            disposed: false,
        };

        let remote_hook = context.resolver.invoke(|resolver| {
            let hook: Arc<dyn ResolveHook> = resolver.clone();
            Environment::current().add_resolve_hook(hook)
        })??;
        context.remote_hook = Some(remote_hook);

        let base = setup.application_base.clone();
        let private_bin = setup.private_bin_path.clone();
        context.resolver.invoke(move |resolver| {
            apply_paths(resolver, base.as_deref(), private_bin.as_deref());
        })?;

        debug!(id = %id, environment = environment.name(), "isolation context created");
        Ok(context)
    }

    pub fn unique_id(&self) -> ToolkitResult<Uuid> {
        self.ensure_live()?;
        Ok(self.id)
    }

    /// The isolated environment.
    pub fn environment(&self) -> ToolkitResult<Environment> {
        self.ensure_live()?;
        self.domain.environment()
    }

    /// The home-side resolver.
    pub fn importer(&self) -> ToolkitResult<Arc<PathResolver>> {
        self.ensure_live()?;
        self.importer
            .clone()
            .ok_or_else(|| ToolkitError::disposed("isolation context"))
    }

    /// Handle to the resolver living inside the isolated environment.
    pub fn remote_resolver(&self) -> ToolkitResult<ObjectRef<PathResolver>> {
        self.ensure_live()?;
        self.resolver.remote_object().cloned()
    }

    /// Add probe paths (a path or semicolon list) to both resolvers.
    pub fn add_probe_path(&self, paths: &str) -> ToolkitResult<()> {
        self.importer()?.add_probe_path(paths);
        let paths = paths.to_string();
        self.resolver.invoke(move |resolver| {
            resolver.add_probe_path(&paths);
        })
    }

    /// Set the strategy the remote resolver loads references with outside
    /// of a `load_*` call.
    pub fn set_resolver_strategy(&self, strategy: LoadStrategy) -> ToolkitResult<()> {
        self.ensure_live()?;
        self.resolver
            .invoke(move |resolver| resolver.set_strategy(strategy))
    }

    /// Descriptors of every module loaded in the environment.
    pub fn loaded_modules(&self) -> ToolkitResult<Vec<ModuleTarget>> {
        self.ensure_live()?;
        self.loader.invoke(|loader| loader.modules())?
    }

    /// Descriptors of every inspection-only module.
    pub fn inspected_modules(&self) -> ToolkitResult<Vec<ModuleTarget>> {
        self.ensure_live()?;
        self.loader.invoke(|loader| loader.inspected_modules())?
    }

    pub fn find_by_code_base(&self, code_base: &Url) -> ToolkitResult<Option<ModuleTarget>> {
        Ok(self
            .loaded_modules()?
            .into_iter()
            .find(|target| target.code_base() == Some(code_base)))
    }

    /// Find a bound module by where its file lives.
    ///
    /// `location` is canonicalized; a path that no longer exists is
    /// normalized lexically against the working directory instead.
    pub fn find_by_location(&self, location: &Path) -> ToolkitResult<Option<ModuleTarget>> {
        if location.as_os_str().is_empty() {
            return Err(ToolkitError::invalid("location", "must not be empty"));
        }
        let location = match location.canonicalize() {
            Ok(canonical) => canonical,
            Err(_) => normalize(location)
                .ok_or_else(|| ToolkitError::invalid("location", "must not be empty"))?,
        };
        Ok(self
            .loaded_modules()?
            .into_iter()
            .find(|target| target.location() == Some(location.as_path())))
    }

    pub fn find_by_full_name(&self, full_name: &str) -> ToolkitResult<Option<ModuleTarget>> {
        if full_name.trim().is_empty() {
            return Err(ToolkitError::invalid("full_name", "must not be empty"));
        }
        Ok(self
            .loaded_modules()?
            .into_iter()
            .find(|target| target.full_name() == Some(full_name)))
    }

    /// Load a module into the environment.
    ///
    /// For the duration of the call the remote resolver uses `strategy` too,
    /// so references pulled in by the load match the root.
    pub fn load_module(
        &self,
        strategy: LoadStrategy,
        path: &Path,
        symbol_path: Option<&Path>,
    ) -> ToolkitResult<ModuleTarget> {
        self.ensure_live()?;
        if path.as_os_str().is_empty() {
            return Err(ToolkitError::NullArgument { name: "path" });
        }
        let _strategy = RemoteStrategyOverride::new(self.resolver.remote_object()?, strategy)?;
        let path = path.to_path_buf();
        let symbol_path = symbol_path.map(Path::to_path_buf);
        self.loader.invoke(move |loader| {
            loader.load_module(strategy, &path, symbol_path.as_deref())
        })?
    }

    /// Load a module and its reference closure.
    pub fn load_module_with_references(
        &self,
        strategy: LoadStrategy,
        path: &Path,
    ) -> ToolkitResult<Vec<ModuleTarget>> {
        self.ensure_live()?;
        if path.as_os_str().is_empty() {
            return Err(ToolkitError::NullArgument { name: "path" });
        }
        let _strategy = RemoteStrategyOverride::new(self.resolver.remote_object()?, strategy)?;
        let path = path.to_path_buf();
        self.loader
            .invoke(move |loader| loader.load_module_with_references(strategy, &path))?
    }

    /// Load the module a descriptor's code base points at.
    pub fn load_target(
        &self,
        strategy: LoadStrategy,
        target: &ModuleTarget,
    ) -> ToolkitResult<ModuleTarget> {
        let path = target.local_path()?;
        self.load_module(strategy, &path, None)
    }

    pub fn load_target_with_references(
        &self,
        strategy: LoadStrategy,
        target: &ModuleTarget,
    ) -> ToolkitResult<Vec<ModuleTarget>> {
        let path = target.local_path()?;
        self.load_module_with_references(strategy, &path)
    }

    /// Read a module for inspection only; it cannot run and is listed by
    /// [`Self::inspected_modules`] rather than [`Self::loaded_modules`].
    pub fn inspect_module(&self, path: &Path) -> ToolkitResult<ModuleTarget> {
        self.ensure_live()?;
        let path = path.to_path_buf();
        self.loader.invoke(move |loader| loader.inspect_module(&path))?
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Tear the context down, unloading the environment if the context
    /// created it. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Some(hook) = self.importer_hook.take() {
            Environment::home().remove_resolve_hook(hook);
        }
        if let Some(hook) = self.remote_hook.take() {
            match self.domain.environment() {
                Ok(environment) if !environment.is_unloaded() => {
                    environment.remove_resolve_hook(hook);
                }
                _ => {}
            }
        }

        self.loader.dispose();
        self.resolver.dispose();
        self.domain.dispose();
        self.importer = None;
        debug!(id = %self.id, "isolation context disposed");
    }

    fn ensure_live(&self) -> ToolkitResult<()> {
        if self.disposed {
            Err(ToolkitError::disposed("isolation context"))
        } else {
            Ok(())
        }
    }
}

impl Drop for IsolationContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for IsolationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationContext")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

fn complete_setup(mut setup: EnvironmentSetup, id: Uuid) -> EnvironmentSetup {
    let unnamed = setup
        .application_name
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .is_empty();
    if unnamed {
        setup.application_name = Some(format!("iso-env-{id}"));
    }
    if setup.application_base.is_none() {
        setup.application_base = executable_dir();
        if setup.application_base.is_none() {
            warn!("could not determine the executable directory");
        }
    }
    if setup.private_bin_path.is_none() {
        setup.private_bin_path = setup
            .application_base
            .as_ref()
            .map(|base| base.display().to_string());
    }
    setup
}

fn executable_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

fn apply_paths(resolver: &PathResolver, base: Option<&Path>, private_bin: Option<&str>) {
    if let Some(base) = base {
        resolver.set_application_base(base);
    }
    if let Some(private_bin) = private_bin {
        resolver.set_private_bin_path(private_bin);
    }
}
