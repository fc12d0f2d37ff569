//! Isolated execution environments.
//!
//! An [`Environment`] is an isolated space with its own module list, load
//! context, resolution hooks and object table, backed by a dedicated worker
//! thread. Work is marshalled onto that thread with [`Environment::execute`]
//! (synchronous) or [`Environment::spawn`] (async, `!Send` futures allowed).
//!
//! The *home* environment is the process default. Any thread that is not an
//! environment worker counts as executing in home, and home can never be
//! unloaded.
//!
//! # Re-entrancy
//!
//! `execute` against the environment the caller is already executing in runs
//! inline. This is what lets a resolution hook fire in the middle of a load
//! without deadlocking its own worker.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxBuildHasher, FxHashMap};
use tracing::{debug, trace};

use crate::hook::{HookId, ResolveHook};
use crate::image::{simple_name, ImageManifest, ModuleImage};
use crate::module::{Binding, LoadedModule, ModuleHandle};
use crate::object::{ObjectId, ObjectRef};
use crate::worker::{run_guarded, BoxedJob, Worker};
use crate::{HostError, HostResult};

thread_local! {
    /// The environment whose worker owns this thread, if any.
    static CURRENT: RefCell<Option<Weak<EnvInner>>> = const { RefCell::new(None) };
}

static HOME: OnceLock<Environment> = OnceLock::new();

/// Construction parameters for an environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvironmentSetup {
    /// Friendly name; generated when absent.
    pub application_name: Option<String>,
    /// Directory that relative paths resolve against.
    pub application_base: Option<PathBuf>,
    /// Semicolon-separated directories, relative to the application base.
    pub private_bin_path: Option<String>,
}

impl EnvironmentSetup {
    #[must_use]
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_application_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.application_base = Some(base.into());
        self
    }

    #[must_use]
    pub fn with_private_bin_path(mut self, paths: impl Into<String>) -> Self {
        self.private_bin_path = Some(paths.into());
        self
    }
}

/// How [`Environment::bind_file`] binds a module.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindMode {
    /// Enter the load context (deduplicated by full name) and keep the file
    /// open while loaded.
    Locking,
    /// Bind outside the load context; the file is not held.
    Anonymous,
}

/// Process-unique environment identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvironmentId(u64);

impl EnvironmentId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        EnvironmentId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Cheap, cloneable handle to an isolated environment.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

struct EnvInner {
    id: EnvironmentId,
    name: String,
    setup: EnvironmentSetup,
    is_home: bool,
    unloaded: AtomicBool,
    worker: Mutex<Option<Worker>>,
    state: RwLock<EnvState>,
    hooks: RwLock<Vec<(HookId, Arc<dyn ResolveHook>)>>,
    objects: DashMap<ObjectId, Arc<dyn Any + Send + Sync>, FxBuildHasher>,
}

#[derive(Default)]
struct EnvState {
    /// Every executable module, in load order.
    modules: Vec<ModuleHandle>,
    /// Modules bound by name, keyed by full name.
    load_context: FxHashMap<String, ModuleHandle>,
    /// Inspection-only modules, in load order.
    inspected: Vec<ModuleHandle>,
}

impl EnvInner {
    fn new(id: EnvironmentId, name: String, setup: EnvironmentSetup, is_home: bool) -> Self {
        EnvInner {
            id,
            name,
            setup,
            is_home,
            unloaded: AtomicBool::new(false),
            worker: Mutex::new(None),
            state: RwLock::new(EnvState::default()),
            hooks: RwLock::new(Vec::new()),
            objects: DashMap::with_hasher(FxBuildHasher),
        }
    }
}

fn enter(inner: Weak<EnvInner>) {
    CURRENT.with(|current| *current.borrow_mut() = Some(inner));
}

impl Environment {
    /// Create a new isolated environment and start its worker.
    pub fn create(setup: EnvironmentSetup) -> HostResult<Environment> {
        let id = EnvironmentId::next();
        let name = setup
            .application_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("environment-{}", id.raw()));
        let environment = Environment {
            inner: Arc::new(EnvInner::new(id, name, setup, false)),
        };

        let weak = Arc::downgrade(&environment.inner);
        let worker = Worker::start(&environment.inner.name, move || enter(weak))?;
        *environment.inner.worker.lock() = Some(worker);

        debug!(environment = %environment.inner.name, id = id.raw(), "environment created");
        Ok(environment)
    }

    /// The process-wide home environment.
    pub fn home() -> Environment {
        HOME.get_or_init(|| {
            let base = std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf));
            let setup = EnvironmentSetup {
                application_name: Some("home".to_string()),
                application_base: base,
                private_bin_path: None,
            };
            Environment {
                inner: Arc::new(EnvInner::new(
                    EnvironmentId::next(),
                    "home".to_string(),
                    setup,
                    true,
                )),
            }
        })
        .clone()
    }

    /// The environment the calling thread is executing in.
    pub fn current() -> Environment {
        CURRENT
            .with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
            .map_or_else(Environment::home, |inner| Environment { inner })
    }

    pub fn id(&self) -> EnvironmentId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn setup(&self) -> &EnvironmentSetup {
        &self.inner.setup
    }

    pub fn is_home(&self) -> bool {
        self.inner.is_home
    }

    pub fn is_unloaded(&self) -> bool {
        self.inner.unloaded.load(Ordering::Acquire)
    }

    /// Whether the calling thread is executing in this environment.
    pub fn is_current(&self) -> bool {
        Environment::current().id() == self.id()
    }

    /// Unload the environment, releasing every module, hook and object.
    ///
    /// Idempotent. Work already queued runs to completion first; pending
    /// async tasks are dropped.
    pub fn unload(&self) -> HostResult<()> {
        if self.inner.is_home {
            return Err(HostError::HomeEnvironment);
        }
        if self.inner.unloaded.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            worker.shutdown();
        }

        let state = std::mem::take(&mut *self.inner.state.write());
        let hooks = std::mem::take(&mut *self.inner.hooks.write());
        self.inner.objects.clear();
        debug!(
            environment = %self.inner.name,
            modules = state.modules.len(),
            hooks = hooks.len(),
            "environment unloaded"
        );
        Ok(())
    }

    /// Run `job` inside the environment and wait for its result.
    ///
    /// A panic inside the job is returned as [`HostError::Panicked`].
    pub fn execute<R, F>(&self, job: F) -> HostResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_loaded()?;
        if self.is_current() {
            return run_guarded(job).map_err(|message| self.panicked(message));
        }

        let (reply, receiver) = crossbeam::channel::bounded(1);
        self.post(Box::new(move || {
            let _ = reply.send(run_guarded(job));
        }))?;
        match receiver.recv() {
            Ok(result) => result.map_err(|message| self.panicked(message)),
            // The worker stopped before answering.
            Err(_) => Err(self.unloaded_error()),
        }
    }

    /// Spawn a future onto the environment's executor.
    ///
    /// `make` runs on the environment's thread, so the future it returns does
    /// not need to be `Send`. The future is dropped if the environment is
    /// unloaded before it completes.
    pub fn spawn<F, Fut>(&self, make: F) -> HostResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.ensure_loaded()?;
        self.post(Box::new(move || {
            tokio::task::spawn_local(make());
        }))
    }

    /// Construct a `T` inside the environment and return a handle to it.
    pub fn construct<T, F>(&self, ctor: F) -> HostResult<ObjectRef<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let environment = self.clone();
        let id = self.execute(move || {
            let object: Arc<dyn Any + Send + Sync> = Arc::new(ctor());
            let id = ObjectId::next();
            environment.inner.objects.insert(id, object);
            id
        })?;
        trace!(
            environment = %self.inner.name,
            object = id.raw(),
            ty = std::any::type_name::<T>(),
            "object constructed"
        );
        Ok(ObjectRef::new(self.clone(), id))
    }

    pub(crate) fn object<T>(&self, id: ObjectId) -> HostResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let unavailable = || HostError::ObjectUnavailable {
            id: id.raw(),
            environment: self.inner.name.clone(),
        };
        let object = self
            .inner
            .objects
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(unavailable)?;
        object.downcast::<T>().map_err(|_| unavailable())
    }

    pub(crate) fn remove_object(&self, id: ObjectId) -> bool {
        self.inner.objects.remove(&id).is_some()
    }

    /// Register a hook consulted when a module reference cannot be satisfied
    /// from the load context. Hooks run in registration order.
    pub fn add_resolve_hook(&self, hook: Arc<dyn ResolveHook>) -> HostResult<HookId> {
        self.ensure_loaded()?;
        let id = HookId::next();
        self.inner.hooks.write().push((id, hook));
        debug!(environment = %self.inner.name, ?id, "resolve hook added");
        Ok(id)
    }

    /// Remove a hook. Returns `false` if it was not registered.
    pub fn remove_resolve_hook(&self, id: HookId) -> bool {
        let mut hooks = self.inner.hooks.write();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        let removed = hooks.len() != before;
        if removed {
            debug!(environment = %self.inner.name, ?id, "resolve hook removed");
        }
        removed
    }

    pub fn resolve_hook_count(&self) -> usize {
        self.inner.hooks.read().len()
    }

    /// Resolve a module reference by full or simple name.
    ///
    /// Consults the load context first, then every hook in registration
    /// order. Hooks are snapshotted so they may add or remove hooks freely.
    pub fn resolve(&self, request: &str) -> HostResult<ModuleHandle> {
        self.ensure_loaded()?;
        let name = simple_name(request);
        if let Some(module) = self.find_in_load_context(name) {
            return Ok(module);
        }

        let hooks: Vec<Arc<dyn ResolveHook>> = self
            .inner
            .hooks
            .read()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            if let Some(module) = hook.resolve(self, request) {
                trace!(environment = %self.inner.name, request, "resolved by hook");
                return Ok(module);
            }
        }

        Err(HostError::Unresolved {
            name: request.to_string(),
            environment: self.inner.name.clone(),
        })
    }

    /// Bind a module file by path.
    pub fn bind_file(&self, path: &Path, mode: BindMode) -> HostResult<ModuleHandle> {
        self.ensure_loaded()?;
        let location = canonical(path)?;

        let module = match mode {
            BindMode::Locking => {
                let mut file = File::open(&location)?;
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                let manifest = ModuleImage::parse(&bytes)?.into_manifest();
                let full_name = manifest.full_name();

                let mut state = self.inner.state.write();
                if let Some(existing) = state.load_context.get(&full_name) {
                    trace!(module = %full_name, "already in load context");
                    return Ok(Arc::clone(existing));
                }
                let module = Arc::new(
                    LoadedModule::new(manifest, Binding::Locked)
                        .with_code_base(location.clone())
                        .with_location(location)
                        .with_file(file),
                );
                state.load_context.insert(full_name, Arc::clone(&module));
                state.modules.push(Arc::clone(&module));
                module
            }
            BindMode::Anonymous => {
                let manifest = ModuleImage::read(&location)?.into_manifest();
                let module = Arc::new(
                    LoadedModule::new(manifest, Binding::Anonymous)
                        .with_code_base(location.clone())
                        .with_location(location),
                );
                self.inner.state.write().modules.push(Arc::clone(&module));
                module
            }
        };

        debug!(
            environment = %self.inner.name,
            module = module.full_name(),
            ?mode,
            "module bound"
        );
        Ok(module)
    }

    /// Load a module from bytes, with optional opaque symbol bytes.
    ///
    /// The module has no location. `code_base` records where the bytes came
    /// from, if anywhere.
    pub fn load_image(
        &self,
        bytes: &[u8],
        symbols: Option<&[u8]>,
        code_base: Option<PathBuf>,
    ) -> HostResult<ModuleHandle> {
        self.ensure_loaded()?;
        let manifest = ModuleImage::parse(bytes)?.into_manifest();
        let mut module = LoadedModule::new(manifest, Binding::InMemory);
        if let Some(code_base) = code_base {
            module = module.with_code_base(code_base);
        }
        if let Some(symbols) = symbols {
            module = module.with_symbols(symbols.len());
        }
        let module = Arc::new(module);
        self.inner.state.write().modules.push(Arc::clone(&module));

        debug!(
            environment = %self.inner.name,
            module = module.full_name(),
            symbols = module.has_symbols(),
            "module loaded from bytes"
        );
        Ok(module)
    }

    /// Define a module at runtime. It has no image, code base or location.
    pub fn define_dynamic(&self, name: &str) -> HostResult<ModuleHandle> {
        self.ensure_loaded()?;
        if name.trim().is_empty() {
            return Err(HostError::malformed("module name is empty"));
        }
        let manifest = ImageManifest {
            name: name.trim().to_string(),
            version: "0.0.0.0".to_string(),
            references: Vec::new(),
        };
        let module = Arc::new(LoadedModule::new(manifest, Binding::Dynamic));
        self.inner.state.write().modules.push(Arc::clone(&module));
        debug!(environment = %self.inner.name, module = module.full_name(), "dynamic module defined");
        Ok(module)
    }

    /// Read a module for inspection only.
    ///
    /// The module is not executable, does not appear in [`Self::modules`]
    /// and never triggers resolution hooks. Repeat inspections of the same
    /// full name return the first one.
    pub fn inspect_file(&self, path: &Path) -> HostResult<ModuleHandle> {
        self.ensure_loaded()?;
        let location = canonical(path)?;
        let manifest = ModuleImage::read(&location)?.into_manifest();
        let full_name = manifest.full_name();

        let mut state = self.inner.state.write();
        if let Some(existing) = state
            .inspected
            .iter()
            .find(|module| module.full_name() == full_name)
        {
            return Ok(Arc::clone(existing));
        }
        let module = Arc::new(
            LoadedModule::new(manifest, Binding::Inspection)
                .with_code_base(location.clone())
                .with_location(location),
        );
        state.inspected.push(Arc::clone(&module));
        Ok(module)
    }

    /// Every executable module, in load order.
    pub fn modules(&self) -> Vec<ModuleHandle> {
        self.inner.state.read().modules.clone()
    }

    /// Every inspection-only module, in load order.
    pub fn inspected(&self) -> Vec<ModuleHandle> {
        self.inner.state.read().inspected.clone()
    }

    /// First executable module whose simple name matches.
    pub fn find_module(&self, name: &str) -> Option<ModuleHandle> {
        let name = simple_name(name);
        self.inner
            .state
            .read()
            .modules
            .iter()
            .find(|module| module.simple_name() == name)
            .cloned()
    }

    fn find_in_load_context(&self, name: &str) -> Option<ModuleHandle> {
        self.inner
            .state
            .read()
            .load_context
            .values()
            .find(|module| module.simple_name() == name)
            .cloned()
    }

    fn ensure_loaded(&self) -> HostResult<()> {
        if self.is_unloaded() {
            Err(self.unloaded_error())
        } else {
            Ok(())
        }
    }

    fn post(&self, job: BoxedJob) -> HostResult<()> {
        let mut worker = self.inner.worker.lock();
        if self.is_unloaded() {
            return Err(self.unloaded_error());
        }
        if worker.is_none() {
            // Only home starts its worker lazily.
            let weak = Arc::downgrade(&self.inner);
            *worker = Some(Worker::start(&self.inner.name, move || enter(weak))?);
            trace!(environment = %self.inner.name, "worker started");
        }
        match worker.as_ref() {
            Some(worker) if worker.post(job) => Ok(()),
            _ => Err(self.unloaded_error()),
        }
    }

    fn unloaded_error(&self) -> HostError {
        HostError::Unloaded {
            name: self.inner.name.clone(),
        }
    }

    fn panicked(&self, message: String) -> HostError {
        HostError::Panicked {
            environment: self.inner.name.clone(),
            message,
        }
    }
}

fn canonical(path: &Path) -> HostResult<PathBuf> {
    path.canonicalize().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => HostError::NotFound {
            path: path.to_path_buf(),
        },
        _ => HostError::Io(e),
    })
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Environment {}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("home", &self.inner.is_home)
            .field("unloaded", &self.is_unloaded())
            .finish()
    }
}
