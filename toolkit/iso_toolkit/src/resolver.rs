//! Probe-path module resolution.
//!
//! A [`PathResolver`] answers an environment's "module not found" callback
//! by searching an ordered set of directories for `{name}.dll`, then
//! `{name}.exe`, and loading the first hit with its current
//! [`LoadStrategy`]. A miss is not an error: the resolver returns `None` and
//! the environment moves on to its next hook.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use iso_host::image::MODULE_EXTENSIONS;
use iso_host::{simple_name, Environment, ModuleHandle, ObjectRef, ResolveHook};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tracing::{debug, trace, warn};

use crate::loader::{HostLoader, ModuleLoader};
use crate::remote::RemoteConstruct;
use crate::{LoadStrategy, ToolkitResult};

/// Ordered, deduplicated set of absolute probe directories.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbePathSet {
    ordered: Vec<PathBuf>,
    seen: FxHashSet<PathBuf>,
}

impl ProbePathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one path or a semicolon-separated list.
    ///
    /// Relative paths are made absolute against the working directory and
    /// every path is lexically normalized. Blank segments are ignored.
    /// Returns how many paths were actually new.
    pub fn add(&mut self, paths: &str) -> usize {
        let mut added = 0;
        for segment in paths.split(';') {
            if let Some(path) = normalize(Path::new(segment.trim())) {
                if self.insert(path) {
                    added += 1;
                }
            }
        }
        added
    }

    /// Add an already-split path; `;` is not special here.
    pub fn add_path(&mut self, path: &Path) -> bool {
        normalize(path).is_some_and(|path| self.insert(path))
    }

    fn insert(&mut self, path: PathBuf) -> bool {
        if self.seen.insert(path.clone()) {
            self.ordered.push(path);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        normalize(path).is_some_and(|path| self.seen.contains(&path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.ordered.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.ordered.clone()
    }
}

/// Absolute, lexically normalized form of `path`; `None` for a blank path.
pub(crate) fn normalize(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    let absolute = std::path::absolute(path).ok()?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Some(normalized)
}

#[derive(Debug, Default)]
struct ResolverState {
    probe_paths: ProbePathSet,
    strategy: LoadStrategy,
    application_base: Option<PathBuf>,
    private_bin_path: Option<String>,
}

/// Resolves module references from a set of probe directories.
///
/// All state sits behind a lock so one resolver can serve as a hook on
/// several environments at once.
pub struct PathResolver {
    state: RwLock<ResolverState>,
    loader: Arc<dyn ModuleLoader>,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::with_loader(Arc::new(HostLoader))
    }

    pub fn with_loader(loader: Arc<dyn ModuleLoader>) -> Self {
        PathResolver {
            state: RwLock::new(ResolverState::default()),
            loader,
        }
    }

    /// Add a probe path, or a semicolon-separated list of them.
    pub fn add_probe_path(&self, paths: &str) -> usize {
        let added = self.state.write().probe_paths.add(paths);
        if added > 0 {
            trace!(paths, added, "probe paths added");
        }
        added
    }

    pub fn add_probe_paths<I, S>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        paths
            .into_iter()
            .map(|path| self.add_probe_path(path.as_ref()))
            .sum()
    }

    pub fn probe_paths(&self) -> Vec<PathBuf> {
        self.state.read().probe_paths.to_vec()
    }

    pub fn strategy(&self) -> LoadStrategy {
        self.state.read().strategy
    }

    pub fn set_strategy(&self, strategy: LoadStrategy) {
        self.state.write().strategy = strategy;
    }

    /// Set the strategy, returning the previous one.
    pub fn replace_strategy(&self, strategy: LoadStrategy) -> LoadStrategy {
        std::mem::replace(&mut self.state.write().strategy, strategy)
    }

    /// Use `strategy` until the returned guard drops.
    pub fn override_strategy(&self, strategy: LoadStrategy) -> StrategyGuard<'_> {
        let previous = self.replace_strategy(strategy);
        StrategyGuard {
            resolver: self,
            previous,
        }
    }

    pub fn application_base(&self) -> Option<PathBuf> {
        self.state.read().application_base.clone()
    }

    /// Set the application base; it also becomes a probe path.
    pub fn set_application_base(&self, base: &Path) {
        let mut state = self.state.write();
        state.application_base = Some(base.to_path_buf());
        state.probe_paths.add_path(base);
    }

    pub fn private_bin_path(&self) -> Option<String> {
        self.state.read().private_bin_path.clone()
    }

    /// Set the private bin path, a semicolon list relative to the
    /// application base. Every entry also becomes a probe path.
    pub fn set_private_bin_path(&self, paths: &str) {
        let mut state = self.state.write();
        state.private_bin_path = Some(paths.to_string());
        let base = state.application_base.clone();
        for segment in paths.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let path = match &base {
                Some(base) => base.join(segment),
                None => PathBuf::from(segment),
            };
            state.probe_paths.add_path(&path);
        }
    }

    /// Find and load the module named by `request`.
    ///
    /// Returns `None` when no probe path has the file, or when the file it
    /// found fails to load.
    pub fn resolve(&self, environment: &Environment, request: &str) -> Option<ModuleHandle> {
        let name = simple_name(request);
        if name.is_empty() {
            return None;
        }
        let (paths, strategy) = {
            let state = self.state.read();
            (state.probe_paths.to_vec(), state.strategy)
        };

        let candidate = paths.iter().find_map(|dir| {
            MODULE_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{name}.{ext}")))
                .find(|path| path.is_file())
        });
        let Some(path) = candidate else {
            trace!(environment = environment.name(), request, "no probe path has module");
            return None;
        };

        match self.loader.load(environment, strategy, &path, None) {
            Ok(module) => {
                debug!(
                    environment = environment.name(),
                    request,
                    path = %path.display(),
                    %strategy,
                    "resolved from probe path"
                );
                Some(module)
            }
            Err(e) => {
                warn!(
                    environment = environment.name(),
                    request,
                    path = %path.display(),
                    error = %e,
                    "probe hit failed to load"
                );
                None
            }
        }
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("PathResolver")
            .field("probe_paths", &state.probe_paths.ordered)
            .field("strategy", &state.strategy)
            .field("application_base", &state.application_base)
            .finish_non_exhaustive()
    }
}

impl ResolveHook for PathResolver {
    fn resolve(&self, environment: &Environment, request: &str) -> Option<ModuleHandle> {
        PathResolver::resolve(self, environment, request)
    }
}

impl RemoteConstruct for PathResolver {
    type Args = ();

    fn construct((): ()) -> Self {
        PathResolver::new()
    }
}

/// Restores a resolver's previous strategy on drop.
#[must_use = "the override ends when the guard is dropped"]
pub struct StrategyGuard<'a> {
    resolver: &'a PathResolver,
    previous: LoadStrategy,
}

impl StrategyGuard<'_> {
    pub fn previous(&self) -> LoadStrategy {
        self.previous
    }
}

impl Drop for StrategyGuard<'_> {
    fn drop(&mut self) {
        self.resolver.set_strategy(self.previous);
    }
}

/// [`StrategyGuard`] for a resolver living in another environment.
#[must_use = "the override ends when the guard is dropped"]
pub struct RemoteStrategyOverride {
    resolver: ObjectRef<PathResolver>,
    previous: LoadStrategy,
}

impl RemoteStrategyOverride {
    pub fn new(resolver: &ObjectRef<PathResolver>, strategy: LoadStrategy) -> ToolkitResult<Self> {
        let previous = resolver.invoke(move |r| r.replace_strategy(strategy))?;
        Ok(RemoteStrategyOverride {
            resolver: resolver.clone(),
            previous,
        })
    }
}

impl Drop for RemoteStrategyOverride {
    fn drop(&mut self) {
        let previous = self.previous;
        if let Err(e) = self.resolver.invoke(move |r| r.set_strategy(previous)) {
            warn!(error = %e, "could not restore resolver strategy");
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
