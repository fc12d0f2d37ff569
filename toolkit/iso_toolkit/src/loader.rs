//! Module loading.
//!
//! [`ModuleLoader`] loads modules into an environment with a chosen
//! [`LoadStrategy`]. [`TargetLoader`] is the boundary-resident form: it is
//! constructed inside an isolated environment, always loads into the
//! environment it runs in, and answers with [`ModuleTarget`] descriptors that
//! can travel back to the caller.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use iso_host::image::SYMBOL_EXTENSION;
use iso_host::{simple_name, BindMode, Environment, HostError, ModuleHandle};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::remote::RemoteConstruct;
use crate::{LoadStrategy, ModuleTarget, ToolkitError, ToolkitResult};

/// Loads modules into an environment.
pub trait ModuleLoader: Send + Sync {
    /// Load one module.
    ///
    /// For [`LoadStrategy::LoadBytes`], a missing `symbol_path` defaults to
    /// the module path with a `.pdb` extension. Symbols are opaque to the
    /// host, so a missing or mismatched symbol file never fails the load.
    fn load(
        &self,
        environment: &Environment,
        strategy: LoadStrategy,
        path: &Path,
        symbol_path: Option<&Path>,
    ) -> ToolkitResult<ModuleHandle>;

    /// Load a module and its full static reference closure.
    ///
    /// The root comes first in the result. An unresolvable reference fails
    /// the whole operation with [`ToolkitError::NotFound`].
    fn load_with_references(
        &self,
        environment: &Environment,
        strategy: LoadStrategy,
        path: &Path,
    ) -> ToolkitResult<Vec<ModuleHandle>> {
        let root = self.load(environment, strategy, path, None)?;
        reference_closure(environment, root)
    }

    /// Every executable module in `environment`.
    fn loaded(&self, environment: &Environment) -> Vec<ModuleHandle> {
        environment.modules()
    }
}

/// [`ModuleLoader`] backed by the host's binding primitives.
#[derive(Copy, Clone, Debug, Default)]
pub struct HostLoader;

impl ModuleLoader for HostLoader {
    fn load(
        &self,
        environment: &Environment,
        strategy: LoadStrategy,
        path: &Path,
        symbol_path: Option<&Path>,
    ) -> ToolkitResult<ModuleHandle> {
        if path.as_os_str().is_empty() {
            return Err(ToolkitError::NullArgument { name: "path" });
        }

        let module = match strategy {
            LoadStrategy::BindLocking => environment.bind_file(path, BindMode::Locking)?,
            LoadStrategy::BindAnonymous => environment.bind_file(path, BindMode::Anonymous)?,
            LoadStrategy::LoadBytes => load_bytes(environment, path, symbol_path)?,
        };
        debug!(
            environment = environment.name(),
            module = module.full_name(),
            %strategy,
            "module loaded"
        );
        Ok(module)
    }
}

fn load_bytes(
    environment: &Environment,
    path: &Path,
    symbol_path: Option<&Path>,
) -> ToolkitResult<ModuleHandle> {
    let code_base = path
        .canonicalize()
        .map_err(|_| ToolkitError::not_found(path.display().to_string()))?;
    let bytes = fs::read(&code_base)?;

    let symbol_path: PathBuf = symbol_path
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| path.with_extension(SYMBOL_EXTENSION), Path::to_path_buf);
    let symbols = fs::read(&symbol_path).ok();

    if symbols.is_none() {
        trace!(symbols = %symbol_path.display(), "no symbols found; loading module alone");
    }
    Ok(environment.load_image(&bytes, symbols.as_deref(), Some(code_base))?)
}

/// Breadth-first walk of static references in manifest order.
///
/// A reference already loaded in `environment` (by simple name) joins the
/// closure without being loaded again; anything else goes through the
/// environment's resolution, which ends at its hooks.
fn reference_closure(
    environment: &Environment,
    root: ModuleHandle,
) -> ToolkitResult<Vec<ModuleHandle>> {
    let mut seen = FxHashSet::default();
    seen.insert(root.simple_name().to_string());
    let mut closure = vec![root.clone()];
    let mut queue = VecDeque::from([root]);

    while let Some(module) = queue.pop_front() {
        for reference in module.references() {
            let name = simple_name(reference);
            if !seen.insert(name.to_string()) {
                continue;
            }
            let resolved = match environment.find_module(name) {
                Some(loaded) => loaded,
                None => environment.resolve(reference).map_err(|e| match e {
                    HostError::Unresolved { .. } => ToolkitError::not_found(format!(
                        "module `{reference}` referenced by `{}`",
                        module.full_name()
                    )),
                    other => other.into(),
                })?,
            };
            closure.push(resolved.clone());
            queue.push_back(resolved);
        }
    }

    Ok(closure)
}

/// Loader living inside an isolated environment.
///
/// Every method operates on [`Environment::current`], which is the
/// environment the loader was constructed in when called through a proxy.
#[derive(Debug, Default)]
pub struct TargetLoader {
    loader: HostLoader,
}

impl RemoteConstruct for TargetLoader {
    type Args = ();

    fn construct((): ()) -> Self {
        TargetLoader::default()
    }
}

impl TargetLoader {
    pub fn load_module(
        &self,
        strategy: LoadStrategy,
        path: &Path,
        symbol_path: Option<&Path>,
    ) -> ToolkitResult<ModuleTarget> {
        let environment = Environment::current();
        let module = self.loader.load(&environment, strategy, path, symbol_path)?;
        ModuleTarget::from_live(&module)
    }

    pub fn load_module_with_references(
        &self,
        strategy: LoadStrategy,
        path: &Path,
    ) -> ToolkitResult<Vec<ModuleTarget>> {
        let environment = Environment::current();
        self.loader
            .load_with_references(&environment, strategy, path)?
            .iter()
            .map(|module| ModuleTarget::from_live(module))
            .collect()
    }

    /// Read a module for inspection only.
    pub fn inspect_module(&self, path: &Path) -> ToolkitResult<ModuleTarget> {
        if path.as_os_str().is_empty() {
            return Err(ToolkitError::NullArgument { name: "path" });
        }
        let module = Environment::current().inspect_file(path)?;
        ModuleTarget::from_live(&module)
    }

    pub fn modules(&self) -> ToolkitResult<Vec<ModuleTarget>> {
        let environment = Environment::current();
        self.loader
            .loaded(&environment)
            .iter()
            .map(|module| ModuleTarget::from_live(module))
            .collect()
    }

    pub fn inspected_modules(&self) -> ToolkitResult<Vec<ModuleTarget>> {
        Environment::current()
            .inspected()
            .iter()
            .map(|module| ModuleTarget::from_live(module))
            .collect()
    }
}
