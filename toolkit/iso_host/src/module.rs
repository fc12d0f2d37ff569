//! Modules resident in an environment.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::image::{simple_name, ImageManifest};

/// Shared handle to a module loaded in some environment.
pub type ModuleHandle = Arc<LoadedModule>;

/// Process-unique module identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ModuleId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// How a module's bytes were bound into its environment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Bound by path into the load context; the file handle is held open.
    Locked,
    /// Bound by path outside the load context; no handle held.
    Anonymous,
    /// Loaded from a byte buffer; not associated with an on-disk location.
    InMemory,
    /// Defined at runtime; has no image at all.
    Dynamic,
    /// Parsed for inspection only; never executable.
    Inspection,
}

/// A module resident in an environment.
pub struct LoadedModule {
    id: ModuleId,
    manifest: ImageManifest,
    full_name: String,
    code_base: Option<PathBuf>,
    location: Option<PathBuf>,
    binding: Binding,
    symbol_len: Option<usize>,
    /// Held for `Binding::Locked` so the file stays open while loaded.
    _file: Option<File>,
}

impl LoadedModule {
    pub(crate) fn new(manifest: ImageManifest, binding: Binding) -> Self {
        let full_name = manifest.full_name();
        LoadedModule {
            id: ModuleId::next(),
            manifest,
            full_name,
            code_base: None,
            location: None,
            binding,
            symbol_len: None,
            _file: None,
        }
    }

    pub(crate) fn with_code_base(mut self, code_base: PathBuf) -> Self {
        self.code_base = Some(code_base);
        self
    }

    pub(crate) fn with_location(mut self, location: PathBuf) -> Self {
        self.location = Some(location);
        self
    }

    pub(crate) fn with_symbols(mut self, len: usize) -> Self {
        self.symbol_len = Some(len);
        self
    }

    pub(crate) fn with_file(mut self, file: File) -> Self {
        self._file = Some(file);
        self
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Full display name, `"{name}, Version={version}"`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn simple_name(&self) -> &str {
        simple_name(&self.full_name)
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Full names of statically referenced modules.
    pub fn references(&self) -> &[String] {
        &self.manifest.references
    }

    /// The file the module originated from, if any.
    pub fn code_base(&self) -> Option<&Path> {
        self.code_base.as_deref()
    }

    /// The file the module is bound to, if any. Byte-loaded and dynamic
    /// modules have none.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    pub fn is_dynamic(&self) -> bool {
        self.binding == Binding::Dynamic
    }

    /// Whether debug symbols were loaded alongside the image.
    pub fn has_symbols(&self) -> bool {
        self.symbol_len.is_some()
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("id", &self.id)
            .field("full_name", &self.full_name)
            .field("binding", &self.binding)
            .field("code_base", &self.code_base)
            .field("location", &self.location)
            .field("has_symbols", &self.has_symbols())
            .finish_non_exhaustive()
    }
}
