//! Module identity descriptors.
//!
//! A [`ModuleTarget`] is the by-value identity of a loaded module. Loaded
//! modules themselves never leave their environment; descriptors do.

use std::fmt;
use std::path::{Path, PathBuf};

use iso_host::LoadedModule;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ToolkitError, ToolkitResult};

/// Identity of a module: where it came from, where it is bound, and its
/// full name.
///
/// Dynamic modules carry only a full name. Every other descriptor has a code
/// base naming a file that existed when the module was loaded or the
/// descriptor was made, and possibly a location.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleTarget {
    code_base: Option<Url>,
    location: Option<PathBuf>,
    full_name: Option<String>,
    is_dynamic: bool,
}

impl ModuleTarget {
    /// Describe a module resident in some environment.
    ///
    /// The host already holds canonical paths, so the files behind them are
    /// not checked again; a byte-loaded module stays describable after its
    /// source file is deleted.
    pub fn from_live(module: &LoadedModule) -> ToolkitResult<Self> {
        if module.is_dynamic() {
            return Ok(ModuleTarget {
                code_base: None,
                location: None,
                full_name: Some(module.full_name().to_string()),
                is_dynamic: true,
            });
        }
        let code_base = module
            .code_base()
            .ok_or(ToolkitError::NullArgument { name: "code_base" })?;
        Ok(ModuleTarget {
            code_base: Some(file_url(code_base)?),
            location: module.location().map(Path::to_path_buf),
            full_name: Some(module.full_name().to_string()),
            is_dynamic: false,
        })
    }

    /// Describe a module on disk.
    ///
    /// An empty `location` or `full_name` is treated as absent.
    pub fn from_path(
        code_base: &Path,
        location: Option<&Path>,
        full_name: Option<&str>,
    ) -> ToolkitResult<Self> {
        if code_base.as_os_str().is_empty() {
            return Err(ToolkitError::NullArgument { name: "code_base" });
        }
        let code_base = existing(code_base)?;
        let location = location
            .filter(|location| !location.as_os_str().is_empty())
            .map(existing)
            .transpose()?;

        Ok(ModuleTarget {
            code_base: Some(file_url(&code_base)?),
            location,
            full_name: full_name
                .filter(|name| !name.trim().is_empty())
                .map(str::to_string),
            is_dynamic: false,
        })
    }

    /// Describe a module by `file://` URL.
    pub fn from_url(
        code_base: &Url,
        location: Option<&Path>,
        full_name: Option<&str>,
    ) -> ToolkitResult<Self> {
        let path = url_to_path(code_base)?;
        Self::from_path(&path, location, full_name)
    }

    /// Describe a dynamic module by name alone.
    pub fn from_dynamic(full_name: &str) -> ToolkitResult<Self> {
        if full_name.trim().is_empty() {
            return Err(ToolkitError::invalid("full_name", "must not be empty"));
        }
        Ok(ModuleTarget {
            code_base: None,
            location: None,
            full_name: Some(full_name.to_string()),
            is_dynamic: true,
        })
    }

    pub fn code_base(&self) -> Option<&Url> {
        self.code_base.as_ref()
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    /// The local file behind the code base.
    pub fn local_path(&self) -> ToolkitResult<PathBuf> {
        match &self.code_base {
            Some(url) => url_to_path(url),
            None => Err(ToolkitError::invalid(
                "target",
                "dynamic modules have no code base",
            )),
        }
    }
}

impl fmt::Display for ModuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.full_name, &self.code_base) {
            (Some(name), Some(url)) => write!(f, "{name} ({url})"),
            (Some(name), None) => f.write_str(name),
            (None, Some(url)) => write!(f, "{url}"),
            (None, None) => f.write_str("<unnamed module>"),
        }
    }
}

fn existing(path: &Path) -> ToolkitResult<PathBuf> {
    if !path.exists() {
        return Err(ToolkitError::not_found(path.display().to_string()));
    }
    Ok(path.canonicalize()?)
}

fn file_url(path: &Path) -> ToolkitResult<Url> {
    Url::from_file_path(path).map_err(|()| {
        ToolkitError::invalid("code_base", format!("`{}` is not a file path", path.display()))
    })
}

fn url_to_path(url: &Url) -> ToolkitResult<PathBuf> {
    url.to_file_path()
        .map_err(|()| ToolkitError::invalid("code_base", format!("`{url}` is not a local file")))
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
