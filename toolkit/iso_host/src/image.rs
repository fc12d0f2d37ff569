//! Module image format.
//!
//! The host only needs a module's identity and its static references; the
//! rest of the image is an opaque payload. An image is laid out as:
//!
//! ```text
//! +--------+----------------+---------------------+-----------------+
//! | "ISOM" | manifest len   | manifest (bincode)  | payload ...     |
//! | 4 B    | u32 LE         | ImageManifest       | opaque bytes    |
//! +--------+----------------+---------------------+-----------------+
//! ```
//!
//! Full names follow the `"{name}, Version={version}"` convention. Lookups by
//! simple name only consider the text before the first comma.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{HostError, HostResult};

/// Leading magic bytes of every module image.
pub const IMAGE_MAGIC: [u8; 4] = *b"ISOM";

/// File extensions probed for module images, in probe order.
pub const MODULE_EXTENSIONS: [&str; 2] = ["dll", "exe"];

/// Extension of a co-located debug-symbol file.
pub const SYMBOL_EXTENSION: &str = "pdb";

/// Header size preceding the bincode manifest.
const HEADER_LEN: usize = IMAGE_MAGIC.len() + 4;

/// Identity and static references of a module.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Simple name, e.g. `Contoso.Widgets`.
    pub name: String,
    /// Version string, e.g. `1.0.0.0`.
    pub version: String,
    /// Full names of modules this module statically references.
    pub references: Vec<String>,
}

impl ImageManifest {
    /// The full display name of the module.
    pub fn full_name(&self) -> String {
        format!("{}, Version={}", self.name, self.version)
    }
}

/// A parsed module image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleImage {
    manifest: ImageManifest,
    payload: Vec<u8>,
}

impl ModuleImage {
    /// Start building an image for a module called `name` (version `1.0.0.0`).
    pub fn builder(name: impl Into<String>) -> ModuleImageBuilder {
        ModuleImageBuilder {
            manifest: ImageManifest {
                name: name.into(),
                version: "1.0.0.0".to_string(),
                references: Vec::new(),
            },
            payload: Vec::new(),
        }
    }

    /// Parse an image from raw bytes.
    pub fn parse(bytes: &[u8]) -> HostResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(HostError::malformed("image is too short"));
        }
        if bytes[..IMAGE_MAGIC.len()] != IMAGE_MAGIC {
            return Err(HostError::malformed("missing image magic"));
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[IMAGE_MAGIC.len()..HEADER_LEN]);
        let manifest_len = usize::try_from(u32::from_le_bytes(len_bytes))
            .map_err(|_| HostError::malformed("manifest length overflow"))?;
        let manifest_end = HEADER_LEN
            .checked_add(manifest_len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| HostError::malformed("manifest extends past end of image"))?;

        let manifest: ImageManifest = bincode::deserialize(&bytes[HEADER_LEN..manifest_end])
            .map_err(|e| HostError::malformed(format!("unreadable manifest: {e}")))?;
        if manifest.name.trim().is_empty() {
            return Err(HostError::malformed("module name is empty"));
        }

        Ok(ModuleImage {
            manifest,
            payload: bytes[manifest_end..].to_vec(),
        })
    }

    /// Read and parse an image file.
    pub fn read(path: &Path) -> HostResult<Self> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HostError::NotFound {
                path: path.to_path_buf(),
            },
            _ => HostError::Io(e),
        })?;
        Self::parse(&bytes)
    }

    /// Serialize the image back to bytes.
    pub fn encode(&self) -> HostResult<Vec<u8>> {
        let manifest = bincode::serialize(&self.manifest)
            .map_err(|e| HostError::malformed(format!("unencodable manifest: {e}")))?;
        let manifest_len = u32::try_from(manifest.len())
            .map_err(|_| HostError::malformed("manifest too large"))?;

        let mut out = Vec::with_capacity(HEADER_LEN + manifest.len() + self.payload.len());
        out.extend_from_slice(&IMAGE_MAGIC);
        out.extend_from_slice(&manifest_len.to_le_bytes());
        out.extend_from_slice(&manifest);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Encode the image and write it to `path`.
    pub fn write_to(&self, path: &Path) -> HostResult<()> {
        fs::write(path, self.encode()?)?;
        Ok(())
    }

    pub fn manifest(&self) -> &ImageManifest {
        &self.manifest
    }

    pub fn full_name(&self) -> String {
        self.manifest.full_name()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn into_manifest(self) -> ImageManifest {
        self.manifest
    }
}

/// Builder for [`ModuleImage`].
#[derive(Clone, Debug)]
pub struct ModuleImageBuilder {
    manifest: ImageManifest,
    payload: Vec<u8>,
}

impl ModuleImageBuilder {
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.manifest.version = version.into();
        self
    }

    /// Add a static reference by full (or simple) name.
    #[must_use]
    pub fn reference(mut self, full_name: impl Into<String>) -> Self {
        self.manifest.references.push(full_name.into());
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn build(self) -> ModuleImage {
        ModuleImage {
            manifest: self.manifest,
            payload: self.payload,
        }
    }
}

/// Extract the simple name from a full module name.
///
/// `"Contoso.Widgets, Version=1.0.0.0"` becomes `"Contoso.Widgets"`.
pub fn simple_name(full_name: &str) -> &str {
    full_name
        .split_once(',')
        .map_or(full_name, |(name, _)| name)
        .trim()
}
