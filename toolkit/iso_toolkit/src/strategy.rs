//! Load strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ToolkitError;

/// How a module is brought into an environment.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    /// Bind into the named load context. Later loads of the same full name
    /// return the first module; the file stays open while loaded.
    #[default]
    BindLocking,
    /// Bind by path outside the load context. No file handle is held.
    BindAnonymous,
    /// Read the module (and co-located symbols, if any) into memory.
    LoadBytes,
}

impl LoadStrategy {
    pub const ALL: [LoadStrategy; 3] = [
        LoadStrategy::BindLocking,
        LoadStrategy::BindAnonymous,
        LoadStrategy::LoadBytes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LoadStrategy::BindLocking => "bind_locking",
            LoadStrategy::BindAnonymous => "bind_anonymous",
            LoadStrategy::LoadBytes => "load_bytes",
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadStrategy {
    type Err = ToolkitError;

    /// Accepts the snake_case names plus the PascalCase spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "bind_locking" | "BindLocking" => Ok(LoadStrategy::BindLocking),
            "bind_anonymous" | "BindAnonymous" => Ok(LoadStrategy::BindAnonymous),
            "load_bytes" | "LoadBytes" => Ok(LoadStrategy::LoadBytes),
            other => Err(ToolkitError::UnsupportedStrategy {
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<u8> for LoadStrategy {
    type Error = ToolkitError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(LoadStrategy::BindLocking),
            1 => Ok(LoadStrategy::BindAnonymous),
            2 => Ok(LoadStrategy::LoadBytes),
            other => Err(ToolkitError::UnsupportedStrategy {
                value: other.to_string(),
            }),
        }
    }
}
