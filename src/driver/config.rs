use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::session::Limits;

use super::linker::ClangToolchain;

/// An optional project config file, `slang.toml`. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: Limits,
    pub toolchain: ToolchainConfig,
}

/// Defines how native executables are built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// The compiler driver used to assemble and link.
    pub compiler: PathBuf,
    /// Seconds each toolchain step may run before it is killed.
    pub timeout_secs: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: PathBuf::from("clang"),
            timeout_secs: 120,
        }
    }
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}

impl ToolchainConfig {
    pub fn toolchain(&self) -> ClangToolchain {
        ClangToolchain {
            compiler: self.compiler.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            cancel: None,
        }
    }
}
