use std::fs::File;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler executable, looked up on `PATH` when not absolute.
    pub verilator: String,
    pub flags: Vec<String>,
    pub build_dir: Utf8PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            verilator: "verilator".to_string(),
            flags: vec!["-Wno-fatal".to_string()],
            build_dir: Utf8PathBuf::from("target/verisim"),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClockEdge {
    /// Drive low, eval, drive high, eval.
    #[default]
    Rising,
    /// Drive high, eval, drive low, eval.
    Falling,
}

impl ClockEdge {
    /// Levels driven onto the clock for one full tick, in order.
    pub fn levels(self) -> [u8; 2] {
        match self {
            ClockEdge::Rising => [0, 1],
            ClockEdge::Falling => [1, 0],
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClockConfig {
    pub name: String,
    pub edge: ClockEdge,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            name: "clk".to_string(),
            edge: ClockEdge::Rising,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    S,
    Ms,
    Us,
    #[default]
    Ns,
    Ps,
    Fs,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TraceConfig {
    pub timescale: u32,
    pub unit: TimeUnit,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            timescale: 1,
            unit: TimeUnit::Ns,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ViewerConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Upper bound on how long a step waits for the viewer to answer.
    pub timeout_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            command: "gtkwave".to_string(),
            args: Vec::new(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub toolchain: ToolchainConfig,
    pub clock: ClockConfig,
    pub trace: TraceConfig,
    pub viewer: ViewerConfig,
}

impl Config {
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        yaml_serde::from_reader(file).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            message: e.to_string(),
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        yaml_serde::from_str(text).map_err(|e| ConfigError::Parse {
            path: Utf8PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }
}
