mod config;
mod error;
mod symbols;
mod verilator;

pub use config::{
    ClockConfig, ClockEdge, Config, TimeUnit, ToolchainConfig, TraceConfig, ViewerConfig,
};
pub use error::{BuildError, ConfigError};
pub use symbols::{DeclaredKind, DeclaredState, SymbolTable};
pub use verilator::{Artifact, BuildRequest, Toolchain, Verilator};
