//! Drive a compiled HDL simulation model through typed signal handles.
//!
//! A [`Model`] exposes a flat word buffer and a symbol table. [`Simulator`]
//! turns the table into an IO tree and an internals tree, hands out
//! [`SignalHandle`]s for any signal of any width, and can record a value
//! change dump or mirror values into an external waveform viewer.

mod bridge;
mod codec;
mod directory;
mod error;
mod handle;
mod model;
mod names;
mod sim;
mod trace;

pub use bridge::{
    BridgeSignal, BridgeState, ProcessLauncher, StepOutcome, Viewer, ViewerLauncher,
    WaveformBridge,
};
pub use codec::{
    BitVector, WORD_BITS, decode, encode, encode_int, from_twos_complement, to_twos_complement,
    word_count,
};
pub use directory::{NamespaceKind, Node, Scope, SignalDirectory, SignalId, SignalInfo, Storage};
pub use error::{Result, SimError};
pub use handle::SignalHandle;
pub use model::{Model, ModelLoader, ModelSymbols, NameEncoding, StateInfo, StateType};
pub use names::{attr_spelling, demangle, is_keyword};
pub use sim::{Entry, Namespace, Simulator};
pub use trace::TraceController;

pub use verisim_tools::{
    Artifact, BuildError, BuildRequest, ClockConfig, ClockEdge, Config, ConfigError, TimeUnit,
    Toolchain, ToolchainConfig, TraceConfig, Verilator, ViewerConfig,
};
