//! Error types for model discovery, signal access and the viewer bridge.

use std::io;

use verisim_tools::BuildError;

/// Errors surfaced by the simulation layer. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// The delegated compiler failed. Its diagnostics are carried as is.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The model exposes no usable symbol metadata.
    #[error("discovery failed: {reason}")]
    Discovery { reason: String },

    /// No signal or scope with this name exists.
    #[error("no signal or scope named `{name}`")]
    Name { name: String },

    /// A value does not fit the declared width, or is negative.
    #[error("value {value} does not fit in {width} unsigned bits")]
    Range { value: String, width: u32 },

    /// An array element index outside the declared bounds.
    #[error("index {index} out of bounds for `{name}` with dimensions {dims:?}")]
    Index {
        name: String,
        index: String,
        dims: Vec<u32>,
    },

    /// The operation is not valid in the current lifecycle state.
    #[error("invalid state: {reason}")]
    State { reason: String },

    /// The external viewer process or its channel failed.
    #[error("viewer bridge: {reason}")]
    Bridge { reason: String },

    /// A signal wider than one bit was used as a clock.
    #[error("`{name}` is {width} bits wide; a clock must be a single bit")]
    Clock { name: String, width: u32 },

    /// The model exposes this signal only as an opaque aggregate.
    #[error("`{name}` is stored as an opaque aggregate and cannot be accessed per element")]
    Unsupported { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SimError {
    pub(crate) fn discovery(reason: impl Into<String>) -> Self {
        SimError::Discovery {
            reason: reason.into(),
        }
    }

    pub(crate) fn name(name: impl Into<String>) -> Self {
        SimError::Name { name: name.into() }
    }

    pub(crate) fn state(reason: impl Into<String>) -> Self {
        SimError::State {
            reason: reason.into(),
        }
    }

    pub(crate) fn bridge(reason: impl Into<String>) -> Self {
        SimError::Bridge {
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
