//! The seam between this crate and a compiled simulation model.

use camino::Utf8Path;
use serde::Deserialize;
use verisim_tools::Artifact;

use crate::codec::word_count;
use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    Input,
    Output,
    Register,
    Wire,
    Memory,
}

impl StateType {
    pub fn is_port(self) -> bool {
        matches!(self, StateType::Input | StateType::Output)
    }
}

/// How raw names in the symbol table are spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameEncoding {
    /// Source identifiers, scopes separated by `.` or `/`.
    #[default]
    Plain,
    /// Verilator-mangled: `__DOT__` between scopes, `__0XX` hex escapes.
    Verilator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateInfo {
    pub name: String,
    /// Offset into the state buffer, in words.
    pub offset: u32,
    #[serde(rename = "numBits")]
    pub num_bits: u32,
    #[serde(rename = "type")]
    pub ty: StateType,
    #[serde(default)]
    pub signed: bool,
    /// Words between consecutive array elements.
    #[serde(default)]
    pub stride: Option<u32>,
    /// Element count of a one-dimensional memory.
    #[serde(default)]
    pub depth: Option<u32>,
    /// Element counts per dimension; takes precedence over `depth`.
    #[serde(default)]
    pub dims: Option<Vec<u32>>,
}

impl StateInfo {
    pub fn dimensions(&self) -> Vec<u32> {
        match (&self.dims, self.depth) {
            (Some(dims), _) => dims.clone(),
            (None, Some(depth)) => vec![depth],
            (None, None) => Vec::new(),
        }
    }

    /// Total element count, or `None` if it overflows `u32`.
    pub fn element_count(&self) -> Option<u32> {
        self.dimensions()
            .iter()
            .try_fold(1u32, |count, &dim| count.checked_mul(dim))
    }

    /// Words covered by this state, `Ok(None)` for an opaque aggregate.
    fn storage_words(&self) -> Result<Option<u64>> {
        let overflow = || {
            SimError::discovery(format!("`{}` has more elements than can be addressed", self.name))
        };
        let dims = self.dimensions();
        if dims.is_empty() {
            return Ok(Some(word_count(self.num_bits) as u64));
        }
        let elements = self.element_count().ok_or_else(overflow)?;
        let Some(stride) = self.stride else {
            return Ok(None);
        };
        if elements == 0 {
            return Ok(Some(0));
        }
        u64::from(stride)
            .checked_mul(u64::from(elements - 1))
            .and_then(|span| span.checked_add(word_count(self.num_bits) as u64))
            .map(Some)
            .ok_or_else(overflow)
    }
}

/// Declared symbol table of a model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSymbols {
    pub name: String,
    #[serde(rename = "numStateWords")]
    pub num_state_words: u32,
    #[serde(default)]
    pub encoding: NameEncoding,
    pub states: Vec<StateInfo>,
}

impl ModelSymbols {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SimError::discovery(format!("symbol table: {e}")))
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SimError::discovery(format!("failed to read {path}: {e}")))?;
        Self::from_json(&text)
    }

    /// Checks that every state lies inside the declared buffer.
    pub fn validate(&self) -> Result<()> {
        if self.states.is_empty() {
            return Err(SimError::discovery(format!("model `{}` declares no states", self.name)));
        }
        for state in &self.states {
            if state.num_bits == 0 {
                return Err(SimError::discovery(format!("`{}` has zero width", state.name)));
            }
            if let Some(stride) = state.stride {
                if (stride as usize) < word_count(state.num_bits) {
                    return Err(SimError::discovery(format!(
                        "`{}` has stride {stride} narrower than its elements",
                        state.name
                    )));
                }
            }
            let Some(words) = state.storage_words()? else {
                continue;
            };
            let end = u64::from(state.offset).saturating_add(words);
            if end > u64::from(self.num_state_words) {
                return Err(SimError::discovery(format!(
                    "`{}` ends at word {end}, past the {}-word state buffer",
                    state.name, self.num_state_words
                )));
            }
        }
        Ok(())
    }
}

/// A loaded, runnable simulation model.
pub trait Model {
    fn name(&self) -> &str;

    /// The symbol table, if the model was built with one.
    fn symbols(&self) -> Option<&ModelSymbols>;

    fn state(&self) -> &[u32];
    fn state_mut(&mut self) -> &mut [u32];

    /// Settle combinational logic and commit pending sequential updates.
    fn eval(&mut self);

    /// Run final blocks before the model is dropped.
    fn final_eval(&mut self) {}
}

/// Turns a toolchain artifact into a running model.
pub trait ModelLoader {
    fn load(&self, artifact: &Artifact) -> Result<Box<dyn Model>>;
}

impl<F> ModelLoader for F
where
    F: Fn(&Artifact) -> Result<Box<dyn Model>>,
{
    fn load(&self, artifact: &Artifact) -> Result<Box<dyn Model>> {
        self(artifact)
    }
}
