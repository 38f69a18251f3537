//! Reference models for the designs under `designs/`.
//!
//! Each model reproduces the state layout and cycle behaviour a Verilator
//! build of the matching design exposes, so the simulator can be exercised
//! without a compiler on the machine.

use camino::Utf8PathBuf;
use num_bigint::BigUint;
use verisim::{
    Artifact, BuildError, BuildRequest, Config, Model, ModelLoader, ModelSymbols, NameEncoding,
    SimError, Simulator, StateInfo, StateType, Toolchain, word_count,
};

mod models;

pub use models::{
    Hierarchy, InternalConcat, OpaqueMemory, PipelinedMac, RegFile, Unlisted, VariableNames,
    WidthConcat, VARIABLE_NAMES,
};

pub const DESIGNS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/designs");

pub const CONCAT_INPUTS: [(&str, &str); 5] = [
    ("input_a", "aa"),
    ("input_b", "1bbb"),
    ("input_c", "3ccccccc"),
    ("input_d", "7ddddddddddddddd"),
    ("input_e", "feeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"),
];

pub const CONCAT_OUTPUT: &str = "aa1bbb3ccccccc7dddddddddddddddfeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

/// Path of a design source by top module name.
pub fn design(top: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(DESIGNS_DIR).join(format!("{top}.v"))
}

pub fn hex(digits: &str) -> BigUint {
    BigUint::parse_bytes(digits.as_bytes(), 16).unwrap_or_default()
}

/// Storage location of one state inside a model's word buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u32,
    pub width: u32,
    pub stride: u32,
}

impl Slot {
    fn words(self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + word_count(self.width)
    }

    pub fn element(self, index: u32) -> Slot {
        Slot {
            offset: self.offset + index * self.stride,
            ..self
        }
    }

    pub fn get(self, state: &[u32]) -> BigUint {
        verisim::decode(&state[self.words()], self.width)
    }

    pub fn get_u64(self, state: &[u32]) -> u64 {
        self.get(state).iter_u64_digits().next().unwrap_or(0)
    }

    pub fn bit(self, state: &[u32]) -> bool {
        state[self.offset as usize] & 1 == 1
    }

    /// Stores `value` truncated to the slot width, as hardware would.
    pub fn set(self, state: &mut [u32], value: &BigUint) {
        let mask = (BigUint::from(1u32) << self.width) - 1u32;
        let mut digits = (value & mask).to_u32_digits();
        digits.resize(word_count(self.width), 0);
        state[self.words()].copy_from_slice(&digits);
    }

    pub fn set_u64(self, state: &mut [u32], value: u64) {
        self.set(state, &BigUint::from(value));
    }
}

/// Lays states out word by word and records them in a symbol table.
pub struct Layout {
    symbols: ModelSymbols,
}

impl Layout {
    pub fn new(name: &str) -> Self {
        Self {
            symbols: ModelSymbols {
                name: name.to_string(),
                num_state_words: 0,
                encoding: NameEncoding::Plain,
                states: Vec::new(),
            },
        }
    }

    pub fn encoding(mut self, encoding: NameEncoding) -> Self {
        self.symbols.encoding = encoding;
        self
    }

    fn push(&mut self, name: &str, width: u32, ty: StateType, words: u32) -> Slot {
        let offset = self.symbols.num_state_words;
        self.symbols.num_state_words += words;
        self.symbols.states.push(StateInfo {
            name: name.to_string(),
            offset,
            num_bits: width,
            ty,
            signed: false,
            stride: None,
            depth: None,
            dims: None,
        });
        Slot {
            offset,
            width,
            stride: 0,
        }
    }

    pub fn state(&mut self, name: &str, width: u32, ty: StateType) -> Slot {
        self.push(name, width, ty, word_count(width) as u32)
    }

    pub fn input(&mut self, name: &str, width: u32) -> Slot {
        self.state(name, width, StateType::Input)
    }

    pub fn output(&mut self, name: &str, width: u32) -> Slot {
        self.state(name, width, StateType::Output)
    }

    pub fn register(&mut self, name: &str, width: u32) -> Slot {
        self.state(name, width, StateType::Register)
    }

    /// Marks the most recently added state as signed.
    pub fn signed(&mut self) -> &mut Self {
        if let Some(state) = self.symbols.states.last_mut() {
            state.signed = true;
        }
        self
    }

    /// A memory with one storage slot per element.
    pub fn memory(&mut self, name: &str, width: u32, depth: u32) -> Slot {
        let stride = word_count(width) as u32;
        let slot = self.push(name, width, StateType::Memory, stride * depth);
        if let Some(state) = self.symbols.states.last_mut() {
            state.stride = Some(stride);
            state.depth = Some(depth);
        }
        Slot { stride, ..slot }
    }

    /// A memory the model only exposes as a whole.
    pub fn aggregate(&mut self, name: &str, width: u32, depth: u32) -> Slot {
        let words = (u64::from(width) * u64::from(depth)).div_ceil(32) as u32;
        let slot = self.push(name, width, StateType::Memory, words);
        if let Some(state) = self.symbols.states.last_mut() {
            state.depth = Some(depth);
        }
        slot
    }

    pub fn finish(self) -> (ModelSymbols, Vec<u32>) {
        let state = vec![0; self.symbols.num_state_words as usize];
        (self.symbols, state)
    }
}

/// Tracks a clock input between evals.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    last: bool,
}

impl EdgeDetector {
    pub fn rising(&mut self, level: bool) -> bool {
        let rose = level && !self.last;
        self.last = level;
        rose
    }
}

/// Builds a design from `designs/` against its reference model.
pub fn build(top: &str) -> verisim::Result<Simulator> {
    build_with(top, Config::default())
}

pub fn build_with(top: &str, config: Config) -> verisim::Result<Simulator> {
    let mut sources = vec![design(top)];
    if top == "parent_module" {
        sources.push(design("child_module"));
    }
    let request = BuildRequest::new(sources);
    Simulator::build(
        &request,
        &ReferenceToolchain::default(),
        &ReferenceLoader,
        config,
    )
}

/// Instantiates the reference model for a top module.
pub fn reference_model(top: &str) -> Option<Box<dyn Model>> {
    let model: Box<dyn Model> = match top {
        "width_test" => Box::new(WidthConcat::new()),
        "internal_test" => Box::new(InternalConcat::new()),
        "reg_file" => Box::new(RegFile::new()),
        "variable_name_test" => Box::new(VariableNames::new()),
        "parent_module" => Box::new(Hierarchy::new()),
        "pipelined_mac" => Box::new(PipelinedMac::new()),
        "opaque_memory" => Box::new(OpaqueMemory::new()),
        "unlisted" => Box::new(Unlisted::new()),
        _ => return None,
    };
    Some(model)
}

/// Loads artifacts by handing out the reference model of their top module.
pub struct ReferenceLoader;

impl ModelLoader for ReferenceLoader {
    fn load(&self, artifact: &Artifact) -> verisim::Result<Box<dyn Model>> {
        reference_model(&artifact.top).ok_or_else(|| SimError::Discovery {
            reason: format!("no reference model for `{}`", artifact.top),
        })
    }
}

/// Checks sources like a compiler would, without compiling anything.
pub struct ReferenceToolchain {
    pub build_dir: Utf8PathBuf,
}

impl Default for ReferenceToolchain {
    fn default() -> Self {
        Self {
            build_dir: Utf8PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../target/verisim")),
        }
    }
}

impl Toolchain for ReferenceToolchain {
    fn compile(&self, request: &BuildRequest) -> Result<Artifact, BuildError> {
        if request.sources.is_empty() {
            return Err(BuildError::NoSources);
        }
        if let Some(missing) = request.sources.iter().find(|path| !path.exists()) {
            return Err(BuildError::MissingSource(missing.clone()));
        }
        let top = request.top_module()?;
        Ok(Artifact::in_dir(&self.build_dir.join(&top), &top))
    }
}
