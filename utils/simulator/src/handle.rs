use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use num_bigint::{BigInt, BigUint};
use num_traits::ToPrimitive;

use crate::codec::{self, BitVector};
use crate::directory::{SignalId, SignalInfo, Storage};
use crate::error::{Result, SimError};
use crate::model::Model;
use crate::sim::Core;

/// A typed view onto one signal (or one element of an array signal) of a
/// running simulator.
///
/// Handles do not keep the simulator alive. Once it is closed or dropped,
/// every access fails with [`SimError::State`]. Writes land in model storage
/// immediately but only propagate through the design on the next eval.
#[derive(Clone)]
pub struct SignalHandle {
    core: Weak<RefCell<Core>>,
    id: SignalId,
    info: Rc<SignalInfo>,
    element: Option<Vec<u32>>,
}

impl SignalHandle {
    pub(crate) fn new(core: Weak<RefCell<Core>>, id: SignalId, info: Rc<SignalInfo>) -> Self {
        Self {
            core,
            id,
            info,
            element: None,
        }
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn info(&self) -> &SignalInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    /// Dotted logical path, with an element suffix for element handles.
    pub fn path(&self) -> String {
        let mut path = self.info.path_string();
        if let Some(index) = &self.element {
            for i in index {
                path.push_str(&format!("[{i}]"));
            }
        }
        path
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn is_signed(&self) -> bool {
        self.info.signed
    }

    /// True for a whole array; element handles are scalars.
    pub fn is_array(&self) -> bool {
        self.info.is_array() && self.element.is_none()
    }

    pub fn dims(&self) -> &[u32] {
        &self.info.dims
    }

    /// Whether both handles address the same storage.
    pub fn same_signal(&self, other: &SignalHandle) -> bool {
        self.id == other.id
            && self.element == other.element
            && Weak::ptr_eq(&self.core, &other.core)
    }

    /// A scalar handle onto one array element.
    pub fn element(&self, index: &[u32]) -> Result<SignalHandle> {
        if self.element.is_some() {
            return Err(SimError::Index {
                name: self.path(),
                index: format!("{index:?}"),
                dims: Vec::new(),
            });
        }
        self.info.element_offset(index)?;
        Ok(SignalHandle {
            element: Some(index.to_vec()),
            ..self.clone()
        })
    }

    pub(crate) fn belongs_to(&self, core: &Rc<RefCell<Core>>) -> bool {
        std::ptr::eq(self.core.as_ptr(), Rc::as_ptr(core))
    }

    /// Labelled word offsets this handle covers, one per scalar slot.
    pub(crate) fn slots(&self) -> Result<Vec<(String, u32)>> {
        if let Some(index) = &self.element {
            return Ok(vec![(self.path(), self.info.element_offset(index)?)]);
        }
        if self.info.storage == Storage::Aggregate {
            return Err(SimError::Unsupported { name: self.path() });
        }
        let path = self.info.path_string();
        Ok(self
            .info
            .slots()
            .into_iter()
            .map(|(suffix, offset)| (format!("{path}{suffix}"), offset))
            .collect())
    }

    fn own_index(&self) -> &[u32] {
        self.element.as_deref().unwrap_or_default()
    }

    fn with_model<R>(&self, f: impl FnOnce(&mut dyn Model) -> Result<R>) -> Result<R> {
        let core = self
            .core
            .upgrade()
            .ok_or_else(|| SimError::state(format!("`{}` outlived its simulator", self.path())))?;
        let mut core = core.borrow_mut();
        let model = core
            .model
            .as_deref_mut()
            .ok_or_else(|| SimError::state(format!("`{}` used after close", self.path())))?;
        f(model)
    }

    fn read_offset(&self, offset: u32) -> Result<BitVector> {
        let width = self.info.width;
        self.with_model(|model| {
            let words = model.state().get(offset as usize..).unwrap_or_default();
            Ok(BitVector::from_words(words, width))
        })
    }

    fn write_offset(&self, offset: u32, words: &[u32]) -> Result<()> {
        self.with_model(|model| {
            let start = offset as usize;
            let dest = model
                .state_mut()
                .get_mut(start..start + words.len())
                .ok_or_else(|| SimError::state("model state buffer shrank"))?;
            dest.copy_from_slice(words);
            Ok(())
        })
    }

    pub fn read_bits(&self) -> Result<BitVector> {
        let offset = self.info.element_offset(self.own_index())?;
        self.read_offset(offset)
    }

    pub fn read(&self) -> Result<BigUint> {
        self.read_bits().map(BitVector::into_value)
    }

    /// Reads the value, failing if it does not fit in 64 bits.
    pub fn read_u64(&self) -> Result<u64> {
        let bits = self.read_bits()?;
        bits.to_u64().ok_or_else(|| SimError::Range {
            value: bits.to_string(),
            width: 64,
        })
    }

    /// Reads the stored pattern as a two's complement integer.
    pub fn read_signed(&self) -> Result<BigInt> {
        self.read_bits().map(|bits| bits.to_signed())
    }

    pub fn write(&self, value: impl Into<BigInt>) -> Result<()> {
        let offset = self.info.element_offset(self.own_index())?;
        let words = codec::encode_int(&value.into(), self.info.width)?;
        self.write_offset(offset, &words)
    }

    /// Stores the two's complement pattern of `value`.
    pub fn write_signed(&self, value: impl Into<BigInt>) -> Result<()> {
        let pattern = codec::to_twos_complement(&value.into(), self.info.width)?;
        self.write(pattern)
    }

    pub fn write_bits(&self, bits: &BitVector) -> Result<()> {
        self.write(bits.value().clone())
    }

    pub fn read_at(&self, index: &[u32]) -> Result<BigUint> {
        self.element(index)?.read()
    }

    pub fn write_at(&self, index: &[u32], value: impl Into<BigInt>) -> Result<()> {
        self.element(index)?.write(value)
    }

    pub fn to_i64(&self) -> Result<i64> {
        let value = self.read_signed()?;
        value.to_i64().ok_or_else(|| SimError::Range {
            value: value.to_string(),
            width: 64,
        })
    }
}

impl PartialEq for SignalHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_signal(other)
    }
}

impl fmt::Debug for SignalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// `name = 8'haa`, or the reason the value could not be read.
impl fmt::Display for SignalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.read_bits() {
            Ok(bits) => write!(f, "{} = {}", self.path(), bits),
            Err(SimError::Index { .. }) if self.is_array() => {
                write!(f, "{}{:?}: {}", self.path(), self.info.dims, self.info.width)
            }
            Err(e) => write!(f, "{} = <{}>", self.path(), e),
        }
    }
}
