//! Conversion between host integers and the model's packed word storage.
//!
//! A signal of `width` bits occupies `ceil(width / 32)` consecutive words,
//! least-significant word first. Bits above `width` in the top word are not
//! part of the value and are masked off on decode.

use std::fmt;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};

use crate::error::{Result, SimError};

pub const WORD_BITS: u32 = 32;

pub fn word_count(width: u32) -> usize {
    width.div_ceil(WORD_BITS) as usize
}

fn top_word_mask(width: u32) -> u32 {
    match width % WORD_BITS {
        0 => u32::MAX,
        rem => (1u32 << rem) - 1,
    }
}

/// Reassembles the unsigned value held in `words`.
pub fn decode(words: &[u32], width: u32) -> BigUint {
    let count = word_count(width);
    let mut digits = Vec::with_capacity(count);
    digits.extend(words.iter().take(count).copied());
    digits.resize(count, 0);
    if let Some(top) = digits.last_mut() {
        *top &= top_word_mask(width);
    }
    BigUint::new(digits)
}

/// Packs `value` into exactly `word_count(width)` words.
pub fn encode(value: &BigUint, width: u32) -> Result<Vec<u32>> {
    if value.bits() > u64::from(width) {
        return Err(SimError::Range {
            value: format!("{value:#x}"),
            width,
        });
    }
    let mut words = value.to_u32_digits();
    words.resize(word_count(width), 0);
    Ok(words)
}

/// Like [`encode`], but rejects negative values instead of reinterpreting
/// them. Signed callers go through [`to_twos_complement`] first.
pub fn encode_int(value: &BigInt, width: u32) -> Result<Vec<u32>> {
    match value.to_biguint() {
        Some(unsigned) => encode(&unsigned, width),
        None => Err(SimError::Range {
            value: value.to_string(),
            width,
        }),
    }
}

/// The `width`-bit two's complement pattern of `value`.
pub fn to_twos_complement(value: &BigInt, width: u32) -> Result<BigUint> {
    let out_of_range = || SimError::Range {
        value: value.to_string(),
        width,
    };
    if width == 0 {
        return if value.is_zero() {
            Ok(BigUint::zero())
        } else {
            Err(out_of_range())
        };
    }
    let half = BigInt::one() << (width - 1);
    if *value >= half || *value < -&half {
        return Err(out_of_range());
    }
    let pattern = match value.sign() {
        Sign::Minus => (BigInt::one() << width) + value,
        _ => value.clone(),
    };
    pattern.to_biguint().ok_or_else(out_of_range)
}

/// Interprets a `width`-bit pattern as a two's complement integer.
pub fn from_twos_complement(bits: &BigUint, width: u32) -> BigInt {
    let value = BigInt::from(bits.clone());
    if width > 0 && bits.bit(u64::from(width - 1)) {
        value - (BigInt::one() << width)
    } else {
        value
    }
}

/// An unsigned bit pattern together with its declared width.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitVector {
    value: BigUint,
    width: u32,
}

impl BitVector {
    pub fn new(value: impl Into<BigUint>, width: u32) -> Result<Self> {
        let value = value.into();
        if value.bits() > u64::from(width) {
            return Err(SimError::Range {
                value: format!("{value:#x}"),
                width,
            });
        }
        Ok(Self { value, width })
    }

    pub fn from_words(words: &[u32], width: u32) -> Self {
        Self {
            value: decode(words, width),
            width,
        }
    }

    pub fn to_words(&self) -> Vec<u32> {
        let mut words = self.value.to_u32_digits();
        words.resize(word_count(self.width), 0);
        words
    }

    pub fn value(&self) -> &BigUint {
        &self.value
    }

    pub fn into_value(self) -> BigUint {
        self.value
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.value.to_u64()
    }

    pub fn to_signed(&self) -> BigInt {
        from_twos_complement(&self.value, self.width)
    }

    pub fn bit(&self, index: u32) -> bool {
        index < self.width && self.value.bit(u64::from(index))
    }

    /// Bits from most to least significant.
    pub fn bits_msb_first(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.width).rev().map(|i| self.value.bit(u64::from(i)))
    }
}

/// Renders verilog literal notation, e.g. `8'haa`.
impl fmt::Display for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'h{:x}", self.width, self.value)
    }
}
