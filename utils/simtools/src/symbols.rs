//! Symbol tables recovered from the headers Verilator generates.
//!
//! Ports come from the `VL_IN*`/`VL_OUT*` macros, internal state from the
//! `VL_SIG*` macros of older releases or the typed member declarations
//! (`CData/*7:0*/ top__DOT__x;`) of newer ones. Offsets describe the packed
//! word buffer a loader exchanges with the library, in declaration order.

use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredKind {
    Input,
    Output,
    Register,
    Memory,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeclaredState {
    pub name: String,
    pub offset: u32,
    #[serde(rename = "numBits")]
    pub num_bits: u32,
    #[serde(rename = "type")]
    pub kind: DeclaredKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stride: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dims: Option<Vec<u32>>,
}

/// The JSON sidecar written next to a built model.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    pub name: String,
    #[serde(rename = "numStateWords")]
    pub num_state_words: u32,
    pub encoding: &'static str,
    pub states: Vec<DeclaredState>,
}

impl SymbolTable {
    /// Collects every user-visible signal declared in a generated header.
    pub fn from_header(top: &str, header: &str) -> Self {
        let mut table = SymbolTable {
            name: top.to_string(),
            num_state_words: 0,
            encoding: "verilator",
            states: Vec::new(),
        };
        for line in header.lines() {
            let line = line.trim().trim_end_matches(';').trim_end();
            let Some((name, kind, width, dims)) = parse_macro(line).or_else(|| parse_member(line))
            else {
                continue;
            };
            if is_generated(&name) || table.states.iter().any(|s| s.name == name) {
                continue;
            }
            table.push(name, kind, width, dims);
        }
        table
    }

    fn push(&mut self, name: String, kind: DeclaredKind, width: u32, dims: Vec<u32>) {
        let words = width.div_ceil(32);
        let elements = dims
            .iter()
            .try_fold(1u32, |count, &dim| count.checked_mul(dim))
            .unwrap_or(u32::MAX);
        let (kind, stride, dims) = if dims.is_empty() {
            (kind, None, None)
        } else {
            (DeclaredKind::Memory, Some(words), Some(dims))
        };
        self.states.push(DeclaredState {
            name,
            offset: self.num_state_words,
            num_bits: width,
            kind,
            stride,
            dims,
        });
        self.num_state_words = self
            .num_state_words
            .saturating_add(words.saturating_mul(elements.max(1)));
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

type Declaration = (String, DeclaredKind, u32, Vec<u32>);

/// `VL_IN8(&clk,0,0)`, `VL_OUTW(out,247,0,8)`, `VL_SIG8(top__DOT__arr[32],7,0)`
fn parse_macro(line: &str) -> Option<Declaration> {
    let rest = line.strip_prefix("VL_")?;
    let (mac, args) = rest.split_once('(')?;
    let kind = if mac.starts_with("IN") {
        DeclaredKind::Input
    } else if mac.starts_with("OUT") {
        DeclaredKind::Output
    } else if mac.starts_with("SIG") {
        DeclaredKind::Register
    } else {
        return None;
    };
    let mut args = args.strip_suffix(')')?.split(',').map(str::trim);
    let target = args.next()?.trim_start_matches('&');
    let msb: u32 = args.next()?.parse().ok()?;
    let lsb: u32 = args.next()?.parse().ok()?;

    let (name, dims) = split_dims(target)?;
    Some((name, kind, msb.abs_diff(lsb) + 1, dims))
}

/// `CData/*7:0*/ top__DOT__x` or `VlUnpacked<IData/*31:0*/, 32> top__DOT__mem`
fn parse_member(line: &str) -> Option<Declaration> {
    let (ty, name) = line.rsplit_once(' ')?;
    let (width, dims) = parse_type(ty.trim())?;
    let (name, extra) = split_dims(name)?;
    if !extra.is_empty() {
        return None;
    }
    Some((name, DeclaredKind::Register, width, dims))
}

fn parse_type(ty: &str) -> Option<(u32, Vec<u32>)> {
    if let Some(inner) = ty.strip_prefix("VlUnpacked<").and_then(|t| t.strip_suffix('>')) {
        let (element, count) = inner.rsplit_once(',')?;
        let (width, mut dims) = parse_type(element.trim())?;
        dims.insert(0, count.trim().parse().ok()?);
        return Some((width, dims));
    }
    let (base, range) = ty.split_once("/*")?;
    let base = base.trim();
    if !matches!(base, "CData" | "SData" | "IData" | "QData") && !base.starts_with("VlWide<") {
        return None;
    }
    let (msb, lsb) = range.strip_suffix("*/")?.split_once(':')?;
    let msb: u32 = msb.trim().parse().ok()?;
    let lsb: u32 = lsb.trim().parse().ok()?;
    Some((msb.abs_diff(lsb) + 1, Vec::new()))
}

/// Splits `name[4][8]` into the name and its array bounds.
fn split_dims(target: &str) -> Option<(String, Vec<u32>)> {
    let (name, bounds) = match target.find('[') {
        Some(at) => target.split_at(at),
        None => (target, ""),
    };
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let mut dims = Vec::new();
    let mut rest = bounds;
    while let Some(open) = rest.strip_prefix('[') {
        let (count, tail) = open.split_once(']')?;
        dims.push(count.trim().parse().ok()?);
        rest = tail;
    }
    if !rest.is_empty() {
        return None;
    }
    Some((name.to_string(), dims))
}

/// Temporaries and bookkeeping Verilator adds on its own.
fn is_generated(name: &str) -> bool {
    name.split("__DOT__").any(|segment| segment.starts_with("__V"))
}
