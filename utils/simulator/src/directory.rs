//! The hierarchical tree of signals a model declares.
//!
//! Ports live in the IO namespace, everything else in the internals
//! namespace, nested by module instance. Each scope maps logical (unescaped)
//! child names to nodes, and keeps a second map from accessor spellings to
//! logical names for names that collide with keywords.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;

use crate::error::{Result, SimError};
use crate::model::{Model, ModelSymbols, NameEncoding, StateInfo, StateType};
use crate::names;

pub type SignalId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Io,
    Internals,
}

/// Where the words of a signal live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Scalar,
    /// One storage slot per element, `stride` words apart.
    Elements { stride: u32 },
    /// The model exposes the array only as a whole.
    Aggregate,
}

#[derive(Debug, Clone)]
pub struct SignalInfo {
    pub namespace: NamespaceKind,
    /// Logical segments below the namespace root.
    pub path: Vec<String>,
    pub raw_name: String,
    pub ty: StateType,
    pub width: u32,
    pub signed: bool,
    pub offset: u32,
    pub dims: Vec<u32>,
    pub storage: Storage,
}

impl SignalInfo {
    fn from_state(state: &StateInfo, namespace: NamespaceKind, path: Vec<String>) -> Self {
        let dims = state.dimensions();
        let storage = match (dims.is_empty(), state.stride) {
            (true, _) => Storage::Scalar,
            (false, Some(stride)) => Storage::Elements { stride },
            (false, None) => Storage::Aggregate,
        };
        Self {
            namespace,
            path,
            raw_name: state.name.clone(),
            ty: state.ty,
            width: state.num_bits,
            signed: state.signed,
            offset: state.offset,
            dims,
            storage,
        }
    }

    pub fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Canonical dotted path, unique within the namespace.
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }

    pub fn is_array(&self) -> bool {
        !self.dims.is_empty()
    }

    /// Word offset of one array element, checking arity and bounds.
    pub fn element_offset(&self, index: &[u32]) -> Result<u32> {
        let stride = match self.storage {
            Storage::Scalar => {
                if index.is_empty() {
                    return Ok(self.offset);
                }
                return Err(self.index_error(index));
            }
            Storage::Aggregate => {
                return Err(SimError::Unsupported {
                    name: self.path_string(),
                });
            }
            Storage::Elements { stride } => stride,
        };
        if index.len() != self.dims.len() {
            return Err(self.index_error(index));
        }
        let mut linear = 0u64;
        for (&i, &dim) in index.iter().zip(&self.dims) {
            if i >= dim {
                return Err(self.index_error(index));
            }
            linear = linear * u64::from(dim) + u64::from(i);
        }
        let offset = u64::from(self.offset) + linear * u64::from(stride);
        u32::try_from(offset).map_err(|_| self.index_error(index))
    }

    /// Addressable storage slots as (index suffix, word offset). Scalars
    /// have one slot with an empty suffix; aggregates have none.
    pub fn slots(&self) -> Vec<(String, u32)> {
        match self.storage {
            Storage::Scalar => vec![(String::new(), self.offset)],
            Storage::Aggregate => Vec::new(),
            Storage::Elements { stride } => {
                let count: u32 = self.dims.iter().product();
                (0..count)
                    .map(|linear| {
                        let mut rem = linear;
                        let mut index = vec![0; self.dims.len()];
                        for (slot, &dim) in index.iter_mut().zip(&self.dims).rev() {
                            *slot = rem % dim;
                            rem /= dim;
                        }
                        let suffix: String = index.iter().map(|i| format!("[{i}]")).collect();
                        (suffix, self.offset + linear * stride)
                    })
                    .collect()
            }
        }
    }

    fn index_error(&self, index: &[u32]) -> SimError {
        SimError::Index {
            name: self.path_string(),
            index: format!("{index:?}"),
            dims: self.dims.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Scope(Scope),
    Signal(SignalId),
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    name: String,
    children: BTreeMap<String, Node>,
    /// Accessor spelling to logical child name.
    attrs: BTreeMap<String, String>,
}

impl Scope {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.children.iter().map(|(name, node)| (name.as_str(), node))
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    /// Looks up a child by its accessor spelling.
    pub fn attr(&self, attr: &str) -> Option<&Node> {
        self.attrs.get(attr).and_then(|name| self.children.get(name))
    }

    /// The accessor spelling of a child, if it has one.
    pub fn attr_of(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(_, logical)| logical.as_str() == name)
            .map(|(attr, _)| attr.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn walk(&self, segments: &[String]) -> Option<&Node> {
        let (last, parents) = segments.split_last()?;
        let mut scope = self;
        for segment in parents {
            match scope.children.get(segment)? {
                Node::Scope(child) => scope = child,
                Node::Signal(_) => return None,
            }
        }
        scope.children.get(last)
    }

    fn insert(&mut self, segments: &[String], id: SignalId, raw: &str) -> Result<()> {
        let Some((last, parents)) = segments.split_last() else {
            return Err(SimError::discovery(format!("`{raw}` has an empty name")));
        };
        let mut scope = self;
        for segment in parents {
            let node = scope
                .children
                .entry(segment.clone())
                .or_insert_with(|| Node::Scope(Scope::new(segment.clone())));
            scope = match node {
                Node::Scope(child) => child,
                Node::Signal(_) => {
                    return Err(SimError::discovery(format!(
                        "`{raw}` nests under signal `{segment}`"
                    )));
                }
            };
        }
        if scope.children.contains_key(last) {
            return Err(SimError::discovery(format!(
                "`{raw}` duplicates `{last}` in scope `{}`",
                scope.name
            )));
        }
        scope.children.insert(last.clone(), Node::Signal(id));
        Ok(())
    }

    fn assign_attrs(&mut self) {
        let mut claimed: HashSet<String> = HashSet::new();
        let mut attrs = BTreeMap::new();

        // Plain identifiers keep their own spelling.
        for name in self.children.keys() {
            if names::is_identifier(name) && !names::is_keyword(name) {
                claimed.insert(name.clone());
                attrs.insert(name.clone(), name.clone());
            }
        }
        for name in self.children.keys() {
            if !names::is_keyword(name) {
                continue;
            }
            let Some(mut spelling) = names::attr_spelling(name) else {
                continue;
            };
            while claimed.contains(&spelling) {
                spelling.push('_');
            }
            claimed.insert(spelling.clone());
            attrs.insert(spelling, name.clone());
        }
        self.attrs = attrs;

        for node in self.children.values_mut() {
            if let Node::Scope(child) = node {
                child.assign_attrs();
            }
        }
    }
}

/// All signals of one model, grouped into the IO and internals trees.
#[derive(Debug, Clone)]
pub struct SignalDirectory {
    top: String,
    signals: Vec<SignalInfo>,
    io: Scope,
    internals: Scope,
    raw: HashMap<(NamespaceKind, String), SignalId>,
}

impl SignalDirectory {
    pub fn build(model: &dyn Model) -> Result<Self> {
        let symbols = model.symbols().ok_or_else(|| {
            SimError::discovery(format!("model `{}` exposes no symbol table", model.name()))
        })?;
        Self::from_symbols(symbols)
    }

    pub fn from_symbols(symbols: &ModelSymbols) -> Result<Self> {
        symbols.validate()?;

        let top = symbols.name.clone();
        let mut directory = SignalDirectory {
            io: Scope::new(top.clone()),
            internals: Scope::new(top.clone()),
            top,
            signals: Vec::with_capacity(symbols.states.len()),
            raw: HashMap::new(),
        };

        for state in &symbols.states {
            let namespace = if state.ty.is_port() {
                NamespaceKind::Io
            } else {
                NamespaceKind::Internals
            };
            let path = directory.logical_path(&state.name, symbols.encoding, namespace);
            let id = directory.signals.len();
            directory.scope_mut(namespace).insert(&path, id, &state.name)?;
            directory.raw.insert((namespace, state.name.clone()), id);
            directory
                .signals
                .push(SignalInfo::from_state(state, namespace, path));
        }

        directory.io.assign_attrs();
        directory.internals.assign_attrs();

        log::debug!(
            "discovered {} signals in `{}` ({} ports)",
            directory.signals.len(),
            directory.top,
            directory
                .signals
                .iter()
                .filter(|s| s.namespace == NamespaceKind::Io)
                .count()
        );
        Ok(directory)
    }

    fn logical_path(
        &self,
        raw: &str,
        encoding: NameEncoding,
        namespace: NamespaceKind,
    ) -> Vec<String> {
        let mut segments = names::split(raw, encoding);
        if segments.len() > 1 && segments[0] == "TOP" {
            segments.remove(0);
        }
        if segments.len() > 1 && segments[0] == self.top {
            segments.remove(0);
        }
        if namespace == NamespaceKind::Io && segments.len() > 1 {
            // Ports are flat; keep the whole decoded name as one segment.
            return vec![segments.join(".")];
        }
        segments
    }

    fn scope_mut(&mut self, namespace: NamespaceKind) -> &mut Scope {
        match namespace {
            NamespaceKind::Io => &mut self.io,
            NamespaceKind::Internals => &mut self.internals,
        }
    }

    pub fn top(&self) -> &str {
        &self.top
    }

    pub fn root(&self, namespace: NamespaceKind) -> &Scope {
        match namespace {
            NamespaceKind::Io => &self.io,
            NamespaceKind::Internals => &self.internals,
        }
    }

    pub fn io(&self) -> &Scope {
        &self.io
    }

    pub fn internals(&self) -> &Scope {
        &self.internals
    }

    pub fn signal(&self, id: SignalId) -> &SignalInfo {
        &self.signals[id]
    }

    pub fn signals(&self) -> impl Iterator<Item = (SignalId, &SignalInfo)> {
        self.signals.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Resolves a raw or logical name inside `scope` of `namespace`.
    ///
    /// Tried in order: the exact symbol-table name (root scope only), the
    /// exact logical child name, the name with its escape marker removed,
    /// and finally the name split on hierarchy separators.
    pub fn resolve<'a>(
        &'a self,
        namespace: NamespaceKind,
        scope: &'a Scope,
        raw: &str,
    ) -> Option<&'a Node> {
        let is_root = std::ptr::eq(scope, self.root(namespace));
        if is_root {
            if let Some(&id) = self.raw.get(&(namespace, raw.to_string())) {
                return scope.walk(&self.signals[id].path);
            }
        }
        if let Some(node) = scope.child(raw) {
            return Some(node);
        }
        if let Some(node) = scope.child(names::strip_escape(raw)) {
            return Some(node);
        }
        scope.walk(&names::split(raw, NameEncoding::Plain))
    }

    /// Renders both trees, one line per node.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "io ({}):", self.top);
        self.render_scope(&self.io, 1, &mut out);
        let _ = writeln!(out, "internals ({}):", self.top);
        self.render_scope(&self.internals, 1, &mut out);
        out
    }

    fn render_scope(&self, scope: &Scope, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        for (name, node) in scope.children() {
            let attr = match scope.attr_of(name) {
                Some(attr) if attr != name => format!(" (as {attr})"),
                Some(_) => String::new(),
                None => " (by name only)".to_string(),
            };
            match node {
                Node::Scope(child) => {
                    let _ = writeln!(out, "{indent}{name}{attr}:");
                    self.render_scope(child, depth + 1, out);
                }
                Node::Signal(id) => {
                    let info = &self.signals[*id];
                    let sign = if info.signed { " signed" } else { "" };
                    let dims: String = info.dims.iter().map(|d| format!("[{d}]")).collect();
                    let aggregate = if info.storage == Storage::Aggregate {
                        " (aggregate)"
                    } else {
                        ""
                    };
                    let _ = writeln!(
                        out,
                        "{indent}{name}{dims}: {:?} {}{sign}{aggregate}{attr}",
                        info.ty, info.width
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(json: &str) -> SignalDirectory {
        SignalDirectory::from_symbols(&ModelSymbols::from_json(json).unwrap()).unwrap()
    }

    const PARENT: &str = r#"{
        "name": "parent_module",
        "numStateWords": 16,
        "states": [
            { "name": "clk", "offset": 0, "numBits": 1, "type": "input" },
            { "name": "rst", "offset": 1, "numBits": 1, "type": "input" },
            { "name": "in", "offset": 2, "numBits": 8, "type": "input" },
            { "name": "out", "offset": 3, "numBits": 8, "type": "output" },
            { "name": "parent_module.in_reg", "offset": 4, "numBits": 8, "type": "register" },
            { "name": "parent_module.out_reg", "offset": 5, "numBits": 8, "type": "register" },
            { "name": "parent_module.child_1.in_reg", "offset": 6, "numBits": 8, "type": "register" },
            { "name": "parent_module.child_1.out_reg", "offset": 7, "numBits": 8, "type": "register" },
            { "name": "parent_module.child_2.in_reg", "offset": 8, "numBits": 8, "type": "register" },
            { "name": "parent_module.child_2.out_reg", "offset": 9, "numBits": 8, "type": "register" }
        ]
    }"#;

    #[test]
    fn ports_and_internals_are_separated() {
        let dir = directory(PARENT);
        assert_eq!(dir.len(), 10);
        assert!(matches!(dir.io().child("clk"), Some(Node::Signal(_))));
        assert!(dir.io().child("in_reg").is_none());
        assert!(matches!(dir.internals().child("in_reg"), Some(Node::Signal(_))));
        assert!(matches!(dir.internals().child("child_1"), Some(Node::Scope(_))));
    }

    #[test]
    fn hierarchy_nests_child_instances() {
        let dir = directory(PARENT);
        let Some(Node::Scope(child)) = dir.internals().child("child_2") else {
            panic!("child_2 should be a scope");
        };
        let Some(Node::Signal(id)) = child.child("out_reg") else {
            panic!("child_2.out_reg should be a signal");
        };
        let info = dir.signal(*id);
        assert_eq!(info.path_string(), "child_2.out_reg");
        assert_eq!(info.raw_name, "parent_module.child_2.out_reg");
        assert_eq!(info.offset, 9);
    }

    #[test]
    fn keyword_ports_get_alternate_spelling() {
        let dir = directory(PARENT);
        assert!(dir.io().attr("in").is_none());
        assert!(matches!(dir.io().attr("in_"), Some(Node::Signal(2))));
        assert!(matches!(dir.io().child("in"), Some(Node::Signal(2))));
        assert_eq!(dir.io().attr_of("in"), Some("in_"));
        assert!(matches!(dir.io().attr("out"), Some(Node::Signal(3))));
    }

    #[test]
    fn keyword_spelling_avoids_existing_names() {
        let dir = directory(
            r#"{ "name": "t", "numStateWords": 2, "states": [
                { "name": "in", "offset": 0, "numBits": 1, "type": "input" },
                { "name": "in_", "offset": 1, "numBits": 1, "type": "input" }
            ] }"#,
        );
        assert!(matches!(dir.io().attr("in_"), Some(Node::Signal(1))));
        assert!(matches!(dir.io().attr("in__"), Some(Node::Signal(0))));
    }

    #[test]
    fn raw_and_logical_names_resolve_to_same_signal() {
        let dir = directory(PARENT);
        let root = dir.internals();
        let by_raw = dir.resolve(NamespaceKind::Internals, root, "parent_module.child_1.in_reg");
        let by_path = dir.resolve(NamespaceKind::Internals, root, "child_1.in_reg");
        let by_slash = dir.resolve(NamespaceKind::Internals, root, "child_1/in_reg");
        assert!(matches!(by_raw, Some(Node::Signal(6))));
        assert!(matches!(by_path, Some(Node::Signal(6))));
        assert!(matches!(by_slash, Some(Node::Signal(6))));
        assert!(dir.resolve(NamespaceKind::Internals, root, "child_3.in_reg").is_none());
    }

    #[test]
    fn escaped_identifiers_are_unescaped() {
        let dir = directory(
            r#"{ "name": "variable_name_test", "numStateWords": 4, "states": [
                { "name": "\\$^_^ ", "offset": 0, "numBits": 1, "type": "input" },
                { "name": "\\.][. ", "offset": 1, "numBits": 1, "type": "input" },
                { "name": "\\.][._out ", "offset": 2, "numBits": 1, "type": "output" }
            ] }"#,
        );
        let io = dir.io();
        assert!(matches!(io.child("$^_^"), Some(Node::Signal(0))));
        assert!(matches!(io.child(".]["), None));
        assert!(matches!(io.child(".][."), Some(Node::Signal(1))));
        assert!(matches!(
            dir.resolve(NamespaceKind::Io, io, ".][._out"),
            Some(Node::Signal(2))
        ));
        assert!(matches!(
            dir.resolve(NamespaceKind::Io, io, "\\.][. "),
            Some(Node::Signal(1))
        ));
        assert_eq!(io.attr_of("$^_^"), None);
    }

    #[test]
    fn verilator_names_are_decoded() {
        let dir = directory(
            r#"{ "name": "internal_test", "numStateWords": 20, "encoding": "verilator", "states": [
                { "name": "a___05Fa", "offset": 0, "numBits": 1, "type": "input" },
                { "name": "internal_test__DOT__internal_concat_1", "offset": 1, "numBits": 248, "type": "register" }
            ] }"#,
        );
        assert!(matches!(dir.io().child("a__a"), Some(Node::Signal(0))));
        assert!(matches!(
            dir.internals().child("internal_concat_1"),
            Some(Node::Signal(1))
        ));
        assert!(matches!(
            dir.resolve(
                NamespaceKind::Internals,
                dir.internals(),
                "internal_test__DOT__internal_concat_1"
            ),
            Some(Node::Signal(1))
        ));
    }

    #[test]
    fn duplicate_logical_names_fail_discovery() {
        let symbols = ModelSymbols::from_json(
            r#"{ "name": "t", "numStateWords": 2, "states": [
                { "name": "a", "offset": 0, "numBits": 1, "type": "wire" },
                { "name": "t.a", "offset": 1, "numBits": 1, "type": "wire" }
            ] }"#,
        )
        .unwrap();
        let err = SignalDirectory::from_symbols(&symbols).unwrap_err();
        assert!(matches!(err, SimError::Discovery { .. }));
    }

    #[test]
    fn element_offsets_follow_stride() {
        let dir = directory(
            r#"{ "name": "reg_file", "numStateWords": 80, "states": [
                { "name": "arr", "offset": 8, "numBits": 8, "type": "memory", "stride": 2, "depth": 32 },
                { "name": "grid", "offset": 72, "numBits": 4, "type": "memory", "stride": 1, "dims": [2, 4] },
                { "name": "blob", "offset": 0, "numBits": 8, "type": "memory", "depth": 1024 }
            ] }"#,
        );
        let arr = dir.signal(0);
        assert_eq!(arr.element_offset(&[0]).unwrap(), 8);
        assert_eq!(arr.element_offset(&[31]).unwrap(), 8 + 62);
        assert!(matches!(arr.element_offset(&[32]), Err(SimError::Index { .. })));
        assert!(matches!(arr.element_offset(&[]), Err(SimError::Index { .. })));

        let grid = dir.signal(1);
        assert_eq!(grid.element_offset(&[1, 2]).unwrap(), 72 + 6);
        assert!(matches!(grid.element_offset(&[2, 0]), Err(SimError::Index { .. })));

        let blob = dir.signal(2);
        assert_eq!(blob.storage, Storage::Aggregate);
        assert!(matches!(blob.element_offset(&[0]), Err(SimError::Unsupported { .. })));
    }

    #[test]
    fn slots_enumerate_elements_row_major() {
        let dir = directory(
            r#"{ "name": "t", "numStateWords": 16, "states": [
                { "name": "grid", "offset": 4, "numBits": 4, "type": "memory", "stride": 1, "dims": [2, 3] },
                { "name": "blob", "offset": 0, "numBits": 8, "type": "memory", "depth": 1024 },
                { "name": "x", "offset": 12, "numBits": 3, "type": "wire" }
            ] }"#,
        );
        let slots = dir.signal(0).slots();
        assert_eq!(slots.len(), 6);
        assert_eq!(slots[0], ("[0][0]".to_string(), 4));
        assert_eq!(slots[4], ("[1][1]".to_string(), 8));
        assert!(dir.signal(1).slots().is_empty());
        assert_eq!(dir.signal(2).slots(), vec![(String::new(), 12)]);
    }

    #[test]
    fn render_lists_every_signal() {
        let rendered = directory(PARENT).render();
        assert!(rendered.contains("in: Input 8 (as in_)"));
        assert!(rendered.contains("child_1:"));
        assert!(rendered.contains("    out_reg: Register 8"));
    }
}
