use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use num_bigint::{BigInt, BigUint};
use verisim_tools::{BuildRequest, Config, Toolchain};

use crate::bridge::{
    BridgeSignal, BridgeState, ProcessLauncher, StepOutcome, ViewerLauncher, WaveformBridge,
};
use crate::directory::{NamespaceKind, Node, Scope, SignalDirectory, SignalId, SignalInfo};
use crate::error::{Result, SimError};
use crate::handle::SignalHandle;
use crate::model::{Model, ModelLoader};
use crate::trace::TraceController;

/// Storage shared between the driver and the handles it hands out.
pub(crate) struct Core {
    /// `None` once the simulator is closed.
    pub(crate) model: Option<Box<dyn Model>>,
}

/// Owns one model instance and everything observing it.
///
/// Signals are reached through [`Simulator::io`] and [`Simulator::internals`]
/// or directly with [`Simulator::signal`]. Time only moves through
/// [`Simulator::advance_time`] and [`Simulator::tick`].
pub struct Simulator {
    core: Rc<RefCell<Core>>,
    directory: SignalDirectory,
    infos: Vec<Rc<SignalInfo>>,
    handles: RefCell<HashMap<SignalId, SignalHandle>>,
    config: Config,
    time: u64,
    trace: TraceController,
    bridge: WaveformBridge,
}

impl Simulator {
    pub fn new(model: Box<dyn Model>, config: Config) -> Result<Self> {
        let directory = SignalDirectory::build(model.as_ref())?;
        if let Some(symbols) = model.symbols() {
            let have = model.state().len();
            if have < symbols.num_state_words as usize {
                return Err(SimError::discovery(format!(
                    "model `{}` has {have} state words but declares {}",
                    model.name(),
                    symbols.num_state_words
                )));
            }
        }

        let infos = directory
            .signals()
            .map(|(_, info)| Rc::new(info.clone()))
            .collect();
        log::info!(
            "loaded model `{}` with {} signals",
            model.name(),
            directory.len()
        );

        Ok(Self {
            core: Rc::new(RefCell::new(Core { model: Some(model) })),
            directory,
            infos,
            handles: RefCell::new(HashMap::new()),
            trace: TraceController::new(config.trace.clone()),
            bridge: WaveformBridge::new(Duration::from_millis(config.viewer.timeout_ms)),
            config,
            time: 0,
        })
    }

    /// Compiles `request`, loads the result and discovers its signals.
    pub fn build(
        request: &BuildRequest,
        toolchain: &dyn Toolchain,
        loader: &dyn ModelLoader,
        config: Config,
    ) -> Result<Self> {
        let artifact = toolchain.compile(request)?;
        log::debug!("built `{}` into {}", artifact.top, artifact.dir);
        let model = loader.load(&artifact)?;
        Self::new(model, config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn directory(&self) -> &SignalDirectory {
        &self.directory
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn is_closed(&self) -> bool {
        self.core.borrow().model.is_none()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SimError::state("simulator is closed"));
        }
        Ok(())
    }

    /// Settles the design at the current time and records a trace snapshot.
    pub fn eval(&mut self) -> Result<()> {
        let mut core = self.core.borrow_mut();
        let model = core
            .model
            .as_deref_mut()
            .ok_or_else(|| SimError::state("eval on a closed simulator"))?;
        model.eval();
        self.trace.record(self.time, model.state())
    }

    pub fn advance_time(&mut self, delta: u64) {
        self.time = self.time.saturating_add(delta);
    }

    /// One full cycle of the configured clock.
    pub fn tick(&mut self) -> Result<()> {
        let name = self.config.clock.name.clone();
        self.tick_signal(&name)
    }

    /// Drives `name` through one full cycle, evaluating after each edge.
    /// Every edge advances time by one unit.
    pub fn tick_signal(&mut self, name: &str) -> Result<()> {
        let clock = self.signal(name)?;
        if clock.width() != 1 {
            return Err(SimError::Clock {
                name: clock.path(),
                width: clock.width(),
            });
        }
        for level in self.config.clock.edge.levels() {
            clock.write(level)?;
            self.eval()?;
            self.advance_time(1);
        }
        Ok(())
    }

    pub fn io(&self) -> Namespace<'_> {
        Namespace::root(self, NamespaceKind::Io)
    }

    pub fn internals(&self) -> Namespace<'_> {
        Namespace::root(self, NamespaceKind::Internals)
    }

    /// Looks a name up among the ports first, then among internal signals.
    pub fn signal(&self, name: &str) -> Result<SignalHandle> {
        match self.io().get(name) {
            Err(SimError::Name { .. }) => self.internals().get(name),
            found => found,
        }
    }

    pub fn read(&self, name: &str) -> Result<BigUint> {
        self.signal(name)?.read()
    }

    pub fn write(&self, name: &str, value: impl Into<BigInt>) -> Result<()> {
        self.signal(name)?.write(value)
    }

    fn handle(&self, id: SignalId) -> SignalHandle {
        self.handles
            .borrow_mut()
            .entry(id)
            .or_insert_with(|| {
                SignalHandle::new(Rc::downgrade(&self.core), id, self.infos[id].clone())
            })
            .clone()
    }

    pub fn start_trace(&mut self, path: impl AsRef<Utf8Path>) -> Result<()> {
        self.ensure_open()?;
        self.trace.start(path.as_ref(), &self.directory)
    }

    pub fn stop_trace(&mut self) -> Result<Utf8PathBuf> {
        self.trace.stop()
    }

    pub fn is_tracing(&self) -> bool {
        self.trace.is_open()
    }

    pub fn start_bridge(&mut self, launcher: &dyn ViewerLauncher) -> Result<()> {
        self.ensure_open()?;
        self.bridge.start(launcher)
    }

    /// Starts the viewer named in the configuration.
    pub fn launch_viewer(&mut self) -> Result<()> {
        let launcher = ProcessLauncher::from_config(&self.config.viewer);
        self.start_bridge(&launcher)
    }

    /// Declares signals to the viewer. Arrays expand to their elements.
    pub fn declare_to_bridge(
        &mut self,
        signals: impl IntoIterator<Item = SignalHandle>,
    ) -> Result<()> {
        let mut declared = Vec::new();
        for handle in signals {
            if !handle.belongs_to(&self.core) {
                return Err(SimError::state(format!(
                    "`{}` belongs to another simulator",
                    handle.path()
                )));
            }
            for (name, offset) in handle.slots()? {
                declared.push(BridgeSignal {
                    name,
                    width: handle.width(),
                    offset,
                });
            }
        }
        self.bridge.declare(declared)
    }

    /// Publishes the current values and waits for the viewer.
    pub fn publish_step(&mut self) -> Result<StepOutcome> {
        let core = self.core.borrow();
        let model = core
            .model
            .as_deref()
            .ok_or_else(|| SimError::state("simulator is closed"))?;
        self.bridge.publish_step(self.time, model.state())
    }

    pub fn stop_bridge(&mut self) -> Result<()> {
        self.bridge.stop()
    }

    pub fn bridge_state(&self) -> BridgeState {
        self.bridge.state()
    }

    /// Stops tracing and the bridge, runs final blocks and releases the
    /// model. Handles fail from here on. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut result = Ok(());
        if self.trace.is_open() {
            result = self.trace.stop().map(drop);
        }
        if self.bridge.state() == BridgeState::Running {
            let stopped = self.bridge.stop();
            result = result.and(stopped);
        }
        if let Some(mut model) = self.core.borrow_mut().model.take() {
            model.final_eval();
            log::debug!("closed model `{}` at time {}", model.name(), self.time);
        }
        self.handles.borrow_mut().clear();
        result
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("error while closing simulator: {e}");
        }
    }
}

/// Either a signal or a nested scope, as returned by attribute lookup.
pub enum Entry<'a> {
    Signal(SignalHandle),
    Scope(Namespace<'a>),
}

impl<'a> Entry<'a> {
    pub fn into_signal(self) -> Result<SignalHandle> {
        match self {
            Entry::Signal(handle) => Ok(handle),
            Entry::Scope(scope) => Err(SimError::name(scope.path())),
        }
    }

    pub fn into_scope(self) -> Result<Namespace<'a>> {
        match self {
            Entry::Scope(scope) => Ok(scope),
            Entry::Signal(handle) => Err(SimError::name(handle.path())),
        }
    }
}

/// A view onto one scope of the IO or internals tree.
#[derive(Clone)]
pub struct Namespace<'a> {
    sim: &'a Simulator,
    kind: NamespaceKind,
    scope: &'a Scope,
    prefix: Vec<String>,
}

impl<'a> Namespace<'a> {
    fn root(sim: &'a Simulator, kind: NamespaceKind) -> Self {
        Self {
            sim,
            kind,
            scope: sim.directory.root(kind),
            prefix: Vec::new(),
        }
    }

    pub fn kind(&self) -> NamespaceKind {
        self.kind
    }

    /// Dotted path of this scope below the namespace root.
    pub fn path(&self) -> String {
        self.prefix.join(".")
    }

    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.path())
        }
    }

    fn entry(&self, node: &'a Node) -> Entry<'a> {
        match node {
            Node::Signal(id) => Entry::Signal(self.sim.handle(*id)),
            Node::Scope(scope) => {
                let mut prefix = self.prefix.clone();
                prefix.push(scope.name().to_string());
                Entry::Scope(Namespace {
                    sim: self.sim,
                    kind: self.kind,
                    scope,
                    prefix,
                })
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<Entry<'a>> {
        let node = self.sim.directory.resolve(self.kind, self.scope, name)?;
        Some(self.entry(node))
    }

    /// Looks up a signal by raw or logical name. A trailing `[i]...` selects
    /// one element of an array signal.
    pub fn get(&self, name: &str) -> Result<SignalHandle> {
        if let Some(entry) = self.lookup(name) {
            return entry.into_signal();
        }
        if let Some((base, index)) = split_index(name) {
            if let Some(entry) = self.lookup(base) {
                return entry.into_signal()?.element(&index);
            }
        }
        Err(SimError::name(self.full_name(name)))
    }

    /// Looks up a child by its accessor spelling, e.g. `in_` for `in`.
    pub fn attr(&self, attr: &str) -> Result<Entry<'a>> {
        let node = self
            .scope
            .attr(attr)
            .ok_or_else(|| SimError::name(self.full_name(attr)))?;
        Ok(self.entry(node))
    }

    /// A nested scope by logical name or accessor spelling.
    pub fn scope(&self, name: &str) -> Result<Namespace<'a>> {
        match self.lookup(name) {
            Some(entry) => entry.into_scope(),
            None => self.attr(name)?.into_scope(),
        }
    }

    /// Logical names of the direct children.
    pub fn names(&self) -> Vec<&'a str> {
        self.scope.children().map(|(name, _)| name).collect()
    }

    /// Every signal at or below this scope, in tree order.
    pub fn signals(&self) -> Vec<SignalHandle> {
        let mut out = Vec::new();
        self.collect(self.scope, &mut out);
        out
    }

    fn collect(&self, scope: &'a Scope, out: &mut Vec<SignalHandle>) {
        for (_, node) in scope.children() {
            match node {
                Node::Signal(id) => out.push(self.sim.handle(*id)),
                Node::Scope(child) => self.collect(child, out),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.scope.children().count()
    }

    pub fn is_empty(&self) -> bool {
        self.scope.is_empty()
    }
}

/// Splits `mem[3][1]` into `mem` and `[3, 1]`.
fn split_index(name: &str) -> Option<(&str, Vec<u32>)> {
    let mut base = name;
    let mut index = Vec::new();
    while let Some(inner) = base.strip_suffix(']') {
        let open = inner.rfind('[')?;
        index.push(inner[open + 1..].trim().parse().ok()?);
        base = &inner[..open];
    }
    if index.is_empty() || base.is_empty() {
        return None;
    }
    index.reverse();
    Some((base, index))
}
