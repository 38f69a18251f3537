use camino::Utf8PathBuf;
use testbench::{
    Layout, ReferenceLoader, ReferenceToolchain, Slot, Unlisted, build, build_with, design,
};
use verisim::{
    Artifact, BuildError, BuildRequest, ClockEdge, Config, Model, ModelLoader, ModelSymbols,
    SimError, Simulator, Toolchain,
};

/// Fails every build with the given compiler output.
struct Rejecting(&'static str);

impl Toolchain for Rejecting {
    fn compile(&self, _request: &BuildRequest) -> Result<Artifact, BuildError> {
        Err(BuildError::Compile {
            diagnostics: self.0.to_string(),
        })
    }
}

#[test]
fn compiler_diagnostics_pass_through_verbatim() {
    let diagnostics = "%Error: width_test.v:3:5: syntax error, unexpected ';'\n\
                       %Error: Exiting due to 1 error(s)";
    let request = BuildRequest::new([design("width_test")]);
    let toolchain = Rejecting(diagnostics);
    let err = Simulator::build(&request, &toolchain, &ReferenceLoader, Config::default())
        .err()
        .unwrap();
    assert!(matches!(err, SimError::Build(BuildError::Compile { .. })));
    assert_eq!(err.to_string(), diagnostics);
}

#[test]
fn missing_sources_fail_the_build() {
    assert!(matches!(
        build("opaque_memory"),
        Err(SimError::Build(BuildError::MissingSource(_)))
    ));

    let empty = BuildRequest::new(Vec::<Utf8PathBuf>::new());
    let toolchain = ReferenceToolchain::default();
    assert!(matches!(
        Simulator::build(&empty, &toolchain, &ReferenceLoader, Config::default()),
        Err(SimError::Build(BuildError::NoSources))
    ));
}

#[test]
fn models_without_symbols_are_rejected() {
    let err = Simulator::new(Box::new(Unlisted::new()), Config::default())
        .err()
        .unwrap();
    assert!(matches!(err, SimError::Discovery { .. }));
    assert!(err.to_string().contains("unlisted"));

    let artifact = Artifact::in_dir(&Utf8PathBuf::from("/tmp/verisim/mystery"), "mystery");
    assert!(matches!(
        ReferenceLoader.load(&artifact),
        Err(SimError::Discovery { .. })
    ));
}

/// Declares more state than it actually allocates.
struct Short {
    symbols: ModelSymbols,
    state: Vec<u32>,
}

impl Model for Short {
    fn name(&self) -> &str {
        "short"
    }

    fn symbols(&self) -> Option<&ModelSymbols> {
        Some(&self.symbols)
    }

    fn state(&self) -> &[u32] {
        &self.state
    }

    fn state_mut(&mut self) -> &mut [u32] {
        &mut self.state
    }

    fn eval(&mut self) {}
}

#[test]
fn state_shorter_than_declared_is_rejected() {
    let mut layout = Layout::new("short");
    layout.input("a", 8);
    layout.register("short.wide", 96);
    let (symbols, mut state) = layout.finish();
    state.truncate(2);
    let err = Simulator::new(Box::new(Short { symbols, state }), Config::default())
        .err()
        .unwrap();
    assert!(matches!(err, SimError::Discovery { .. }));
}

/// Mirrors a signed input onto a signed output.
struct SignedRegs {
    symbols: ModelSymbols,
    state: Vec<u32>,
    input: Slot,
    output: Slot,
}

impl SignedRegs {
    fn new() -> Self {
        let mut layout = Layout::new("signed_regs");
        let input = layout.input("delta", 12);
        layout.signed();
        let output = layout.output("level", 12);
        layout.signed();
        let (symbols, state) = layout.finish();
        Self {
            symbols,
            state,
            input,
            output,
        }
    }
}

impl Model for SignedRegs {
    fn name(&self) -> &str {
        "signed_regs"
    }

    fn symbols(&self) -> Option<&ModelSymbols> {
        Some(&self.symbols)
    }

    fn state(&self) -> &[u32] {
        &self.state
    }

    fn state_mut(&mut self) -> &mut [u32] {
        &mut self.state
    }

    fn eval(&mut self) {
        let value = self.input.get(&self.state);
        self.output.set(&mut self.state, &value);
    }
}

#[test]
fn signed_ports_round_trip_negative_values() -> anyhow::Result<()> {
    let mut sim = Simulator::new(Box::new(SignedRegs::new()), Config::default())?;
    let delta = sim.signal("delta")?;
    let level = sim.signal("level")?;
    assert!(delta.is_signed());

    delta.write_signed(-5)?;
    sim.eval()?;
    assert_eq!(level.read_u64()?, 0xffb);
    assert_eq!(level.to_i64()?, -5);

    assert!(matches!(delta.write(-5), Err(SimError::Range { .. })));
    assert!(matches!(delta.write_signed(2048), Err(SimError::Range { .. })));
    Ok(())
}

#[test]
fn closed_simulators_refuse_access() -> anyhow::Result<()> {
    let mut sim = build("pipelined_mac")?;
    let out = sim.signal("out")?;
    sim.close()?;
    sim.close()?;

    assert!(sim.is_closed());
    assert!(matches!(out.read(), Err(SimError::State { .. })));
    assert!(matches!(out.write(1), Err(SimError::State { .. })));
    assert!(matches!(sim.eval(), Err(SimError::State { .. })));
    assert!(matches!(sim.tick(), Err(SimError::State { .. })));
    Ok(())
}

#[test]
fn dropping_the_simulator_invalidates_handles() -> anyhow::Result<()> {
    let out = {
        let sim = build("pipelined_mac")?;
        sim.signal("out")?
    };
    assert!(matches!(out.read_u64(), Err(SimError::State { .. })));
    assert!(out.to_string().starts_with("out = <invalid state"));
    Ok(())
}

#[test]
fn clock_edge_comes_from_configuration() -> anyhow::Result<()> {
    let mut rising = build("pipelined_mac")?;
    rising.tick()?;
    assert_eq!(rising.signal("clk")?.read_u64()?, 1);

    let config = Config::from_yaml("clock:\n  edge: falling\n")?;
    assert_eq!(config.clock.edge, ClockEdge::Falling);
    let mut falling = build_with("pipelined_mac", config)?;
    falling.write("rst_n", 1)?;
    falling.write("enable", 1)?;
    falling.write("in_a", 6)?;
    falling.write("in_b", 7)?;
    falling.tick()?;
    assert_eq!(falling.signal("clk")?.read_u64()?, 0);
    assert_eq!(falling.internals().get("operand_a")?.read_u64()?, 6);
    assert_eq!(falling.time(), 2);
    Ok(())
}

#[test]
fn unknown_clock_name_is_a_name_error() -> anyhow::Result<()> {
    let config = Config::from_yaml("clock:\n  name: sys_clk\n")?;
    let mut sim = build_with("pipelined_mac", config)?;
    assert!(matches!(sim.tick(), Err(SimError::Name { .. })));
    sim.tick_signal("clk")?;
    assert_eq!(sim.time(), 2);
    Ok(())
}
