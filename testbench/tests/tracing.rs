use camino::Utf8PathBuf;
use testbench::{CONCAT_INPUTS, CONCAT_OUTPUT, build, hex};
use verisim::SimError;

struct Dump {
    vars: Vec<String>,
    timestamps: Vec<u64>,
    values: usize,
}

fn read_dump(path: &Utf8PathBuf) -> anyhow::Result<Dump> {
    let text = std::fs::read_to_string(path)?;
    let (header, body) = text
        .split_once("$enddefinitions")
        .ok_or_else(|| anyhow::anyhow!("no $enddefinitions in {path}"))?;

    let vars = header
        .lines()
        .filter_map(|line| line.trim().strip_prefix("$var "))
        .filter_map(|decl| decl.split_whitespace().nth(3))
        .map(str::to_string)
        .collect();
    let mut timestamps = Vec::new();
    let mut values = 0;
    for line in body.lines().skip(1).map(str::trim).filter(|l| !l.is_empty()) {
        match line.strip_prefix('#') {
            Some(time) => timestamps.push(time.parse()?),
            None => values += 1,
        }
    }
    Ok(Dump {
        vars,
        timestamps,
        values,
    })
}

fn dump_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
}

#[test]
fn pipeline_is_recorded_once_per_eval() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = dump_path(&tmp, "internal_test.vcd");
    let mut sim = build("internal_test")?;
    let stage_1 = sim.internals().get("internal_concat_1")?;
    let stage_2 = sim.internals().get("internal_concat_2")?;
    let output = sim.io().get("output_concat")?;
    let expected = hex(CONCAT_OUTPUT);

    sim.start_trace(&path)?;
    assert!(sim.is_tracing());

    sim.write("rst_n", 0)?;
    sim.tick()?;
    sim.write("rst_n", 1)?;
    for (name, value) in CONCAT_INPUTS {
        sim.write(name, hex(value))?;
    }
    sim.eval()?;
    assert_eq!(stage_1.read_u64()?, 0);
    assert_eq!(stage_2.read_u64()?, 0);
    assert_eq!(output.read_u64()?, 0);

    sim.tick()?;
    assert_eq!(stage_1.read()?, expected);
    assert_eq!(stage_2.read_u64()?, 0);
    assert_eq!(output.read_u64()?, 0);

    sim.tick()?;
    assert_eq!(stage_1.read()?, expected);
    assert_eq!(stage_2.read()?, expected);
    assert_eq!(output.read()?, expected);

    sim.tick()?;
    assert_eq!(sim.stop_trace()?, path);
    assert!(!sim.is_tracing());

    let dump = read_dump(&path)?;
    let mut vars = dump.vars.clone();
    vars.sort();
    assert_eq!(
        vars,
        [
            "clk",
            "input_a",
            "input_b",
            "input_c",
            "input_d",
            "input_e",
            "internal_concat_1",
            "internal_concat_2",
            "output_concat",
            "rst_n",
        ]
    );
    assert_eq!(dump.timestamps, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(dump.values, 9 * vars.len());
    Ok(())
}

#[test]
fn session_lifecycle_is_enforced() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = dump_path(&tmp, "width_test.vcd");
    let mut sim = build("width_test")?;

    assert!(matches!(sim.stop_trace(), Err(SimError::State { .. })));
    sim.start_trace(&path)?;
    assert!(matches!(sim.start_trace(&path), Err(SimError::State { .. })));
    sim.eval()?;
    sim.stop_trace()?;
    assert!(matches!(sim.stop_trace(), Err(SimError::State { .. })));
    Ok(())
}

#[test]
fn restarting_opens_a_fresh_session() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let first = dump_path(&tmp, "first.vcd");
    let second = dump_path(&tmp, "second.vcd");
    let mut sim = build("width_test")?;

    sim.start_trace(&first)?;
    sim.eval()?;
    sim.stop_trace()?;

    sim.advance_time(10);
    sim.eval()?;

    sim.start_trace(&second)?;
    sim.eval()?;
    sim.advance_time(5);
    sim.eval()?;
    sim.stop_trace()?;

    let first = read_dump(&first)?;
    assert_eq!(first.timestamps, vec![0]);
    assert_eq!(first.values, 6);

    let second = read_dump(&second)?;
    assert_eq!(second.vars.len(), 6);
    assert_eq!(second.timestamps, vec![10, 15]);
    assert_eq!(second.values, 12);
    Ok(())
}

#[test]
fn close_finishes_an_open_trace() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = dump_path(&tmp, "closed.vcd");
    let mut sim = build("width_test")?;

    sim.start_trace(&path)?;
    sim.write("input_a", 0xaa)?;
    sim.eval()?;
    sim.close()?;

    let dump = read_dump(&path)?;
    assert_eq!(dump.timestamps, vec![0]);
    assert_eq!(dump.values, 6);
    assert!(matches!(sim.start_trace(&path), Err(SimError::State { .. })));
    Ok(())
}
