use num_bigint::BigUint;
use verisim::{Model, ModelSymbols, NameEncoding};

use crate::{EdgeDetector, Layout, Slot};

macro_rules! impl_model {
    ($ty:ty) => {
        impl Model for $ty {
            fn name(&self) -> &str {
                &self.symbols.name
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
                self.step();
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

fn concat(state: &[u32], slots: &[Slot]) -> BigUint {
    slots
        .iter()
        .fold(BigUint::default(), |acc, slot| (acc << slot.width) | slot.get(state))
}

fn concat_inputs(layout: &mut Layout) -> [Slot; 5] {
    [
        layout.input("input_a", 8),
        layout.input("input_b", 16),
        layout.input("input_c", 32),
        layout.input("input_d", 64),
        layout.input("input_e", 128),
    ]
}

/// `width_test`: five inputs concatenated onto one 248-bit output.
pub struct WidthConcat {
    symbols: ModelSymbols,
    state: Vec<u32>,
    inputs: [Slot; 5],
    output: Slot,
}

impl WidthConcat {
    pub fn new() -> Self {
        let mut layout = Layout::new("width_test");
        let inputs = concat_inputs(&mut layout);
        let output = layout.output("output_concat", 248);
        let (symbols, state) = layout.finish();
        Self {
            symbols,
            state,
            inputs,
            output,
        }
    }

    fn step(&mut self) {
        let value = concat(&self.state, &self.inputs);
        self.output.set(&mut self.state, &value);
    }
}

impl_model!(WidthConcat);

/// `internal_test`: the concatenation pipelined through two registers.
/// Names use Verilator's mangled spelling.
pub struct InternalConcat {
    symbols: ModelSymbols,
    state: Vec<u32>,
    clk: Slot,
    rst_n: Slot,
    inputs: [Slot; 5],
    output: Slot,
    stage_1: Slot,
    stage_2: Slot,
    edge: EdgeDetector,
}

impl InternalConcat {
    pub fn new() -> Self {
        let mut layout = Layout::new("internal_test").encoding(NameEncoding::Verilator);
        let clk = layout.input("clk", 1);
        let rst_n = layout.input("rst_n", 1);
        let inputs = concat_inputs(&mut layout);
        let output = layout.output("output_concat", 248);
        let stage_1 = layout.register("internal_test__DOT__internal_concat_1", 248);
        let stage_2 = layout.register("internal_test__DOT__internal_concat_2", 248);
        let (symbols, state) = layout.finish();
        Self {
            symbols,
            state,
            clk,
            rst_n,
            inputs,
            output,
            stage_1,
            stage_2,
            edge: EdgeDetector::default(),
        }
    }

    fn step(&mut self) {
        let state = &mut self.state;
        if self.edge.rising(self.clk.bit(state)) {
            if self.rst_n.bit(state) {
                let next = concat(state, &self.inputs);
                let previous = self.stage_1.get(state);
                self.stage_2.set(state, &previous);
                self.stage_1.set(state, &next);
            } else {
                self.stage_1.set_u64(state, 0);
                self.stage_2.set_u64(state, 0);
            }
        }
        let value = self.stage_2.get(state);
        self.output.set(state, &value);
    }
}

impl_model!(InternalConcat);

/// `reg_file`: a 32 entry, 8-bit register file with one write and one
/// read port.
pub struct RegFile {
    symbols: ModelSymbols,
    state: Vec<u32>,
    clk: Slot,
    wr_idx: Slot,
    wr_data: Slot,
    rd_idx: Slot,
    rd_data: Slot,
    arr: Slot,
    edge: EdgeDetector,
}

impl RegFile {
    pub const DEPTH: u32 = 32;

    pub fn new() -> Self {
        let mut layout = Layout::new("reg_file").encoding(NameEncoding::Verilator);
        let clk = layout.input("clk", 1);
        let wr_idx = layout.input("wr_idx", 5);
        let wr_data = layout.input("wr_data", 8);
        let rd_idx = layout.input("rd_idx", 5);
        let rd_data = layout.output("rd_data", 8);
        let arr = layout.memory("reg_file__DOT__arr", 8, Self::DEPTH);
        let (symbols, state) = layout.finish();
        Self {
            symbols,
            state,
            clk,
            wr_idx,
            wr_data,
            rd_idx,
            rd_data,
            arr,
            edge: EdgeDetector::default(),
        }
    }

    fn step(&mut self) {
        let state = &mut self.state;
        if self.edge.rising(self.clk.bit(state)) {
            let index = self.wr_idx.get_u64(state) as u32;
            let data = self.wr_data.get(state);
            self.arr.element(index).set(state, &data);
        }
        let index = self.rd_idx.get_u64(state) as u32;
        let data = self.arr.element(index).get(state);
        self.rd_data.set(state, &data);
    }
}

impl_model!(RegFile);

/// Identifiers of `variable_name_test`, as written in the design. A leading
/// backslash marks a Verilog escaped identifier.
pub const VARIABLE_NAMES: [&str; 15] = [
    "a", "_a", "__a", "___a", "a_", "a__", "a___", "a_a", "a__a", "a___a", "a__020a", "\\$^_^",
    "\\%20", "\\007", "\\.][.",
];

/// `variable_name_test`: every input wired straight to `<name>_out`.
pub struct VariableNames {
    symbols: ModelSymbols,
    state: Vec<u32>,
    wires: Vec<(Slot, Slot)>,
}

impl VariableNames {
    pub fn new() -> Self {
        let mut layout = Layout::new("variable_name_test");
        let mut wires = Vec::new();
        for name in VARIABLE_NAMES {
            // Escaped identifiers run up to the next whitespace.
            let (input, output) = if name.starts_with('\\') {
                (format!("{name} "), format!("{name}_out "))
            } else {
                (name.to_string(), format!("{name}_out"))
            };
            let input = layout.input(&input, 1);
            let output = layout.output(&output, 1);
            wires.push((input, output));
        }
        let (symbols, state) = layout.finish();
        Self {
            symbols,
            state,
            wires,
        }
    }

    fn step(&mut self) {
        for (input, output) in &self.wires {
            let value = input.get_u64(&self.state);
            output.set_u64(&mut self.state, value);
        }
    }
}

impl_model!(VariableNames);

struct Child {
    in_reg: Slot,
    out_reg: Slot,
}

impl Child {
    fn declare(layout: &mut Layout, instance: &str) -> Self {
        Child {
            in_reg: layout.register(&format!("parent_module.{instance}.in_reg"), 8),
            out_reg: layout.register(&format!("parent_module.{instance}.out_reg"), 8),
        }
    }
}

/// `parent_module`: two chained `child_module` instances between an input
/// and an output register.
pub struct Hierarchy {
    symbols: ModelSymbols,
    state: Vec<u32>,
    clk: Slot,
    rst: Slot,
    input: Slot,
    output: Slot,
    in_reg: Slot,
    out_reg: Slot,
    link: Slot,
    child_2_out: Slot,
    child_1: Child,
    child_2: Child,
    edge: EdgeDetector,
}

impl Hierarchy {
    pub fn new() -> Self {
        let mut layout = Layout::new("parent_module");
        let clk = layout.input("clk", 1);
        let rst = layout.input("rst", 1);
        let input = layout.input("in", 8);
        let output = layout.output("out", 8);
        let in_reg = layout.register("parent_module.in_reg", 8);
        let out_reg = layout.register("parent_module.out_reg", 8);
        let link = layout.state(
            "parent_module.child_1_to_child_2",
            8,
            verisim::StateType::Wire,
        );
        let child_2_out = layout.state("parent_module.child_2_out", 8, verisim::StateType::Wire);
        let child_1 = Child::declare(&mut layout, "child_1");
        let child_2 = Child::declare(&mut layout, "child_2");
        let (symbols, state) = layout.finish();
        Self {
            symbols,
            state,
            clk,
            rst,
            input,
            output,
            in_reg,
            out_reg,
            link,
            child_2_out,
            child_1,
            child_2,
            edge: EdgeDetector::default(),
        }
    }

    fn step(&mut self) {
        let state = &mut self.state;
        if self.edge.rising(self.clk.bit(state)) {
            let regs = [
                self.in_reg,
                self.out_reg,
                self.child_1.in_reg,
                self.child_1.out_reg,
                self.child_2.in_reg,
                self.child_2.out_reg,
            ];
            let next = if self.rst.bit(state) {
                [0; 6]
            } else {
                [
                    self.input.get_u64(state),
                    self.child_2.out_reg.get_u64(state),
                    self.in_reg.get_u64(state),
                    self.child_1.in_reg.get_u64(state) + 1,
                    self.child_1.out_reg.get_u64(state),
                    self.child_2.in_reg.get_u64(state) + 1,
                ]
            };
            for (slot, value) in regs.into_iter().zip(next) {
                slot.set_u64(state, value);
            }
        }
        let link = self.child_1.out_reg.get_u64(state);
        self.link.set_u64(state, link);
        let child_2_out = self.child_2.out_reg.get_u64(state);
        self.child_2_out.set_u64(state, child_2_out);
        let out = self.out_reg.get_u64(state);
        self.output.set_u64(state, out);
    }
}

impl_model!(Hierarchy);

/// `pipelined_mac`: multiply, then accumulate, one stage per cycle.
pub struct PipelinedMac {
    symbols: ModelSymbols,
    state: Vec<u32>,
    clk: Slot,
    rst_n: Slot,
    in_a: Slot,
    in_b: Slot,
    enable: Slot,
    clear: Slot,
    out: Slot,
    operand_a: Slot,
    operand_b: Slot,
    operands_valid: Slot,
    mul_result: Slot,
    mul_result_valid: Slot,
    accumulator: Slot,
    edge: EdgeDetector,
}

impl PipelinedMac {
    pub fn new() -> Self {
        let mut layout = Layout::new("pipelined_mac");
        let clk = layout.input("clk", 1);
        let rst_n = layout.input("rst_n", 1);
        let in_a = layout.input("in_a", 16);
        let in_b = layout.input("in_b", 16);
        let enable = layout.input("enable", 1);
        let clear = layout.input("clear", 1);
        let out = layout.output("out", 32);
        let operand_a = layout.register("pipelined_mac.operand_a", 16);
        let operand_b = layout.register("pipelined_mac.operand_b", 16);
        let operands_valid = layout.register("pipelined_mac.operands_valid", 1);
        let mul_result = layout.register("pipelined_mac.mul_result", 32);
        let mul_result_valid = layout.register("pipelined_mac.mul_result_valid", 1);
        let accumulator = layout.register("pipelined_mac.accumulator", 32);
        let (symbols, state) = layout.finish();
        Self {
            symbols,
            state,
            clk,
            rst_n,
            in_a,
            in_b,
            enable,
            clear,
            out,
            operand_a,
            operand_b,
            operands_valid,
            mul_result,
            mul_result_valid,
            accumulator,
            edge: EdgeDetector::default(),
        }
    }

    fn step(&mut self) {
        let state = &mut self.state;
        if self.edge.rising(self.clk.bit(state)) {
            let operands_valid = self.operands_valid.bit(state);
            let mul_result_valid = self.mul_result_valid.bit(state);
            let product = self.operand_a.get_u64(state) * self.operand_b.get_u64(state);
            let sum = self.accumulator.get_u64(state) + self.mul_result.get_u64(state);

            if !self.rst_n.bit(state) || self.clear.bit(state) {
                self.operands_valid.set_u64(state, 0);
                self.mul_result_valid.set_u64(state, 0);
                self.accumulator.set_u64(state, 0);
            } else {
                let enable = self.enable.bit(state);
                if enable {
                    let a = self.in_a.get_u64(state);
                    let b = self.in_b.get_u64(state);
                    self.operand_a.set_u64(state, a);
                    self.operand_b.set_u64(state, b);
                }
                self.operands_valid.set_u64(state, u64::from(enable));
                if operands_valid {
                    self.mul_result.set_u64(state, product);
                }
                self.mul_result_valid.set_u64(state, u64::from(operands_valid));
                if mul_result_valid {
                    self.accumulator.set_u64(state, sum);
                }
            }
        }
        let out = self.accumulator.get_u64(state);
        self.out.set_u64(state, out);
    }
}

impl_model!(PipelinedMac);

/// A counter next to a memory the model only exposes as one blob.
pub struct OpaqueMemory {
    symbols: ModelSymbols,
    state: Vec<u32>,
    clk: Slot,
    count: Slot,
    edge: EdgeDetector,
}

impl OpaqueMemory {
    pub fn new() -> Self {
        let mut layout = Layout::new("opaque_memory");
        let clk = layout.input("clk", 1);
        let count = layout.register("opaque_memory.count", 8);
        layout.aggregate("opaque_memory.mem", 8, 1024);
        let (symbols, state) = layout.finish();
        Self {
            symbols,
            state,
            clk,
            count,
            edge: EdgeDetector::default(),
        }
    }

    fn step(&mut self) {
        let state = &mut self.state;
        if self.edge.rising(self.clk.bit(state)) {
            let next = self.count.get_u64(state) + 1;
            self.count.set_u64(state, next);
        }
    }
}

impl_model!(OpaqueMemory);

/// A model built without a symbol table.
#[derive(Default)]
pub struct Unlisted {
    state: Vec<u32>,
}

impl Unlisted {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Model for Unlisted {
    fn name(&self) -> &str {
        "unlisted"
    }

    fn symbols(&self) -> Option<&ModelSymbols> {
        None
    }

    fn state(&self) -> &[u32] {
        &self.state
    }

    fn state_mut(&mut self) -> &mut [u32] {
        &mut self.state
    }

    fn eval(&mut self) {}
}
