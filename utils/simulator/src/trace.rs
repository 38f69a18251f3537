//! Value change dump capture.
//!
//! A session declares every discovered signal up front and then appends one
//! snapshot of all of them per eval, in eval order.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use verisim_tools::{TimeUnit, TraceConfig};

use crate::codec::BitVector;
use crate::directory::{Node, Scope, SignalDirectory};
use crate::error::{Result, SimError};

fn timescale_unit(unit: TimeUnit) -> vcd::TimescaleUnit {
    match unit {
        TimeUnit::S => vcd::TimescaleUnit::S,
        TimeUnit::Ms => vcd::TimescaleUnit::MS,
        TimeUnit::Us => vcd::TimescaleUnit::US,
        TimeUnit::Ns => vcd::TimescaleUnit::NS,
        TimeUnit::Ps => vcd::TimescaleUnit::PS,
        TimeUnit::Fs => vcd::TimescaleUnit::FS,
    }
}

/// The trace file, shared so it can be flushed once the vcd writer is gone.
#[derive(Clone)]
struct Sink(Rc<RefCell<BufWriter<File>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.borrow_mut().flush()
    }
}

struct TracedSlot {
    id: vcd::IdCode,
    width: u32,
    offset: u32,
}

struct TraceSession {
    path: Utf8PathBuf,
    sink: Sink,
    writer: vcd::Writer<Sink>,
    slots: Vec<TracedSlot>,
    last_time: Option<u64>,
    records: u64,
}

impl TraceSession {
    fn open(
        path: &Utf8Path,
        config: &TraceConfig,
        directory: &SignalDirectory,
    ) -> io::Result<Self> {
        let file = File::create(path)?;
        let sink = Sink(Rc::new(RefCell::new(BufWriter::new(file))));
        let mut writer = vcd::Writer::new(sink.clone());
        writer.timescale(config.timescale, timescale_unit(config.unit))?;

        let mut slots = Vec::new();
        writer.add_module(&wire_name(directory.top()))?;
        declare_scope(&mut writer, directory, directory.io(), &mut slots)?;
        declare_scope(&mut writer, directory, directory.internals(), &mut slots)?;
        writer.upscope()?;
        writer.enddefinitions()?;

        Ok(Self {
            path: path.to_owned(),
            sink,
            writer,
            slots,
            last_time: None,
            records: 0,
        })
    }

    fn record(&mut self, time: u64, state: &[u32]) -> io::Result<()> {
        if self.last_time != Some(time) {
            self.writer.timestamp(time)?;
            self.last_time = Some(time);
        }
        for slot in &self.slots {
            let words = state.get(slot.offset as usize..).unwrap_or_default();
            let bits = BitVector::from_words(words, slot.width);
            if slot.width == 1 {
                self.writer.change_scalar(slot.id, bits.bit(0))?;
            } else {
                let values: Vec<vcd::Value> = bits.bits_msb_first().map(vcd::Value::from).collect();
                self.writer.change_vector(slot.id, &values)?;
            }
        }
        self.records += 1;
        Ok(())
    }

    fn finish(self) -> io::Result<Utf8PathBuf> {
        let Self {
            path, sink, writer, ..
        } = self;
        drop(writer);
        sink.0.borrow_mut().flush()?;
        Ok(path)
    }
}

fn declare_scope(
    writer: &mut vcd::Writer<Sink>,
    directory: &SignalDirectory,
    scope: &Scope,
    slots: &mut Vec<TracedSlot>,
) -> io::Result<()> {
    for (name, node) in scope.children() {
        match node {
            Node::Scope(child) => {
                writer.add_module(&wire_name(name))?;
                declare_scope(writer, directory, child, slots)?;
                writer.upscope()?;
            }
            Node::Signal(id) => {
                let info = directory.signal(*id);
                for (suffix, offset) in info.slots() {
                    let id = writer.add_wire(info.width, &format!("{}{suffix}", wire_name(name)))?;
                    slots.push(TracedSlot {
                        id,
                        width: info.width,
                        offset,
                    });
                }
            }
        }
    }
    Ok(())
}

/// VCD identifiers end at whitespace.
fn wire_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Owns at most one open trace session.
pub struct TraceController {
    config: TraceConfig,
    session: Option<TraceSession>,
}

impl TraceController {
    pub fn new(config: TraceConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn start(&mut self, path: &Utf8Path, directory: &SignalDirectory) -> Result<()> {
        if let Some(session) = &self.session {
            return Err(SimError::state(format!(
                "trace already open at {}",
                session.path
            )));
        }
        let session = TraceSession::open(path, &self.config, directory)?;
        log::info!(
            "tracing {} slots of `{}` to {path}",
            session.slots.len(),
            directory.top()
        );
        self.session = Some(session);
        Ok(())
    }

    /// Appends one snapshot if a session is open.
    pub fn record(&mut self, time: u64, state: &[u32]) -> Result<()> {
        if let Some(session) = &mut self.session {
            session.record(time, state)?;
        }
        Ok(())
    }

    /// Flushes and closes the session, returning the file it wrote.
    pub fn stop(&mut self) -> Result<Utf8PathBuf> {
        let session = self
            .session
            .take()
            .ok_or_else(|| SimError::state("no trace is open"))?;
        let records = session.records;
        let path = session.finish()?;
        log::info!("trace {path} closed after {records} records");
        Ok(path)
    }
}
