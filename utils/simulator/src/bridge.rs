//! Live mirroring of signal values into an external waveform viewer.
//!
//! The viewer speaks a line protocol over its stdin and stdout:
//!
//! ```text
//! declare <width> <name>
//! set <time> <width>'h<hex> <name>
//! step <time>
//! quit
//! ```
//!
//! After each `step` the viewer answers `ready` to continue or `quit` to ask
//! the simulation to stop.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use verisim_tools::ViewerConfig;

use crate::codec::BitVector;
use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    NotStarted,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The viewer is ready for the next step.
    Continue,
    /// The viewer asked the simulation to stop.
    Quit,
}

/// A line channel to a running viewer.
pub trait Viewer {
    fn send(&mut self, line: &str) -> Result<()>;

    /// Waits at most `timeout` for the next line.
    fn recv(&mut self, timeout: Duration) -> Result<String>;

    /// Closes the channel and makes sure the viewer has exited.
    fn terminate(&mut self) -> Result<()>;
}

pub trait ViewerLauncher {
    fn launch(&self) -> Result<Box<dyn Viewer>>;
}

/// Spawns the viewer as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &ViewerConfig) -> Self {
        Self::new(config.command.clone(), config.args.iter().cloned())
    }
}

impl ViewerLauncher for ProcessLauncher {
    fn launch(&self) -> Result<Box<dyn Viewer>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| SimError::bridge(format!("failed to spawn `{}`: {e}", self.program)))?;

        let stdin = child.stdin.take();
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(SimError::bridge("viewer stdout is not piped"));
        };

        let (tx, lines) = mpsc::channel();
        let reader = thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        log::debug!("spawned viewer `{}` as pid {}", self.program, child.id());
        Ok(Box::new(ProcessViewer {
            child,
            stdin,
            lines,
            reader: Some(reader),
        }))
    }
}

struct ProcessViewer {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<io::Result<String>>,
    reader: Option<JoinHandle<()>>,
}

const EXIT_GRACE: Duration = Duration::from_secs(1);

impl ProcessViewer {
    #[cfg(unix)]
    fn request_exit(&mut self) {
        if let Ok(pid) = libc::pid_t::try_from(self.child.id()) {
            // SAFETY: `pid` names a child we spawned and have not reaped yet.
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        let _ = self.child.kill();
    }
}

impl Viewer for ProcessViewer {
    fn send(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SimError::bridge("viewer channel is closed"))?;
        log::trace!("viewer <- {line}");
        writeln!(stdin, "{line}")
            .and_then(|()| stdin.flush())
            .map_err(|e| SimError::bridge(format!("failed to write to viewer: {e}")))
    }

    fn recv(&mut self, timeout: Duration) -> Result<String> {
        match self.lines.recv_timeout(timeout) {
            Ok(Ok(line)) => {
                log::trace!("viewer -> {line}");
                Ok(line)
            }
            Ok(Err(e)) => Err(SimError::bridge(format!("failed to read from viewer: {e}"))),
            Err(RecvTimeoutError::Timeout) => Err(SimError::bridge(format!(
                "viewer did not answer within {timeout:?}"
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SimError::bridge("viewer closed its output"))
            }
        }
    }

    fn terminate(&mut self) -> Result<()> {
        self.stdin = None;
        if self.child.try_wait().map_err(lost_track)?.is_none() {
            self.request_exit();
            let deadline = Instant::now() + EXIT_GRACE;
            while self.child.try_wait().map_err(lost_track)?.is_none() {
                if Instant::now() >= deadline {
                    log::warn!("viewer ignored SIGTERM, killing pid {}", self.child.id());
                    self.child.kill().map_err(lost_track)?;
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
        let status = self.child.wait().map_err(lost_track)?;
        log::debug!("viewer exited with {status}");
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        Ok(())
    }
}

fn lost_track(e: io::Error) -> SimError {
    SimError::bridge(format!("lost track of viewer process: {e}"))
}

/// One storage slot mirrored to the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSignal {
    pub name: String,
    pub width: u32,
    pub offset: u32,
}

pub struct WaveformBridge {
    state: BridgeState,
    timeout: Duration,
    viewer: Option<Box<dyn Viewer>>,
    declared: Vec<BridgeSignal>,
}

impl WaveformBridge {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: BridgeState::NotStarted,
            timeout,
            viewer: None,
            declared: Vec::new(),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn declared(&self) -> &[BridgeSignal] {
        &self.declared
    }

    fn running_viewer(&mut self, op: &str) -> Result<&mut Box<dyn Viewer>> {
        match (self.state, self.viewer.as_mut()) {
            (BridgeState::Running, Some(viewer)) => Ok(viewer),
            (state, _) => Err(SimError::state(format!("cannot {op}: bridge is {state:?}"))),
        }
    }

    pub fn start(&mut self, launcher: &dyn ViewerLauncher) -> Result<()> {
        if self.state != BridgeState::NotStarted {
            return Err(SimError::state(format!(
                "cannot start: bridge is {:?}",
                self.state
            )));
        }
        self.viewer = Some(launcher.launch()?);
        self.state = BridgeState::Running;
        Ok(())
    }

    /// Sends declarations for signals not declared yet.
    pub fn declare(&mut self, signals: Vec<BridgeSignal>) -> Result<()> {
        let mut fresh: Vec<BridgeSignal> = Vec::new();
        for signal in signals {
            if !self.declared.contains(&signal) && !fresh.contains(&signal) {
                fresh.push(signal);
            }
        }
        let viewer = self.running_viewer("declare")?;
        for signal in &fresh {
            viewer.send(&format!("declare {} {}", signal.width, signal.name))?;
        }
        self.declared.extend(fresh);
        Ok(())
    }

    /// Sends one step worth of values and blocks for the viewer's answer.
    pub fn publish_step(&mut self, time: u64, state: &[u32]) -> Result<StepOutcome> {
        let timeout = self.timeout;
        let updates: Vec<String> = self
            .declared
            .iter()
            .map(|signal| {
                let words = state.get(signal.offset as usize..).unwrap_or_default();
                let bits = BitVector::from_words(words, signal.width);
                format!("set {time} {bits} {}", signal.name)
            })
            .collect();

        let viewer = self.running_viewer("publish a step")?;
        let outcome = exchange(viewer.as_mut(), time, &updates, timeout);
        if outcome.is_err() {
            self.abandon();
        }
        outcome
    }

    /// Shuts down a viewer whose replies can no longer be paired with steps.
    fn abandon(&mut self) {
        if let Some(mut viewer) = self.viewer.take() {
            if let Err(e) = viewer.terminate() {
                log::warn!("failed to shut down viewer: {e}");
            }
        }
        self.state = BridgeState::Stopped;
    }

    pub fn stop(&mut self) -> Result<()> {
        let viewer = self.running_viewer("stop")?;
        if let Err(e) = viewer.send("quit") {
            log::warn!("viewer did not take the quit command: {e}");
        }
        let result = viewer.terminate();
        self.viewer = None;
        self.state = BridgeState::Stopped;
        result
    }
}

fn exchange(
    viewer: &mut dyn Viewer,
    time: u64,
    updates: &[String],
    timeout: Duration,
) -> Result<StepOutcome> {
    for update in updates {
        viewer.send(update)?;
    }
    viewer.send(&format!("step {time}"))?;

    let reply = viewer.recv(timeout)?;
    match reply.trim() {
        "ready" => Ok(StepOutcome::Continue),
        "quit" => {
            log::info!("viewer requested quit at time {time}");
            Ok(StepOutcome::Quit)
        }
        other => Err(SimError::bridge(format!("unexpected viewer reply `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Script {
        sent: Vec<String>,
        replies: VecDeque<String>,
        terminated: bool,
    }

    struct ScriptedViewer(Rc<RefCell<Script>>);

    impl Viewer for ScriptedViewer {
        fn send(&mut self, line: &str) -> Result<()> {
            self.0.borrow_mut().sent.push(line.to_string());
            Ok(())
        }

        fn recv(&mut self, timeout: Duration) -> Result<String> {
            self.0
                .borrow_mut()
                .replies
                .pop_front()
                .ok_or_else(|| SimError::bridge(format!("no reply within {timeout:?}")))
        }

        fn terminate(&mut self) -> Result<()> {
            self.0.borrow_mut().terminated = true;
            Ok(())
        }
    }

    struct ScriptedLauncher(Rc<RefCell<Script>>);

    impl ViewerLauncher for ScriptedLauncher {
        fn launch(&self) -> Result<Box<dyn Viewer>> {
            Ok(Box::new(ScriptedViewer(self.0.clone())))
        }
    }

    fn scripted(replies: &[&str]) -> (Rc<RefCell<Script>>, ScriptedLauncher) {
        let script = Rc::new(RefCell::new(Script {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }));
        (script.clone(), ScriptedLauncher(script))
    }

    fn signal(name: &str, width: u32, offset: u32) -> BridgeSignal {
        BridgeSignal {
            name: name.to_string(),
            width,
            offset,
        }
    }

    #[test]
    fn steps_follow_the_line_protocol() {
        let (script, launcher) = scripted(&["ready", "quit"]);
        let mut bridge = WaveformBridge::new(Duration::from_millis(10));
        bridge.start(&launcher).unwrap();
        bridge
            .declare(vec![signal("clk", 1, 0), signal("data", 16, 1)])
            .unwrap();

        assert_eq!(bridge.publish_step(0, &[1, 0xbeef]).unwrap(), StepOutcome::Continue);
        assert_eq!(bridge.publish_step(1, &[0, 0x1]).unwrap(), StepOutcome::Quit);
        assert_eq!(bridge.state(), BridgeState::Running);
        bridge.stop().unwrap();

        let script = script.borrow();
        assert_eq!(
            script.sent,
            vec![
                "declare 1 clk",
                "declare 16 data",
                "set 0 1'h1 clk",
                "set 0 16'hbeef data",
                "step 0",
                "set 1 1'h0 clk",
                "set 1 16'h1 data",
                "step 1",
                "quit",
            ]
        );
        assert!(script.terminated);
    }

    #[test]
    fn declarations_are_sent_once() {
        let (script, launcher) = scripted(&[]);
        let mut bridge = WaveformBridge::new(Duration::from_millis(10));
        bridge.start(&launcher).unwrap();
        bridge.declare(vec![signal("a", 1, 0), signal("a", 1, 0)]).unwrap();
        bridge.declare(vec![signal("a", 1, 0)]).unwrap();
        assert_eq!(bridge.declared().len(), 1);
        assert_eq!(script.borrow().sent, vec!["declare 1 a"]);
    }

    #[test]
    fn reaping_failures_are_bridge_errors() {
        let err = lost_track(io::Error::other("no child processes"));
        assert!(matches!(err, SimError::Bridge { .. }));
        assert!(err.to_string().contains("lost track of viewer process"));
    }

    #[test]
    fn unknown_reply_stops_the_bridge() {
        let (script, launcher) = scripted(&["what", "ready"]);
        let mut bridge = WaveformBridge::new(Duration::from_millis(10));
        bridge.start(&launcher).unwrap();
        assert!(matches!(bridge.publish_step(0, &[]), Err(SimError::Bridge { .. })));
        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert!(script.borrow().terminated);
        assert!(matches!(bridge.publish_step(1, &[]), Err(SimError::State { .. })));
        assert_eq!(script.borrow().replies.len(), 1);
    }

    #[test]
    fn missing_reply_stops_the_bridge() {
        let (script, launcher) = scripted(&[]);
        let mut bridge = WaveformBridge::new(Duration::from_millis(10));
        bridge.start(&launcher).unwrap();
        assert!(matches!(bridge.publish_step(0, &[]), Err(SimError::Bridge { .. })));
        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert!(script.borrow().terminated);
        assert!(matches!(bridge.stop(), Err(SimError::State { .. })));
    }

    #[test]
    fn lifecycle_is_enforced() {
        let (_, launcher) = scripted(&[]);
        let mut bridge = WaveformBridge::new(Duration::from_millis(10));
        assert!(matches!(bridge.publish_step(0, &[]), Err(SimError::State { .. })));
        assert!(matches!(bridge.stop(), Err(SimError::State { .. })));

        bridge.start(&launcher).unwrap();
        assert!(matches!(bridge.start(&launcher), Err(SimError::State { .. })));
        bridge.stop().unwrap();
        assert_eq!(bridge.state(), BridgeState::Stopped);

        assert!(matches!(bridge.start(&launcher), Err(SimError::State { .. })));
        assert!(matches!(bridge.declare(Vec::new()), Err(SimError::State { .. })));
        assert!(matches!(bridge.publish_step(0, &[]), Err(SimError::State { .. })));
        assert!(matches!(bridge.stop(), Err(SimError::State { .. })));
    }

    #[test]
    fn unspawnable_viewer_is_a_bridge_error() {
        let launcher = ProcessLauncher::new("verisim-no-such-viewer", Vec::<String>::new());
        let mut bridge = WaveformBridge::new(Duration::from_millis(10));
        assert!(matches!(bridge.start(&launcher), Err(SimError::Bridge { .. })));
        assert_eq!(bridge.state(), BridgeState::NotStarted);
    }

    #[cfg(unix)]
    #[test]
    fn process_viewer_acknowledges_steps() {
        let script =
            r#"while read line; do case "$line" in step*) echo ready;; quit) exit 0;; esac; done"#;
        let launcher = ProcessLauncher::new("sh", ["-c", script]);
        let mut bridge = WaveformBridge::new(Duration::from_secs(5));
        bridge.start(&launcher).unwrap();
        bridge.declare(vec![signal("x", 4, 0)]).unwrap();
        for time in 0..3 {
            assert_eq!(
                bridge.publish_step(time, &[time as u32]).unwrap(),
                StepOutcome::Continue
            );
        }
        bridge.stop().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn silent_process_viewer_times_out() {
        let launcher = ProcessLauncher::new("sleep", ["5"]);
        let mut bridge = WaveformBridge::new(Duration::from_millis(50));
        bridge.start(&launcher).unwrap();
        let started = Instant::now();
        assert!(matches!(bridge.publish_step(0, &[]), Err(SimError::Bridge { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(bridge.state(), BridgeState::Stopped);
    }

    #[cfg(unix)]
    #[test]
    fn late_reply_is_not_taken_for_the_next_step() {
        let launcher =
            ProcessLauncher::new("sh", ["-c", "read l; sleep 0.4; echo ready; cat >/dev/null"]);
        let mut bridge = WaveformBridge::new(Duration::from_millis(100));
        bridge.start(&launcher).unwrap();
        assert!(matches!(bridge.publish_step(0, &[]), Err(SimError::Bridge { .. })));
        thread::sleep(Duration::from_millis(600));
        assert!(matches!(bridge.publish_step(1, &[]), Err(SimError::State { .. })));
    }
}
