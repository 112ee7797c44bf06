//! Process supervisor for viewer processes
//!
//! Starts viewers in their own process group, tracks them by pid, and kills
//! whole groups so that anything a viewer spawned goes down with it.
//!
//! All methods that spawn must be called from inside a tokio runtime: output
//! and exit watching run as background tasks.

use std::collections::{HashMap, VecDeque};
use std::os::unix::process::CommandExt;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::traits::ProcessControl;
use super::types::{parse_command, ProcessError, ProcessEvent, ProcessRecord};

/// Tracks running viewer processes
///
/// The map and the active sequence always hold the same pids. The head of the
/// sequence is the "current" process: the oldest one still tracked. Callers
/// that keep at most one viewer alive (the artwork switcher does) see the
/// newest viewer there as well.
pub struct ProcessSupervisor {
    /// Tracked processes by pid
    processes: HashMap<u32, ProcessRecord>,
    /// Pids in start order
    active: VecDeque<u32>,
    /// Signal sent to a process group on kill
    kill_signal: Signal,
    /// Optional channel for process events
    event_tx: Option<mpsc::UnboundedSender<ProcessEvent>>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    /// Create a supervisor that kills with `SIGTERM`
    #[must_use]
    pub fn new() -> Self {
        Self {
            processes: HashMap::new(),
            active: VecDeque::new(),
            kill_signal: Signal::SIGTERM,
            event_tx: None,
        }
    }

    /// Use a different termination signal
    #[must_use]
    pub fn with_kill_signal(mut self, signal: Signal) -> Self {
        self.kill_signal = signal;
        self
    }

    /// Forward process events to `tx`
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ProcessEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Start a viewer
    ///
    /// The child leads a new process group and is not killed when the
    /// supervisor is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty or the spawn fails.
    pub fn start(&mut self, command: &str) -> Result<u32, ProcessError> {
        let (program, args) = parse_command(command)?;

        let mut cmd = std::process::Command::new(program);
        cmd.args(&args).process_group(0);

        let child = Command::from(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| ProcessError::NoPid {
            command: command.to_string(),
        })?;

        self.watch(pid, child);
        self.processes.insert(pid, ProcessRecord::new(pid, command));
        self.active.push_back(pid);

        info!(pid = pid, command = %command, "Viewer process started");
        self.send(ProcessEvent::Started {
            pid,
            command: command.to_string(),
        });

        Ok(pid)
    }

    /// Kill the process group rooted at `pid`
    ///
    /// Unknown pids are ignored. A tracked pid is forgotten even if the signal
    /// could not be delivered.
    pub fn kill(&mut self, pid: u32) {
        let Some(record) = self.processes.remove(&pid) else {
            debug!(pid = pid, "Kill requested for untracked pid");
            return;
        };
        self.active.retain(|p| *p != pid);

        let Ok(raw) = i32::try_from(pid) else {
            warn!(pid = pid, "Pid out of range, cannot signal");
            return;
        };

        match killpg(Pid::from_raw(raw), self.kill_signal) {
            Ok(()) => {
                info!(
                    pid = pid,
                    signal = %self.kill_signal,
                    command = %record.command,
                    "Viewer process group signalled"
                );
            }
            Err(Errno::ESRCH) => {
                debug!(pid = pid, "Process group already gone");
            }
            Err(e) => {
                warn!(pid = pid, error = %e, "Failed to signal process group");
            }
        }
    }

    /// Kill the current process, if any
    pub fn kill_current(&mut self) {
        if let Some(pid) = self.current() {
            self.kill(pid);
        }
    }

    /// Kill every tracked process
    pub fn kill_all(&mut self) {
        let pids: Vec<u32> = self.active.iter().copied().collect();
        for pid in pids {
            self.kill(pid);
        }
    }

    /// The process considered in front: head of the active sequence
    #[must_use]
    pub fn current(&self) -> Option<u32> {
        self.active.front().copied()
    }

    /// Run `command` through `sh -c` without tracking it
    ///
    /// The shell gets its own process group. Its exit is logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the shell cannot be spawned.
    pub fn exec_detached(&mut self, command: &str) -> Result<(), ProcessError> {
        if command.trim().is_empty() {
            return Err(ProcessError::EmptyCommand);
        }

        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg(command).process_group(0);

        let mut child = Command::from(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let command = command.to_string();
        debug!(command = %command, "Dispatched detached command");
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    debug!(command = %command, status = %status, "Detached command finished");
                }
                Err(e) => {
                    warn!(command = %command, error = %e, "Failed to wait for detached command");
                }
            }
        });

        Ok(())
    }

    /// Number of tracked processes
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Record for a tracked pid
    #[must_use]
    pub fn get(&self, pid: u32) -> Option<&ProcessRecord> {
        self.processes.get(&pid)
    }

    /// Tracked records in start order
    pub fn records(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.active.iter().filter_map(|pid| self.processes.get(pid))
    }

    /// Spawn output readers and the exit watcher for a child
    fn watch(&self, pid: u32, mut child: Child) {
        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(pid, stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(pid, stderr, true);
        }

        // The watcher owns the child so it gets reaped once it exits.
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    info!(pid = pid, status = %status, "Viewer process exited");
                    if let Some(tx) = tx {
                        let _ = tx.send(ProcessEvent::Exited {
                            pid,
                            exit_code: status.code(),
                        });
                    }
                }
                Err(e) => warn!(pid = pid, error = %e, "Failed to wait for viewer process"),
            }
        });
    }

    fn spawn_reader<R>(&self, pid: u32, stream: R, is_stderr: bool)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut tx = self.event_tx.clone();
        tokio::spawn(async move {
            // Keep draining after the receiver goes away so the viewer never
            // blocks on a full pipe.
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(pid = pid, stderr = is_stderr, "{}", line);
                if let Some(ref sender) = tx {
                    let event = ProcessEvent::Output {
                        pid,
                        line,
                        is_stderr,
                    };
                    if sender.send(event).is_err() {
                        tx = None;
                    }
                }
            }
        });
    }

    fn send(&self, event: ProcessEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}

impl ProcessControl for ProcessSupervisor {
    fn start(&mut self, command: &str) -> Result<u32, ProcessError> {
        ProcessSupervisor::start(self, command)
    }

    fn kill(&mut self, pid: u32) {
        ProcessSupervisor::kill(self, pid);
    }

    fn current(&self) -> Option<u32> {
        ProcessSupervisor::current(self)
    }

    fn exec_detached(&mut self, command: &str) -> Result<(), ProcessError> {
        ProcessSupervisor::exec_detached(self, command)
    }
}
