//! Process control seam
//!
//! The artwork switcher drives viewers through this trait rather than the
//! concrete supervisor, so hand-off logic can be exercised without spawning
//! real processes.

use super::types::ProcessError;

/// Lifecycle control over viewer processes
pub trait ProcessControl: Send {
    /// Start a tracked process and return its pid
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty or cannot be spawned.
    fn start(&mut self, command: &str) -> Result<u32, ProcessError>;

    /// Terminate the process group rooted at `pid` and forget it
    ///
    /// Never fails: signalling errors are logged by the implementation.
    fn kill(&mut self, pid: u32);

    /// The process considered in front, if any
    fn current(&self) -> Option<u32>;

    /// Kill the current process, if any
    fn kill_current(&mut self) {
        if let Some(pid) = self.current() {
            self.kill(pid);
        }
    }

    /// Run a shell command without tracking it
    ///
    /// # Errors
    ///
    /// Returns an error if the shell cannot be spawned.
    fn exec_detached(&mut self, command: &str) -> Result<(), ProcessError>;
}
