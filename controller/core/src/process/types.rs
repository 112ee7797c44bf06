//! Process types shared by the supervisor and its callers

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A viewer process the supervisor has started and not yet killed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessRecord {
    /// OS process id (also the process group id)
    pub pid: u32,
    /// The command line it was started with
    pub command: String,
    /// When the process was spawned
    pub started_at: DateTime<Utc>,
}

impl ProcessRecord {
    /// Create a record stamped with the current time
    pub fn new(pid: u32, command: impl Into<String>) -> Self {
        Self {
            pid,
            command: command.into(),
            started_at: Utc::now(),
        }
    }
}

/// Events observed on supervised processes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Process has started
    Started {
        /// OS process id
        pid: u32,
        /// Command line
        command: String,
    },
    /// Process produced a line of output
    Output {
        /// OS process id
        pid: u32,
        /// The line, without its terminator
        line: String,
        /// Whether it came from stderr
        is_stderr: bool,
    },
    /// Process has exited
    Exited {
        /// OS process id
        pid: u32,
        /// Exit code; `None` when terminated by a signal
        exit_code: Option<i32>,
    },
}

/// Errors starting a process
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command string had no executable
    #[error("empty command")]
    EmptyCommand,

    /// The OS refused to start the process
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// The command that was attempted
        command: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The child exited before its pid could be read
    #[error("`{command}` exited before it could be tracked")]
    NoPid {
        /// The command that was attempted
        command: String,
    },
}

/// Split a command string into executable and arguments
///
/// Splitting is on whitespace only. Quoting and escaping are not supported, so
/// an argument containing a space cannot be expressed.
///
/// # Errors
///
/// Returns [`ProcessError::EmptyCommand`] for a blank command.
pub fn parse_command(command: &str) -> Result<(&str, Vec<&str>), ProcessError> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or(ProcessError::EmptyCommand)?;
    Ok((program, parts.collect()))
}
