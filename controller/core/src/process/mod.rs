//! Viewer Process Management
//!
//! Starting, tracking and killing the external processes that render artwork.
//!
//! # Usage
//!
//! ```ignore
//! use controller_core::process::ProcessSupervisor;
//!
//! let mut supervisor = ProcessSupervisor::new();
//! let pid = supervisor.start("feh -F /var/cache/frame/art-1photo.png")?;
//! supervisor.kill(pid);
//! ```

mod supervisor;
mod traits;
mod types;

pub use supervisor::ProcessSupervisor;
pub use traits::ProcessControl;
pub use types::{parse_command, ProcessError, ProcessEvent, ProcessRecord};
