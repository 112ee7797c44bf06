//! Plugin Sync
//!
//! After the device record is resolved, the plugins it lists are handed to an
//! external installer. The controller does not resolve dependencies or
//! sandbox anything; it runs an opaque command per plugin and reports whether
//! each one succeeded.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::device::PluginMap;
use crate::process::parse_command;

/// Installs the plugins a device record asks for
#[async_trait]
pub trait PluginSync: Send + Sync {
    /// Make sure every plugin in `plugins` is installed
    async fn sync(&self, plugins: &PluginMap) -> anyhow::Result<()>;
}

/// Does nothing; used when no installer is configured
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPluginSync;

#[async_trait]
impl PluginSync for NoopPluginSync {
    async fn sync(&self, plugins: &PluginMap) -> anyhow::Result<()> {
        debug!(count = plugins.len(), "Plugin sync disabled, skipping");
        Ok(())
    }
}

/// Runs an install command template for each plugin
///
/// `{name}` and `{version}` in the template are replaced per plugin, e.g.
/// `npm install --prefix /opt/frame/plugins {name}@{version}`.
#[derive(Clone, Debug)]
pub struct CommandPluginSync {
    template: String,
}

impl CommandPluginSync {
    /// Create from a command template
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The command for one plugin
    #[must_use]
    pub fn render(&self, name: &str, version: &str) -> String {
        self.template
            .replace("{name}", name)
            .replace("{version}", version)
    }

    async fn install(&self, name: &str, version: &str) -> anyhow::Result<()> {
        let command = self.render(name, version);
        let (program, args) = parse_command(&command)?;

        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("`{command}` exited with {}: {}", output.status, stderr.trim());
        }

        info!(plugin = %name, version = %version, "Plugin installed");
        Ok(())
    }
}

#[async_trait]
impl PluginSync for CommandPluginSync {
    async fn sync(&self, plugins: &PluginMap) -> anyhow::Result<()> {
        let mut failed = Vec::new();

        for (name, version) in plugins {
            if let Err(e) = self.install(name, version).await {
                warn!(plugin = %name, error = %e, "Plugin install failed");
                failed.push(name.as_str());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("failed to install plugins: {}", failed.join(", "))
        }
    }
}
