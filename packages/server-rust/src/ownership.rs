//! Cross-process ownership sync for provisioned tenant resources.
//!
//! When the filesystem bootstrapper creates a tenant storage root, other
//! processes (a control daemon, a container runtime) may need to learn about
//! it. That handoff lives behind [`OwnershipSync`]; its failures are logged
//! by the caller and never fail the apply.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use async_trait::async_trait;
use tracing::debug;

/// Hands a provisioned resource over to an external owner.
#[async_trait]
pub trait OwnershipSync: Send + Sync {
    /// Assigns `resource` to `owner`.
    async fn assign_ownership(&self, resource: &Path, owner: &str) -> anyhow::Result<()>;

    /// Links `resource` into `container`.
    async fn link_resource(&self, resource: &Path, container: &str) -> anyhow::Result<()>;
}

/// Does nothing. The default when no control binary is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOwnershipSync;

#[async_trait]
impl OwnershipSync for NoopOwnershipSync {
    async fn assign_ownership(&self, _resource: &Path, _owner: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn link_resource(&self, _resource: &Path, _container: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Invokes an external control binary:
/// `<program> assign <resource> <owner>` and `<program> link <resource> <container>`.
#[derive(Debug, Clone)]
pub struct CommandOwnershipSync {
    program: PathBuf,
}

impl CommandOwnershipSync {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, verb: &str, resource: &Path, arg: &str) -> anyhow::Result<()> {
        let output = tokio::process::Command::new(&self.program)
            .arg(verb)
            .arg(resource)
            .arg(arg)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        if !output.status.success() {
            bail!(
                "{} {verb} {} {arg} exited with {}: {}",
                self.program.display(),
                resource.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        debug!(program = %self.program.display(), verb, resource = %resource.display(), arg, "ownership sync ok");
        Ok(())
    }
}

#[async_trait]
impl OwnershipSync for CommandOwnershipSync {
    async fn assign_ownership(&self, resource: &Path, owner: &str) -> anyhow::Result<()> {
        self.run("assign", resource, owner).await
    }

    async fn link_resource(&self, resource: &Path, container: &str) -> anyhow::Result<()> {
        self.run("link", resource, container).await
    }
}
