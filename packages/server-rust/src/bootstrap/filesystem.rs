use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::{keys, ScopedSettings, SettingValue, Subsystem, TenantId};
use tracing::warn;

use super::{BootstrapContext, Bootstrapper, ScopedSlice};
use crate::config::FilesystemScopeConfig;
use crate::error::{ApplyError, ApplyFailure, RevertError};
use crate::ownership::OwnershipSync;

/// Scopes object storage to `{neutral_root}/{suffix_base}{tenant}`.
///
/// With `create_roots` set, a missing tenant root is created on apply and
/// handed to the [`OwnershipSync`] collaborator. Ownership failures are
/// logged; a failed `create_dir_all` fails the apply.
pub struct FilesystemBootstrapper {
    slice: ScopedSlice,
    suffix_base: String,
    create_roots: bool,
    root_owner: Option<String>,
    root_container: Option<String>,
    ownership: Arc<dyn OwnershipSync>,
}

impl FilesystemBootstrapper {
    pub const KEYS: &'static [&'static str] = &[keys::FILESYSTEM_ROOT];

    #[must_use]
    pub fn new(
        ctx: BootstrapContext,
        config: &FilesystemScopeConfig,
        ownership: Arc<dyn OwnershipSync>,
    ) -> Self {
        Self {
            slice: ScopedSlice::new(Subsystem::Filesystem, Self::KEYS, ctx),
            suffix_base: config.suffix_base.clone(),
            create_roots: config.create_roots,
            root_owner: config.root_owner.clone(),
            root_container: config.root_container.clone(),
            ownership,
        }
    }

    fn neutral_root(&self) -> Result<PathBuf, ApplyFailure> {
        match self.slice.neutral(keys::FILESYSTEM_ROOT) {
            Some(SettingValue::Path(p)) => Ok(p),
            Some(SettingValue::Text(s)) => Ok(PathBuf::from(s)),
            Some(other) => Err(ApplyFailure::InvalidScopedValue {
                key: keys::FILESYSTEM_ROOT,
                detail: format!("expected a path, found {other:?}"),
            }),
            None => Err(ApplyFailure::InvalidScopedValue {
                key: keys::FILESYSTEM_ROOT,
                detail: "no neutral value".to_string(),
            }),
        }
    }

    /// Creates `root` if missing. Returns `true` when it was created.
    async fn provision(&self, root: &Path) -> Result<bool, ApplyFailure> {
        if !self.create_roots || tokio::fs::try_exists(root).await? {
            return Ok(false);
        }
        tokio::fs::create_dir_all(root).await?;
        Ok(true)
    }

    async fn sync_ownership(&self, root: &Path) {
        if let Some(owner) = &self.root_owner {
            if let Err(e) = self.ownership.assign_ownership(root, owner).await {
                warn!(root = %root.display(), owner = %owner, error = %e, "ownership assignment failed");
            }
        }
        if let Some(container) = &self.root_container {
            if let Err(e) = self.ownership.link_resource(root, container).await {
                warn!(root = %root.display(), container = %container, error = %e, "resource link failed");
            }
        }
    }
}

impl std::fmt::Debug for FilesystemBootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemBootstrapper")
            .field("suffix_base", &self.suffix_base)
            .field("create_roots", &self.create_roots)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Bootstrapper for FilesystemBootstrapper {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Filesystem
    }

    fn owned_keys(&self) -> &'static [&'static str] {
        Self::KEYS
    }

    fn scope(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyFailure> {
        let root = self
            .neutral_root()?
            .join(format!("{}{}", self.suffix_base, tenant));
        Ok(ScopedSettings::new().with(keys::FILESYSTEM_ROOT, root))
    }

    async fn apply(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyError> {
        let settings = match self.scope(tenant) {
            Ok(settings) => settings,
            Err(failure) => return Err(self.slice.abort(tenant, failure).await),
        };
        self.slice.write(tenant, &settings);
        self.slice.invalidate().await;

        if let Some(root) = settings.get(keys::FILESYSTEM_ROOT).and_then(SettingValue::as_path) {
            let root = root.to_path_buf();
            match self.provision(&root).await {
                Ok(true) => self.sync_ownership(&root).await,
                Ok(false) => {}
                Err(failure) => return Err(self.slice.abort(tenant, failure).await),
            }
        }

        self.slice.applied(tenant, &settings);
        Ok(settings)
    }

    async fn revert(&self) -> Result<(), RevertError> {
        self.slice.revert().await
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::bootstrap::test_support::context;
    use crate::ownership::NoopOwnershipSync;

    #[derive(Default)]
    struct RecordingSync {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl OwnershipSync for RecordingSync {
        async fn assign_ownership(&self, resource: &Path, owner: &str) -> anyhow::Result<()> {
            self.calls
                .lock()
                .push(format!("assign {} {owner}", resource.display()));
            if self.fail {
                anyhow::bail!("control daemon unavailable");
            }
            Ok(())
        }

        async fn link_resource(&self, resource: &Path, container: &str) -> anyhow::Result<()> {
            self.calls
                .lock()
                .push(format!("link {} {container}", resource.display()));
            Ok(())
        }
    }

    fn acme() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    #[test]
    fn root_is_nested_under_neutral_root() {
        let fs = FilesystemBootstrapper::new(
            context(),
            &FilesystemScopeConfig::default(),
            Arc::new(NoopOwnershipSync),
        );
        let scoped = fs.scope(&acme()).unwrap();
        assert_eq!(
            scoped.get(keys::FILESYSTEM_ROOT),
            Some(&SettingValue::from(PathBuf::from("storage/tenantacme")))
        );
    }

    #[tokio::test]
    async fn apply_without_create_roots_touches_nothing_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context();
        ctx.store.set(keys::FILESYSTEM_ROOT, dir.path().to_path_buf().into());
        let store = ctx.store.clone();
        let fs = FilesystemBootstrapper::new(
            ctx,
            &FilesystemScopeConfig::default(),
            Arc::new(NoopOwnershipSync),
        );

        fs.apply(&acme()).await.unwrap();
        assert!(!dir.path().join("tenantacme").exists());
        assert_eq!(
            store.get(keys::FILESYSTEM_ROOT),
            Some(SettingValue::from(dir.path().join("tenantacme")))
        );

        fs.revert().await.unwrap();
        assert_eq!(
            store.get(keys::FILESYSTEM_ROOT),
            Some(SettingValue::from(dir.path().to_path_buf()))
        );
    }

    #[tokio::test]
    async fn create_roots_provisions_and_syncs_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context();
        ctx.store.set(keys::FILESYSTEM_ROOT, dir.path().to_path_buf().into());
        let sync = Arc::new(RecordingSync::default());
        let config = FilesystemScopeConfig {
            create_roots: true,
            root_owner: Some("www".to_string()),
            root_container: Some("web".to_string()),
            ..FilesystemScopeConfig::default()
        };
        let fs = FilesystemBootstrapper::new(ctx, &config, sync.clone());

        fs.apply(&acme()).await.unwrap();
        let root = dir.path().join("tenantacme");
        assert!(root.is_dir());
        assert_eq!(
            *sync.calls.lock(),
            vec![
                format!("assign {} www", root.display()),
                format!("link {} web", root.display()),
            ]
        );

        // Already exists: no second handoff.
        fs.revert().await.unwrap();
        fs.apply(&acme()).await.unwrap();
        assert_eq!(sync.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn ownership_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context();
        ctx.store.set(keys::FILESYSTEM_ROOT, dir.path().to_path_buf().into());
        let sync = Arc::new(RecordingSync {
            fail: true,
            ..RecordingSync::default()
        });
        let config = FilesystemScopeConfig {
            create_roots: true,
            root_owner: Some("www".to_string()),
            ..FilesystemScopeConfig::default()
        };
        let fs = FilesystemBootstrapper::new(ctx, &config, sync);
        assert!(fs.apply(&acme()).await.is_ok());
    }

    #[tokio::test]
    async fn failed_provisioning_reverts() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the neutral root should be a directory.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let ctx = context();
        ctx.store.set(keys::FILESYSTEM_ROOT, blocker.clone().into());
        let store = ctx.store.clone();
        let before = store.snapshot();
        let config = FilesystemScopeConfig {
            create_roots: true,
            ..FilesystemScopeConfig::default()
        };
        let fs = FilesystemBootstrapper::new(ctx, &config, Arc::new(NoopOwnershipSync));

        let err = fs.apply(&acme()).await.unwrap_err();
        assert_eq!(err.subsystem, Subsystem::Filesystem);
        assert!(matches!(err.reason, ApplyFailure::Provision(_)));
        assert_eq!(store.snapshot(), before);
    }
}
