//! Install-or-upgrade reconciliation
//!
//! ```text
//! Start -> HistoryLookup -> Install | Upgrade | NoOp -> Apply -> Succeeded | Failed
//! ```
//!
//! The history lookup decides the transition: no record means install, an
//! existing record is left alone unless the options ask for an upgrade.
//! The release namespace is created before the pending record is stored in it.
//! Apply runs one resource at a time under the cancellation token and the
//! deadline. With `atomic`, a failed or cancelled apply is rolled back and
//! its pending history record removed.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use keel_core::{ChartBundle, ResourceDocument, Values};
use keel_engine::{ChartRenderer, EngineError, RenderSettings, RenderedRelease};
use keel_repo::{DependencyResolver, RepoError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::actions::{ExistingReleasePolicy, InstallOptions};
use crate::cancel::{ConsoleNotifier, Notifier};
use crate::cluster::{AppliedResource, ClusterClient};
use crate::error::{KubeError, Result};
use crate::health::Readiness;
use crate::release::StoredRelease;
use crate::resources::{ObjectKey, ResourceRef, sort_for_apply, sort_for_delete};
use crate::storage::HistoryStore;

/// The release to reconcile
#[derive(Debug, Clone, Default)]
pub struct ReleaseRequest {
    /// Release name; the chart name when empty
    pub release_name: String,
    pub namespace: String,
    /// Overrides merged over the chart defaults
    pub values: Values,
}

impl ReleaseRequest {
    pub fn new(release_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            release_name: release_name.into(),
            namespace: namespace.into(),
            values: Values::new(),
        }
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }
}

/// Outcome of the history lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Install,
    Upgrade(StoredRelease),
    NoOp(StoredRelease),
}

/// What a reconciliation did
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Installed(StoredRelease),
    Upgraded(StoredRelease),
    Unchanged(StoredRelease),
}

impl ReconcileOutcome {
    pub fn release(&self) -> &StoredRelease {
        match self {
            Self::Installed(r) | Self::Upgraded(r) | Self::Unchanged(r) => r,
        }
    }
}

/// Drives a chart bundle to a deployed release
pub struct Reconciler<S, C> {
    store: S,
    cluster: C,
    renderer: ChartRenderer,
    resolver: Option<DependencyResolver>,
    notifier: Arc<dyn Notifier>,
    options: InstallOptions,
}

impl<S: HistoryStore, C: ClusterClient> Reconciler<S, C> {
    pub fn new(store: S, cluster: C) -> Self {
        Self {
            store,
            cluster,
            renderer: ChartRenderer::default(),
            resolver: None,
            notifier: Arc::new(ConsoleNotifier),
            options: InstallOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    /// Fetch missing chart dependencies before rendering
    pub fn with_resolver(mut self, resolver: DependencyResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_renderer(mut self, renderer: ChartRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn options(&self) -> &InstallOptions {
        &self.options
    }

    /// Look up the latest revision and pick the transition
    pub async fn decide(&self, name: &str, namespace: &str) -> Result<Transition> {
        match self.store.latest(namespace, name).await {
            Ok(previous) => Ok(match self.options.existing_release {
                ExistingReleasePolicy::NoOp => Transition::NoOp(previous),
                ExistingReleasePolicy::Upgrade => Transition::Upgrade(previous),
            }),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(Transition::Install),
            Err(e) => Err(e),
        }
    }

    /// Install the bundle if it has no history, otherwise apply the policy
    /// for existing releases
    pub async fn install_or_upgrade(
        &self,
        bundle: &ChartBundle,
        request: &ReleaseRequest,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let name = if request.release_name.is_empty() {
            bundle.name().to_string()
        } else {
            request.release_name.clone()
        };
        ensure_active(cancel, &name)?;

        let transition = self
            .decide(&name, &request.namespace)
            .await
            .map_err(|e| e.during("cannot read history of", &name))?;

        match transition {
            Transition::NoOp(existing) => {
                tracing::info!(
                    release = %name,
                    namespace = %request.namespace,
                    revision = existing.version,
                    status = %existing.state,
                    "release exists, leaving it unchanged"
                );
                Ok(ReconcileOutcome::Unchanged(existing))
            }
            Transition::Install => {
                self.notifier.notify(&format!(
                    "Release \"{}\" does not exist. Installing it now.",
                    name
                ));
                self.install(bundle, request, &name, cancel)
                    .await
                    .map_err(|e| e.during("cannot install", &name))
            }
            Transition::Upgrade(previous) => self
                .upgrade(bundle, request, previous, cancel)
                .await
                .map_err(|e| e.during("cannot upgrade", &name)),
        }
    }

    async fn install(
        &self,
        bundle: &ChartBundle,
        request: &ReleaseRequest,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let namespace = request.namespace.as_str();
        let (resources, rendered) = self.render(bundle, request, name, None, cancel).await?;

        // The history record lives in the release namespace
        let deadline = Instant::now() + self.options.timeout;
        self.prepare_namespace(namespace, name, deadline, cancel).await?;

        let mut record = StoredRelease::for_install(
            name,
            namespace,
            bundle.metadata.clone(),
            request.values.clone(),
            manifest_of(&resources),
        );
        record.notes = rendered.notes;
        self.store.create(&record).await?;

        tracing::info!(release = %name, namespace, resources = resources.len(), "installing");

        let mut attempted = Vec::new();
        match self
            .deploy(&resources, namespace, name, deadline, cancel, &mut attempted)
            .await
        {
            Ok(()) => {
                record.mark_deployed();
                self.store.update(&record).await?;
                tracing::info!(release = %name, namespace, "release deployed");
                Ok(ReconcileOutcome::Installed(record))
            }
            Err(e) => {
                if self.options.atomic {
                    tracing::warn!(release = %name, error = %e, "install failed, rolling back");
                    self.delete_all(attempted.iter().rev()).await;
                    if let Err(err) = self.store.delete(namespace, name, record.version).await {
                        tracing::warn!(release = %name, error = %err, "failed to remove history record");
                    }
                } else {
                    self.record_failure(&mut record, &e).await;
                }
                Err(e)
            }
        }
    }

    async fn upgrade(
        &self,
        bundle: &ChartBundle,
        request: &ReleaseRequest,
        mut previous: StoredRelease,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let name = previous.name.clone();
        let namespace = request.namespace.as_str();
        let (resources, rendered) = self
            .render(bundle, request, &name, Some(previous.version + 1), cancel)
            .await?;
        let previous_resources = previous.resources()?;

        let deadline = Instant::now() + self.options.timeout;
        self.prepare_namespace(namespace, &name, deadline, cancel).await?;

        let mut record = StoredRelease::for_upgrade(
            &previous,
            bundle.metadata.clone(),
            request.values.clone(),
            manifest_of(&resources),
        );
        record.notes = rendered.notes;
        self.store.create(&record).await?;

        tracing::info!(
            release = %name,
            namespace,
            revision = record.version,
            resources = resources.len(),
            "upgrading"
        );

        let mut attempted = Vec::new();
        let deployed = self
            .deploy(&resources, namespace, &name, deadline, cancel, &mut attempted)
            .await;

        if let Err(e) = deployed {
            if self.options.atomic {
                tracing::warn!(release = %name, error = %e, "upgrade failed, restoring previous revision");
                let kept: HashSet<ObjectKey> = refs_of(&previous_resources, namespace)
                    .map(|r| r.object_key())
                    .collect();
                self.delete_all(
                    attempted
                        .iter()
                        .rev()
                        .filter(|r| !kept.contains(&r.object_key())),
                )
                .await;
                for doc in &previous_resources {
                    if let Err(err) = self.cluster.apply(doc, namespace).await {
                        tracing::warn!(resource = %doc.display_name(), error = %err, "failed to restore");
                    }
                }
                if let Err(err) = self.store.delete(namespace, &name, record.version).await {
                    tracing::warn!(release = %name, error = %err, "failed to remove history record");
                }
            } else {
                self.record_failure(&mut record, &e).await;
            }
            return Err(e);
        }

        let current: HashSet<ObjectKey> = refs_of(&resources, namespace)
            .map(|r| r.object_key())
            .collect();
        let mut stale: Vec<ResourceRef> = refs_of(&previous_resources, namespace)
            .filter(|r| !current.contains(&r.object_key()))
            .collect();
        sort_for_delete(&mut stale);
        for resource in &stale {
            tracing::debug!(resource = %resource, "pruning");
            self.cluster.delete(resource).await?;
        }

        previous.mark_superseded();
        self.store.update(&previous).await?;
        record.mark_deployed();
        self.store.update(&record).await?;
        self.store
            .prune(namespace, &name, self.options.history_max.max(1))
            .await?;

        tracing::info!(release = %name, namespace, revision = record.version, "release upgraded");
        Ok(ReconcileOutcome::Upgraded(record))
    }

    /// Export, fetch dependencies and render client-side
    async fn render(
        &self,
        bundle: &ChartBundle,
        request: &ReleaseRequest,
        name: &str,
        revision: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ResourceDocument>, RenderedRelease)> {
        let workdir = bundle.export_temp()?;

        if let Some(resolver) = &self.resolver {
            resolver
                .ensure(workdir.path(), cancel)
                .await
                .map_err(|e| repo_error(e, name))?;
        }

        let mut settings = RenderSettings::new(workdir.path(), &request.namespace)
            .with_release_name(name)
            .with_values(request.values.clone())
            .with_cancel(cancel.clone())
            .with_crds(true)
            .with_additional_files(bundle.additional_manifests());
        if let Some(revision) = revision {
            settings = settings.with_upgrade_revision(revision);
        }

        let rendered = self
            .renderer
            .render(&settings)
            .map_err(|e| engine_error(e, name))?;
        let mut resources = rendered.resources().map_err(|e| engine_error(e, name))?;
        sort_for_apply(&mut resources);

        Ok((resources, rendered))
    }

    /// Create the release namespace when enabled, before anything is stored in it
    async fn prepare_namespace(
        &self,
        namespace: &str,
        name: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.options.create_namespace {
            self.guard(name, deadline, cancel, self.cluster.ensure_namespace(namespace))
                .await?;
        }
        Ok(())
    }

    /// Apply and readiness, under the deadline and token
    async fn deploy(
        &self,
        resources: &[ResourceDocument],
        namespace: &str,
        name: &str,
        deadline: Instant,
        cancel: &CancellationToken,
        attempted: &mut Vec<ResourceRef>,
    ) -> Result<()> {
        let mut applied = Vec::with_capacity(resources.len());
        for doc in resources {
            attempted.push(ResourceRef::from_document(doc, namespace));
            tracing::debug!(resource = %doc.display_name(), "applying");
            let result = self
                .guard(name, deadline, cancel, self.cluster.apply(doc, namespace))
                .await?;
            applied.push(result);
        }

        if self.options.wait {
            self.wait_ready(&applied, name, deadline, cancel).await?;
        }
        Ok(())
    }

    async fn wait_ready(
        &self,
        applied: &[AppliedResource],
        name: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut pending: Vec<&ResourceRef> = applied.iter().map(|a| &a.resource).collect();

        loop {
            let mut waiting = Vec::new();
            for resource in pending {
                match self
                    .guard(name, deadline, cancel, self.cluster.readiness(resource))
                    .await?
                {
                    Readiness::Ready => {}
                    Readiness::Pending(reason) => {
                        tracing::debug!(resource = %resource, %reason, "waiting");
                        waiting.push(resource);
                    }
                    Readiness::Failed(message) => {
                        return Err(KubeError::Apply {
                            resource: resource.to_string(),
                            message,
                        });
                    }
                }
            }

            if waiting.is_empty() {
                return Ok(());
            }
            pending = waiting;

            let interval = self.options.poll_interval;
            self.guard(name, deadline, cancel, async move {
                tokio::time::sleep(interval).await;
                Ok(())
            })
            .await?;
        }
    }

    /// Run a cluster call unless the token fires or the deadline passes first
    async fn guard<T>(
        &self,
        name: &str,
        deadline: Instant,
        cancel: &CancellationToken,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(KubeError::Cancelled { name: name.to_string() }),
            _ = tokio::time::sleep_until(deadline) => Err(KubeError::Timeout {
                release: name.to_string(),
                timeout: format!("{:?}", self.options.timeout),
            }),
            result = operation => result,
        }
    }

    /// Best-effort deletion used by rollback
    async fn delete_all<'a>(&self, resources: impl Iterator<Item = &'a ResourceRef>) {
        for resource in resources {
            if let Err(e) = self.cluster.delete(resource).await {
                tracing::warn!(resource = %resource, error = %e, "rollback delete failed");
            }
        }
    }

    async fn record_failure(&self, record: &mut StoredRelease, error: &KubeError) {
        record.mark_failed(error.to_string());
        if let Err(e) = self.store.update(record).await {
            tracing::warn!(release = %record.name, error = %e, "failed to record failure");
        }
    }
}

fn ensure_active(cancel: &CancellationToken, name: &str) -> Result<()> {
    if cancel.is_cancelled() {
        Err(KubeError::Cancelled {
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

fn engine_error(e: EngineError, name: &str) -> KubeError {
    match e {
        EngineError::Cancelled { .. } => KubeError::Cancelled {
            name: name.to_string(),
        },
        other => other.into(),
    }
}

fn repo_error(e: RepoError, name: &str) -> KubeError {
    match e {
        RepoError::Cancelled => KubeError::Cancelled {
            name: name.to_string(),
        },
        other => other.into(),
    }
}

fn refs_of<'a>(
    docs: &'a [ResourceDocument],
    namespace: &'a str,
) -> impl Iterator<Item = ResourceRef> + 'a {
    docs.iter().map(move |d| ResourceRef::from_document(d, namespace))
}

/// One `---` separated document per resource
pub fn manifest_of(resources: &[ResourceDocument]) -> String {
    resources
        .iter()
        .map(|r| format!("---\n{}", r.content))
        .collect()
}
