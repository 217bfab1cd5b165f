//! Install-or-upgrade tests against an in-memory cluster and history store

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use keel_core::{ChartBundle, ChartMetadata, ResourceDocument, Values};
use keel_kube::{
    AppliedResource, BufferNotifier, ClusterClient, HistoryStore, InstallOptions, KubeError,
    MemoryStore, Readiness, ReconcileOutcome, Reconciler, ReleaseRequest, ReleaseState,
    ResourceRef, Result, StoredRelease,
};
use semver::Version;
use tokio_util::sync::CancellationToken;

const CONFIGMAP: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ release.name }}-config
data:
  greeting: {{ values.greeting | quote }}
"#;

const DEPLOYMENT: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ release.name }}
spec:
  replicas: {{ values.replicas }}
"#;

const SERVICE: &str = r#"apiVersion: v1
kind: Service
metadata:
  name: {{ release.name }}
spec:
  ports:
    - port: 80
"#;

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    objects: BTreeSet<ResourceRef>,
    applied: Vec<ResourceRef>,
    deleted: Vec<ResourceRef>,
    apply_calls: usize,
}

/// Cluster double that can cancel, fail or hang on a chosen apply
#[derive(Clone, Default)]
struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
    cancel_on_apply: Option<(usize, CancellationToken)>,
    fail_on_apply: Option<usize>,
    hang_on_apply: Option<usize>,
}

impl FakeCluster {
    fn objects(&self) -> BTreeSet<ResourceRef> {
        self.state.lock().unwrap().objects.clone()
    }

    fn applied(&self) -> Vec<ResourceRef> {
        self.state.lock().unwrap().applied.clone()
    }

    fn deleted(&self) -> Vec<ResourceRef> {
        self.state.lock().unwrap().deleted.clone()
    }

    fn namespaces(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().namespaces.clone()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(namespace.to_string());
        Ok(())
    }

    async fn apply(&self, doc: &ResourceDocument, namespace: &str) -> Result<AppliedResource> {
        let resource = ResourceRef::from_document(doc, namespace);
        let (call, created) = {
            let mut state = self.state.lock().unwrap();
            state.apply_calls += 1;
            if self.fail_on_apply == Some(state.apply_calls) {
                return Err(KubeError::Apply {
                    resource: resource.to_string(),
                    message: "admission webhook denied the request".to_string(),
                });
            }
            let created = state.objects.insert(resource.clone());
            state.applied.push(resource.clone());
            (state.apply_calls, created)
        };

        if let Some((at, token)) = &self.cancel_on_apply {
            if *at == call {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }
        if self.hang_on_apply == Some(call) {
            std::future::pending::<()>().await;
        }

        Ok(AppliedResource { resource, created })
    }

    async fn readiness(&self, _resource: &ResourceRef) -> Result<Readiness> {
        Ok(Readiness::Ready)
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.objects.remove(resource);
        state.deleted.push(resource.clone());
        Ok(())
    }
}

/// History store that, like ConfigMaps, can only write into existing namespaces
#[derive(Clone)]
struct NamespacedStore {
    inner: MemoryStore,
    cluster: FakeCluster,
}

impl NamespacedStore {
    fn check(&self, namespace: &str) -> Result<()> {
        if self.cluster.namespaces().contains(namespace) {
            Ok(())
        } else {
            Err(KubeError::Storage(format!(
                "namespaces \"{}\" not found",
                namespace
            )))
        }
    }
}

#[async_trait]
impl HistoryStore for NamespacedStore {
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.inner.history(namespace, name).await
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        self.check(&release.namespace)?;
        self.inner.create(release).await
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        self.check(&release.namespace)?;
        self.inner.update(release).await
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        self.inner.delete(namespace, name, version).await
    }
}

fn bundle() -> ChartBundle {
    ChartBundle::new(ChartMetadata::new("web", Version::new(1, 0, 0)))
        .with_values(Values::from_yaml("greeting: hello\nreplicas: 1\n").unwrap())
        .with_template("configmap.yaml", CONFIGMAP)
        .with_template("deployment.yaml", DEPLOYMENT)
        .with_template("service.yaml", SERVICE)
}

fn reference(kind: &str, api_version: &str, name: &str) -> ResourceRef {
    ResourceRef {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: Some("apps".to_string()),
    }
}

fn reconciler(
    store: MemoryStore,
    cluster: FakeCluster,
    notifier: &BufferNotifier,
) -> Reconciler<MemoryStore, FakeCluster> {
    let options = InstallOptions {
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    };
    Reconciler::new(store, cluster)
        .with_options(options)
        .with_notifier(Arc::new(notifier.clone()))
}

mod install {
    use super::*;

    #[tokio::test]
    async fn test_installs_when_history_is_empty() {
        let store = MemoryStore::new();
        let cluster = FakeCluster::default();
        let notifier = BufferNotifier::new();
        let reconciler = reconciler(store.clone(), cluster.clone(), &notifier);

        let outcome = reconciler
            .install_or_upgrade(
                &bundle(),
                &ReleaseRequest::new("", "apps"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let release = match outcome {
            ReconcileOutcome::Installed(release) => release,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(release.name, "web");
        assert_eq!(release.version, 1);
        assert_eq!(release.state, ReleaseState::Deployed);

        assert_eq!(
            notifier.messages(),
            vec![r#"Release "web" does not exist. Installing it now."#.to_string()]
        );
        assert!(cluster.namespaces().contains("apps"));
        assert_eq!(cluster.objects().len(), 3);

        let applied: Vec<_> = cluster.applied().into_iter().map(|r| r.kind).collect();
        assert_eq!(applied, vec!["ConfigMap", "Service", "Deployment"]);

        let stored = store.latest("apps", "web").await.unwrap();
        assert_eq!(stored.state, ReleaseState::Deployed);
        assert_eq!(stored.resources().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_install_creates_namespace_before_storing_history() {
        let cluster = FakeCluster::default();
        let memory = MemoryStore::new();
        let store = NamespacedStore {
            inner: memory.clone(),
            cluster: cluster.clone(),
        };
        let options = InstallOptions {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let reconciler = Reconciler::new(store, cluster.clone())
            .with_options(options)
            .with_notifier(Arc::new(BufferNotifier::new()));

        let outcome = reconciler
            .install_or_upgrade(
                &bundle(),
                &ReleaseRequest::new("web", "fresh"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Installed(_)));
        assert!(cluster.namespaces().contains("fresh"));
        let stored = memory.latest("fresh", "web").await.unwrap();
        assert_eq!(stored.state, ReleaseState::Deployed);
    }

    #[tokio::test]
    async fn test_values_override_chart_defaults() {
        let store = MemoryStore::new();
        let notifier = BufferNotifier::new();
        let reconciler = reconciler(store.clone(), FakeCluster::default(), &notifier);

        let request = ReleaseRequest::new("web", "apps")
            .with_values(Values::from_yaml("replicas: 4\n").unwrap());
        reconciler
            .install_or_upgrade(&bundle(), &request, &CancellationToken::new())
            .await
            .unwrap();

        let stored = store.latest("apps", "web").await.unwrap();
        assert!(stored.manifest.contains("replicas: 4"));
        assert!(stored.manifest.contains(r#"greeting: "hello""#));
    }

    #[tokio::test]
    async fn test_existing_release_is_left_alone() {
        let existing = StoredRelease::for_install(
            "web",
            "apps",
            ChartMetadata::new("web", Version::new(0, 9, 0)),
            Values::new(),
            String::new(),
        );
        let store = MemoryStore::with_releases([existing]);
        let cluster = FakeCluster::default();
        let notifier = BufferNotifier::new();
        let reconciler = reconciler(store.clone(), cluster.clone(), &notifier);

        let outcome = reconciler
            .install_or_upgrade(
                &bundle(),
                &ReleaseRequest::new("web", "apps"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Unchanged(ref r) if r.version == 1));
        assert!(notifier.messages().is_empty());
        assert!(cluster.applied().is_empty());
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = MemoryStore::new();
        let cluster = FakeCluster::default();
        let reconciler = reconciler(store.clone(), cluster.clone(), &BufferNotifier::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = reconciler
            .install_or_upgrade(&bundle(), &ReleaseRequest::new("web", "apps"), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(cluster.applied().is_empty());
        assert!(store.all().await.is_empty());
    }
}

mod rollback {
    use super::*;

    #[tokio::test]
    async fn test_cancel_during_apply_rolls_back() {
        let cancel = CancellationToken::new();
        let cluster = FakeCluster {
            cancel_on_apply: Some((2, cancel.clone())),
            ..Default::default()
        };
        let store = MemoryStore::new();
        let reconciler = reconciler(store.clone(), cluster.clone(), &BufferNotifier::new());

        let err = reconciler
            .install_or_upgrade(&bundle(), &ReleaseRequest::new("web", "apps"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::Cancelled { ref name } if name == "web"));
        assert_eq!(err.to_string(), "Release of web has been cancelled.");

        assert_eq!(
            cluster.deleted(),
            vec![
                reference("Service", "v1", "web"),
                reference("ConfigMap", "v1", "web-config"),
            ]
        );
        assert!(cluster.objects().is_empty());
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_apply_rolls_back() {
        let cluster = FakeCluster {
            fail_on_apply: Some(3),
            ..Default::default()
        };
        let store = MemoryStore::new();
        let reconciler = reconciler(store.clone(), cluster.clone(), &BufferNotifier::new());

        let err = reconciler
            .install_or_upgrade(
                &bundle(),
                &ReleaseRequest::new("web", "apps"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            KubeError::Operation { operation, source, .. }
                if operation == "cannot install" && matches!(**source, KubeError::Apply { .. })
        ));
        assert_eq!(
            err.to_string(),
            "cannot install web: failed to apply apps/Deployment/web: \
             admission webhook denied the request"
        );
        assert!(cluster.objects().is_empty());
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_without_atomic_is_recorded() {
        let cluster = FakeCluster {
            fail_on_apply: Some(1),
            ..Default::default()
        };
        let store = MemoryStore::new();
        let reconciler = reconciler(store.clone(), cluster.clone(), &BufferNotifier::new())
            .with_options(InstallOptions::default().with_atomic(false));

        reconciler
            .install_or_upgrade(
                &bundle(),
                &ReleaseRequest::new("web", "apps"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        let stored = store.latest("apps", "web").await.unwrap();
        match stored.state {
            ReleaseState::Failed { reason, .. } => {
                assert!(reason.contains("admission webhook denied"))
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_rolls_back() {
        let cluster = FakeCluster {
            hang_on_apply: Some(1),
            ..Default::default()
        };
        let store = MemoryStore::new();
        let reconciler = reconciler(store.clone(), cluster.clone(), &BufferNotifier::new())
            .with_options(InstallOptions::default().with_timeout(Duration::from_millis(50)));

        let err = reconciler
            .install_or_upgrade(
                &bundle(),
                &ReleaseRequest::new("web", "apps"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "cannot install web: release 'web' timed out after 50ms"
        );
        assert!(cluster.objects().is_empty());
        assert!(store.all().await.is_empty());
    }
}

mod upgrade {
    use super::*;

    #[tokio::test]
    async fn test_upgrade_prunes_dropped_resources() {
        let store = MemoryStore::new();
        let cluster = FakeCluster::default();
        let notifier = BufferNotifier::new();
        let reconciler = reconciler(store.clone(), cluster.clone(), &notifier).with_options(
            InstallOptions {
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            }
            .with_upgrade(),
        );
        let request = ReleaseRequest::new("web", "apps");
        let cancel = CancellationToken::new();

        reconciler
            .install_or_upgrade(&bundle(), &request, &cancel)
            .await
            .unwrap();

        let smaller = ChartBundle::new(ChartMetadata::new("web", Version::new(1, 1, 0)))
            .with_values(Values::from_yaml("greeting: hi\nreplicas: 2\n").unwrap())
            .with_template("configmap.yaml", CONFIGMAP)
            .with_template("deployment.yaml", DEPLOYMENT);

        let outcome = reconciler
            .install_or_upgrade(&smaller, &request, &cancel)
            .await
            .unwrap();

        let release = match outcome {
            ReconcileOutcome::Upgraded(release) => release,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(release.version, 2);
        assert_eq!(release.chart.version, Version::new(1, 1, 0));

        assert_eq!(cluster.deleted(), vec![reference("Service", "v1", "web")]);
        assert_eq!(cluster.objects().len(), 2);
        assert_eq!(notifier.messages().len(), 1);

        let history = store.history("apps", "web").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 2);
        assert_eq!(history[0].state, ReleaseState::Deployed);
    }

    #[tokio::test]
    async fn test_api_version_change_keeps_the_object() {
        let store = MemoryStore::new();
        let cluster = FakeCluster::default();
        let reconciler = reconciler(store.clone(), cluster.clone(), &BufferNotifier::new())
            .with_options(InstallOptions::default().with_upgrade().with_wait(false));
        let request = ReleaseRequest::new("web", "apps");
        let cancel = CancellationToken::new();

        let chart = |api_version: &str| {
            ChartBundle::new(ChartMetadata::new("web", Version::new(1, 0, 0)))
                .with_values(Values::from_yaml("replicas: 1\n").unwrap())
                .with_template(
                    "deployment.yaml",
                    DEPLOYMENT.replace("apps/v1", api_version),
                )
        };

        reconciler
            .install_or_upgrade(&chart("extensions/v1beta1"), &request, &cancel)
            .await
            .unwrap();
        let outcome = reconciler
            .install_or_upgrade(&chart("apps/v1"), &request, &cancel)
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Upgraded(ref r) if r.version == 2));
        assert!(cluster.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upgrade_restores_previous_revision() {
        let store = MemoryStore::new();
        let cluster = FakeCluster {
            fail_on_apply: Some(5),
            ..Default::default()
        };
        let reconciler = reconciler(store.clone(), cluster.clone(), &BufferNotifier::new())
            .with_options(InstallOptions::default().with_upgrade());
        let request = ReleaseRequest::new("web", "apps");
        let cancel = CancellationToken::new();

        reconciler
            .install_or_upgrade(&bundle(), &request, &cancel)
            .await
            .unwrap();

        let err = reconciler
            .install_or_upgrade(&bundle(), &request, &cancel)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot upgrade web: failed to apply apps/Service/web: \
             admission webhook denied the request"
        );

        assert!(cluster.deleted().is_empty());
        assert_eq!(cluster.objects().len(), 3);

        let history = store.history("apps", "web").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].state, ReleaseState::Deployed);
    }
}
