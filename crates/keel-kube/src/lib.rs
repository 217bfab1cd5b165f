//! Keel cluster integration
//!
//! Drives the install-or-upgrade workflow for a chart bundle:
//!
//! - **History**: [`HistoryStore`] with in-memory and ConfigMap backends
//! - **Cluster**: [`ClusterClient`], implemented over Server-Side Apply
//! - **Reconciliation**: [`Reconciler`] decides between install, upgrade
//!   and no-op, applies under a [`CancellationToken`] and rolls back
//!   atomically
//! - **Import**: [`import_template`] renders a bundle client-side
//! - **Signals**: [`listen_for_shutdown`] turns SIGINT/SIGTERM into
//!   cancellation
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keel_core::{ChartBundle, ChartMetadata};
//! use keel_kube::{
//!     ConfigMapStore, ConsoleNotifier, KubeCluster, Reconciler, ReleaseRequest,
//!     listen_for_shutdown,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bundle = ChartBundle::new(ChartMetadata::new("web", semver::Version::new(1, 0, 0)));
//! let store = ConfigMapStore::try_default().await?;
//! let cluster = KubeCluster::try_default().await?;
//!
//! let cancel = listen_for_shutdown("web", Arc::new(ConsoleNotifier));
//! let outcome = Reconciler::new(store, cluster)
//!     .install_or_upgrade(&bundle, &ReleaseRequest::new("web", "default"), &cancel)
//!     .await?;
//! println!("revision {}", outcome.release().version);
//! # Ok(())
//! # }
//! ```
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod actions;
pub mod cancel;
pub mod cluster;
pub mod error;
pub mod health;
pub mod reconcile;
pub mod release;
pub mod resources;
pub mod storage;
pub mod template;

pub use actions::{DEFAULT_TIMEOUT, ExistingReleasePolicy, InstallOptions};
pub use cancel::{
    BufferNotifier, ConsoleNotifier, Notifier, cancel_on, cancellation_message,
    listen_for_shutdown,
};
pub use cluster::{AppliedResource, ClusterClient, FIELD_MANAGER, KubeCluster};
pub use error::{KubeError, Result};
pub use health::{Readiness, readiness};
pub use reconcile::{ReconcileOutcome, Reconciler, ReleaseRequest, Transition, manifest_of};
pub use release::{ReleaseState, StoredRelease, storage_key};
pub use resources::{ObjectKey, ResourceCategory, ResourceRef, sort_for_apply, sort_for_delete};
pub use storage::{ConfigMapStore, HistoryStore, MemoryStore};
pub use template::{ChartConfig, TemplateConfig, import_template};
