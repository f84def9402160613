//! Action executor
//!
//! Applies one [`Decision`] to the cluster and reports a [`ReconcileOutcome`].
//! Creates carry a controller owner reference so managed objects are garbage
//! collected with their WebApp. Updates are partial patches limited to the
//! watched fields. Deletes of already-absent objects count as done.
//!
//! The executor attempts each write at most once and never retries.

use std::sync::Arc;

use tracing::{debug, info};

use super::cancel::Invocation;
use super::client::ResourceWriter;
use super::decision::{Decision, FieldDelta};
use crate::crd::{WebApp, WebAppStatus};
use crate::resources::{container_name, owner_reference, ManagedObject, ResourceKind};
use crate::Error;

/// Result of one reconciliation stage
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The object was created
    Created,
    /// The listed fields were patched
    Updated(FieldDelta),
    /// The object was deleted or was already gone
    Deleted,
    /// Observed state already matched
    Unchanged,
    /// The stage was not attempted
    Skipped,
    /// The stage failed with the given reason
    Failed(String),
}

impl ReconcileOutcome {
    /// True for [`ReconcileOutcome::Failed`]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// True if the stage changed cluster state
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Updated(_) | Self::Deleted)
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Updated(delta) => write!(f, "Updated{}", delta),
            Self::Deleted => write!(f, "Deleted"),
            Self::Unchanged => write!(f, "Unchanged"),
            Self::Skipped => write!(f, "Skipped"),
            Self::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

/// Strategic-merge patch carrying only the changed workload fields
///
/// The container is addressed by name so other containers in the pod are
/// left alone. The name the delta was computed against wins over
/// `container`, which is only used when the observed workload had none. `resource_version`, when known, makes the API server reject
/// the patch with a conflict if the object changed since it was read.
pub fn workload_patch(
    container: &str,
    delta: &FieldDelta,
    resource_version: Option<&str>,
) -> serde_json::Value {
    let mut spec = serde_json::Map::new();
    if let Some(replicas) = delta.replicas {
        spec.insert("replicas".to_string(), serde_json::json!(replicas));
    }
    if let Some(image) = &delta.image {
        let container = delta.container.as_deref().unwrap_or(container);
        spec.insert(
            "template".to_string(),
            serde_json::json!({
                "spec": {
                    "containers": [{ "name": container, "image": image }]
                }
            }),
        );
    }

    let mut patch = serde_json::json!({ "spec": spec });
    if let Some(rv) = resource_version {
        patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
    }
    patch
}

/// Applies decisions through a [`ResourceWriter`]
#[derive(Clone)]
pub struct ActionExecutor {
    writer: Arc<dyn ResourceWriter>,
}

impl ActionExecutor {
    /// Create an executor writing through `writer`
    pub fn new(writer: Arc<dyn ResourceWriter>) -> Self {
        Self { writer }
    }

    /// Apply `decision` for `target`, owned by `owner`
    ///
    /// `observed_version` is the resourceVersion of the observed object and
    /// guards partial updates against concurrent modification.
    pub async fn apply(
        &self,
        owner: &WebApp,
        decision: Decision,
        mut target: ManagedObject,
        observed_version: Option<&str>,
        invocation: &Invocation,
    ) -> Result<ReconcileOutcome, Error> {
        let kind = target.kind();
        let namespace = target.namespace().to_string();
        let name = target.name().to_string();

        match decision {
            Decision::NoOp => {
                debug!(kind = %kind, name = %name, "already converged");
                Ok(ReconcileOutcome::Unchanged)
            }
            Decision::Create => {
                target.set_controller_owner(owner_reference(owner, kind)?);
                invocation.run(self.writer.create(&target)).await?;
                info!(kind = %kind, name = %name, "created");
                Ok(ReconcileOutcome::Created)
            }
            Decision::Update(delta) => {
                let patch = match &target {
                    ManagedObject::Workload(_) => {
                        workload_patch(&container_name(owner), &delta, observed_version)
                    }
                    _ => {
                        return Err(Error::serialization(format!(
                            "{} has no watched fields to patch",
                            kind
                        )))
                    }
                };
                invocation
                    .run(self.writer.patch(kind, &namespace, &name, &patch))
                    .await?;
                info!(kind = %kind, name = %name, delta = %delta, "updated");
                Ok(ReconcileOutcome::Updated(delta))
            }
            Decision::Delete => self.delete(kind, &namespace, &name, invocation).await,
        }
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        invocation: &Invocation,
    ) -> Result<ReconcileOutcome, Error> {
        match invocation
            .run(self.writer.delete(kind, namespace, name))
            .await
        {
            Ok(()) => {
                info!(kind = %kind, name = %name, "deleted");
                Ok(ReconcileOutcome::Deleted)
            }
            Err(e) if e.is_not_found() => {
                debug!(kind = %kind, name = %name, "already absent");
                Ok(ReconcileOutcome::Deleted)
            }
            Err(e) => Err(e),
        }
    }

    /// Write `status` to the owner unless it would change nothing
    pub async fn write_status(
        &self,
        owner: &WebApp,
        namespace: &str,
        status: WebAppStatus,
        invocation: &Invocation,
    ) -> Result<(), Error> {
        let unchanged = owner
            .status
            .as_ref()
            .is_some_and(|current| current.is_equivalent(&status));
        if unchanged {
            debug!("status unchanged, skipping write");
            return Ok(());
        }

        let name = owner.metadata.name.as_deref().unwrap_or_default();
        invocation
            .run(self.writer.patch_status(namespace, name, &status))
            .await
    }
}
