//! WebApp controller
//!
//! Reconciles WebApp resources into a Deployment, an optional Service and an
//! optional Ingress. It follows the Kubernetes controller pattern: observe
//! current state, decide per managed kind, apply the minimal change.
//!
//! - [`decision`] picks create/update/delete/no-op per kind
//! - [`executor`] applies a decision to the cluster
//! - [`orchestrator`] sequences the kinds and reports the pass
//! - [`client`] abstracts cluster reads and writes

pub mod cancel;
pub mod client;
pub mod decision;
pub mod executor;
pub mod orchestrator;

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

pub use cancel::Invocation;
pub use client::{KubeClusterClient, ResourceWriter, StateReader};
pub use decision::{decide, Decision, FieldDelta, ManagedResource};
pub use executor::{ActionExecutor, ReconcileOutcome};
pub use orchestrator::{Completion, Identity, Orchestrator, ReconcileReport, STAGES};

use crate::config::ControllerConfig;
use crate::crd::WebApp;
use crate::Error;

/// Controller context shared across reconciliation calls
pub struct Context {
    /// Runs reconciliation passes
    pub orchestrator: Orchestrator,
    /// Controller configuration
    pub config: ControllerConfig,
    /// Cancelled on process shutdown; each pass runs on a child token
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a context backed by the Kubernetes API
    pub fn new(client: Client, config: ControllerConfig, shutdown: CancellationToken) -> Self {
        let cluster = Arc::new(KubeClusterClient::new(client, config.field_manager.clone()));
        Self::with_clients(cluster.clone(), cluster, config, shutdown)
    }

    /// Create a context over arbitrary reader and writer implementations
    pub fn with_clients(
        reader: Arc<dyn StateReader>,
        writer: Arc<dyn ResourceWriter>,
        config: ControllerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(reader, ActionExecutor::new(writer)),
            config,
            shutdown,
        }
    }
}

/// Reconcile a WebApp resource
///
/// The object handed over by the watch is only used for its identity; the
/// orchestrator re-reads the record so a deletion racing the trigger is seen.
///
/// # Returns
///
/// [`Action::await_change`] when converged or when the WebApp is gone, or an
/// [`Error`] that [`error_policy`] turns into a requeue.
#[instrument(skip(app, ctx), fields(webapp = %app.name_any(), namespace = ?app.namespace()))]
pub async fn reconcile(app: Arc<WebApp>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = app
        .namespace()
        .ok_or_else(|| Error::validation("WebApp has no namespace"))?;
    let identity = Identity::new(namespace, app.name_any());

    let invocation = Invocation::new(ctx.shutdown.child_token())
        .with_timeout(ctx.config.reconcile_timeout());
    let report = ctx.orchestrator.reconcile(&identity, &invocation).await;

    match report.into_result()? {
        Completion::Done => {
            info!("webapp converged");
            Ok(Action::await_change())
        }
        Completion::NotFound => Ok(Action::await_change()),
    }
}

/// Error policy for the WebApp controller
///
/// - Conflicts: short requeue so the next pass reads the fresh object
/// - Other retryable errors: fixed backoff
/// - Non-retryable errors: await a spec change
pub fn error_policy(app: Arc<WebApp>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        webapp = %app.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    match error.requeue_after(ctx.config.error_requeue(), ctx.config.conflict_requeue()) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use super::client::{MockResourceWriter, MockStateReader};
    use crate::crd::{WebAppSpec, DEFAULT_PORT};

    fn sample_app() -> WebApp {
        let mut app = WebApp::new(
            "shop",
            WebAppSpec {
                image: "app:v1".to_string(),
                replicas: 1,
                expose_service: false,
                expose_ingress: false,
                port: DEFAULT_PORT,
                host: None,
            },
        );
        app.metadata.namespace = Some("prod".to_string());
        app.metadata.uid = Some("uid-1".to_string());
        app
    }

    fn context(reader: MockStateReader, writer: MockResourceWriter) -> Arc<Context> {
        Arc::new(Context::with_clients(
            Arc::new(reader),
            Arc::new(writer),
            ControllerConfig::default(),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn converged_webapp_awaits_change() {
        let app = sample_app();
        let stored = app.clone();
        let mut reader = MockStateReader::new();
        reader
            .expect_get_webapp()
            .returning(move |_, _| Ok(Some(stored.clone())));
        reader.expect_get_workload().returning(|_, _| Ok(None));
        reader.expect_get_service().returning(|_, _| Ok(None));
        reader.expect_get_route().returning(|_, _| Ok(None));

        let mut writer = MockResourceWriter::new();
        writer.expect_create().times(1).returning(|_| Ok(()));
        writer.expect_patch_status().returning(|_, _, _| Ok(()));

        let action = reconcile(Arc::new(app), context(reader, writer))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn deleted_webapp_awaits_change() {
        let mut reader = MockStateReader::new();
        reader.expect_get_webapp().returning(|_, _| Ok(None));

        let action = reconcile(
            Arc::new(sample_app()),
            context(reader, MockResourceWriter::new()),
        )
        .await
        .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn cluster_scoped_object_is_rejected() {
        let mut app = sample_app();
        app.metadata.namespace = None;
        let result = reconcile(
            Arc::new(app),
            context(MockStateReader::new(), MockResourceWriter::new()),
        )
        .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    /// Story: the error policy maps the failure taxonomy onto requeue delays
    #[test]
    fn story_error_policy_requeue_delays() {
        let ctx = context(MockStateReader::new(), MockResourceWriter::new());
        let app = Arc::new(sample_app());

        let action = error_policy(
            app.clone(),
            &Error::conflict("Deployment", "shop", "modified"),
            ctx.clone(),
        );
        assert_eq!(action, Action::requeue(Duration::from_secs(1)));

        let action = error_policy(
            app.clone(),
            &Error::ownership("Service", "shop", "no uid"),
            ctx.clone(),
        );
        assert_eq!(action, Action::requeue(Duration::from_secs(30)));

        let action = error_policy(app, &Error::validation("empty image"), ctx);
        assert_eq!(action, Action::await_change());
    }
}
