//! Reconcile orchestrator
//!
//! One pass runs the stages LoadDesired → Workload → Service → Route and
//! stops at the first failure. Stages that already ran are not rolled back;
//! the next pass converges from wherever this one stopped. The orchestrator
//! keeps no state between passes.

use std::sync::Arc;

use kube::Resource;
use tracing::{debug, info, warn};

use super::cancel::Invocation;
use super::client::StateReader;
use super::decision::{decide, ManagedResource};
use super::executor::{ActionExecutor, ReconcileOutcome};
use crate::crd::{WebApp, WebAppStatus};
use crate::resources::{build_route, build_service, build_workload, ResourceKind};
use crate::Error;

/// Order in which managed kinds are converged
///
/// The workload goes first so that the optional kinds are only touched once
/// the object they front exists.
pub const STAGES: [ResourceKind; 3] = [
    ResourceKind::Workload,
    ResourceKind::Service,
    ResourceKind::Route,
];

/// Namespace-scoped identity of a WebApp
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Namespace of the WebApp
    pub namespace: String,
    /// Name of the WebApp
    pub name: String,
}

impl Identity {
    /// Create an identity
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Terminal state of a successful pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Every stage converged
    Done,
    /// The WebApp no longer exists; nothing to do
    NotFound,
}

/// Per-pass record of what happened to each managed kind
#[derive(Debug)]
pub struct ReconcileReport {
    /// The WebApp this pass acted on
    pub identity: Identity,
    /// Whether the WebApp was found
    pub found: bool,
    /// Outcome per stage, in [`STAGES`] order
    pub outcomes: Vec<(ResourceKind, ReconcileOutcome)>,
    /// The error that stopped the pass, if any
    pub error: Option<Error>,
}

impl ReconcileReport {
    fn new(identity: Identity) -> Self {
        Self {
            identity,
            found: false,
            outcomes: Vec::with_capacity(STAGES.len()),
            error: None,
        }
    }

    /// Outcome recorded for `kind`
    pub fn outcome(&self, kind: ResourceKind) -> Option<&ReconcileOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| outcome)
    }

    /// True if the dispatch layer should invoke reconciliation again
    pub fn requeue(&self) -> bool {
        self.error.as_ref().is_some_and(Error::is_retryable)
    }

    /// Convert into the caller-facing result
    pub fn into_result(self) -> Result<Completion, Error> {
        match self.error {
            Some(e) => Err(e),
            None if !self.found => Ok(Completion::NotFound),
            None => Ok(Completion::Done),
        }
    }

    fn record(&mut self, kind: ResourceKind, outcome: ReconcileOutcome) {
        self.outcomes.push((kind, outcome));
    }

    /// Mark every stage without an outcome as skipped and remember `error`
    fn abort(&mut self, error: Error) {
        for kind in STAGES {
            if self.outcome(kind).is_none() {
                self.record(kind, ReconcileOutcome::Skipped);
            }
        }
        self.error = Some(error);
    }
}

/// Sequences decision and execution for every managed kind
#[derive(Clone)]
pub struct Orchestrator {
    reader: Arc<dyn StateReader>,
    executor: ActionExecutor,
}

impl Orchestrator {
    /// Create an orchestrator reading through `reader` and writing through `executor`
    pub fn new(reader: Arc<dyn StateReader>, executor: ActionExecutor) -> Self {
        Self { reader, executor }
    }

    /// Run one reconciliation pass for `identity`
    pub async fn reconcile(&self, identity: &Identity, invocation: &Invocation) -> ReconcileReport {
        let mut report = ReconcileReport::new(identity.clone());

        let app = match invocation
            .run(self.reader.get_webapp(&identity.namespace, &identity.name))
            .await
        {
            Ok(Some(app)) => app,
            Ok(None) => {
                info!(webapp = %identity, "webapp no longer exists, nothing to reconcile");
                return report;
            }
            Err(e) => {
                warn!(webapp = %identity, error = %e, "failed to load webapp");
                report.abort(e);
                return report;
            }
        };
        report.found = true;

        if let Err(e) = app.spec.validate() {
            warn!(webapp = %identity, error = %e, "webapp validation failed");
            report.abort(e);
            self.finish(&app, identity, &mut report, invocation).await;
            return report;
        }

        for kind in STAGES {
            if let Err(e) = invocation.check() {
                report.abort(e);
                break;
            }
            match self.converge(kind, &app, identity, invocation).await {
                Ok(outcome) => {
                    if outcome.is_change() {
                        info!(kind = %kind, outcome = %outcome, "stage changed cluster state");
                    } else {
                        debug!(kind = %kind, outcome = %outcome, "stage finished");
                    }
                    report.record(kind, outcome);
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "stage failed, aborting pass");
                    report.record(kind, ReconcileOutcome::Failed(e.to_string()));
                    report.abort(e);
                    break;
                }
            }
        }

        self.finish(&app, identity, &mut report, invocation).await;
        report
    }

    /// Reflect the pass result in the WebApp status
    async fn finish(
        &self,
        app: &WebApp,
        identity: &Identity,
        report: &mut ReconcileReport,
        invocation: &Invocation,
    ) {
        let generation = app.meta().generation;
        let status = match &report.error {
            None => WebAppStatus::ready(generation),
            Some(Error::Cancelled(_)) => return,
            Some(e) => WebAppStatus::failed(generation, e.reason(), &e.to_string()),
        };

        if let Err(e) = self
            .executor
            .write_status(app, &identity.namespace, status, invocation)
            .await
        {
            match report.error {
                None => report.error = Some(e),
                Some(_) => warn!(error = %e, "failed to record failure in status"),
            }
        }
    }

    async fn converge(
        &self,
        kind: ResourceKind,
        app: &WebApp,
        identity: &Identity,
        invocation: &Invocation,
    ) -> Result<ReconcileOutcome, Error> {
        let (ns, name) = (identity.namespace.as_str(), identity.name.as_str());
        match kind {
            ResourceKind::Workload => {
                let observed = invocation.run(self.reader.get_workload(ns, name)).await?;
                self.converge_kind(app, build_workload(app), observed, invocation)
                    .await
            }
            ResourceKind::Service => {
                let observed = invocation.run(self.reader.get_service(ns, name)).await?;
                self.converge_kind(app, build_service(app), observed, invocation)
                    .await
            }
            ResourceKind::Route => {
                let observed = invocation.run(self.reader.get_route(ns, name)).await?;
                self.converge_kind(app, build_route(app), observed, invocation)
                    .await
            }
        }
    }

    async fn converge_kind<K: ManagedResource>(
        &self,
        app: &WebApp,
        target: K,
        observed: Option<K>,
        invocation: &Invocation,
    ) -> Result<ReconcileOutcome, Error> {
        let decision = decide(K::KIND.is_required(app), &target, observed.as_ref());
        debug!(kind = %K::KIND, ?decision, "decided");

        let version = observed
            .as_ref()
            .and_then(|o| o.meta().resource_version.clone());
        self.executor
            .apply(app, decision, target.into(), version.as_deref(), invocation)
            .await
    }
}
