//! WebApp Custom Resource Definition
//!
//! A WebApp declares a container image and replica count, plus optional
//! exposure through a Service and an Ingress. The operator derives a
//! Deployment, Service and Ingress from it and keeps them converged.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ConditionStatus, WebAppPhase};

/// Default port the container listens on and the Service exposes
pub const DEFAULT_PORT: u16 = 8080;

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Specification for a WebApp
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "webapp.dev",
    version = "v1beta1",
    kind = "WebApp",
    plural = "webapps",
    shortname = "wa",
    status = "WebAppStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WebAppSpec {
    /// Container image reference
    pub image: String,

    /// Number of workload replicas
    #[serde(default)]
    pub replicas: u32,

    /// Expose the workload through a Service
    #[serde(default, alias = "enableService")]
    pub expose_service: bool,

    /// Expose the Service through an Ingress route
    #[serde(default, alias = "enableIngress")]
    pub expose_ingress: bool,

    /// Port the container listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host matched by the Ingress rule; all hosts when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl WebAppSpec {
    /// Validate the desired state before any resource is touched
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.image.trim().is_empty() {
            return Err(crate::Error::validation("image must not be empty"));
        }
        if i32::try_from(self.replicas).is_err() {
            return Err(crate::Error::validation(format!(
                "replicas {} exceeds the maximum of {}",
                self.replicas,
                i32::MAX
            )));
        }
        if self.port == 0 {
            return Err(crate::Error::validation("port must be between 1 and 65535"));
        }
        if let Some(host) = &self.host {
            if host.trim().is_empty() {
                return Err(crate::Error::validation("host must not be empty when set"));
            }
        }
        Ok(())
    }

    /// Replica count as the workload API expects it
    ///
    /// Callers must have run [`WebAppSpec::validate`] first; out-of-range
    /// counts saturate at `i32::MAX`.
    pub fn replicas_i32(&self) -> i32 {
        i32::try_from(self.replicas).unwrap_or(i32::MAX)
    }
}

/// Status for a WebApp
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebAppStatus {
    /// Current phase
    #[serde(default)]
    pub phase: WebAppPhase,

    /// Human-readable message about the last reconciliation pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation of the spec the last pass acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions representing the WebApp state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl WebAppStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: WebAppPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Set the observed generation and return self for chaining
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Add or replace a condition of the same type and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
        self
    }

    /// Status after a pass that converged every managed kind
    pub fn ready(generation: Option<i64>) -> Self {
        Self::with_phase(WebAppPhase::Ready)
            .message("All managed resources converged")
            .observed_generation(generation)
            .condition(Condition::new(
                "Ready",
                ConditionStatus::True,
                "Converged",
                "Workload, Service and Ingress match the desired state",
            ))
    }

    /// Status after a failed pass
    pub fn failed(generation: Option<i64>, reason: &str, message: &str) -> Self {
        Self::with_phase(WebAppPhase::Failed)
            .message(message)
            .observed_generation(generation)
            .condition(Condition::new("Ready", ConditionStatus::False, reason, message))
    }

    /// True if writing `next` over `self` would change nothing but timestamps
    pub fn is_equivalent(&self, next: &WebAppStatus) -> bool {
        self.phase == next.phase
            && self.message == next.message
            && self.observed_generation == next.observed_generation
            && self.conditions.len() == next.conditions.len()
            && self
                .conditions
                .iter()
                .zip(next.conditions.iter())
                .all(|(a, b)| a.same_state(b))
    }
}
