//! Managed resources derived from a WebApp
//!
//! This module maps a [`WebApp`] to the three objects the operator manages:
//! - Workload: a `Deployment` running the declared image and replica count
//! - Service: a `ClusterIP` Service in front of the workload
//! - Route: an `Ingress` routing HTTP traffic to the Service
//!
//! Every managed object shares the owner's name and namespace. The builders
//! are pure; ownership linkage is attached by the action executor right
//! before creation.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::crd::WebApp;
use crate::Error;

/// Label carrying the owning WebApp's name; also the workload selector
pub const NAME_LABEL: &str = "app.kubernetes.io/name";

/// Label marking objects created by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY: &str = "webapp-operator";

/// The managed resource kinds, in reconciliation order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// The Deployment running the application
    Workload,
    /// The Service exposing the workload
    Service,
    /// The Ingress routing to the Service
    Route,
}

impl ResourceKind {
    /// Kubernetes kind name of the backing object
    pub fn api_kind(&self) -> &'static str {
        match self {
            Self::Workload => "Deployment",
            Self::Service => "Service",
            Self::Route => "Ingress",
        }
    }

    /// Whether this kind should exist for the given WebApp
    ///
    /// The workload always exists; the optional kinds follow their exposure flag.
    pub fn is_required(&self, app: &WebApp) -> bool {
        match self {
            Self::Workload => true,
            Self::Service => app.spec.expose_service,
            Self::Route => app.spec.expose_ingress,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_kind())
    }
}

/// A managed object of any kind
#[derive(Clone, Debug, PartialEq)]
pub enum ManagedObject {
    /// Workload object
    Workload(Deployment),
    /// Service object
    Service(Service),
    /// Route object
    Route(Ingress),
}

impl ManagedObject {
    /// Kind of the wrapped object
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Workload(_) => ResourceKind::Workload,
            Self::Service(_) => ResourceKind::Service,
            Self::Route(_) => ResourceKind::Route,
        }
    }

    fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Workload(d) => d.meta(),
            Self::Service(s) => s.meta(),
            Self::Route(i) => i.meta(),
        }
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Workload(d) => d.meta_mut(),
            Self::Service(s) => s.meta_mut(),
            Self::Route(i) => i.meta_mut(),
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Object namespace
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    /// Owner references currently set on the object
    pub fn owner_references(&self) -> &[OwnerReference] {
        self.meta().owner_references.as_deref().unwrap_or_default()
    }

    /// Make `owner` the controlling owner of this object
    ///
    /// Any previous controller reference is replaced; other owner
    /// references are preserved.
    pub fn set_controller_owner(&mut self, owner: OwnerReference) {
        let refs = self.meta_mut().owner_references.get_or_insert_with(Vec::new);
        refs.retain(|r| r.controller != Some(true));
        refs.push(owner);
    }
}

impl From<Deployment> for ManagedObject {
    fn from(d: Deployment) -> Self {
        Self::Workload(d)
    }
}

impl From<Service> for ManagedObject {
    fn from(s: Service) -> Self {
        Self::Service(s)
    }
}

impl From<Ingress> for ManagedObject {
    fn from(i: Ingress) -> Self {
        Self::Route(i)
    }
}

/// Controller owner reference pointing at `app`
///
/// Fails when the WebApp has no uid yet, since garbage collection cannot be
/// wired up for an owner the API server has not persisted.
pub fn owner_reference(app: &WebApp, kind: ResourceKind) -> Result<OwnerReference, Error> {
    app.controller_owner_ref(&()).ok_or_else(|| {
        Error::ownership(
            kind.api_kind(),
            app.name_any(),
            "owner WebApp has no uid or name",
        )
    })
}

fn labels(app: &WebApp) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), app.name_any());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels
}

fn selector(app: &WebApp) -> BTreeMap<String, String> {
    BTreeMap::from([(NAME_LABEL.to_string(), app.name_any())])
}

fn metadata(app: &WebApp) -> ObjectMeta {
    ObjectMeta {
        name: Some(app.name_any()),
        namespace: app.namespace(),
        labels: Some(labels(app)),
        ..Default::default()
    }
}

/// Name of the application container inside the workload
pub fn container_name(app: &WebApp) -> String {
    app.name_any()
}

/// Build the target Deployment for `app`
pub fn build_workload(app: &WebApp) -> Deployment {
    let container = Container {
        name: container_name(app),
        image: Some(app.spec.image.clone()),
        ports: Some(vec![ContainerPort {
            container_port: i32::from(app.spec.port),
            name: Some("http".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(app),
        spec: Some(DeploymentSpec {
            replicas: Some(app.spec.replicas_i32()),
            selector: LabelSelector {
                match_labels: Some(selector(app)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(app)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the target Service for `app`
pub fn build_service(app: &WebApp) -> Service {
    Service {
        metadata: metadata(app),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector(app)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: i32::from(app.spec.port),
                target_port: Some(IntOrString::String("http".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the target Ingress for `app`
pub fn build_route(app: &WebApp) -> Ingress {
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: app.name_any(),
            port: Some(ServiceBackendPort {
                number: Some(i32::from(app.spec.port)),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };

    Ingress {
        metadata: metadata(app),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: app.spec.host.clone(),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend,
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
