//! Diff & decision engine
//!
//! For each managed kind the engine compares the desired target with the
//! observed object and picks exactly one action. Presence is checked before
//! any field is compared, so a pass never mixes a delete with an update.
//!
//! | required | observed | decision                         |
//! |----------|----------|----------------------------------|
//! | false    | absent   | NoOp                             |
//! | false    | present  | Delete                           |
//! | true     | absent   | Create                           |
//! | true     | present  | Update(delta) or NoOp when empty |
//!
//! Only the workload has watched fields. Service and Ingress objects are
//! created and deleted but never field-diffed against drift.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::Resource;

use crate::resources::{ManagedObject, ResourceKind};

/// Watched workload fields that differ between desired and observed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldDelta {
    /// New replica count, if it changed
    pub replicas: Option<i32>,
    /// New primary container image, if it changed
    pub image: Option<String>,
    /// Name of the observed container the image change applies to
    ///
    /// Set together with `image`. `None` when the observed workload has no
    /// containers at all.
    pub container: Option<String>,
}

impl FieldDelta {
    /// True if no watched field changed
    pub fn is_empty(&self) -> bool {
        self.replicas.is_none() && self.image.is_none()
    }

    /// Number of changed fields
    pub fn len(&self) -> usize {
        usize::from(self.replicas.is_some()) + usize::from(self.image.is_some())
    }
}

impl std::fmt::Display for FieldDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(replicas) = self.replicas {
            parts.push(format!("replicas={}", replicas));
        }
        if let Some(image) = &self.image {
            parts.push(format!("image={}", image));
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Action chosen for one managed kind in one pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Object is required and absent
    Create,
    /// Object is present and the listed fields diverge
    Update(FieldDelta),
    /// Object is present but no longer required
    Delete,
    /// Nothing to do
    NoOp,
}

/// A kind of object the operator manages
pub trait ManagedResource: Resource<DynamicType = ()> + Clone + Into<ManagedObject> {
    /// Which managed kind this type backs
    const KIND: ResourceKind;

    /// Watched fields of `self` (the desired target) that differ in `observed`
    ///
    /// Kinds without watched fields never report a delta.
    fn field_delta(&self, _observed: &Self) -> FieldDelta {
        FieldDelta::default()
    }
}

impl ManagedResource for Deployment {
    const KIND: ResourceKind = ResourceKind::Workload;

    fn field_delta(&self, observed: &Self) -> FieldDelta {
        let desired_replicas = self.spec.as_ref().and_then(|s| s.replicas);
        let observed_replicas = observed.spec.as_ref().and_then(|s| s.replicas);

        // An unset replica count defaults to 1 on the API server
        let replicas = match desired_replicas {
            Some(want) if Some(want) != observed_replicas.or(Some(1)) => Some(want),
            _ => None,
        };

        let desired_image = primary_container(self, None).and_then(|c| c.image.clone());
        let observed_container =
            desired_container_name(self).and_then(|name| primary_container(observed, Some(name)));
        let observed_image = observed_container.and_then(|c| c.image.clone());

        // The patch must address the container the comparison was made on
        let (image, container) = match desired_image {
            Some(want) if Some(&want) != observed_image.as_ref() => {
                (Some(want), observed_container.map(|c| c.name.clone()))
            }
            _ => (None, None),
        };

        FieldDelta {
            replicas,
            image,
            container,
        }
    }
}

impl ManagedResource for Service {
    const KIND: ResourceKind = ResourceKind::Service;
}

impl ManagedResource for Ingress {
    const KIND: ResourceKind = ResourceKind::Route;
}

fn containers(d: &Deployment) -> &[Container] {
    d.spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| p.containers.as_slice())
        .unwrap_or_default()
}

fn desired_container_name(d: &Deployment) -> Option<&str> {
    containers(d).first().map(|c| c.name.as_str())
}

/// The container the operator owns: matched by name, else the first one
fn primary_container<'a>(d: &'a Deployment, name: Option<&str>) -> Option<&'a Container> {
    let all = containers(d);
    name.and_then(|n| all.iter().find(|c| c.name == n))
        .or_else(|| all.first())
}

/// Decide what to do for one managed kind
///
/// `target` is the object the builder derived from the desired state;
/// `observed` is `None` only on an explicit not-found from the state reader.
pub fn decide<K: ManagedResource>(required: bool, target: &K, observed: Option<&K>) -> Decision {
    match (required, observed) {
        (false, None) => Decision::NoOp,
        (false, Some(_)) => Decision::Delete,
        (true, None) => Decision::Create,
        (true, Some(observed)) => {
            let delta = target.field_delta(observed);
            if delta.is_empty() {
                Decision::NoOp
            } else {
                Decision::Update(delta)
            }
        }
    }
}
