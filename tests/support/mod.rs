//! In-memory stand-in for the Kubernetes API server

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service};
use k8s_openapi::api::networking::v1::Ingress;

use webapp_operator::controller::{ResourceWriter, StateReader};
use webapp_operator::crd::{WebApp, WebAppPhase, WebAppStatus};
use webapp_operator::resources::{ManagedObject, ResourceKind};
use webapp_operator::Error;

/// A call the reconciler made against the fake cluster
#[derive(Clone, Debug)]
pub enum Call {
    GetWebApp,
    Get(ResourceKind),
    Create(ResourceKind),
    Patch(ResourceKind, serde_json::Value),
    Delete(ResourceKind),
    PatchStatus,
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Call::Create(_) | Call::Patch(..) | Call::Delete(_) | Call::PatchStatus
        )
    }

    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Call::Get(k) | Call::Create(k) | Call::Patch(k, _) | Call::Delete(k) => Some(*k),
            Call::GetWebApp | Call::PatchStatus => None,
        }
    }
}

#[derive(Default)]
struct State {
    webapp: Option<WebApp>,
    objects: BTreeMap<ResourceKind, ManagedObject>,
    calls: Vec<Call>,
    version: u64,
    fail_create: Option<ResourceKind>,
    vanish_before_delete: bool,
    bump_on_read: bool,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn with_webapp(app: WebApp) -> Self {
        let cluster = Self::default();
        cluster.state.lock().unwrap().webapp = Some(app);
        cluster
    }

    pub fn update_webapp(&self, f: impl FnOnce(&mut WebApp)) {
        let mut state = self.state.lock().unwrap();
        let app = state.webapp.as_mut().expect("webapp stored");
        f(app);
        app.metadata.generation = Some(app.metadata.generation.unwrap_or(0) + 1);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn exists(&self, kind: ResourceKind) -> bool {
        self.state.lock().unwrap().objects.contains_key(&kind)
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        usize::from(self.exists(kind))
    }

    pub fn fail_create(&self, kind: ResourceKind) {
        self.state.lock().unwrap().fail_create = Some(kind);
    }

    pub fn vanish_before_delete(&self, on: bool) {
        self.state.lock().unwrap().vanish_before_delete = on;
    }

    pub fn bump_workload_version_on_read(&self, on: bool) {
        self.state.lock().unwrap().bump_on_read = on;
    }

    pub fn status_phase(&self) -> Option<WebAppPhase> {
        let state = self.state.lock().unwrap();
        state
            .webapp
            .as_ref()
            .and_then(|a| a.status.as_ref())
            .map(|s| s.phase.clone())
    }

    pub fn owner_uids(&self, kind: ResourceKind) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&kind)
            .map(|o| o.owner_references().iter().map(|r| r.uid.clone()).collect())
            .unwrap_or_default()
    }

    fn with_workload<T>(&self, f: impl FnOnce(&mut Deployment) -> T) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        match state.objects.get_mut(&ResourceKind::Workload) {
            Some(ManagedObject::Workload(d)) => Some(f(d)),
            _ => None,
        }
    }

    pub fn workload_replicas(&self) -> Option<i32> {
        self.with_workload(|d| d.spec.as_ref().and_then(|s| s.replicas))
            .flatten()
    }

    pub fn workload_image(&self) -> Option<String> {
        self.with_workload(|d| {
            d.spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .and_then(|p| p.containers.first())
                .and_then(|c| c.image.clone())
        })
        .flatten()
    }

    pub fn set_workload_image(&self, image: &str) {
        self.with_workload(|d| {
            if let Some(c) = d
                .spec
                .as_mut()
                .and_then(|s| s.template.spec.as_mut())
                .and_then(|p| p.containers.first_mut())
            {
                c.image = Some(image.to_string());
            }
        });
    }

    pub fn rename_workload_container(&self, name: &str) {
        self.with_workload(|d| {
            if let Some(c) = d
                .spec
                .as_mut()
                .and_then(|s| s.template.spec.as_mut())
                .and_then(|p| p.containers.first_mut())
            {
                c.name = name.to_string();
            }
        });
    }

    pub fn workload_containers(&self) -> Vec<(String, Option<String>)> {
        self.with_workload(|d| {
            d.spec
                .as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .map(|p| {
                    p.containers
                        .iter()
                        .map(|c| (c.name.clone(), c.image.clone()))
                        .collect()
                })
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn annotate_workload(&self, key: &str, value: &str) {
        self.with_workload(|d| {
            d.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(key.to_string(), value.to_string());
        });
    }

    pub fn workload_annotation(&self, key: &str) -> Option<String> {
        self.with_workload(|d| {
            d.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(key).cloned())
        })
        .flatten()
    }
}

fn apply_workload_patch(d: &mut Deployment, patch: &serde_json::Value) {
    let spec = d.spec.get_or_insert_with(Default::default);
    if let Some(replicas) = patch["spec"]["replicas"].as_i64() {
        spec.replicas = Some(replicas as i32);
    }
    if let Some(containers) = patch["spec"]["template"]["spec"]["containers"].as_array() {
        let pod = spec.template.spec.get_or_insert_with(Default::default);
        // Strategic merge keys containers by name and appends unknown names
        for wanted in containers {
            let name = wanted["name"].as_str().unwrap_or_default();
            let image = wanted["image"].as_str().map(str::to_string);
            match pod.containers.iter_mut().find(|c| c.name == name) {
                Some(c) => c.image = image,
                None => pod.containers.push(Container {
                    name: name.to_string(),
                    image,
                    ..Default::default()
                }),
            }
        }
    }
}

#[async_trait]
impl StateReader for FakeCluster {
    async fn get_webapp(&self, _namespace: &str, _name: &str) -> Result<Option<WebApp>, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetWebApp);
        Ok(state.webapp.clone())
    }

    async fn get_workload(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Get(ResourceKind::Workload));
        let observed = match state.objects.get(&ResourceKind::Workload) {
            Some(ManagedObject::Workload(d)) => Some(d.clone()),
            _ => None,
        };
        if state.bump_on_read {
            // Another writer updates the object right after we read it
            let version = state.next_version();
            if let Some(ManagedObject::Workload(d)) = state.objects.get_mut(&ResourceKind::Workload)
            {
                d.metadata.resource_version = Some(version);
            }
        }
        Ok(observed)
    }

    async fn get_service(&self, _namespace: &str, _name: &str) -> Result<Option<Service>, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Get(ResourceKind::Service));
        Ok(match state.objects.get(&ResourceKind::Service) {
            Some(ManagedObject::Service(s)) => Some(s.clone()),
            _ => None,
        })
    }

    async fn get_route(&self, _namespace: &str, _name: &str) -> Result<Option<Ingress>, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Get(ResourceKind::Route));
        Ok(match state.objects.get(&ResourceKind::Route) {
            Some(ManagedObject::Route(i)) => Some(i.clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl ResourceWriter for FakeCluster {
    async fn create(&self, object: &ManagedObject) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let kind = object.kind();
        state.calls.push(Call::Create(kind));
        if state.fail_create == Some(kind) {
            let unavailable = kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "etcdserver: request timed out".to_string(),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            });
            return Err(Error::from_kube(kind.api_kind(), object.name(), unavailable));
        }
        if state.objects.contains_key(&kind) {
            return Err(Error::conflict(kind.api_kind(), object.name(), "already exists"));
        }
        let version = state.next_version();
        let mut stored = object.clone();
        match &mut stored {
            ManagedObject::Workload(d) => d.metadata.resource_version = Some(version),
            ManagedObject::Service(s) => s.metadata.resource_version = Some(version),
            ManagedObject::Route(i) => i.metadata.resource_version = Some(version),
        }
        state.objects.insert(kind, stored);
        Ok(())
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        _namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Patch(kind, patch.clone()));
        let version = state.next_version();
        match state.objects.get_mut(&kind) {
            Some(ManagedObject::Workload(d)) => {
                if let Some(expected) = patch["metadata"]["resourceVersion"].as_str() {
                    if d.metadata.resource_version.as_deref() != Some(expected) {
                        return Err(Error::conflict(kind.api_kind(), name, "object has been modified"));
                    }
                }
                apply_workload_patch(d, patch);
                d.metadata.resource_version = Some(version);
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(Error::not_found(kind.api_kind(), name)),
        }
    }

    async fn delete(&self, kind: ResourceKind, _namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete(kind));
        if state.vanish_before_delete {
            state.objects.remove(&kind);
        }
        match state.objects.remove(&kind) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(kind.api_kind(), name)),
        }
    }

    async fn patch_status(
        &self,
        _namespace: &str,
        name: &str,
        status: &WebAppStatus,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::PatchStatus);
        match state.webapp.as_mut() {
            Some(app) => {
                app.status = Some(status.clone());
                Ok(())
            }
            None => Err(Error::not_found("WebApp", name)),
        }
    }
}
