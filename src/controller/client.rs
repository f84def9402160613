//! Cluster state access
//!
//! The reconciler talks to the cluster only through [`StateReader`] and
//! [`ResourceWriter`], so tests can substitute mocks or in-memory fakes.
//! [`KubeClusterClient`] implements both against the Kubernetes API.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{WebApp, WebAppStatus};
use crate::resources::{ManagedObject, ResourceKind};
use crate::Error;

/// Reads observed state from the cluster
///
/// Every getter returns `Ok(None)` only on an explicit not-found. Any other
/// failure is an error and must never be read as absence.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StateReader: Send + Sync {
    /// Get the desired-state record
    async fn get_webapp(&self, namespace: &str, name: &str) -> Result<Option<WebApp>, Error>;

    /// Get the observed workload
    async fn get_workload(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// Get the observed Service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Get the observed Ingress
    async fn get_route(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, Error>;
}

/// Writes to the cluster
///
/// Writers classify API failures with [`Error::from_kube`]; in particular a
/// delete of a missing object returns [`Error::NotFound`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceWriter: Send + Sync {
    /// Create a managed object
    async fn create(&self, object: &ManagedObject) -> Result<(), Error>;

    /// Apply a strategic-merge partial patch to a managed object
    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Delete a managed object by identity
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), Error>;

    /// Patch the status subresource of a WebApp
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WebAppStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    field_manager: String,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given client
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        match self.api::<K>(namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(Error::from_kube(K::kind(&()), name, e)),
        }
    }

    async fn create_typed<K>(&self, object: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let name = object.meta().name.clone().unwrap_or_default();
        let namespace = object.meta().namespace.clone().unwrap_or_default();
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        debug!(kind = %K::kind(&()), name = %name, "creating");
        self.api::<K>(&namespace)
            .create(&params, object)
            .await
            .map_err(|e| Error::from_kube(K::kind(&()), &name, e))?;
        Ok(())
    }

    async fn patch_typed<K>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        debug!(kind = %K::kind(&()), name = %name, "patching");
        self.api::<K>(namespace)
            .patch(name, &params, &Patch::Strategic(patch))
            .await
            .map_err(|e| Error::from_kube(K::kind(&()), name, e))?;
        Ok(())
    }

    async fn delete_typed<K>(&self, namespace: &str, name: &str) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        debug!(kind = %K::kind(&()), name = %name, "deleting");
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| Error::from_kube(K::kind(&()), name, e))?;
        Ok(())
    }
}

#[async_trait]
impl StateReader for KubeClusterClient {
    async fn get_webapp(&self, namespace: &str, name: &str) -> Result<Option<WebApp>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_route(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, Error> {
        self.get_opt(namespace, name).await
    }
}

#[async_trait]
impl ResourceWriter for KubeClusterClient {
    async fn create(&self, object: &ManagedObject) -> Result<(), Error> {
        match object {
            ManagedObject::Workload(d) => self.create_typed(d).await,
            ManagedObject::Service(s) => self.create_typed(s).await,
            ManagedObject::Route(i) => self.create_typed(i).await,
        }
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        match kind {
            ResourceKind::Workload => self.patch_typed::<Deployment>(namespace, name, patch).await,
            ResourceKind::Service => self.patch_typed::<Service>(namespace, name, patch).await,
            ResourceKind::Route => self.patch_typed::<Ingress>(namespace, name, patch).await,
        }
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), Error> {
        match kind {
            ResourceKind::Workload => self.delete_typed::<Deployment>(namespace, name).await,
            ResourceKind::Service => self.delete_typed::<Service>(namespace, name).await,
            ResourceKind::Route => self.delete_typed::<Ingress>(namespace, name).await,
        }
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WebAppStatus,
    ) -> Result<(), Error> {
        let api: Api<WebApp> = self.api(namespace);
        let status_patch = serde_json::json!({ "status": status });
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };

        api.patch_status(name, &params, &Patch::Merge(&status_patch))
            .await
            .map_err(|e| Error::from_kube("WebApp", name, e))?;

        Ok(())
    }
}
