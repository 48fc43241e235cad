//! Store adapter: typed get/create/update/delete by name and namespace
//!
//! The reconciliation and teardown engines only talk to the store through
//! [`ObjectStore`], so tests can substitute a mock or the in-memory store.
//! A missing object is a normal outcome here: `get` yields `None` and
//! `delete` yields `false` instead of an error.

use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{Error, Result};

/// Typed access to namespaced objects of kind `K`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore<K: Send + Sync + 'static>: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<K>>;

    /// Create an object, returning the stored copy
    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace an existing object, returning the stored copy
    async fn update(&self, obj: &K) -> Result<K>;

    /// Delete an object; `false` when it was already gone
    async fn delete(&self, name: &str, namespace: &str, params: &DeleteParams) -> Result<bool>;
}

/// [`ObjectStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Name and namespace of an object about to be written
fn identity<K: Resource>(obj: &K) -> Result<(String, String)> {
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::validation_for_field("<unnamed>", "metadata.name", "name is required"))?;
    let namespace = obj.meta().namespace.clone().ok_or_else(|| {
        Error::validation_for_field(&name, "metadata.namespace", "namespace is required")
    })?;
    Ok((name, namespace))
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let (name, namespace) = identity(obj)?;
        debug!(kind = %K::kind(&()), name = %name, namespace = %namespace, "creating object");
        Ok(self
            .api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let (name, namespace) = identity(obj)?;
        debug!(
            kind = %K::kind(&()),
            name = %name,
            namespace = %namespace,
            resource_version = ?obj.resource_version(),
            "replacing object"
        );
        Ok(self
            .api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    async fn delete(&self, name: &str, namespace: &str, params: &DeleteParams) -> Result<bool> {
        match self.api::<K>(namespace).delete(name, params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
