//! Discovery of the ClusterServiceVersion the operator was installed by
//!
//! Follows controller owner references from the operator pod:
//! Pod -> ReplicaSet -> Deployment -> ClusterServiceVersion.

use async_trait::async_trait;
use hco_common::{Error, Result};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DynamicObject};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use tracing::{debug, info};

use crate::config::{OperatorConfig, RunMode, POD_NAME_ENV};

const CONTEXT: &str = "owner-lookup";

/// Owner reference flagged as the controller, if any
pub fn controller_of(refs: &[OwnerReference]) -> Option<&OwnerReference> {
    refs.iter().find(|r| r.controller == Some(true))
}

/// First owner reference of the given kind
pub fn owner_of_kind<'a>(refs: &'a [OwnerReference], kind: &str) -> Option<&'a OwnerReference> {
    refs.iter().find(|r| r.kind == kind)
}

/// Reads the objects along the owner chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OwnerChain: Send + Sync {
    /// Fetch a pod
    async fn pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;
    /// Fetch a replica set
    async fn replica_set(&self, namespace: &str, name: &str) -> Result<Option<ReplicaSet>>;
    /// Fetch a deployment
    async fn deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;
    /// Fetch a ClusterServiceVersion
    async fn csv(&self, namespace: &str, name: &str) -> Result<Option<DynamicObject>>;
}

/// [`OwnerChain`] backed by the API server
pub struct KubeOwnerChain {
    client: Client,
}

impl KubeOwnerChain {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn csv_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("operators.coreos.com", "v1alpha1", "ClusterServiceVersion"),
        "clusterserviceversions",
    )
}

#[async_trait]
impl OwnerChain for KubeOwnerChain {
    async fn pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replica_set(&self, namespace: &str, name: &str) -> Result<Option<ReplicaSet>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn csv(&self, namespace: &str, name: &str) -> Result<Option<DynamicObject>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &csv_api_resource());
        Ok(api.get_opt(name).await?)
    }
}

fn missing(what: &str) -> Error {
    Error::internal_with_context(CONTEXT, format!("failed getting HCO {what}"))
}

/// The operator's ClusterServiceVersion, `None` in local run mode
pub async fn find_operator_csv(
    chain: &dyn OwnerChain,
    cfg: &OperatorConfig,
    namespace: &str,
) -> Result<Option<DynamicObject>> {
    if cfg.run_mode() == RunMode::Local {
        debug!("local run mode, skipping owner lookup");
        return Ok(None);
    }
    let pod_name = cfg.pod_name.as_deref().filter(|n| !n.is_empty()).ok_or_else(|| {
        Error::config(format!(
            "required env {POD_NAME_ENV} not set, please configure downward API"
        ))
    })?;

    let pod = chain
        .pod(namespace, pod_name)
        .await?
        .ok_or_else(|| missing("pod"))?;
    info!(pod = %pod.name_any(), %namespace, "found operator pod");

    let rs_ref = controller_of(pod.owner_references())
        .filter(|r| r.kind == "ReplicaSet")
        .ok_or_else(|| missing("replicaSet reference"))?;
    let rs = chain
        .replica_set(namespace, &rs_ref.name)
        .await?
        .ok_or_else(|| missing("replicaSet"))?;

    let deploy_ref = controller_of(rs.owner_references())
        .filter(|r| r.kind == "Deployment")
        .ok_or_else(|| missing("deployment reference"))?;
    let deploy = chain
        .deployment(namespace, &deploy_ref.name)
        .await?
        .ok_or_else(|| missing("deployment"))?;

    let csv_ref = owner_of_kind(deploy.owner_references(), "ClusterServiceVersion")
        .ok_or_else(|| missing("CSV reference"))?;
    let csv = chain
        .csv(namespace, &csv_ref.name)
        .await?
        .ok_or_else(|| missing("CSV"))?;

    info!(csv = %csv.name_any(), "operator installed by CSV");
    Ok(Some(csv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use kube::api::ObjectMeta;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: OperatorConfig,
    }

    const NS: &str = "kubevirt-hyperconverged";

    fn cfg(args: &[&str]) -> OperatorConfig {
        let mut argv = vec!["hco-operator", "--force-run-mode", "cluster"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv).config
    }

    fn owner(kind: &str, name: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: "v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            controller: Some(controller),
            ..Default::default()
        }
    }

    fn meta(name: &str, owners: Vec<OwnerReference>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NS.to_string()),
            owner_references: Some(owners),
            ..Default::default()
        }
    }

    fn full_chain() -> MockOwnerChain {
        let mut chain = MockOwnerChain::new();
        chain.expect_pod().returning(|_, name| {
            Ok(Some(Pod {
                metadata: meta(name, vec![owner("ReplicaSet", "hco-operator-abc", true)]),
                ..Default::default()
            }))
        });
        chain.expect_replica_set().returning(|_, name| {
            Ok(Some(ReplicaSet {
                metadata: meta(name, vec![owner("Deployment", "hco-operator", true)]),
                ..Default::default()
            }))
        });
        chain.expect_deployment().returning(|_, name| {
            Ok(Some(Deployment {
                metadata: meta(
                    name,
                    vec![owner("ClusterServiceVersion", "kubevirt-hyperconverged-operator.v1.4.0", false)],
                ),
                ..Default::default()
            }))
        });
        chain.expect_csv().returning(|_, name| {
            Ok(Some(DynamicObject::new(name, &csv_api_resource()).within(NS)))
        });
        chain
    }

    #[test]
    fn test_controller_of_and_owner_of_kind() {
        let refs = vec![owner("ReplicaSet", "a", false), owner("ReplicaSet", "b", true)];
        assert_eq!(controller_of(&refs).map(|r| r.name.as_str()), Some("b"));
        assert_eq!(owner_of_kind(&refs, "ReplicaSet").map(|r| r.name.as_str()), Some("a"));
        assert!(owner_of_kind(&refs, "Deployment").is_none());
        assert!(controller_of(&[]).is_none());
    }

    /// Story: the CSV is found by walking the pod's owner chain
    #[tokio::test]
    async fn story_walks_owner_chain_to_csv() {
        let chain = full_chain();
        let csv = find_operator_csv(&chain, &cfg(&["--pod-name", "hco-operator-abc-123"]), NS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(csv.name_any(), "kubevirt-hyperconverged-operator.v1.4.0");
    }

    #[tokio::test]
    async fn test_local_mode_skips_lookup() {
        let chain = MockOwnerChain::new();
        let cfg = Cli::parse_from(["hco-operator", "--force-run-mode", "local"]).config;
        assert!(find_operator_csv(&chain, &cfg, NS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pod_name_required() {
        let chain = MockOwnerChain::new();
        let err = find_operator_csv(&chain, &cfg(&["--pod-name", ""]), NS)
            .await
            .unwrap_err();
        assert!(err.to_string().contains(POD_NAME_ENV));
    }

    #[tokio::test]
    async fn test_pod_without_replica_set_controller() {
        let mut chain = MockOwnerChain::new();
        chain.expect_pod().returning(|_, name| {
            Ok(Some(Pod {
                metadata: meta(name, vec![owner("StatefulSet", "other", true)]),
                ..Default::default()
            }))
        });
        chain.expect_replica_set().never();

        let err = find_operator_csv(&chain, &cfg(&["--pod-name", "p"]), NS)
            .await
            .unwrap_err();
        assert_eq!(err.context(), Some(CONTEXT));
        assert!(err.to_string().contains("replicaSet reference"));
    }

    #[tokio::test]
    async fn test_deployment_without_csv_owner() {
        let mut chain = MockOwnerChain::new();
        chain.expect_pod().returning(|_, name| {
            Ok(Some(Pod {
                metadata: meta(name, vec![owner("ReplicaSet", "rs", true)]),
                ..Default::default()
            }))
        });
        chain.expect_replica_set().returning(|_, name| {
            Ok(Some(ReplicaSet {
                metadata: meta(name, vec![owner("Deployment", "d", true)]),
                ..Default::default()
            }))
        });
        chain.expect_deployment().returning(|_, name| {
            Ok(Some(Deployment {
                metadata: meta(name, vec![]),
                ..Default::default()
            }))
        });
        chain.expect_csv().never();

        let err = find_operator_csv(&chain, &cfg(&["--pod-name", "p"]), NS)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CSV reference"));
    }
}
