//! HyperConverged CRD: the single parent object the operator reconciles
//!
//! Example:
//! ```yaml
//! apiVersion: hco.kubevirt.io/v1beta1
//! kind: HyperConverged
//! metadata:
//!   name: kubevirt-hyperconverged
//!   namespace: kubevirt-hyperconverged
//! spec:
//!   infra:
//!     nodePlacement:
//!       nodeSelector:
//!         node-role.kubernetes.io/infra: ""
//!   featureGates:
//!     enableCommonBootImageImport: true
//!   dataImportCronTemplates:
//!     - metadata:
//!         name: centos8-image-cron
//!       spec:
//!         schedule: "0 */12 * * *"
//!         managedDataSource: centos8
//!         template:
//!           spec:
//!             source:
//!               registry:
//!                 url: docker://quay.io/containerdisks/centos:8
//! ```

use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ssp::DataImportCronTemplate;
use super::types::{Condition, NodePlacement, Version};

/// Name under which the operator records its own version on the status
pub const HCO_VERSION_NAME: &str = "operator";

/// Desired state of the whole virtualization stack
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hco.kubevirt.io",
    version = "v1beta1",
    kind = "HyperConverged",
    namespaced,
    shortname = "hco",
    status = "HyperConvergedStatus",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedSpec {
    /// Placement for workload-facing components (e.g. node labeller)
    #[serde(default)]
    pub workloads: HyperConvergedConfig,

    /// Placement for infrastructure components (e.g. template validator)
    #[serde(default)]
    pub infra: HyperConvergedConfig,

    /// Optional features
    #[serde(default)]
    pub feature_gates: FeatureGates,

    /// Caller-supplied data import cron templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_import_cron_templates: Option<Vec<DataImportCronTemplate>>,

    /// Namespace the common VM templates are deployed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_templates_namespace: Option<String>,
}

/// Per-role configuration block
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedConfig {
    /// Node placement for the role's components
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_placement: Option<NodePlacement>,
}

/// Feature gates
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGates {
    /// Consume the operator's default boot image templates
    #[serde(default)]
    pub enable_common_boot_image_import: bool,
}

/// Observed state of the HyperConverged
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedStatus {
    /// One reference per managed operand
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_objects: Vec<ObjectReference>,

    /// Schedule pinned onto the default data import cron templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_import_schedule: Option<String>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Component versions reached so far
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<Version>,

    /// Generation last reconciled successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl HyperConvergedStatus {
    /// Version recorded for the named component
    pub fn version(&self, name: &str) -> Option<&str> {
        self.versions
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.version.as_str())
    }

    /// Record a component version, replacing an existing entry of that name
    pub fn set_version(&mut self, name: &str, version: &str) {
        match self.versions.iter_mut().find(|v| v.name == name) {
            Some(existing) => existing.version = version.to_string(),
            None => self.versions.push(Version::new(name, version)),
        }
    }

    /// Condition of the given type, if present
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace a condition by type
    ///
    /// The transition time is kept when the status did not change.
    pub fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                let transition = if existing.status == condition.status {
                    existing.last_transition_time
                } else {
                    condition.last_transition_time
                };
                *existing = Condition {
                    last_transition_time: transition,
                    ..condition
                };
            }
            None => self.conditions.push(condition),
        }
    }
}

impl HyperConverged {
    /// True once the object has a deletion timestamp
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Pinned data import schedule from the status, empty when unset
    pub fn data_import_schedule(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.data_import_schedule.as_deref())
            .unwrap_or_default()
    }
}
