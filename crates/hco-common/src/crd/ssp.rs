//! SSP operand CRD and the data import cron template types it carries

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::NodePlacement;

/// Desired state of the scheduling, scale and performance operand
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ssp.kubevirt.io",
    version = "v1beta1",
    kind = "SSP",
    root = "Ssp",
    namespaced,
    status = "SspStatus",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct SspSpec {
    /// Common VM templates configuration
    pub common_templates: CommonTemplates,

    /// Node labeller configuration
    #[serde(default)]
    pub node_labeller: NodeLabeller,

    /// Template validator configuration
    #[serde(default)]
    pub template_validator: TemplateValidator,
}

/// Where the common templates go and which boot images are imported for them
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonTemplates {
    /// Namespace the templates are deployed to
    pub namespace: String,

    /// Boot image import jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_import_cron_templates: Option<Vec<DataImportCronTemplate>>,
}

/// Node labeller sub-component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct NodeLabeller {
    /// Placement, copied from the parent's workloads placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<NodePlacement>,
}

/// Template validator sub-component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TemplateValidator {
    /// Number of validator replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Placement, copied from the parent's infra placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<NodePlacement>,
}

/// Observed state of the SSP operand
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SspStatus {
    /// Operator version the operand last finished deploying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_version: Option<String>,

    /// Deployment phase reported by the operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

// =============================================================================
// Data import cron templates
// =============================================================================

/// A named, scheduled boot image import
///
/// Names identify templates: within any assembled list they must be unique.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DataImportCronTemplate {
    /// Template identity
    pub metadata: TemplateMetadata,
    /// What to import and when
    pub spec: DataImportCronSpec,
}

impl DataImportCronTemplate {
    /// Template name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Identity and annotations of a template entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TemplateMetadata {
    /// Unique template name
    pub name: String,

    /// Labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// Import schedule and payload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataImportCronSpec {
    /// Cron schedule of the import
    #[serde(default)]
    pub schedule: String,

    /// Data volume created by each import
    #[serde(default)]
    pub template: DataVolumeTemplate,

    /// Data source kept pointing at the latest import
    #[serde(default)]
    pub managed_data_source: String,

    /// "Outdated" or "Never"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub garbage_collect: Option<String>,

    /// Number of imports retained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imports_to_keep: Option<i32>,
}

/// Data volume template wrapper
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DataVolumeTemplate {
    /// Data volume spec
    #[serde(default)]
    pub spec: DataVolumeSpec,
}

/// Source and storage of an imported data volume
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DataVolumeSpec {
    /// Where the image comes from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DataVolumeSource>,

    /// Storage request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,
}

/// Image source; exactly one variant is expected to be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DataVolumeSource {
    /// Container registry source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySource>,

    /// Plain HTTP source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSource>,
}

/// Container registry image source
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySource {
    /// Image URL, e.g. `docker://quay.io/containerdisks/fedora:latest`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// "pod" or "node"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_method: Option<String>,
}

/// HTTP image source
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HttpSource {
    /// Image URL
    pub url: String,
}

/// Storage request of an imported volume
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Resource requests, e.g. `storage: 30Gi`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<BTreeMap<String, Quantity>>,

    /// Storage class to provision from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}
