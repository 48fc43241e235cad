//! SSP operand: desired state and reconciliation hooks

use std::collections::BTreeMap;
use std::sync::Arc;

use hco_common::crd::{
    CommonTemplates, HyperConverged, NodeLabeller, Ssp, SspSpec, TemplateValidator,
};
use hco_common::{
    Result, APP_LABEL, LABEL_COMPONENT, LABEL_MANAGED_BY, LABEL_MANAGED_BY_HCO,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::cache::DesiredCache;
use crate::operand::OperandHooks;
use crate::request::HcoRequest;
use crate::templates::TemplateRegistry;

/// Prefix of the SSP name; the parent name follows
pub const SSP_NAME_PREFIX: &str = "ssp-";

/// Template namespace when the parent does not set one
pub const DEFAULT_COMMON_TEMPLATES_NAMESPACE: &str = "openshift";

/// Replicas of the template validator
pub const DEFAULT_TEMPLATE_VALIDATOR_REPLICAS: i32 = 2;

/// Component label value for scheduling operands
const COMPONENT_SCHEDULE: &str = "schedule";

/// Desired SSP for `hco`
///
/// Placement is copied wholesale from the parent: a placement removed from
/// the parent is removed from the SSP. Template assembly errors abort the
/// build; no partial object is returned.
pub fn new_ssp(
    hco: &HyperConverged,
    registry: &TemplateRegistry,
    namespace_override: Option<&str>,
) -> Result<Ssp> {
    let hco_name = hco.name_any();
    let namespace = namespace_override
        .map(str::to_string)
        .or_else(|| hco.namespace())
        .unwrap_or_default();

    let data_import_cron_templates = registry.assemble(
        hco.spec.data_import_cron_templates.as_deref(),
        hco.spec.feature_gates.enable_common_boot_image_import,
    )?;

    let spec = SspSpec {
        common_templates: CommonTemplates {
            namespace: hco
                .spec
                .common_templates_namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_COMMON_TEMPLATES_NAMESPACE.to_string()),
            data_import_cron_templates,
        },
        node_labeller: NodeLabeller {
            placement: hco.spec.workloads.node_placement.clone(),
        },
        template_validator: TemplateValidator {
            replicas: Some(DEFAULT_TEMPLATE_VALIDATOR_REPLICAS),
            placement: hco.spec.infra.node_placement.clone(),
        },
    };

    Ok(Ssp {
        metadata: ObjectMeta {
            name: Some(format!("{SSP_NAME_PREFIX}{hco_name}")),
            namespace: Some(namespace),
            labels: Some(operand_labels(&hco_name)),
            ..Default::default()
        },
        spec,
        status: None,
    })
}

fn operand_labels(hco_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), hco_name.to_string()),
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_HCO.to_string(),
        ),
        (LABEL_COMPONENT.to_string(), COMPONENT_SCHEDULE.to_string()),
    ])
}

fn labels_missing(desired: &Ssp, observed: &Ssp) -> bool {
    let observed = observed.labels();
    desired
        .labels()
        .iter()
        .any(|(k, v)| observed.get(k) != Some(v))
}

/// [`OperandHooks`] for the SSP
pub struct SspHooks {
    registry: Arc<TemplateRegistry>,
    namespace_override: Option<String>,
    cache: DesiredCache<Ssp>,
}

impl SspHooks {
    /// Hooks building from `registry`, deploying into the parent namespace
    /// unless `namespace_override` is set
    pub fn new(registry: Arc<TemplateRegistry>, namespace_override: Option<String>) -> Self {
        Self {
            registry,
            namespace_override,
            cache: DesiredCache::new(),
        }
    }

    /// The desired SSP cached for this cycle, if built
    pub fn cached(&self) -> Option<Arc<Ssp>> {
        self.cache.cached()
    }

    /// Number of desired SSPs built so far
    pub fn build_count(&self) -> u64 {
        self.cache.build_count()
    }
}

impl OperandHooks for SspHooks {
    type Object = Ssp;

    fn build(&self, hco: &HyperConverged) -> Result<Ssp> {
        new_ssp(hco, &self.registry, self.namespace_override.as_deref())
    }

    fn full_cr(&mut self, hco: &HyperConverged) -> Result<Arc<Ssp>> {
        let Self {
            registry,
            namespace_override,
            cache,
        } = self;
        cache.get_or_try_build(|| new_ssp(hco, registry, namespace_override.as_deref()))
    }

    fn reset(&mut self) {
        self.cache.reset();
    }

    fn needs_update(&self, desired: &Ssp, observed: &Ssp) -> bool {
        desired.spec != observed.spec || labels_missing(desired, observed)
    }

    fn apply_owned_fields(&self, desired: &Ssp, observed: &mut Ssp) {
        observed.spec = desired.spec.clone();
        let labels = observed.labels_mut();
        for (k, v) in desired.labels() {
            labels.insert(k.clone(), v.clone());
        }
    }

    fn upgrade_done(&self, req: &HcoRequest, observed: &Ssp) -> bool {
        req.upgrade_mode
            && observed
                .status
                .as_ref()
                .and_then(|s| s.observed_version.as_deref())
                == Some(req.version.as_str())
    }
}
