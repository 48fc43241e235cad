//! Input to a single operand reconciliation pass

use hco_common::crd::HyperConverged;

/// One reconciliation pass over the operands of a `HyperConverged`
///
/// `instance.status.relatedObjects` is updated in place as operands are
/// reconciled; the caller persists it afterwards.
#[derive(Clone, Debug)]
pub struct HcoRequest {
    /// Parent object, with the status this pass is building
    pub instance: HyperConverged,
    /// The pass was triggered by a change to the parent spec
    pub hco_triggered: bool,
    /// The operator is rolling out a new version
    pub upgrade_mode: bool,
    /// Version marker of the running operator
    pub version: String,
}

impl HcoRequest {
    /// Request for a pass triggered by the parent spec
    pub fn new(instance: HyperConverged, version: impl Into<String>) -> Self {
        Self {
            instance,
            hco_triggered: true,
            upgrade_mode: false,
            version: version.into(),
        }
    }

    /// Mark whether the parent spec triggered this pass
    pub fn with_hco_triggered(mut self, triggered: bool) -> Self {
        self.hco_triggered = triggered;
        self
    }

    /// Mark the pass as part of a version rollout
    pub fn with_upgrade_mode(mut self, upgrade_mode: bool) -> Self {
        self.upgrade_mode = upgrade_mode;
        self
    }

    /// Parent name
    pub fn name(&self) -> &str {
        self.instance.metadata.name.as_deref().unwrap_or_default()
    }

    /// Parent namespace
    pub fn namespace(&self) -> &str {
        self.instance
            .metadata
            .namespace
            .as_deref()
            .unwrap_or_default()
    }
}
