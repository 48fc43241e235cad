//! Custom Resource Definitions for the HyperConverged operator
//!
//! `HyperConverged` is the parent object users edit; `Ssp` is the operand
//! the operator derives from it.

mod hyperconverged;
mod ssp;
mod types;

pub use hyperconverged::{
    FeatureGates, HyperConverged, HyperConvergedConfig, HyperConvergedSpec, HyperConvergedStatus,
    HCO_VERSION_NAME,
};
pub use ssp::{
    CommonTemplates, DataImportCronSpec, DataImportCronTemplate, DataVolumeSource,
    DataVolumeSpec, DataVolumeTemplate, HttpSource, NodeLabeller, RegistrySource, Ssp, SspSpec,
    SspStatus, StorageSpec, TemplateMetadata, TemplateValidator,
};
pub use types::{Condition, ConditionStatus, NodePlacement, Version};
