//! Common types for the HyperConverged operator: CRDs, errors, store access and teardown

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod store;
pub mod teardown;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label carrying the name of the HyperConverged that owns an operand
///
/// Objects without this label, or with a different value, are never
/// deleted or force-overwritten by this operator.
pub const APP_LABEL: &str = "app";

/// Label marking every object this operator manages
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] for objects created by this operator
pub const LABEL_MANAGED_BY_HCO: &str = "hco-operator";

/// Label recording the component an operand belongs to
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Field manager name used for status patches
pub const FIELD_MANAGER: &str = "hco-operator";
