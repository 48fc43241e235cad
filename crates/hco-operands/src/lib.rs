//! Operand reconciliation for the HyperConverged operator
//!
//! An operand is a dependent object derived from the `HyperConverged` spec.
//! This crate builds the desired operand ([`ssp::new_ssp`]), assembles the
//! boot image templates it carries ([`templates`]), and drives it towards
//! that desired state through the generic [`operand::OperandHandler`].

#![deny(missing_docs)]

pub mod cache;
pub mod operand;
pub mod related;
pub mod request;
pub mod ssp;
pub mod templates;

pub use operand::{OperandHandler, OperandHooks, ReconcileResult};
pub use request::HcoRequest;
pub use ssp::SspHooks;
pub use templates::TemplateRegistry;
