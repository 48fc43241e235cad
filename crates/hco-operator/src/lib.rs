//! HyperConverged operator: parent controller, process configuration and
//! owner-chain discovery

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod owner;
