// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Operator internals

/// Generic Error for controller and scanner lifecycles
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Kubernetes internal error
    #[error("Kube Error: {0}")]
    Kube(#[from] kube::Error),

    /// `serde` errors
    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML payloads embedded in content
    #[error("Yaml Error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Data stream / ARF / tailoring parse errors
    #[error("Xml Error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Tailoring document emission errors
    #[error("Xml Write Error: {0}")]
    XmlWrite(#[from] quick_xml::Error),

    /// Content that parsed but doesn't hold together
    #[error("Content Error: {0}")]
    Content(String),

    /// Fatal jq filter failures; the benign variants degrade to warnings
    /// before they reach this type
    #[error("Filter Error: {0}")]
    Filter(String),

    /// CEL compilation or evaluation failures surfaced as spec errors
    #[error("Cel Error: {0}")]
    Cel(String),

    /// Validation failures that surface on the owning object's status
    #[error("Invalid Spec: {0}")]
    InvalidSpec(String),

    /// Local artifact handling in scanner and aggregator paths
    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic string error messages
    #[error("{0}")]
    Message(String),

    /// Represents any foreign error
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

/// Generic result type to be used across the operator
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod aggregator;
pub mod cel;
pub mod config;
pub mod controller;
mod diagnostics;
pub mod fetcher;
pub mod filter;
pub mod metrics;
pub mod planner;
pub mod rule_metadata;
pub mod scheduling;
pub mod xccdf;

pub mod lease;
pub mod telemetry;

pub use crate::controller::{run, State};
pub use crate::diagnostics::*;
