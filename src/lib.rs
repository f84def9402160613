//! WebApp operator - converges WebApp custom resources into running workloads
//!
//! A `WebApp` declares a container image, a replica count and whether the
//! application should be exposed through a Service and an Ingress. The
//! operator keeps a Deployment, Service and Ingress in line with that
//! declaration and re-converges whenever either side drifts.
//!
//! # Modules
//!
//! - [`crd`] - The WebApp Custom Resource Definition
//! - [`resources`] - Builders for the managed Deployment, Service and Ingress
//! - [`controller`] - Decision engine, action executor and reconcile orchestrator
//! - [`config`] - Controller configuration
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod resources;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
