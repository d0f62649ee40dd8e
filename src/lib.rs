//! Skiff - bootstrap a small k3s cluster onto one or two remote hosts
//!
//! Skiff drives a pre-built k3s distribution into existence on a
//! single-board or appliance device. Two topologies are supported:
//!
//! - A control-plane container started locally, with the remote host
//!   joined to it as a worker
//! - A self-contained single-node cluster running entirely on the
//!   remote host
//!
//! In both cases the run is a strict sequence: probe connectivity,
//! resolve the advertise address, install the control plane, wait for
//! readiness, join the worker, wait for registration, label the node,
//! apply add-ons, and report the final cluster state. Every step either
//! completes or aborts the run; there is no rollback.
//!
//! # Modules
//!
//! - [`config`] - Immutable run configuration and topology selection
//! - [`remote`] - SSH-mediated remote command channel
//! - [`probe`] - Connectivity and authentication pre-flight
//! - [`route`] - Local advertise-address resolution
//! - [`retry`] - Bounded-retry readiness polling
//! - [`control_plane`] - Control-plane installer (both topologies)
//! - [`kubeconfig`] - Access credential retrieval and rewriting
//! - [`join`] - Worker agent installation and registration
//! - [`kubectl`] - Structured cluster API access (nodes, labels, apply)
//! - [`addons`] - Static add-on manifests and best-effort application
//! - [`report`] - Final cluster state summary
//! - [`orchestrator`] - The phased bootstrap sequence
//! - [`error`] - Error types for the orchestrator

#![deny(missing_docs)]

pub mod addons;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod join;
pub mod kubeconfig;
pub mod kubectl;
pub mod orchestrator;
pub mod probe;
pub mod remote;
pub mod report;
pub mod retry;
pub mod route;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Centralizing these here keeps CLI defaults, installer commands, and test
// fixtures consistent.

/// Pinned k3s distribution version installed when none is specified
pub const DEFAULT_K3S_VERSION: &str = "v1.30.4+k3s1";

/// Port the k3s supervisor and API server listen on
pub const SUPERVISOR_PORT: u16 = 6443;

/// Name of the local control-plane container
pub const SERVER_CONTAINER: &str = "skiff-server";

/// NodePort the sample workload service is exposed on
pub const SAMPLE_NODE_PORT: u16 = 30080;

/// NodePort the dashboard service is exposed on
pub const DASHBOARD_NODE_PORT: u16 = 30443;

/// NodePort the CI server service is exposed on
pub const CI_NODE_PORT: u16 = 30800;
