//! The cluster services that extract reads from and restore writes to.
//!
//! Provides the [`PfsApi`], [`PpsApi`], [`ObjectApi`], [`EnterpriseApi`] and
//! [`AuthApi`] traits, the [`ClusterClient`] handle that bundles them, and
//! [`MemoryCluster`], an in-memory implementation that enforces the same
//! creation-order preconditions a live cluster does.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod error;
pub mod memory;

pub use api::{AuthApi, ClusterClient, EnterpriseApi, Listing, ObjectApi, PfsApi, PpsApi};
pub use error::{ClusterError, Result};
pub use memory::MemoryCluster;
