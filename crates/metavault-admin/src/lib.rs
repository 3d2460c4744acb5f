//! Extract and restore of cluster metadata.
//!
//! [`AdminServer::extract`] walks a live cluster and emits an ordered stream
//! of versioned operations, either back to the caller or into a compressed
//! object addressed by URL. [`AdminServer::restore`] replays such a stream
//! against another cluster.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod restore;
pub mod server;
pub mod sink;
pub mod sorter;
pub mod transport;
pub mod upgrade;

pub use context::CallContext;
pub use error::{AdminError, ErrorKind, Result};
pub use server::AdminServer;
