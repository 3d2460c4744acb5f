//! Shared metavault data model.
//!
//! Point-in-time facts about a cluster (repositories, commits, branches,
//! pipelines, jobs, auth and enterprise state), the operation payloads that
//! recreate them, and the versioned [`Envelope`](envelope::Envelope) that
//! carries exactly one operation on the wire.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod compression;
pub mod enterprise;
pub mod envelope;
pub mod op;
pub mod pfs;
pub mod pps;
pub mod request;
pub mod version;

pub use envelope::{Envelope, EnvelopeError};
pub use op::{Op, OpV1_11, OpV1_12};
pub use request::{ExtractRequest, RestoreRequest};
pub use version::OpVersion;
