//! Storage plumbing for URL-addressed dumps.
//!
//! A dump is a compressed byte stream ([`compression`]) of length-prefixed
//! records ([`record`]) stored as one object in an object store
//! ([`object`]) addressed by an [`ObjectUrl`].

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod compression;
pub mod error;
pub mod object;
pub mod object_url;
pub mod record;

pub use compression::{decompressing_reader, CompressedWriter};
pub use error::{Result, StoreError};
pub use object::{LocalObjectStore, MemoryObjectStore, ObjectClient, ObjectStores, ObjectWriter};
pub use object_url::ObjectUrl;
pub use record::{RecordReader, RecordWriter};
