//! # tidepool-core
//!
//! Core vocabulary shared by the tidepool workload harness and the backends it
//! drives.
//!
//! - **Backend traits**: [`BackendDriver`], [`Connection`], [`Session`] and
//!   [`Database`], the only way the harness reaches a backend
//! - **Error codes**: [`ErrorCode`] with [`ErrorCategory`] flags, wrapped in
//!   [`BackendError`]
//! - **Documents**: [`Document`] and the recursive [`deep_merge`] used for
//!   workload configuration inheritance
//! - **Topology**: [`Topology`] and the [`ClusterInfo`] address book
//! - **Test double**: [`MemoryBackend`], an in-process backend with failure
//!   injection and handle accounting

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod backend;
mod codes;
mod document;
mod error;
pub mod memory;
mod topology;

// Backend exports
pub use backend::{
    BackendDriver, ClusterTime, Command, Connection, Database, Session, SessionOptions, Timestamp,
};

// Error exports
pub use codes::{ErrorCategory, ErrorCode, UnknownErrorCode};
pub use error::{BackendError, BackendResult};

// Data exports
pub use document::{Document, deep_merge, merge_layers};
pub use topology::{ClusterInfo, Topology};

pub use memory::{MemoryBackend, RecordedCommand};
