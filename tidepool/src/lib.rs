//! # Tidepool
//!
//! Run many concurrent state-machine workloads against a shared backend, with
//! synchronized startup, per-workload configuration inheritance and
//! structured failure reporting.
//!
//! ## Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              tidepool (this crate)                          │
//! │   Re-exports all functionality                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     tidepool-harness                        │
//! │  • WorkerPool orchestrator   • Start / error latches        │
//! │  • WorkerThread lifecycle    • Config resolution + pinning  │
//! │  • Session bootstrap         • Command overrides            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     tidepool-core                           │
//! │  Backend traits, error codes, documents, topology,          │
//! │  in-memory backend                                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use tidepool::{Command, MemoryBackend, RawConfig, StaticLoader, WorkerPool, from_fn};
//!
//! let backend = MemoryBackend::new();
//! let loader = StaticLoader::new().with(
//!     "ping",
//!     RawConfig::new()
//!         .thread_count(2)
//!         .state("init", |_, ctx| {
//!             ctx.db.run_command(&Command::new("ping"))?;
//!             Ok(())
//!         }),
//! );
//! let executor = from_fn(|configs, _| {
//!     for config in configs.values_mut() {
//!         let start = config.start_state.clone();
//!         config.run_state(&start)?;
//!     }
//!     Ok(())
//! });
//!
//! let report = WorkerPool::builder(Arc::new(backend), Arc::new(loader), Arc::new(executor))
//!     .workload("ping")
//!     .build()
//!     .run()
//!     .expect("pool run");
//! assert!(report.all_ok());
//! ```
//!
//! ## Which Crate to Use
//!
//! | Use case | Crate |
//! |----------|-------|
//! | Full harness (recommended) | `tidepool` |
//! | Implementing a backend driver | `tidepool-core` |
//!
//! ## Documentation
//!
//! - [`tidepool_core`] - Backend traits, error codes and documents
//! - [`tidepool_harness`] - Worker threads, barriers and the pool

#![deny(missing_docs)]

// Re-export all public items from sub-crates
pub use tidepool_core::*;
pub use tidepool_harness::*;
