//! nodeshare orchestrator library.
//!
//! The orchestrator owns a pool of shared nodes declared in a version
//! controlled config repository and lends them to client parties.
//!
//! ## Architecture
//!
//! - **Reconciler**: fetches the repository, validates it into a
//!   [`ConfigSnapshot`](snapshot::ConfigSnapshot), diffs it against the live
//!   inventory and applies the minimal change set through the node engine
//! - **Pool**: publishes the last good snapshot and inventory atomically,
//!   together with the activation flag and the last error
//! - **Reservation queue**: binds queued demand to idle, active nodes whose
//!   labels satisfy the requested expression
//! - **API**: the versioned protocol endpoints used by client parties
//!
//! This crate primarily ships an `orchestrator` binary, but we expose the
//! library surface for integration testing and reuse.

pub mod api;
pub mod config;
pub mod engine;
pub mod label;
pub mod pool;
pub mod reconciler;
pub mod repo;
pub mod reservation;
pub mod snapshot;
pub mod state;
pub mod worker;
pub mod workload;
