//! nodeshare executor library.
//!
//! Everything a client party needs to borrow nodes from an orchestrator:
//!
//! - [`OrchestratorClient`](client::OrchestratorClient): HTTP transport with
//!   connect and read timeouts; [`discover`](client::OrchestratorClient::discover)
//!   performs the handshake and yields a [`Session`](client::Session)
//! - [`WorkloadReporter`](reporter::WorkloadReporter): periodically reports the
//!   party's pending demand
//! - [`NodeDisposal`](disposal::NodeDisposal): returns a borrowed node

pub mod client;
pub mod config;
pub mod disposal;
pub mod error;
pub mod reporter;

pub use client::{OrchestratorClient, ReturnOutcome, Session};
pub use error::ClientError;
