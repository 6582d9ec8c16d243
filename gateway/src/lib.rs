//! Gateway between recorded gameplay tapes and on-chain score claims.
//!
//! The gateway owns a single proof-job slot: a tape is admitted, dispatched
//! to the remote proving service, polled to completion, and the resulting
//! journal is settled against the score contract through a relay. Clients
//! poll the job until it reaches a terminal state.

pub mod auth;
pub mod classify;
pub mod config;
pub mod handlers;
pub mod health;
pub mod jobs;
pub mod ledger;
pub mod prover;
pub mod response;
pub mod settle;
pub mod slot;
pub mod types;
pub mod xdr;

pub use config::{AppState, GatewayConfig};
pub use jobs::{Orchestrator, RetryPolicy, SubmitError};
pub use types::{JobStatus, ProofJob};
