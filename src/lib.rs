//! Crosscheck - fraud, dispute and reconciliation engine
//!
//! This library provides the core functionality for the Crosscheck engine:
//! fraud scoring over order signals, the dispute lifecycle with its
//! append-only timeline, evidence pack building and submission, provider
//! transaction reconciliation, and the idempotency ledger that guarantees
//! at-most-once application of external events.

pub mod config;
pub mod db;
pub mod disputes;
pub mod error;
pub mod extractors;
pub mod fraud;
pub mod handlers;
pub mod id;
pub mod idempotency;
pub mod models;
pub mod pagination;
pub mod providers;
pub mod recon;
pub mod util;
