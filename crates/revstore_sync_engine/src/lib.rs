//! # revstore sync engine
//!
//! Replica reconciliation for revstore.
//!
//! This crate provides:
//! - The [`ReplicaEndpoint`] transport seam, with an in-process
//!   implementation and one that round-trips every message through CBOR
//! - The [`Reconciler`], which makes a follower's collection converge to a
//!   leader's by exchanging revision trees and moving only the differing
//!   ranges
//! - Retry with exponential backoff and jitter, a polling deadline, and
//!   cooperative cancellation
//!
//! ## Key Invariants
//!
//! - Reconciliation reads pinned snapshots only; it never blocks writers
//! - Both snapshots are released when a round ends, successful or not
//! - Documents keep the revision minted by the leader

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod endpoint;
mod error;
mod reconcile;

pub use config::{ReconcileConfig, RetryConfig};
pub use endpoint::{LocalEndpoint, ProtocolEndpoint, ReplicaEndpoint};
pub use error::{SyncError, SyncResult};
pub use reconcile::{ReconcileReport, ReconcileStats, Reconciler};
