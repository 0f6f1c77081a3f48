//! Portfolio drift monitoring and alerting core
//!
//! The library underneath the dashboard UI: normalizes the backend's
//! allocation payloads, computes and classifies drift, balances target
//! allocations, and manages alert rules through a cached, optimistic
//! store. UI shells consume the `dashboard` coordinator and the alert
//! store; everything talks to the backend through the injectable traits
//! in `api`.

pub mod alerts;
pub mod allocation;
pub mod api;
pub mod dashboard;
pub mod drift;
pub mod models;
pub mod rebalance;
