//! Firewall control plane.
//!
//! Maintains the blocked-IP, allowed-IP and blocked-MAC lists, keeps the
//! packet filter in line with them, and derives traffic statistics and DDoS
//! alerts from the request ledger.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;
