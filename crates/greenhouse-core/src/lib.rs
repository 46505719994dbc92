//! Core data types for the greenhouse dashboard
//!
//! This crate holds the documents the backend stores and serves: sensor
//! measures, FarmBot daily sum-ups, the occupancy-rate model and users.
//! It has no I/O; persistence lives in `greenhouse-db` and the HTTP
//! surface in `greenhouse-server`.

pub mod farmbot;
pub mod occupancy;
pub mod types;
pub mod user;

pub use farmbot::*;
pub use occupancy::*;
pub use types::*;
pub use user::*;
