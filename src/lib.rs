//! confgate - control plane for sidecar configuration delivery
//!
//! Sidecar agents hold long-lived sessions against a pool of front-door
//! replicas. When a release is published, the right live agents must be
//! told about it without triggering a reload storm, and new agents must be
//! spread across replicas by load.
//!
//! ## Services
//!
//! - **Sessions**: which agents are live on this replica, with TTL expiry
//! - **Rollout**: staged, rate-limited delivery of release notices
//! - **Replicas**: load-aware replica scheduling fed by membership events

pub mod config;
pub mod replicas;
pub mod rollout;
pub mod server;
pub mod sessions;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GatewayError, Result};
