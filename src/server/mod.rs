//! Control-plane server
//!
//! - `state` - the shared `AppState` context and the `run` loop
//! - `agent` - per-connection heartbeat handling
//! - `status` - load and version reporting for the metrics exporter

pub mod agent;
pub mod state;
pub mod status;

pub use agent::{serve_agent, AgentStream, StreamSummary};
pub use state::{run, AppState};
pub use status::StatusReport;
