//! Front-door replica directory and agent scheduling
//!
//! The directory is fed by an external membership watcher that delivers
//! Put/Delete events in order. Connecting agents ask the scheduler for an
//! ordered list of candidate replicas; the list keeps a coarse bias towards
//! lightly loaded replicas without sending every new agent to the same one.
//!
//! ## Modules
//!
//! - `scheduler` - the directory snapshot and the split-then-shuffle ordering
//! - `feed` - membership event decoding and the feed consumer task

pub mod feed;
pub mod scheduler;

pub use feed::{spawn_membership_task, EventKind, MembershipEvent};
pub use scheduler::{ApplySummary, ReplicaScheduler};

use serde::{Deserialize, Serialize};

use crate::types::{GatewayError, Result};

/// One front-door replica and its instantaneous load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaInfo {
    /// Host or IP agents dial
    pub address: String,
    /// Port agents dial
    pub port: u16,
    /// Number of agent sessions currently held by the replica
    #[serde(default)]
    pub active_session_count: u64,
}

impl ReplicaInfo {
    pub fn new(address: impl Into<String>, port: u16, active_session_count: u64) -> Self {
        Self {
            address: address.into(),
            port,
            active_session_count,
        }
    }

    /// Identity key in the directory (`address:port`)
    pub fn key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Check the fields a membership record must carry
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(GatewayError::InvalidArgument(
                "replica address is empty".into(),
            ));
        }
        if self.port == 0 {
            return Err(GatewayError::InvalidArgument(format!(
                "replica {} has port 0",
                self.address
            )));
        }
        Ok(())
    }

    pub fn candidate(&self) -> Candidate {
        Candidate {
            address: self.address.clone(),
            port: self.port,
        }
    }
}

/// A replica an agent may connect to, as handed back by `schedule`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub address: String,
    pub port: u16,
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Parse an `address:port` string into its parts
pub fn parse_replica_addr(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| GatewayError::InvalidArgument(format!("missing port in '{}'", addr)))?;

    if host.is_empty() {
        return Err(GatewayError::InvalidArgument(format!(
            "missing address in '{}'",
            addr
        )));
    }

    let port: u16 = port
        .parse()
        .map_err(|_| GatewayError::InvalidArgument(format!("bad port in '{}'", addr)))?;
    if port == 0 {
        return Err(GatewayError::InvalidArgument(format!(
            "port 0 in '{}'",
            addr
        )));
    }

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_key() {
        let replica = ReplicaInfo::new("10.0.0.1", 9510, 3);
        assert_eq!(replica.key(), "10.0.0.1:9510");
        assert_eq!(replica.candidate().to_string(), "10.0.0.1:9510");
    }

    #[test]
    fn test_replica_validation() {
        assert!(ReplicaInfo::new("10.0.0.1", 9510, 0).validate().is_ok());
        assert!(ReplicaInfo::new("", 9510, 0).validate().is_err());
        assert!(ReplicaInfo::new("10.0.0.1", 0, 0).validate().is_err());
    }

    #[test]
    fn test_replica_json_uses_camel_case() {
        let replica: ReplicaInfo =
            serde_json::from_str(r#"{"address":"a","port":1,"activeSessionCount":7}"#).unwrap();
        assert_eq!(replica.active_session_count, 7);

        // Load is optional on the wire
        let replica: ReplicaInfo = serde_json::from_str(r#"{"address":"a","port":1}"#).unwrap();
        assert_eq!(replica.active_session_count, 0);
    }

    #[test]
    fn test_parse_replica_addr() {
        assert_eq!(
            parse_replica_addr("feed-0.internal:9510").unwrap(),
            ("feed-0.internal".to_string(), 9510)
        );
        assert!(parse_replica_addr("feed-0.internal").is_err());
        assert!(parse_replica_addr(":9510").is_err());
        assert!(parse_replica_addr("host:port").is_err());
        assert!(parse_replica_addr("host:0").is_err());
    }
}
