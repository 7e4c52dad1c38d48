//! Configuration for confgate
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::time::Duration;
use uuid::Uuid;

use crate::rollout::RolloutConfig;
use crate::types::{GatewayError, Result};

/// confgate - control plane for sidecar configuration delivery
#[derive(Parser, Debug, Clone)]
#[command(name = "confgate")]
#[command(about = "Session registry, staged rollouts and replica scheduling for config sidecars")]
pub struct Args {
    /// Unique node identifier for this replica
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Comma-separated list of front-door replicas to seed the directory with
    /// e.g. "10.0.0.1:9510,10.0.0.2:9510"
    /// The membership feed keeps the directory current after startup
    #[arg(long, env = "REPLICAS")]
    pub replicas: Option<String>,

    /// Maximum number of candidates returned to a connecting agent (0 = all)
    #[arg(long, env = "SCHEDULER_MAX_CANDIDATES", default_value = "3")]
    pub scheduler_max_candidates: usize,

    /// Lower bound applied to the TTL an agent declares in its heartbeat (0 = none)
    #[arg(long, env = "SESSION_MIN_TTL_MS", default_value = "0")]
    pub session_min_ttl_ms: u64,

    /// Upper bound applied to the TTL an agent declares in its heartbeat
    #[arg(long, env = "SESSION_MAX_TTL_SECS", default_value = "3600")]
    pub session_max_ttl_secs: u64,

    /// Interval of the expired-session reaper (0 disables it; reads stay lazy)
    #[arg(long, env = "REAPER_INTERVAL_SECS", default_value = "30")]
    pub reaper_interval_secs: u64,

    /// Interval of the periodic status log line (0 disables it)
    #[arg(long, env = "STATS_INTERVAL_SECS", default_value = "60")]
    pub stats_interval_secs: u64,

    /// Buffered release notices per agent channel
    #[arg(long, env = "NOTIFY_BUFFER", default_value = "16")]
    pub notify_buffer: usize,

    /// Staged rollout defaults
    #[command(flatten)]
    pub rollout: RolloutArgs,
}

/// Staged rollout configuration
#[derive(Parser, Debug, Clone)]
pub struct RolloutArgs {
    /// Desired number of batches per publish
    #[arg(long, env = "ROLLOUT_STEPS", default_value = "4")]
    pub rollout_steps: usize,

    /// Smallest batch a rollout will produce
    #[arg(long, env = "ROLLOUT_MIN_BATCH", default_value = "10")]
    pub rollout_min_batch: usize,

    /// Delay between consecutive batches in milliseconds
    #[arg(long, env = "ROLLOUT_DELAY_MS", default_value = "5000")]
    pub rollout_delay_ms: u64,
}

impl Args {
    /// Get the list of seed replica addresses
    pub fn replica_seed_list(&self) -> Vec<String> {
        match self.replicas {
            Some(ref list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Rollout parameters used when a publish does not override them
    pub fn rollout_config(&self) -> RolloutConfig {
        RolloutConfig {
            step_count: self.rollout.rollout_steps,
            min_batch_size: self.rollout.rollout_min_batch,
            inter_batch_delay: Duration::from_millis(self.rollout.rollout_delay_ms),
        }
    }

    /// TTL clamp applied to heartbeats, as (min, max)
    pub fn session_ttl_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.session_min_ttl_ms),
            Duration::from_secs(self.session_max_ttl_secs),
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rollout.rollout_steps == 0 {
            return Err(GatewayError::Config("ROLLOUT_STEPS must be at least 1".into()));
        }

        if self.rollout.rollout_min_batch == 0 {
            return Err(GatewayError::Config("ROLLOUT_MIN_BATCH must be at least 1".into()));
        }

        if self.notify_buffer == 0 {
            return Err(GatewayError::Config("NOTIFY_BUFFER must be at least 1".into()));
        }

        let (min_ttl, max_ttl) = self.session_ttl_bounds();
        if max_ttl.is_zero() || min_ttl > max_ttl {
            return Err(GatewayError::Config(
                "SESSION_MAX_TTL_SECS must be non-zero and not below SESSION_MIN_TTL_MS".into(),
            ));
        }

        for addr in self.replica_seed_list() {
            crate::replicas::parse_replica_addr(&addr).map_err(|e| {
                GatewayError::Config(format!("Invalid REPLICAS entry '{}': {}", addr, e))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["confgate"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert!(args.replica_seed_list().is_empty());

        let rollout = args.rollout_config();
        assert_eq!(rollout.step_count, 4);
        assert_eq!(rollout.min_batch_size, 10);
        assert_eq!(rollout.inter_batch_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_replica_seed_list_trims_entries() {
        let args = parse(&["--replicas", " 10.0.0.1:9510, ,10.0.0.2:9510 "]);
        assert_eq!(
            args.replica_seed_list(),
            vec!["10.0.0.1:9510".to_string(), "10.0.0.2:9510".to_string()]
        );
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_replica_entry() {
        let args = parse(&["--replicas", "10.0.0.1"]);
        let err = args.validate().unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        assert!(err.to_string().contains("10.0.0.1"));
    }

    #[test]
    fn test_rejects_zero_steps() {
        let args = parse(&["--rollout-steps", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_ttl_bounds() {
        let args = parse(&["--session-min-ttl-ms", "7200000", "--session-max-ttl-secs", "60"]);
        assert!(matches!(args.validate(), Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_ttl_floor_defaults_to_zero() {
        let args = parse(&[]);
        assert_eq!(args.session_ttl_bounds().0, Duration::ZERO);

        let args = parse(&["--session-min-ttl-ms", "0"]);
        assert!(args.validate().is_ok());

        let args = parse(&["--session-max-ttl-secs", "0"]);
        assert!(matches!(args.validate(), Err(GatewayError::Config(_))));
    }
}
