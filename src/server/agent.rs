//! Agent connection handling
//!
//! The transport decodes pings from one agent stream into `Heartbeat`s and
//! feeds them here. Each stream owns one notification channel; every session
//! it refreshes is bound to that channel, and tearing the stream down removes
//! exactly those sessions.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::state::AppState;
use crate::sessions::{ChannelId, Heartbeat, ReleaseNotice, SessionIdentity};
use crate::types::Result;

/// One agent connection on this replica
pub struct AgentStream {
    state: Arc<AppState>,
    channel: ChannelId,
    /// Sessions this stream has flushed
    sessions: HashSet<SessionIdentity>,
    closed: bool,
}

/// Totals for a finished agent stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub heartbeats: usize,
    pub rejected: usize,
}

impl AgentStream {
    /// Open a stream; the caller reads release notices from the returned receiver
    pub fn open(state: &Arc<AppState>) -> (Self, mpsc::Receiver<ReleaseNotice>) {
        let (channel, notices) = state.notifier.open_channel();
        debug!(channel = %channel, "Agent stream opened");
        (
            Self {
                state: Arc::clone(state),
                channel,
                sessions: HashSet::new(),
                closed: false,
            },
            notices,
        )
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Record a heartbeat received on this stream
    pub fn heartbeat(&mut self, heartbeat: Heartbeat) -> Result<()> {
        let identity = heartbeat.identity();
        self.state.registry.flush_session(heartbeat, self.channel)?;
        self.sessions.insert(identity);
        Ok(())
    }

    /// Tear the stream down: drop its sessions and close its channel
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for identity in self.sessions.drain() {
            if let Err(e) = self
                .state
                .registry
                .delete_session_for_channel(&identity, self.channel)
            {
                warn!(session = %identity, error = %e, "Failed to remove session on disconnect");
            }
        }
        self.state.notifier.close_channel(self.channel);
        debug!(channel = %self.channel, "Agent stream closed");
    }
}

impl Drop for AgentStream {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Consume heartbeats until the transport closes the stream, then tear down
pub async fn serve_agent(
    mut stream: AgentStream,
    mut heartbeats: mpsc::Receiver<Heartbeat>,
) -> StreamSummary {
    let mut summary = StreamSummary::default();

    while let Some(heartbeat) = heartbeats.recv().await {
        let address = heartbeat.address.clone();
        match stream.heartbeat(heartbeat) {
            Ok(()) => summary.heartbeats += 1,
            Err(e) => {
                warn!(address = %address, error = %e, "Rejected heartbeat");
                summary.rejected += 1;
            }
        }
    }

    info!(
        channel = %stream.channel(),
        heartbeats = summary.heartbeats,
        rejected = summary.rejected,
        "Agent stream ended"
    );
    stream.close();
    summary
}
