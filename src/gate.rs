use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::platform::Transport;

/// Restricts the bot to members of a required channel.
///
/// With no channel configured the gate is open. Otherwise every check is a
/// live query, and any failure to get an answer counts as "not a member".
pub struct MembershipGate {
    transport: Arc<dyn Transport>,
    channel: Option<String>,
    timeout: Duration,
}

impl MembershipGate {
    pub fn new(transport: Arc<dyn Transport>, channel: Option<String>, timeout: Duration) -> Self {
        Self {
            transport,
            channel,
            timeout,
        }
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub async fn is_member(&self, user_id: u64) -> bool {
        let Some(channel) = self.channel.as_deref() else {
            return true;
        };

        let query = self.transport.membership_status(channel, user_id);
        match tokio::time::timeout(self.timeout, query).await {
            Ok(Ok(status)) => {
                debug!("User {} membership in {}: {:?}", user_id, channel, status);
                status.grants_access()
            }
            Ok(Err(e)) => {
                warn!("Membership check for {} failed: {:#}", user_id, e);
                false
            }
            Err(_) => {
                warn!("Membership check for {} timed out", user_id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MembershipStatus;
    use crate::testing::RecordingTransport;

    fn gate(transport: Arc<RecordingTransport>, channel: Option<&str>) -> MembershipGate {
        MembershipGate::new(
            transport,
            channel.map(str::to_string),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_open_gate_admits_anyone() {
        let transport = Arc::new(RecordingTransport::new());
        let gate = gate(transport.clone(), None);

        for user_id in [0, 1, u64::MAX] {
            assert!(gate.is_member(user_id).await);
        }
        assert_eq!(transport.membership_queries(), 0);
    }

    #[tokio::test]
    async fn test_member_statuses() {
        let transport = Arc::new(
            RecordingTransport::new()
                .member(1, MembershipStatus::Owner)
                .member(2, MembershipStatus::Administrator)
                .member(3, MembershipStatus::Member)
                .member(4, MembershipStatus::Left)
                .member(5, MembershipStatus::Banned)
                .member(6, MembershipStatus::Restricted),
        );
        let gate = gate(transport, Some("@news"));

        assert!(gate.is_member(1).await);
        assert!(gate.is_member(2).await);
        assert!(gate.is_member(3).await);
        assert!(!gate.is_member(4).await);
        assert!(!gate.is_member(5).await);
        assert!(!gate.is_member(6).await);
    }

    #[tokio::test]
    async fn test_query_error_fails_closed() {
        let transport = Arc::new(RecordingTransport::new());
        let gate = gate(transport.clone(), Some("@news"));

        assert!(!gate.is_member(42).await);
        assert!(!gate.is_member(42).await);
        // No caching between checks
        assert_eq!(transport.membership_queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_times_out_closed() {
        let transport = Arc::new(
            RecordingTransport::new()
                .member(1, MembershipStatus::Member)
                .slow_membership(Duration::from_secs(30)),
        );
        let gate = gate(transport, Some("@news"));

        assert!(!gate.is_member(1).await);
    }
}
