use serde::Serialize;

/// Running counters for one session actor. Never reset by a session reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionMetrics {
    pub payloads_received: u64,
    pub snapshots_accepted: u64,
    pub decode_failures: u64,
    pub inbound_discarded: u64,
    pub session_resets: u64,
    pub commands_sent: u64,
    pub connections_opened: u64,
    pub connection_failures: u64,
    /// Diagnostics a listener missed because its queue was full.
    pub diagnostics_dropped: u64,
}
