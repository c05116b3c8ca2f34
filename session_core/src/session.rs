//! The single-writer session state: connection, pipeline and last error.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use telemetry_runtime::{Command, Snapshot};

use crate::aggregate::LiveAggregate;
use crate::connection::{
    ConnectionManager, ConnectionState, Connector, LinkEvent, LinkOutcome, ReconnectPolicy,
};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::dispatcher::CommandDispatcher;
use crate::error::{CommandError, SessionFault};
use crate::fanout::Fanout;
use crate::history::SessionHistory;
use crate::metrics::SessionMetrics;
use crate::pipeline::SessionPipeline;

/// What a dashboard should show when it has nothing else to go on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    Failed,
    Empty,
    Live,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub connection: ConnectionState,
    pub last_error: Option<SessionFault>,
    pub session_len: usize,
}

impl SessionStatus {
    pub fn phase(&self) -> SessionPhase {
        if self.connection == ConnectionState::Connecting {
            SessionPhase::Loading
        } else if self.last_error.is_some() {
            SessionPhase::Failed
        } else if self.session_len == 0 {
            SessionPhase::Empty
        } else {
            SessionPhase::Live
        }
    }
}

pub struct SessionCore {
    connection: ConnectionManager,
    pipeline: SessionPipeline,
    last_error: Option<SessionFault>,
}

impl SessionCore {
    pub fn new(
        endpoint: impl Into<String>,
        policy: ReconnectPolicy,
        history_limit: Option<usize>,
        connector: Arc<dyn Connector>,
        events: UnboundedSender<LinkEvent>,
        fanout: Fanout,
        diagnostics: DiagnosticSink,
    ) -> Self {
        Self {
            connection: ConnectionManager::new(endpoint, policy, connector, events),
            pipeline: SessionPipeline::new(
                SessionHistory::with_limit(history_limit),
                fanout,
                diagnostics,
            ),
            last_error: None,
        }
    }

    pub fn open(&mut self) -> bool {
        let started = self.connection.open();
        if started {
            self.last_error = None;
        }
        started
    }

    pub fn close(&mut self) -> bool {
        self.connection.close()
    }

    pub fn handle_link_event(&mut self, event: LinkEvent) {
        match self.connection.handle_event(event) {
            LinkOutcome::Opened => {
                self.pipeline.metrics_mut().connections_opened += 1;
                self.last_error = None;
                self.pipeline.reset();
            }
            LinkOutcome::Payload(bytes) => {
                let _ = self.pipeline.ingest(&bytes);
            }
            LinkOutcome::Discarded { state, bytes } => {
                self.pipeline.metrics_mut().inbound_discarded += 1;
                self.pipeline
                    .report(Diagnostic::InboundDiscarded { state, bytes });
            }
            LinkOutcome::Failed(err) | LinkOutcome::Dropped(err) => {
                self.pipeline.metrics_mut().connection_failures += 1;
                self.last_error = Some(err.clone().into());
                self.pipeline.report(Diagnostic::Connection(err));
            }
            LinkOutcome::Ignored => {}
        }
    }

    pub fn dispatch(&mut self, command: Command) -> Result<(), CommandError> {
        let result = CommandDispatcher::new(&mut self.connection, &mut self.pipeline).dispatch(command);
        match &result {
            Ok(()) => self.last_error = None,
            Err(err) => self.last_error = Some(err.clone().into()),
        }
        result
    }

    /// Clear the local session without telling the backend.
    pub fn reset_session(&mut self) {
        self.pipeline.reset();
    }

    pub fn snapshots(&self) -> &VecDeque<Snapshot> {
        self.pipeline.snapshots()
    }

    pub fn live_aggregate(&self) -> &LiveAggregate {
        self.pipeline.live_aggregate()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            connection: self.connection.state(),
            last_error: self.last_error.clone(),
            session_len: self.pipeline.len(),
        }
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.pipeline.metrics()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crossbeam_channel::Receiver;
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::connection::testing::MemoryConnector;
    use crate::connection::{LinkEventKind, Outbound};
    use crate::error::{ConnectionError, DecodeError};
    use crate::fanout::UpdateKind;
    use telemetry_runtime::ParameterError;

    struct Harness {
        core: SessionCore,
        connector: Arc<MemoryConnector>,
        diagnostics: Receiver<Diagnostic>,
        fanout: Fanout,
    }

    impl Harness {
        fn new(policy: ReconnectPolicy) -> Self {
            let connector = Arc::new(MemoryConnector::default());
            let (events, _rx) = unbounded_channel();
            let sink = DiagnosticSink::default();
            let diagnostics = sink.listen();
            let fanout = Fanout::new();
            let core = SessionCore::new(
                "ws://test/ExperimentData",
                policy,
                None,
                connector.clone(),
                events,
                fanout.clone(),
                sink,
            );
            Self {
                core,
                connector,
                diagnostics,
                fanout,
            }
        }

        fn opened() -> Self {
            let mut harness = Self::new(ReconnectPolicy::default());
            harness.core.open();
            harness.link(LinkEventKind::Opened);
            harness
        }

        fn link(&mut self, kind: LinkEventKind) {
            let generation = self.core.connection.generation();
            self.core.handle_link_event(LinkEvent { generation, kind });
        }

        fn receive(&mut self, text: &str) {
            self.link(LinkEventKind::Payload(text.as_bytes().to_vec()));
        }

        fn diagnostics(&self) -> Vec<Diagnostic> {
            self.diagnostics.try_iter().collect()
        }
    }

    #[test]
    fn malformed_payload_is_dropped_between_valid_snapshots() {
        let mut h = Harness::opened();
        h.receive(r#"{"cycleCount":1,"dooderCount":10,"energyCount":5}"#);
        h.receive(r#"{"cycleCount":2,"dooderCount":9,"energyCount":6}"#);
        h.receive(r#"{"cycleCount":"#);
        h.receive(r#"{"cycleCount":3,"dooderCount":8,"energyCount":7}"#);

        let cycles: Vec<u64> = h.core.snapshots().iter().map(|s| s.cycle_count).collect();
        assert_eq!(cycles, vec![1, 2, 3]);
        assert_eq!(h.core.live_aggregate().cycle_count, 3);
        assert_eq!(h.core.live_aggregate().dooder_count, 8);

        let diagnostics = h.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            diagnostics[0],
            Diagnostic::DecodeRejected {
                error: DecodeError::MalformedPayload { .. },
                ..
            }
        ));
        assert_eq!(h.core.status().phase(), SessionPhase::Live);
    }

    #[test]
    fn schema_mismatches_are_reported_once_each() {
        let mut h = Harness::opened();
        h.receive(r#"{"cycleCount":1,"dooderCount":10,"energyCount":5}"#);
        for bad in [
            r#"{"cycleCount":2,"dooderCount":9}"#,
            r#"{"cycleCount":2,"dooderCount":-1,"energyCount":6}"#,
            r#"{"cycleCount":2.5,"dooderCount":9,"energyCount":6}"#,
        ] {
            h.receive(bad);
        }
        assert_eq!(h.core.snapshots().len(), 1);
        assert_eq!(h.diagnostics().len(), 3);
        assert_eq!(h.core.metrics().decode_failures, 3);
    }

    #[test]
    fn start_clears_history_before_sending() {
        let mut h = Harness::opened();
        h.receive(r#"{"cycleCount":9,"dooderCount":1,"energyCount":1}"#);

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let _sub = h.fanout.subscribe(move |update| {
            sink.lock().unwrap().push((update.kind, update.snapshots.len()));
        });

        h.core.dispatch(Command::Start { steps: 100, agents: 10 }).unwrap();

        assert!(h.core.snapshots().is_empty());
        assert!(h.core.live_aggregate().is_default());
        assert_eq!(
            *observed.lock().unwrap(),
            vec![(UpdateKind::SessionReset, 0)]
        );
        let frames = h.connector.sent_frames();
        let [Outbound::Text(text)] = frames.as_slice() else {
            panic!("expected one text frame, got {frames:?}");
        };
        insta::assert_snapshot!(text, @r###"{"steps":100,"agents":10}"###);
    }

    #[test]
    fn invalid_start_neither_resets_nor_sends() {
        let mut h = Harness::opened();
        h.receive(r#"{"cycleCount":1,"dooderCount":1,"energyCount":1}"#);

        for (steps, agents, name) in [(0, 5, "steps"), (5, 0, "agents")] {
            let err = h.core.dispatch(Command::Start { steps, agents }).unwrap_err();
            assert_eq!(
                err,
                CommandError::InvalidParameter(ParameterError::NotPositive { name })
            );
        }
        assert_eq!(h.core.snapshots().len(), 1);
        assert!(h.connector.sent_frames().is_empty());
        assert_eq!(h.core.status().phase(), SessionPhase::Failed);
    }

    #[test]
    fn start_while_disconnected_fails_without_side_effects() {
        let mut h = Harness::new(ReconnectPolicy::default());
        let err = h.core.dispatch(Command::Start { steps: 100, agents: 10 }).unwrap_err();
        assert_eq!(
            err,
            CommandError::NotConnected(ConnectionError::NotConnected {
                state: ConnectionState::Disconnected
            })
        );
        assert!(h.connector.requests.lock().unwrap().is_empty());
        assert_eq!(h.core.metrics().session_resets, 0);
        assert_eq!(h.core.metrics().commands_sent, 0);
    }

    #[test]
    fn start_on_a_dead_link_reports_the_reset() {
        let mut h = Harness::opened();
        h.receive(r#"{"cycleCount":4,"dooderCount":1,"energyCount":1}"#);
        h.connector.outbound.lock().unwrap().clear();

        let err = h.core.dispatch(Command::Start { steps: 100, agents: 10 }).unwrap_err();

        let lost = ConnectionError::RemoteClosed {
            reason: Some("link task ended".into()),
        };
        assert_eq!(err, CommandError::StartAborted(lost));
        assert_eq!(
            err.to_string(),
            "session was reset but start was not sent: remote closed the connection (link task ended)"
        );
        assert!(h.core.snapshots().is_empty());
        assert_eq!(h.core.metrics().commands_sent, 0);
        assert_eq!(h.core.status().last_error, Some(SessionFault::Command(err)));
        assert_eq!(h.core.status().phase(), SessionPhase::Failed);
    }

    #[test]
    fn stop_on_a_dead_link_is_not_connected() {
        let mut h = Harness::opened();
        h.connector.outbound.lock().unwrap().clear();
        assert!(matches!(
            h.core.dispatch(Command::Stop),
            Err(CommandError::NotConnected(ConnectionError::RemoteClosed { .. }))
        ));
    }

    #[test]
    fn stop_and_reset_keep_the_session() {
        let mut h = Harness::opened();
        h.receive(r#"{"cycleCount":1,"dooderCount":1,"energyCount":1}"#);
        h.core.dispatch(Command::Stop).unwrap();
        h.core.dispatch(Command::Reset).unwrap();

        assert_eq!(h.core.snapshots().len(), 1);
        assert_eq!(
            h.connector.sent_frames(),
            vec![
                Outbound::Text(r#"{"command":"stop"}"#.into()),
                Outbound::Text(r#"{"command":"reset"}"#.into()),
            ]
        );
        assert_eq!(h.core.metrics().commands_sent, 2);
    }

    #[test]
    fn payloads_before_open_are_discarded_with_a_diagnostic() {
        let mut h = Harness::new(ReconnectPolicy::default());
        h.core.open();
        h.receive(r#"{"cycleCount":1,"dooderCount":1,"energyCount":1}"#);

        assert!(h.core.snapshots().is_empty());
        assert_eq!(
            h.diagnostics(),
            vec![Diagnostic::InboundDiscarded {
                state: ConnectionState::Connecting,
                bytes: 48
            }]
        );
        assert_eq!(h.core.status().phase(), SessionPhase::Loading);
    }

    #[test]
    fn reconnect_starts_a_fresh_session() {
        let mut h = Harness::opened();
        h.receive(r#"{"cycleCount":5,"dooderCount":1,"energyCount":1}"#);
        h.link(LinkEventKind::Closed {
            reason: Some("server restart".into()),
        });

        let status = h.core.status();
        assert_eq!(status.connection, ConnectionState::Disconnected);
        assert_eq!(
            status.last_error,
            Some(SessionFault::Connection(ConnectionError::RemoteClosed {
                reason: Some("server restart".into())
            }))
        );
        assert_eq!(status.phase(), SessionPhase::Failed);
        // The old data stays readable until a new link opens.
        assert_eq!(h.core.snapshots().len(), 1);

        h.core.open();
        h.link(LinkEventKind::Opened);
        assert!(h.core.snapshots().is_empty());
        assert_eq!(h.core.status().phase(), SessionPhase::Empty);
        assert_eq!(h.core.metrics().connections_opened, 2);
    }

    #[test]
    fn explicit_session_reset_notifies_with_reset_tag() {
        let mut h = Harness::opened();
        h.receive(r#"{"cycleCount":1,"dooderCount":1,"energyCount":1}"#);
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        let _sub = h.fanout.subscribe(move |update| sink.lock().unwrap().push(update.kind));

        h.core.reset_session();

        assert!(h.core.snapshots().is_empty());
        assert_eq!(*kinds.lock().unwrap(), vec![UpdateKind::SessionReset]);
    }
}
