//! Decoder → history → aggregate → fan-out, in that order.

use std::collections::VecDeque;

use tracing::{debug, info};

use telemetry_runtime::Snapshot;

use crate::aggregate::{aggregate, LiveAggregate};
use crate::decoder::decode_snapshot;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::DecodeError;
use crate::fanout::{Fanout, SessionUpdate, UpdateKind};
use crate::history::SessionHistory;
use crate::metrics::SessionMetrics;
use crate::LOG_TARGET;

pub struct SessionPipeline {
    history: SessionHistory,
    aggregate: LiveAggregate,
    fanout: Fanout,
    diagnostics: DiagnosticSink,
    metrics: SessionMetrics,
    sequence: u64,
}

impl SessionPipeline {
    pub fn new(history: SessionHistory, fanout: Fanout, diagnostics: DiagnosticSink) -> Self {
        Self {
            history,
            aggregate: LiveAggregate::default(),
            fanout,
            diagnostics,
            metrics: SessionMetrics::default(),
            sequence: 0,
        }
    }

    /// Decode one inbound payload and append it. Rejected payloads are
    /// reported once and leave the session untouched.
    pub fn ingest(&mut self, payload: &[u8]) -> Result<(), DecodeError> {
        self.metrics.payloads_received += 1;
        match decode_snapshot(payload) {
            Ok(snapshot) => {
                self.append(snapshot);
                Ok(())
            }
            Err(error) => {
                self.metrics.decode_failures += 1;
                self.report(Diagnostic::DecodeRejected {
                    error: error.clone(),
                    bytes: payload.len(),
                });
                Err(error)
            }
        }
    }

    pub fn append(&mut self, snapshot: Snapshot) {
        debug!(
            target: LOG_TARGET,
            cycle = snapshot.cycle_count,
            dooders = snapshot.dooder_count,
            energy = snapshot.energy_count,
            "session.snapshot_accepted"
        );
        if let Some(evicted) = self.history.append(snapshot) {
            debug!(target: LOG_TARGET, cycle = evicted.cycle_count, "session.snapshot_evicted");
        }
        self.metrics.snapshots_accepted += 1;
        self.aggregate = aggregate(self.history.snapshots());
        self.publish(UpdateKind::Appended);
    }

    pub fn reset(&mut self) {
        let dropped = self.history.reset();
        self.metrics.session_resets += 1;
        self.aggregate = aggregate(self.history.snapshots());
        info!(target: LOG_TARGET, dropped, "session.reset");
        self.publish(UpdateKind::SessionReset);
    }

    fn publish(&mut self, kind: UpdateKind) {
        self.sequence += 1;
        let update = SessionUpdate {
            kind,
            sequence: self.sequence,
            snapshots: self.history.snapshots(),
            aggregate: &self.aggregate,
        };
        let panicked = self.fanout.publish(&update);
        for subscriber in panicked {
            self.report(Diagnostic::SubscriberPanicked { subscriber });
        }
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        let dropped = self.diagnostics.report(diagnostic);
        self.metrics.diagnostics_dropped += dropped as u64;
    }

    pub fn snapshots(&self) -> &VecDeque<Snapshot> {
        self.history.snapshots()
    }

    pub fn live_aggregate(&self) -> &LiveAggregate {
        &self.aggregate
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut SessionMetrics {
        &mut self.metrics
    }
}
