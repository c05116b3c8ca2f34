//! Reported-but-recovered problems.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::connection::ConnectionState;
use crate::error::{ConnectionError, DecodeError};
use crate::{DIAGNOSTICS_TARGET, LOG_TARGET};

pub const DEFAULT_DIAGNOSTIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    DecodeRejected { error: DecodeError, bytes: usize },
    InboundDiscarded { state: ConnectionState, bytes: usize },
    Connection(ConnectionError),
    SubscriberPanicked { subscriber: u64 },
}

impl Diagnostic {
    pub fn event_name(&self) -> &'static str {
        match self {
            Diagnostic::DecodeRejected { .. } => "session.decode_rejected",
            Diagnostic::InboundDiscarded { .. } => "session.inbound_discarded",
            Diagnostic::Connection(_) => "session.connection_error",
            Diagnostic::SubscriberPanicked { .. } => "session.subscriber_panicked",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DecodeRejected { error, bytes } => {
                write!(f, "dropped {bytes}-byte payload: {error}")
            }
            Diagnostic::InboundDiscarded { state, bytes } => {
                write!(f, "discarded {bytes}-byte payload received while {state}")
            }
            Diagnostic::Connection(err) => write!(f, "{err}"),
            Diagnostic::SubscriberPanicked { subscriber } => {
                write!(f, "subscriber {subscriber} panicked and was removed")
            }
        }
    }
}

/// Logs each diagnostic and forwards it to every live listener.
///
/// Listener queues are bounded; a report that finds a queue full is dropped
/// for that listener and counted in the return value of [`report`]. Listeners
/// whose receiver has gone away are pruned.
///
/// [`report`]: DiagnosticSink::report
#[derive(Debug, Clone)]
pub struct DiagnosticSink {
    listeners: Arc<Mutex<Vec<Sender<Diagnostic>>>>,
    capacity: usize,
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new(DEFAULT_DIAGNOSTIC_CAPACITY)
    }
}

impl DiagnosticSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Attach a listener that sees every diagnostic reported from now on,
    /// up to the queue capacity.
    pub fn listen(&self) -> Receiver<Diagnostic> {
        let (sender, receiver) = bounded(self.capacity);
        self.lock().push(sender);
        receiver
    }

    /// Returns how many listeners missed this diagnostic because their
    /// queue was full.
    pub fn report(&self, diagnostic: Diagnostic) -> usize {
        warn!(
            target: DIAGNOSTICS_TARGET,
            kind = diagnostic.event_name(),
            detail = %diagnostic,
            "session.diagnostic"
        );
        let mut dropped = 0;
        self.lock()
            .retain(|sender| match sender.try_send(diagnostic.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
        if dropped > 0 {
            debug!(target: LOG_TARGET, dropped, "session.diagnostic_dropped");
        }
        dropped
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sender<Diagnostic>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
