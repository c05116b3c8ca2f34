//! The session actor: one tokio task owns all session state; everything else
//! talks to it through a [`SessionHandle`].

use std::future::Future;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use telemetry_runtime::{Command, Snapshot};

use crate::aggregate::LiveAggregate;
use crate::config::DashboardConfig;
use crate::connection::{ConnectionState, Connector, LinkEvent};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::{CommandError, ConnectionError, SessionFault};
use crate::fanout::{Fanout, SessionUpdate, Subscription};
use crate::metrics::SessionMetrics;
use crate::session::{SessionCore, SessionStatus};
use crate::LOG_TARGET;

enum SessionRequest {
    Open(oneshot::Sender<bool>),
    Close(oneshot::Sender<bool>),
    Dispatch(Command, oneshot::Sender<Result<(), CommandError>>),
    ResetSession(oneshot::Sender<()>),
    Session(oneshot::Sender<Vec<Snapshot>>),
    LiveAggregate(oneshot::Sender<LiveAggregate>),
    Metrics(oneshot::Sender<SessionMetrics>),
    Shutdown(oneshot::Sender<()>),
}

/// Spawn a session actor on the current tokio runtime.
pub fn spawn_session(config: &DashboardConfig, connector: Arc<dyn Connector>) -> SessionHandle {
    SessionRuntime::new(config, connector).spawn().0
}

pub struct SessionRuntime {
    config: DashboardConfig,
    connector: Arc<dyn Connector>,
}

impl SessionRuntime {
    pub fn new(config: &DashboardConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: config.clone(),
            connector,
        }
    }

    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (request_tx, request_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();
        let diagnostics = DiagnosticSink::new(self.config.diagnostics_capacity);
        let fanout = Fanout::new();
        let core = SessionCore::new(
            self.config.endpoint.clone(),
            self.config.reconnect.clone(),
            self.config.history_limit,
            self.connector,
            event_tx,
            fanout.clone(),
            diagnostics.clone(),
        );
        let (status_tx, status_rx) = watch::channel(core.status());
        info!(
            target: LOG_TARGET,
            endpoint = %self.config.endpoint,
            history_limit = ?self.config.history_limit,
            "session.actor_started"
        );
        let task = tokio::spawn(run_actor(core, request_rx, event_rx, status_tx));
        let handle = SessionHandle {
            requests: request_tx,
            status: status_rx,
            fanout,
            diagnostics,
        };
        (handle, task)
    }
}

async fn run_actor(
    mut core: SessionCore,
    mut requests: UnboundedReceiver<SessionRequest>,
    mut events: UnboundedReceiver<LinkEvent>,
    status: watch::Sender<SessionStatus>,
) {
    let mut shutdown_reply = None;
    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(SessionRequest::Shutdown(reply)) => {
                    shutdown_reply = Some(reply);
                    break;
                }
                Some(request) => handle_request(&mut core, request, &status),
                None => break,
            },
            Some(event) = events.recv() => {
                core.handle_link_event(event);
                publish_status(&core, &status);
            }
        }
    }

    core.close();
    publish_status(&core, &status);
    info!(target: LOG_TARGET, "session.actor_stopped");
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
}

fn handle_request(
    core: &mut SessionCore,
    request: SessionRequest,
    status: &watch::Sender<SessionStatus>,
) {
    match request {
        SessionRequest::Open(reply) => {
            let started = core.open();
            publish_status(core, status);
            let _ = reply.send(started);
        }
        SessionRequest::Close(reply) => {
            let closed = core.close();
            publish_status(core, status);
            let _ = reply.send(closed);
        }
        SessionRequest::Dispatch(command, reply) => {
            let result = core.dispatch(command);
            publish_status(core, status);
            let _ = reply.send(result);
        }
        SessionRequest::ResetSession(reply) => {
            core.reset_session();
            publish_status(core, status);
            let _ = reply.send(());
        }
        SessionRequest::Session(reply) => {
            let _ = reply.send(core.snapshots().iter().cloned().collect());
        }
        SessionRequest::LiveAggregate(reply) => {
            let _ = reply.send(core.live_aggregate().clone());
        }
        SessionRequest::Metrics(reply) => {
            let _ = reply.send(core.metrics());
        }
        SessionRequest::Shutdown(reply) => {
            let _ = reply.send(());
        }
    }
}

fn publish_status(core: &SessionCore, status: &watch::Sender<SessionStatus>) {
    let next = core.status();
    status.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

/// Cheap, cloneable front door to a running session actor.
///
/// Methods that change the session queue their request when called, not when
/// the returned future is first polled, so requests issued from one thread
/// reach the actor in call order even if their replies are awaited elsewhere.
///
/// Once the actor has stopped, commands fail with `NotConnected` and reads
/// return empty defaults.
#[derive(Clone)]
pub struct SessionHandle {
    requests: UnboundedSender<SessionRequest>,
    status: watch::Receiver<SessionStatus>,
    fanout: Fanout,
    diagnostics: DiagnosticSink,
}

impl SessionHandle {
    /// Queue a request now; the receiver errors if the actor has stopped.
    fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionRequest,
    ) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let _ = self.requests.send(make(tx));
        rx
    }

    /// Ask the connection to open. Resolves to `false` if a link is already
    /// pending or open.
    pub fn open(&self) -> impl Future<Output = bool> + Send + 'static {
        let reply = self.request(SessionRequest::Open);
        async move { reply.await.unwrap_or(false) }
    }

    /// Open and wait until the link either reaches `Open` or gives up.
    pub fn connect(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send + 'static {
        let opened = self.open();
        let mut status = self.status.clone();
        async move {
            opened.await;
            let settled = status
                .wait_for(|status| status.connection != ConnectionState::Connecting)
                .await
                .map(|status| status.clone())
                .unwrap_or_default();
            match (settled.connection, settled.last_error) {
                (ConnectionState::Open, _) => Ok(()),
                (_, Some(SessionFault::Connection(err))) => Err(err),
                (state, _) => Err(ConnectionError::NotConnected { state }),
            }
        }
    }

    pub fn close(&self) -> impl Future<Output = bool> + Send + 'static {
        let reply = self.request(SessionRequest::Close);
        async move { reply.await.unwrap_or(false) }
    }

    pub fn dispatch(
        &self,
        command: Command,
    ) -> impl Future<Output = Result<(), CommandError>> + Send + 'static {
        let reply = self.request(move |reply| SessionRequest::Dispatch(command, reply));
        async move {
            reply.await.unwrap_or(Err(CommandError::NotConnected(
                ConnectionError::NotConnected {
                    state: ConnectionState::Disconnected,
                },
            )))
        }
    }

    /// Clear the session, then send `Start` with the given parameters.
    pub fn start(
        &self,
        steps: u32,
        agents: u32,
    ) -> impl Future<Output = Result<(), CommandError>> + Send + 'static {
        self.dispatch(Command::Start { steps, agents })
    }

    pub fn stop(&self) -> impl Future<Output = Result<(), CommandError>> + Send + 'static {
        self.dispatch(Command::Stop)
    }

    /// Administrative backend reset. Leaves the local session alone.
    pub fn reset_experiment(
        &self,
    ) -> impl Future<Output = Result<(), CommandError>> + Send + 'static {
        self.dispatch(Command::Reset)
    }

    pub fn reset_session(&self) -> impl Future<Output = ()> + Send + 'static {
        let reply = self.request(SessionRequest::ResetSession);
        async move {
            let _ = reply.await;
        }
    }

    pub async fn session(&self) -> Vec<Snapshot> {
        self.request(SessionRequest::Session)
            .await
            .unwrap_or_default()
    }

    pub async fn live_aggregate(&self) -> LiveAggregate {
        self.request(SessionRequest::LiveAggregate)
            .await
            .unwrap_or_default()
    }

    pub async fn metrics(&self) -> SessionMetrics {
        self.request(SessionRequest::Metrics)
            .await
            .unwrap_or_default()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Register a consumer. Callbacks run on the session actor's task and
    /// must not block.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&SessionUpdate<'_>) + Send + 'static,
    {
        self.fanout.subscribe(callback)
    }

    /// Attach a bounded diagnostics listener. Earlier diagnostics are not
    /// replayed; once the queue is full further ones are dropped for this
    /// listener and counted in [`SessionMetrics::diagnostics_dropped`].
    /// Dropping the receiver detaches it.
    pub fn diagnostics(&self) -> Receiver<Diagnostic> {
        self.diagnostics.listen()
    }

    /// Close the connection and stop the actor; waits for it to finish.
    pub async fn shutdown(&self) {
        if self.request(SessionRequest::Shutdown).await.is_err() {
            debug!(target: LOG_TARGET, "session.shutdown_already_stopped");
        }
    }
}
