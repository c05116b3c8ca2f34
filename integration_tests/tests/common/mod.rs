#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use session_core::{
    spawn_session, ConnectionState, DashboardConfig, SessionHandle, SessionStatus,
    WebSocketConnector,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

pub const WAIT: Duration = Duration::from_secs(5);

enum Action {
    Send(String),
    Close(String),
}

/// In-process experiment backend. Accepts one client at a time, records
/// every text frame it receives and sends whatever the test pushes.
pub struct ScriptedBackend {
    pub endpoint: String,
    actions: UnboundedSender<Action>,
    received: UnboundedReceiver<String>,
    connections: UnboundedReceiver<()>,
    task: JoinHandle<()>,
}

impl ScriptedBackend {
    pub async fn spawn() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let endpoint = format!("ws://{}/ExperimentData", listener.local_addr()?);
        let (action_tx, mut actions) = unbounded_channel();
        let (received_tx, received) = unbounded_channel();
        let (connection_tx, connections) = unbounded_channel();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut socket) = accept_async(stream).await else {
                    continue;
                };
                let _ = connection_tx.send(());
                loop {
                    tokio::select! {
                        action = actions.recv() => match action {
                            Some(Action::Send(text)) => {
                                if socket.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Action::Close(reason)) => {
                                let frame = CloseFrame {
                                    code: CloseCode::Normal,
                                    reason: reason.into(),
                                };
                                let _ = socket.close(Some(frame)).await;
                                while let Some(Ok(_)) = socket.next().await {}
                                break;
                            }
                            None => return,
                        },
                        message = socket.next() => match message {
                            Some(Ok(Message::Text(text))) => {
                                let _ = received_tx.send(text);
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                    }
                }
            }
        });

        Ok(Self {
            endpoint,
            actions: action_tx,
            received,
            connections,
            task,
        })
    }

    pub fn config(&self) -> DashboardConfig {
        DashboardConfig {
            endpoint: self.endpoint.clone(),
            ..DashboardConfig::default()
        }
    }

    pub fn push(&self, text: impl Into<String>) {
        let _ = self.actions.send(Action::Send(text.into()));
    }

    pub fn push_snapshot(&self, cycle: u64, dooders: u64, energy: u64) {
        self.push(format!(
            r#"{{"cycleCount":{cycle},"dooderCount":{dooders},"energyCount":{energy}}}"#
        ));
    }

    /// Close the current client connection with a reason.
    pub fn close(&self, reason: &str) {
        let _ = self.actions.send(Action::Close(reason.to_string()));
    }

    pub async fn next_received(&mut self) -> String {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .expect("backend received nothing in time")
            .expect("backend task ended")
    }

    pub async fn assert_nothing_received(&mut self) {
        let outcome = tokio::time::timeout(Duration::from_millis(200), self.received.recv()).await;
        assert!(outcome.is_err(), "backend unexpectedly received {outcome:?}");
    }

    pub async fn wait_for_connection(&mut self) {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("no client connected in time")
            .expect("backend task ended");
    }
}

impl Drop for ScriptedBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a session against `backend` and wait until its link is open.
pub async fn connected_session(backend: &mut ScriptedBackend) -> SessionHandle {
    let session = spawn_session(&backend.config(), Arc::new(WebSocketConnector));
    session.connect().await.expect("session should connect");
    backend.wait_for_connection().await;
    session
}

/// Poll until the actor has seen `count` inbound payloads.
pub async fn wait_for_payloads(session: &SessionHandle, count: u64) {
    tokio::time::timeout(WAIT, async {
        while session.metrics().await.payloads_received < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("payloads did not arrive in time");
}

pub async fn wait_for_status<F>(session: &SessionHandle, predicate: F) -> SessionStatus
where
    F: FnMut(&SessionStatus) -> bool,
{
    let mut status = session.watch_status();
    let settled = tokio::time::timeout(WAIT, status.wait_for(predicate))
        .await
        .expect("status did not settle in time")
        .expect("session actor stopped");
    settled.clone()
}

pub async fn wait_until_disconnected(session: &SessionHandle) -> SessionStatus {
    wait_for_status(session, |status| {
        status.connection == ConnectionState::Disconnected
    })
    .await
}
