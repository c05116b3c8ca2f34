use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, trace, warn};

use crate::connection::{Connector, LinkEventKind, LinkHandle, LinkRequest, Outbound};
use crate::error::ConnectionError;
use crate::LOG_TARGET;

/// Production connector speaking WebSocket text frames via `tokio-tungstenite`.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, request: LinkRequest) -> LinkHandle {
        let (outbound_tx, outbound_rx) = unbounded_channel();
        let task = tokio::spawn(run_link(request, outbound_rx));
        LinkHandle::new(outbound_tx).with_abort(task.abort_handle())
    }
}

async fn run_link(request: LinkRequest, mut outbound: UnboundedReceiver<Outbound>) {
    if !request.delay.is_zero() {
        time::sleep(request.delay).await;
    }

    let mut attempt = 0u32;
    let stream = loop {
        match connect_async(request.endpoint.as_str()).await {
            Ok((stream, _response)) => break stream,
            Err(err) => {
                if attempt >= request.policy.max_attempts {
                    request.emit(LinkEventKind::Failed(ConnectionError::ConnectFailed {
                        endpoint: request.endpoint.clone(),
                        reason: err.to_string(),
                    }));
                    return;
                }
                let wait = request.policy.backoff_delay(attempt);
                attempt += 1;
                warn!(
                    target: LOG_TARGET,
                    endpoint = %request.endpoint,
                    attempt,
                    delay_ms = wait.as_millis() as u64,
                    error = %err,
                    "connection.retry"
                );
                time::sleep(wait).await;
            }
        }
    };

    if !request.emit(LinkEventKind::Opened) {
        return;
    }

    let (mut writer, mut reader) = stream.split();
    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = writer.send(Message::Text(text)).await {
                        break Some(err.to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(err) = writer.send(Message::Close(None)).await {
                        debug!(target: LOG_TARGET, error = %err, "connection.close_frame_failed");
                    }
                    break None;
                }
            },
            message = reader.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    trace!(target: LOG_TARGET, bytes = text.len(), "connection.frame");
                    request.emit(LinkEventKind::Payload(text.into_bytes()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    request.emit(LinkEventKind::Payload(bytes));
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|frame| frame.reason.into_owned())
                        .filter(|reason| !reason.is_empty());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break Some(err.to_string()),
                None => break None,
            },
        }
    };

    request.emit(LinkEventKind::Closed { reason });
}
