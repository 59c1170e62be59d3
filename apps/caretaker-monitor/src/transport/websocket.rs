use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace};
use url::Url;

use super::{Dialer, LinkEvent, LinkEvents, LinkHandle};

const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Dials the inference service over a WebSocket.
#[derive(Debug, Clone)]
pub struct WsDialer {
    connect_timeout: Duration,
}

impl WsDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Dialer for WsDialer {
    fn dial(&self, endpoint: &Url, events: LinkEvents) -> LinkHandle {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(run_link(
            endpoint.clone(),
            rx,
            events,
            self.connect_timeout,
        ));
        LinkHandle::new(tx)
    }
}

/// One connection attempt and, if it opens, the full life of the socket.
/// Ends with exactly one `Closed` event unless the owning handle was
/// dropped first, in which case a pending connect is abandoned and an open
/// socket is closed with a close frame.
async fn run_link(
    endpoint: Url,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: LinkEvents,
    connect_timeout: Duration,
) {
    let connect = timeout(connect_timeout, connect_async(endpoint.as_str()));
    let connected = tokio::select! {
        result = connect => result,
        None = outbound.recv() => {
            debug!(
                target = "caretaker::transport::ws",
                generation = events.generation(),
                "link released while connecting"
            );
            return;
        }
    };
    let ws_stream = match connected {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(err)) => {
            events.emit(LinkEvent::Closed {
                reason: format!("connect failed: {err}"),
            });
            return;
        }
        Err(_) => {
            events.emit(LinkEvent::Closed {
                reason: format!("connect timed out after {}ms", connect_timeout.as_millis()),
            });
            return;
        }
    };

    if !events.emit(LinkEvent::Opened) {
        return;
    }
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    trace!(
                        target = "caretaker::transport::ws",
                        generation = events.generation(),
                        bytes = text.len(),
                        "writing frame"
                    );
                    if let Err(err) = ws_sender.send(Message::Text(text)).await {
                        break format!("send failed: {err}");
                    }
                    events.emit(LinkEvent::SendComplete);
                }
                None => {
                    // Released by the channel; no Closed event follows.
                    let _ = timeout(CLOSE_GRACE, ws_sender.send(Message::Close(None))).await;
                    debug!(
                        target = "caretaker::transport::ws",
                        generation = events.generation(),
                        "link released"
                    );
                    return;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    events.emit(LinkEvent::Inbound(Bytes::from(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    events.emit(LinkEvent::Inbound(Bytes::from(data)));
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => format!("closed by peer: {} {}", frame.code, frame.reason),
                        None => "closed by peer".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break format!("transport error: {err}"),
                None => break "stream ended".to_string(),
            },
        }
    };

    debug!(
        target = "caretaker::transport::ws",
        generation = events.generation(),
        reason = %reason,
        "link ended"
    );
    events.emit(LinkEvent::Closed { reason });
}
