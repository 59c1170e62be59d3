//! Duplex link to the inference service.
//!
//! [`TransportChannel`] is a plain state machine owned by the session loop:
//! it never spawns timers of its own, it only reports the deadline of the
//! one pending reconnect and reacts when the loop says that deadline passed.
//! The actual socket lives in a link task created by a [`Dialer`]; the task
//! talks back through [`LinkEvents`], stamped with the generation of the link
//! that produced them so that late events from a replaced link are ignored.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::capture::Frame;

pub mod mock;
pub mod websocket;

pub use websocket::WsDialer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a link task reports back to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Inbound(Bytes),
    /// The last outbound message has been written to the socket.
    SendComplete,
    /// Connect failure, transport error or remote close.
    Closed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedEvent {
    pub generation: u64,
    pub event: LinkEvent,
}

/// Event sink handed to a link task.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<StampedEvent>,
}

impl LinkEvents {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the session loop has gone away.
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.tx
            .send(StampedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Owning handle to one link. Dropping it closes the outbound queue; the
/// link task sees that, says goodbye to the peer and exits.
#[derive(Debug)]
pub struct LinkHandle {
    outbound: mpsc::UnboundedSender<String>,
}

impl LinkHandle {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { outbound }
    }

    fn send(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }
}

/// Opens links. `dial` must not block: it starts the connection attempt in
/// the background and reports progress through `events`.
pub trait Dialer: Send + Sync {
    fn dial(&self, endpoint: &Url, events: LinkEvents) -> LinkHandle;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendRejected {
    #[error("channel is {0}, not connected")]
    NotConnected(ConnectionState),
    #[error("previous frame is still in flight")]
    Busy,
    #[error("failed to encode outbound frame: {0}")]
    Encode(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("connect called while {0}")]
    AlreadyStarted(ConnectionState),
    #[error("channel was disconnected for this session")]
    TornDown,
}

pub struct TransportChannel {
    endpoint: Url,
    reconnect_delay: Duration,
    dialer: Arc<dyn Dialer>,
    events: mpsc::UnboundedSender<StampedEvent>,
    state: ConnectionState,
    generation: u64,
    link: Option<LinkHandle>,
    in_flight: bool,
    reconnect_at: Option<Instant>,
    reconnect_attempts: u64,
    torn_down: bool,
}

impl TransportChannel {
    /// Creates the channel and the receiver its link events arrive on.
    pub fn new(
        endpoint: Url,
        reconnect_delay: Duration,
        dialer: Arc<dyn Dialer>,
    ) -> (Self, mpsc::UnboundedReceiver<StampedEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let channel = Self {
            endpoint,
            reconnect_delay,
            dialer,
            events,
            state: ConnectionState::Disconnected,
            generation: 0,
            link: None,
            in_flight: false,
            reconnect_at: None,
            reconnect_attempts: 0,
            torn_down: false,
        };
        (channel, rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    /// Deadline of the pending reconnect, if one is scheduled.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// `Disconnected -> Connecting`.
    pub fn connect(&mut self) -> Result<(), ChannelError> {
        if self.torn_down {
            return Err(ChannelError::TornDown);
        }
        if self.state != ConnectionState::Disconnected {
            return Err(ChannelError::AlreadyStarted(self.state));
        }
        self.open_link();
        Ok(())
    }

    fn open_link(&mut self) {
        self.generation += 1;
        self.in_flight = false;
        self.state = ConnectionState::Connecting;
        info!(
            target = "caretaker::transport",
            endpoint = %self.endpoint,
            generation = self.generation,
            "connecting"
        );
        let events = LinkEvents {
            generation: self.generation,
            tx: self.events.clone(),
        };
        self.link = Some(self.dialer.dial(&self.endpoint, events));
    }

    /// Whether a frame handed over right now would be accepted.
    pub fn readiness(&self) -> Result<(), SendRejected> {
        if self.state != ConnectionState::Connected {
            return Err(SendRejected::NotConnected(self.state));
        }
        if self.in_flight {
            return Err(SendRejected::Busy);
        }
        Ok(())
    }

    /// Serialises and writes one frame. The frame is consumed either way;
    /// a rejected frame is dropped, never queued.
    pub fn try_send(&mut self, frame: Frame) -> Result<(), SendRejected> {
        self.readiness()?;
        let text = frame
            .into_outbound()
            .to_json()
            .map_err(|err| SendRejected::Encode(err.to_string()))?;

        let delivered = self.link.as_ref().map(|link| link.send(text)).unwrap_or(false);
        if !delivered {
            self.enter_reconnecting("link task is gone");
            return Err(SendRejected::NotConnected(self.state));
        }
        self.in_flight = true;
        Ok(())
    }

    /// Applies a link event. Inbound payloads received while connected are
    /// returned for routing; the channel never looks inside them.
    pub fn handle_event(&mut self, stamped: StampedEvent) -> Option<Bytes> {
        if stamped.generation != self.generation || self.state == ConnectionState::Disconnected {
            trace!(
                target = "caretaker::transport",
                generation = stamped.generation,
                current = self.generation,
                "ignoring event from stale link"
            );
            return None;
        }

        match stamped.event {
            LinkEvent::Opened => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Connected;
                    self.in_flight = false;
                    info!(
                        target = "caretaker::transport",
                        endpoint = %self.endpoint,
                        generation = self.generation,
                        "connected"
                    );
                }
                None
            }
            LinkEvent::Inbound(payload) => {
                if self.state == ConnectionState::Connected {
                    Some(payload)
                } else {
                    None
                }
            }
            LinkEvent::SendComplete => {
                self.in_flight = false;
                None
            }
            LinkEvent::Closed { reason } => {
                self.enter_reconnecting(&reason);
                None
            }
        }
    }

    fn enter_reconnecting(&mut self, reason: &str) {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Reconnecting
        ) {
            return;
        }
        warn!(
            target = "caretaker::transport",
            generation = self.generation,
            reason,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "link lost; scheduling reconnect"
        );
        self.link = None;
        self.in_flight = false;
        self.state = ConnectionState::Reconnecting;
        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
    }

    /// Called by the session loop once the reconnect deadline has passed.
    pub fn on_reconnect_due(&mut self) {
        if self.state != ConnectionState::Reconnecting || self.reconnect_at.take().is_none() {
            return;
        }
        self.reconnect_attempts += 1;
        debug!(
            target = "caretaker::transport",
            attempt = self.reconnect_attempts,
            "reconnect timer fired"
        );
        self.open_link();
    }

    /// Session teardown: cancels the pending reconnect, closes the link and
    /// stays `Disconnected` for good.
    pub fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.link = None;
        self.in_flight = false;
        self.torn_down = true;
        if self.state != ConnectionState::Disconnected {
            info!(
                target = "caretaker::transport",
                endpoint = %self.endpoint,
                "disconnected"
            );
        }
        self.state = ConnectionState::Disconnected;
    }
}
