//! Scripted stand-in for the inference service, for tests and demos.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use url::Url;

use super::{Dialer, LinkEvent, LinkEvents, LinkHandle};

/// Records every dial and exposes each link as a [`ScriptedLink`] the test
/// can drive by hand.
#[derive(Clone, Default)]
pub struct ScriptedDialer {
    links: Arc<Mutex<Vec<Arc<ScriptedLink>>>>,
    auto_open: bool,
}

impl ScriptedDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dial reports `Opened` straight away.
    pub fn auto_open() -> Self {
        Self {
            links: Arc::default(),
            auto_open: true,
        }
    }

    pub fn dial_count(&self) -> usize {
        self.links.lock().len()
    }

    pub fn link(&self, index: usize) -> Option<Arc<ScriptedLink>> {
        self.links.lock().get(index).cloned()
    }

    pub fn latest(&self) -> Option<Arc<ScriptedLink>> {
        self.links.lock().last().cloned()
    }
}

impl Dialer for ScriptedDialer {
    fn dial(&self, endpoint: &Url, events: LinkEvents) -> LinkHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.auto_open {
            events.emit(LinkEvent::Opened);
        }
        self.links.lock().push(Arc::new(ScriptedLink {
            endpoint: endpoint.clone(),
            events,
            outbound: Mutex::new(rx),
            written: Mutex::new(Vec::new()),
        }));
        LinkHandle::new(tx)
    }
}

pub struct ScriptedLink {
    endpoint: Url,
    events: LinkEvents,
    outbound: Mutex<mpsc::UnboundedReceiver<String>>,
    written: Mutex<Vec<String>>,
}

impl ScriptedLink {
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    pub fn open(&self) {
        self.events.emit(LinkEvent::Opened);
    }

    pub fn deliver(&self, payload: &str) {
        self.events
            .emit(LinkEvent::Inbound(Bytes::copy_from_slice(payload.as_bytes())));
    }

    pub fn deliver_json(&self, value: &serde_json::Value) {
        self.deliver(&value.to_string());
    }

    pub fn complete_send(&self) {
        self.events.emit(LinkEvent::SendComplete);
    }

    pub fn close(&self, reason: &str) {
        self.events.emit(LinkEvent::Closed {
            reason: reason.to_string(),
        });
    }

    /// Everything the channel has written to this link so far.
    pub fn sent(&self) -> Vec<String> {
        self.drain();
        self.written.lock().clone()
    }

    /// True once the channel has dropped its handle to this link.
    pub fn is_released(&self) -> bool {
        self.drain()
    }

    fn drain(&self) -> bool {
        let mut outbound = self.outbound.lock();
        let mut written = self.written.lock();
        loop {
            match outbound.try_recv() {
                Ok(text) => written.push(text),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }
}
