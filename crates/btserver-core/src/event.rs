//! Server events and single-subscriber delivery
//!
//! The sink holds at most one subscriber. Attaching a new subscriber replaces
//! the previous one, and events emitted while nobody is attached are dropped:
//! there is no buffering and no retry.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::address::PeerAddress;

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Lifecycle and message events produced by a running server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected {
        address: PeerAddress,
        name: Option<String>,
    },
    ClientDisconnected {
        address: PeerAddress,
    },
    MessageReceived {
        address: PeerAddress,
        message: String,
    },
    ServerError {
        detail: String,
    },
}

impl ServerEvent {
    /// Peer the event concerns, if any
    pub fn address(&self) -> Option<PeerAddress> {
        match self {
            ServerEvent::ClientConnected { address, .. }
            | ServerEvent::ClientDisconnected { address }
            | ServerEvent::MessageReceived { address, .. } => Some(*address),
            ServerEvent::ServerError { .. } => None,
        }
    }

    /// Wire record for the external subscriber
    pub fn to_record(&self) -> EventRecord {
        EventRecord::from(self)
    }
}

/// Decode one chunk of received bytes into message text.
///
/// Peers may send C-string style buffers, so the text ends at the first NUL.
pub fn decode_payload(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// ----------------------------------------------------------------------------
// Wire Record
// ----------------------------------------------------------------------------

/// Discriminant of an [`EventRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    ClientConnected,
    ClientDisconnected,
    MessageReceived,
    Error,
}

/// Serialized event. Optional fields are omitted, never empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl From<&ServerEvent> for EventRecord {
    fn from(event: &ServerEvent) -> Self {
        let mut record = EventRecord {
            kind: EventKind::Error,
            client_address: event.address().map(|a| a.to_string()),
            client_name: None,
            message: None,
            error: None,
        };
        match event {
            ServerEvent::ClientConnected { name, .. } => {
                record.kind = EventKind::ClientConnected;
                record.client_name = name.as_deref().and_then(non_empty);
            }
            ServerEvent::ClientDisconnected { .. } => {
                record.kind = EventKind::ClientDisconnected;
            }
            ServerEvent::MessageReceived { message, .. } => {
                record.kind = EventKind::MessageReceived;
                record.message = non_empty(message);
            }
            ServerEvent::ServerError { detail } => {
                record.error = non_empty(detail);
            }
        }
        record
    }
}

// ----------------------------------------------------------------------------
// Subscriber
// ----------------------------------------------------------------------------

/// The external consumer attached to an [`EventSink`]
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: ServerEvent);
}

impl EventSubscriber for mpsc::UnboundedSender<ServerEvent> {
    fn on_event(&self, event: ServerEvent) {
        // A closed receiver behaves like an absent subscriber
        let _ = self.send(event);
    }
}

impl<F> EventSubscriber for F
where
    F: Fn(ServerEvent) + Send + Sync,
{
    fn on_event(&self, event: ServerEvent) {
        self(event)
    }
}

// ----------------------------------------------------------------------------
// Event Sink
// ----------------------------------------------------------------------------

/// Single-slot, fire-and-forget event delivery
#[derive(Default)]
pub struct EventSink {
    subscriber: Mutex<Option<Arc<dyn EventSubscriber>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `subscriber`, replacing any previous one
    pub fn subscribe(&self, subscriber: impl EventSubscriber + 'static) {
        let mut slot = self.subscriber.lock().unwrap_or_else(|e| e.into_inner());
        if slot.replace(Arc::new(subscriber)).is_some() {
            tracing::debug!("Replaced existing event subscriber");
        }
    }

    /// Attach a fresh channel and return its receiving end
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(tx);
        rx
    }

    /// Detach the current subscriber, if any
    pub fn unsubscribe(&self) {
        self.subscriber
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    /// Whether a subscriber is attached
    pub fn has_subscriber(&self) -> bool {
        self.subscriber
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Deliver `event` to the current subscriber, or drop it
    pub fn emit(&self, event: ServerEvent) {
        let subscriber = self
            .subscriber
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        match subscriber {
            Some(subscriber) => subscriber.on_event(event),
            None => tracing::trace!(?event, "No subscriber, dropping event"),
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("has_subscriber", &self.has_subscriber())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr() -> PeerAddress {
        PeerAddress::new([0x00, 0x1a, 0x7d, 0xda, 0x71, 0x13])
    }

    #[test]
    fn test_emit_without_subscriber_is_dropped() {
        let sink = EventSink::new();
        sink.emit(ServerEvent::ServerError {
            detail: "lost".into(),
        });
        let mut rx = sink.subscribe_channel();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_new_subscriber_replaces_previous() {
        let sink = EventSink::new();
        let first = Arc::new(AtomicUsize::new(0));
        let counter = first.clone();
        sink.subscribe(move |_event: ServerEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sink.emit(ServerEvent::ClientDisconnected { address: addr() });

        let mut rx = sink.subscribe_channel();
        sink.emit(ServerEvent::ClientDisconnected { address: addr() });

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::ClientDisconnected { address: addr() }
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let sink = EventSink::new();
        let mut rx = sink.subscribe_channel();
        sink.unsubscribe();
        assert!(!sink.has_subscriber());
        sink.emit(ServerEvent::ClientDisconnected { address: addr() });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_record_omits_absent_fields() {
        let record = ServerEvent::ClientConnected {
            address: addr(),
            name: None,
        }
        .to_record();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "clientConnected", "clientAddress": "00:1a:7d:da:71:13"})
        );
    }

    #[test]
    fn test_record_omits_empty_message_and_name() {
        let received = ServerEvent::MessageReceived {
            address: addr(),
            message: String::new(),
        }
        .to_record();
        assert_eq!(received.message, None);

        let connected = ServerEvent::ClientConnected {
            address: addr(),
            name: Some(String::new()),
        }
        .to_record();
        assert_eq!(connected.client_name, None);
    }

    #[test]
    fn test_error_record_shape() {
        let record = ServerEvent::ServerError {
            detail: "Server already running".into(),
        }
        .to_record();
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"type":"error","error":"Server already running"}"#);
    }

    #[test]
    fn test_record_parses_back_with_missing_fields() {
        let record: EventRecord =
            serde_json::from_str(r#"{"type":"messageReceived","clientAddress":"aa:bb:cc:dd:ee:ff","message":"ping"}"#)
                .unwrap();
        assert_eq!(record.kind, EventKind::MessageReceived);
        assert_eq!(record.message.as_deref(), Some("ping"));
        assert_eq!(record.client_name, None);
    }

    #[test]
    fn test_decode_payload_stops_at_nul() {
        assert_eq!(decode_payload(b"ping"), "ping");
        assert_eq!(decode_payload(b"ping\0garbage"), "ping");
        assert_eq!(decode_payload(b"\0"), "");
        assert_eq!(decode_payload(&[0x66, 0xff, 0x6f]), "f\u{fffd}o");
    }
}
