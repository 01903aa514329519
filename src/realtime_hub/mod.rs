//! BoothHub - WebSocket connection registry and fan-out
//!
//! ## Responsibilities
//!
//! - Track one kiosk and N phone connections per session
//! - Broadcast typed events to a session's subscribers
//! - Evict dead connections as a side effect of failed sends
//!
//! Each connection owns an unbounded outbound channel; the socket task
//! forwards channel messages to the wire. A send here never suspends on
//! network latency, so events enqueue in broadcast order per connection and
//! the wire preserves that order. The hub holds the only sender: removing a
//! connection from the indices closes its channel, which ends the socket's
//! forward loop and closes the socket.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Events fanned out to kiosk and phone clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum BoothEvent {
    /// Initial state for a freshly connected kiosk
    KioskConnected {
        session_id: String,
        phone_count: usize,
    },
    /// A phone joined the session (sent to the kiosk)
    PhoneConnected {
        session_id: String,
        phone_id: String,
    },
    /// A phone left or was evicted (sent to the kiosk)
    PhoneDisconnected {
        session_id: String,
        phone_id: String,
    },
    /// Initial state for a freshly connected phone
    SessionState {
        session_id: String,
        phone_id: String,
        photos: Vec<PhotoSummary>,
        kiosk_connected: bool,
    },
    /// One countdown tick, once per second down to 1
    Countdown {
        session_id: String,
        value: u32,
        photo_number: u32,
        total_photos: u32,
    },
    /// The shutter is about to fire for this photo
    CaptureStart {
        session_id: String,
        photo_number: u32,
        total_photos: u32,
    },
    /// One photo of the burst failed; the burst continues
    PhotoFailed {
        session_id: String,
        photo_number: u32,
        error: String,
    },
    /// A captured photo finished processing and is viewable
    PhotoReady {
        session_id: String,
        photo_id: String,
        sequence: i64,
        web_url: String,
        thumbnail_url: String,
    },
    /// Shutters done, background processing still draining
    Processing {
        session_id: String,
        photo_count: usize,
    },
    /// Burst finished with at least one photo
    CaptureComplete {
        session_id: String,
        photo_count: i64,
        strip_url: String,
    },
    /// Burst finished with zero photos
    CaptureFailed { session_id: String, error: String },
    /// Session was terminated; connections are closed right after
    SessionEnded { session_id: String },
    /// Acknowledgement of a kiosk command
    Ack { session_id: String, action: String },
    /// Keep-alive reply
    Pong,
}

/// Photo summary embedded in `session_state`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoSummary {
    pub id: String,
    pub sequence: i64,
    pub web_url: String,
    pub thumbnail_url: String,
}

/// Inbound messages from kiosk/phone sockets
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    StartCapture,
    EndSession,
}

struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

enum ConnKey {
    Kiosk {
        session_id: String,
    },
    Phone {
        session_id: String,
        phone_id: String,
    },
}

#[derive(Default)]
struct HubIndices {
    /// session_id -> kiosk (one per session, last writer wins)
    kiosks: HashMap<String, ClientConnection>,
    /// session_id -> phone_id -> connection
    phones: HashMap<String, HashMap<String, ClientConnection>>,
    /// connection id -> reverse lookup
    by_conn: HashMap<Uuid, ConnKey>,
}

/// BoothHub instance
pub struct BoothHub {
    inner: RwLock<HubIndices>,
    connection_count: AtomicU64,
}

impl BoothHub {
    /// Create new hub
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HubIndices::default()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register the kiosk for a session. An existing kiosk connection for
    /// the same session is evicted and closed first.
    pub async fn register_kiosk(
        &self,
        session_id: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut inner = self.inner.write().await;
            if let Some(old) = inner.kiosks.remove(session_id) {
                inner.by_conn.remove(&old.id);
                self.connection_count.fetch_sub(1, Ordering::Relaxed);
                tracing::info!(
                    session_id = %session_id,
                    old_connection = %old.id,
                    "Displacing previous kiosk connection"
                );
                // Dropping old.tx closes its socket forward loop
            }

            inner
                .kiosks
                .insert(session_id.to_string(), ClientConnection { id, tx });
            inner.by_conn.insert(
                id,
                ConnKey::Kiosk {
                    session_id: session_id.to_string(),
                },
            );
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(session_id = %session_id, connection_id = %id, "Kiosk connected");

        (id, rx)
    }

    /// Register a phone viewer for a session. The kiosk is notified.
    pub async fn register_phone(
        &self,
        session_id: &str,
    ) -> (Uuid, String, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let phone_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut inner = self.inner.write().await;
            inner
                .phones
                .entry(session_id.to_string())
                .or_default()
                .insert(phone_id.clone(), ClientConnection { id, tx });
            inner.by_conn.insert(
                id,
                ConnKey::Phone {
                    session_id: session_id.to_string(),
                    phone_id: phone_id.clone(),
                },
            );

            Self::kiosk_send(
                &mut inner,
                session_id,
                &BoothEvent::PhoneConnected {
                    session_id: session_id.to_string(),
                    phone_id: phone_id.clone(),
                },
            );
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            session_id = %session_id,
            phone_id = %phone_id,
            connection_id = %id,
            "Phone connected"
        );

        (id, phone_id, rx)
    }

    /// Remove a connection from every index. Idempotent.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        let Some(key) = inner.by_conn.remove(&conn_id) else {
            return;
        };
        self.connection_count.fetch_sub(1, Ordering::Relaxed);

        match key {
            ConnKey::Kiosk { session_id } => {
                // Only remove if this id is still the current kiosk; an
                // evicted kiosk was already replaced in the index
                if inner
                    .kiosks
                    .get(&session_id)
                    .is_some_and(|c| c.id == conn_id)
                {
                    inner.kiosks.remove(&session_id);
                }
                tracing::info!(session_id = %session_id, "Kiosk disconnected");
            }
            ConnKey::Phone {
                session_id,
                phone_id,
            } => {
                if let Some(session_phones) = inner.phones.get_mut(&session_id) {
                    session_phones.remove(&phone_id);
                    if session_phones.is_empty() {
                        inner.phones.remove(&session_id);
                    }
                }
                tracing::info!(session_id = %session_id, phone_id = %phone_id, "Phone disconnected");

                Self::kiosk_send(
                    &mut inner,
                    &session_id,
                    &BoothEvent::PhoneDisconnected {
                        session_id: session_id.clone(),
                        phone_id,
                    },
                );
            }
        }
    }

    /// Send an event to one specific connection (pong replies, initial
    /// state snapshots).
    pub async fn send_to_connection(&self, conn_id: Uuid, event: &BoothEvent) -> bool {
        let Some(json) = serialize(event) else {
            return false;
        };

        let inner = self.inner.read().await;
        let conn = match inner.by_conn.get(&conn_id) {
            Some(ConnKey::Kiosk { session_id }) => inner.kiosks.get(session_id),
            Some(ConnKey::Phone {
                session_id,
                phone_id,
            }) => inner
                .phones
                .get(session_id)
                .and_then(|p| p.get(phone_id)),
            None => None,
        };

        match conn {
            Some(c) if c.id == conn_id => c.tx.send(json).is_ok(),
            _ => false,
        }
    }

    /// Send an event to the session's kiosk. Returns delivery success; a
    /// failed send evicts the kiosk connection.
    pub async fn send_to_kiosk(&self, session_id: &str, event: &BoothEvent) -> bool {
        let Some(json) = serialize(event) else {
            return false;
        };

        let mut inner = self.inner.write().await;
        let Some(kiosk) = inner.kiosks.get(session_id) else {
            return false;
        };

        if kiosk.tx.send(json).is_ok() {
            return true;
        }

        let dead = kiosk.id;
        inner.kiosks.remove(session_id);
        inner.by_conn.remove(&dead);
        self.connection_count.fetch_sub(1, Ordering::Relaxed);
        tracing::warn!(session_id = %session_id, connection_id = %dead, "Evicted dead kiosk connection");
        false
    }

    /// Send an event to every phone of a session. Returns the number of
    /// deliveries; failed connections are evicted so membership self-heals.
    pub async fn send_to_phones(&self, session_id: &str, event: &BoothEvent) -> usize {
        let Some(json) = serialize(event) else {
            return 0;
        };

        let mut inner = self.inner.write().await;
        let Some(session_phones) = inner.phones.get(session_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead: Vec<(String, Uuid)> = Vec::new();
        for (phone_id, conn) in session_phones {
            if conn.tx.send(json.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push((phone_id.clone(), conn.id));
            }
        }

        for (phone_id, conn_id) in dead {
            if let Some(session_phones) = inner.phones.get_mut(session_id) {
                session_phones.remove(&phone_id);
                if session_phones.is_empty() {
                    inner.phones.remove(session_id);
                }
            }
            inner.by_conn.remove(&conn_id);
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::warn!(
                session_id = %session_id,
                phone_id = %phone_id,
                "Evicted dead phone connection"
            );

            Self::kiosk_send(
                &mut inner,
                session_id,
                &BoothEvent::PhoneDisconnected {
                    session_id: session_id.to_string(),
                    phone_id,
                },
            );
        }

        delivered
    }

    /// Broadcast an event to the kiosk and every phone of a session
    pub async fn broadcast(&self, session_id: &str, event: &BoothEvent) {
        self.send_to_kiosk(session_id, event).await;
        self.send_to_phones(session_id, event).await;
    }

    /// Broadcast `session_ended` and forcibly close every connection bound
    /// to the session.
    pub async fn close_session(&self, session_id: &str) {
        self.broadcast(
            session_id,
            &BoothEvent::SessionEnded {
                session_id: session_id.to_string(),
            },
        )
        .await;

        let mut inner = self.inner.write().await;
        if let Some(kiosk) = inner.kiosks.remove(session_id) {
            inner.by_conn.remove(&kiosk.id);
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
        }
        if let Some(session_phones) = inner.phones.remove(session_id) {
            for (_, conn) in session_phones {
                inner.by_conn.remove(&conn.id);
                self.connection_count.fetch_sub(1, Ordering::Relaxed);
            }
        }

        tracing::info!(session_id = %session_id, "Session connections closed");
    }

    /// Whether a kiosk is connected for the session
    pub async fn has_kiosk(&self, session_id: &str) -> bool {
        self.inner.read().await.kiosks.contains_key(session_id)
    }

    /// Number of connected phones for the session
    pub async fn phone_count(&self, session_id: &str) -> usize {
        self.inner
            .read()
            .await
            .phones
            .get(session_id)
            .map(|p| p.len())
            .unwrap_or(0)
    }

    /// Total live connections across all sessions
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Kiosk send while already holding the write lock. Best-effort: a dead
    /// kiosk is dropped here and fully unindexed on its socket teardown.
    fn kiosk_send(inner: &mut HubIndices, session_id: &str, event: &BoothEvent) {
        let Some(json) = serialize(event) else {
            return;
        };
        if let Some(kiosk) = inner.kiosks.get(session_id) {
            if kiosk.tx.send(json).is_err() {
                tracing::warn!(session_id = %session_id, "Kiosk notify failed");
            }
        }
    }
}

impl Default for BoothHub {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize(event: &BoothEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ended(session_id: &str) -> BoothEvent {
        BoothEvent::SessionEnded {
            session_id: session_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_kiosk_last_writer_wins() {
        let hub = BoothHub::new();

        let (_k1, mut rx1) = hub.register_kiosk("s1").await;
        let (_k2, mut rx2) = hub.register_kiosk("s1").await;

        assert!(hub.has_kiosk("s1").await);
        assert_eq!(hub.connection_count(), 1);

        // Old kiosk channel is closed by eviction
        assert!(rx1.recv().await.is_none());

        assert!(hub.send_to_kiosk("s1", &ended("s1")).await);
        let msg = rx2.recv().await.unwrap();
        assert!(msg.contains("session_ended"));
    }

    #[tokio::test]
    async fn test_phone_register_notifies_kiosk() {
        let hub = BoothHub::new();
        let (_kiosk, mut kiosk_rx) = hub.register_kiosk("s1").await;

        let (_phone, phone_id, _phone_rx) = hub.register_phone("s1").await;
        assert_eq!(hub.phone_count("s1").await, 1);

        let msg = kiosk_rx.recv().await.unwrap();
        assert!(msg.contains("phone_connected"));
        assert!(msg.contains(&phone_id));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_kiosk_and_phones() {
        let hub = BoothHub::new();
        let (_kiosk, mut kiosk_rx) = hub.register_kiosk("s1").await;
        let (_p1, _, mut p1_rx) = hub.register_phone("s1").await;
        let (_p2, _, mut p2_rx) = hub.register_phone("s1").await;

        hub.broadcast("s1", &ended("s1")).await;

        // Skip the phone_connected notifications the kiosk saw first
        let mut saw = None;
        while let Ok(msg) = kiosk_rx.try_recv() {
            if msg.contains("session_ended") {
                saw = Some(msg);
            }
        }
        assert!(saw.is_some());

        assert!(p1_rx.recv().await.unwrap().contains("session_ended"));
        assert!(p2_rx.recv().await.unwrap().contains("session_ended"));
    }

    #[tokio::test]
    async fn test_dead_phone_evicted_others_delivered() {
        let hub = BoothHub::new();
        let (_p1, _, mut p1_rx) = hub.register_phone("s1").await;
        let (_p2, _, p2_rx) = hub.register_phone("s1").await;
        let (_p3, _, mut p3_rx) = hub.register_phone("s1").await;
        assert_eq!(hub.phone_count("s1").await, 3);

        // Break phone #2's transport
        drop(p2_rx);

        let delivered = hub.send_to_phones("s1", &ended("s1")).await;
        assert_eq!(delivered, 2);
        assert_eq!(hub.phone_count("s1").await, 2);

        assert!(p1_rx.recv().await.unwrap().contains("session_ended"));
        assert!(p3_rx.recv().await.unwrap().contains("session_ended"));
    }

    #[tokio::test]
    async fn test_unregister_idempotent_and_notifies() {
        let hub = BoothHub::new();
        let (_kiosk, mut kiosk_rx) = hub.register_kiosk("s1").await;
        let (phone_conn, phone_id, _rx) = hub.register_phone("s1").await;

        hub.unregister(phone_conn).await;
        hub.unregister(phone_conn).await;

        assert_eq!(hub.phone_count("s1").await, 0);
        assert_eq!(hub.connection_count(), 1);

        let mut disconnect_msgs = 0;
        while let Ok(msg) = kiosk_rx.try_recv() {
            if msg.contains("phone_disconnected") && msg.contains(&phone_id) {
                disconnect_msgs += 1;
            }
        }
        assert_eq!(disconnect_msgs, 1);
    }

    #[tokio::test]
    async fn test_send_to_connection() {
        let hub = BoothHub::new();
        let (kiosk_conn, mut kiosk_rx) = hub.register_kiosk("s1").await;
        let (phone_conn, _, mut phone_rx) = hub.register_phone("s1").await;

        assert!(hub.send_to_connection(kiosk_conn, &BoothEvent::Pong).await);
        assert!(kiosk_rx.recv().await.unwrap().contains("pong"));

        assert!(hub.send_to_connection(phone_conn, &BoothEvent::Pong).await);
        assert!(phone_rx.recv().await.unwrap().contains("pong"));

        // Unknown connection
        assert!(!hub.send_to_connection(Uuid::new_v4(), &BoothEvent::Pong).await);
    }

    #[tokio::test]
    async fn test_close_session_broadcasts_then_closes() {
        let hub = BoothHub::new();
        let (_kiosk, mut kiosk_rx) = hub.register_kiosk("s1").await;
        let (_phone, _, mut phone_rx) = hub.register_phone("s1").await;

        hub.close_session("s1").await;

        // Last message before the channel closes must be session_ended
        let mut last = None;
        while let Some(msg) = phone_rx.recv().await {
            last = Some(msg);
        }
        assert!(last.unwrap().contains("session_ended"));

        let mut last = None;
        while let Some(msg) = kiosk_rx.recv().await {
            last = Some(msg);
        }
        assert!(last.unwrap().contains("session_ended"));

        assert!(!hub.has_kiosk("s1").await);
        assert_eq!(hub.phone_count("s1").await, 0);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_event_wire_format() {
        let event = BoothEvent::Countdown {
            session_id: "s1".into(),
            value: 3,
            photo_number: 1,
            total_photos: 3,
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "countdown");
        assert_eq!(json["data"]["value"], 3);
        assert_eq!(json["data"]["photo_number"], 1);
    }

    #[test]
    fn test_client_message_parse() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"end_session"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::EndSession));
    }
}
