use dd_core::DraftError;
use dd_core::ID;
use dd_core::Seq;
use dd_session::AckStatus;
use dd_session::ServerFrame;
use dd_session::ServerMessage;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// Frames leaving through a connection's socket pump.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Frame(String),
    Close,
}

/// A client acknowledgement, resolved from an incoming ack frame.
#[derive(Debug, Clone)]
pub struct ClientAck {
    pub status: AckStatus,
    pub data: serde_json::Value,
}

impl ClientAck {
    pub fn accepted(&self) -> bool {
        self.status == AckStatus::Ok
    }
}

/// One live transport connection. Owns the outbox toward the socket pump
/// and the seq-correlated map of server-initiated requests awaiting a
/// client ack. A connection is transient; identity lives on the uuid the
/// gateway binds it to.
pub struct Connection {
    id: ID<Connection>,
    outbox: UnboundedSender<Outgoing>,
    seq: AtomicU64,
    pending: Mutex<HashMap<Seq, oneshot::Sender<ClientAck>>>,
    /// Set once the socket is gone; requests racing `abandon` must not
    /// park a oneshot in a map nobody will ever drain again.
    closed: AtomicBool,
}

impl Connection {
    pub fn new(outbox: UnboundedSender<Outgoing>) -> Self {
        Self {
            id: ID::default(),
            outbox,
            seq: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }
    pub fn id(&self) -> ID<Connection> {
        self.id
    }

    /// Fire-and-forget event push; no seq, no ack expected.
    pub fn push(&self, message: ServerMessage) {
        self.send(None, message);
    }

    /// Acknowledges a client-initiated request by echoing its seq.
    pub fn ack(&self, seq: Seq, message: ServerMessage) {
        self.send(Some(seq), message);
    }

    /// Sends a server-initiated request and awaits the client's ack.
    /// Resolves None when the connection goes away before the ack
    /// arrives, or immediately when it is already abandoned.
    pub async fn request(&self, message: ServerMessage) -> Option<ClientAck> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        {
            // closed is checked under the pending lock so this insert
            // cannot slip in behind an abandon's clear
            let mut pending = self.pending.lock().expect("pending lock");
            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
            pending.insert(seq, tx);
        }
        self.send(Some(seq), message);
        rx.await.ok()
    }

    /// Routes an incoming ack frame to its waiting request.
    pub fn resolve(&self, seq: Seq, ack: ClientAck) {
        if let Some(tx) = self.pending.lock().expect("pending lock").remove(&seq) {
            let _ = tx.send(ack);
        } else {
            log::debug!("[conn {}] stray ack for seq {}", self.id, seq);
        }
    }

    /// Fails every outstanding request and refuses new ones. Called once
    /// the socket is gone.
    pub fn abandon(&self) {
        let mut pending = self.pending.lock().expect("pending lock");
        self.closed.store(true, Ordering::Relaxed);
        pending.clear();
    }

    /// Pushes a terminal error and asks the pump to close the socket.
    pub fn close(&self, error: &DraftError) {
        self.push(ServerMessage::error(error));
        let _ = self.outbox.send(Outgoing::Close);
    }

    fn send(&self, seq: Option<Seq>, message: ServerMessage) {
        let frame = ServerFrame { seq, message };
        let json = serde_json::to_string(&frame).expect("frame serializes");
        let _ = self.outbox.send(Outgoing::Frame(json));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn request_resolves_on_matching_ack() {
        let (tx, mut rx) = unbounded_channel();
        let connection = std::sync::Arc::new(Connection::new(tx));
        let pending = tokio::spawn({
            let connection = connection.clone();
            async move {
                connection
                    .request(ServerMessage::DraftDidStop {
                        draft_id: uuid::Uuid::from_u128(1),
                    })
                    .await
            }
        });
        // Frame goes out with seq 1 before the ack can arrive.
        let Some(Outgoing::Frame(json)) = rx.recv().await else {
            panic!("expected a frame");
        };
        let frame: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame.seq, Some(1));
        connection.resolve(
            1,
            ClientAck {
                status: AckStatus::Ok,
                data: serde_json::json!({"n": 7}),
            },
        );
        let ack = pending.await.unwrap().unwrap();
        assert!(ack.accepted());
        assert_eq!(ack.data["n"], 7);
    }

    #[tokio::test]
    async fn abandoned_requests_resolve_to_none() {
        let (tx, mut rx) = unbounded_channel();
        let connection = std::sync::Arc::new(Connection::new(tx));
        let pending = tokio::spawn({
            let connection = connection.clone();
            async move {
                connection
                    .request(ServerMessage::DraftDidStop {
                        draft_id: uuid::Uuid::from_u128(2),
                    })
                    .await
            }
        });
        let _ = rx.recv().await;
        connection.abandon();
        assert!(pending.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requests_on_an_abandoned_connection_resolve_to_none() {
        let (tx, _rx) = unbounded_channel();
        let connection = Connection::new(tx);
        connection.abandon();
        let ack = connection
            .request(ServerMessage::DraftDidStop {
                draft_id: uuid::Uuid::from_u128(4),
            })
            .await;
        assert!(ack.is_none());
    }

    #[tokio::test]
    async fn pushes_carry_no_seq() {
        let (tx, mut rx) = unbounded_channel();
        let connection = Connection::new(tx);
        connection.push(ServerMessage::DraftDidStop {
            draft_id: uuid::Uuid::from_u128(3),
        });
        let Some(Outgoing::Frame(json)) = rx.recv().await else {
            panic!("expected a frame");
        };
        assert!(!json.contains("seq"));
    }
}
