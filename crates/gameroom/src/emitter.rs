use crate::Connection;
use crate::Gateway;
use crate::PickedEvent;
use async_trait::async_trait;
use dd_core::DraftError;
use dd_core::ErrorCode;
use dd_core::RECONNECT_TIMEOUT;
use dd_session::Emitter;
use dd_session::Roster;
use dd_session::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Reliable per-participant delivery on behalf of one drafting session.
///
/// Each `emit` runs the full reconnection-aware loop: wait (bounded) for
/// the uuid to have a live connection, push a recovery snapshot right
/// after a reconnect, then race the request/ack round-trip against the
/// out-of-band pick channel and the uuid going offline again. Deliveries
/// to the same uuid are serialized, so a participant never sees two
/// outstanding requests.
pub struct GatewayEmitter {
    gateway: Weak<Gateway>,
    roster: Arc<Roster>,
    draft_id: Uuid,
    serials: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl GatewayEmitter {
    pub fn new(gateway: Weak<Gateway>, roster: Arc<Roster>, draft_id: Uuid) -> Self {
        Self {
            gateway,
            roster,
            draft_id,
            serials: Mutex::new(HashMap::new()),
        }
    }

    fn serial(&self, uuid: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.serials
            .lock()
            .expect("serials lock")
            .entry(uuid)
            .or_default()
            .clone()
    }

    fn gateway(&self) -> Result<Arc<Gateway>, DraftError> {
        self.gateway
            .upgrade()
            .ok_or_else(|| DraftError::with(ErrorCode::ServerError, "gateway is gone"))
    }

    /// ALL_OFFLINE check: fails when no participant in the session has a
    /// live connection, which propagates up to abort the whole draft.
    fn liveness(&self, gateway: &Gateway) -> Result<(), DraftError> {
        match gateway.all_offline(&self.roster) {
            true => Err(DraftError::with(
                ErrorCode::AllOffline,
                "no participant is reachable",
            )),
            false => Ok(()),
        }
    }

    /// Waits up to the reconnection window for the uuid to come online.
    async fn reconnected(
        &self,
        gateway: &Gateway,
        uuid: Uuid,
    ) -> Result<Arc<Connection>, DraftError> {
        let mut online = gateway.subscribe_online();
        // subscribe before re-probing so the event cannot slip past
        if let Some(connection) = gateway.connection_of(uuid) {
            return Ok(connection);
        }
        log::debug!("[emit {}] waiting for {} to reconnect", self.draft_id, uuid);
        let wait = async {
            loop {
                match online.recv().await {
                    Ok(event) if event.uuid == uuid => return event.connection,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(connection) = gateway.connection_of(uuid) {
                            return connection;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return futures::future::pending().await;
                    }
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(RECONNECT_TIMEOUT), wait)
            .await
            .map_err(|_| {
                DraftError::with(
                    ErrorCode::Timedout,
                    format!("{} did not reconnect in time", uuid),
                )
            })
    }
}

#[async_trait]
impl Emitter for GatewayEmitter {
    async fn emit(
        &self,
        uuid: Uuid,
        message: ServerMessage,
    ) -> Result<serde_json::Value, DraftError> {
        let serial = self.serial(uuid);
        let _guard = serial.lock().await;
        let gateway = self.gateway()?;
        let wanted = match &message {
            ServerMessage::PickRequest { req_id, .. } => Some(req_id.clone()),
            _ => None,
        };
        loop {
            let connection = match gateway.connection_of(uuid) {
                Some(connection) => connection,
                None => {
                    let connection = self.reconnected(&gateway, uuid).await?;
                    // resynchronize the client before anything else
                    let picks = self
                        .roster
                        .get(uuid)
                        .map(|p| p.picks())
                        .unwrap_or_default();
                    log::debug!(
                        "[emit {}] recovery snapshot of {} picks to {}",
                        self.draft_id,
                        picks.len(),
                        uuid
                    );
                    connection.push(ServerMessage::DraftRecover {
                        draft_id: self.draft_id,
                        picks,
                        participants: self.roster.infos(),
                    });
                    connection
                }
            };
            let mut offline = gateway.subscribe_offline();
            let mut picked = gateway.subscribe_picked();
            tokio::select! {
                ack = connection.request(message.clone()) => match ack {
                    Some(ack) if ack.accepted() => return Ok(ack.data),
                    Some(_) => {
                        log::debug!("[emit {}] {} rejected the request", self.draft_id, uuid);
                        connection.push(ServerMessage::error(&DraftError::with(
                            ErrorCode::Rejected,
                            "request rejected; reissuing",
                        )));
                        continue;
                    }
                    None => {
                        self.liveness(&gateway)?;
                        continue;
                    }
                },
                picks = decided(&mut picked, uuid, self.draft_id, wanted.clone().unwrap_or_default()), if wanted.is_some() => {
                    log::debug!("[emit {}] {} answered out-of-band", self.draft_id, uuid);
                    return Ok(serde_json::json!({ "picks": picks }));
                }
                _ = dropped(&mut offline, uuid) => {
                    self.liveness(&gateway)?;
                    continue;
                }
            }
        }
    }

    async fn notify(&self, uuid: Uuid, message: ServerMessage) {
        if let Some(connection) = self
            .gateway
            .upgrade()
            .and_then(|gateway| gateway.connection_of(uuid))
        {
            connection.push(message);
        }
    }
}

/// Resolves when this uuid's connection goes offline.
async fn dropped(events: &mut broadcast::Receiver<Uuid>, uuid: Uuid) {
    loop {
        match events.recv().await {
            Ok(gone) if gone == uuid => return,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return futures::future::pending().await;
            }
        }
    }
}

/// Resolves with the picks of an out-of-band decision for this exact
/// (uuid, draft, round) key.
async fn decided(
    events: &mut broadcast::Receiver<PickedEvent>,
    uuid: Uuid,
    draft_id: Uuid,
    req_id: String,
) -> Vec<String> {
    loop {
        match events.recv().await {
            Ok(event)
                if event.uuid == uuid
                    && event.draft_id == draft_id
                    && event.req_id == req_id =>
            {
                return event.picks;
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return futures::future::pending().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use dd_dispatch::PickCandidate;
    use dd_session::Participant;
    use dd_session::PickBudget;
    use dd_session::RoundKind;
    use dd_session::ServerFrame;

    fn harness(uuid: Uuid) -> (Arc<Gateway>, Arc<GatewayEmitter>, Arc<Participant>) {
        let gateway = Gateway::new(Arc::new(testing::OnePreset));
        let participant = Arc::new(Participant::new(uuid, 3));
        let roster = Arc::new(Roster::new(vec![participant.clone()]));
        let emitter = Arc::new(GatewayEmitter::new(
            Arc::downgrade(&gateway),
            roster,
            Uuid::from_u128(500),
        ));
        (gateway, emitter, participant)
    }
    fn bind(gateway: &Arc<Gateway>, uuid: Uuid) -> (Arc<Connection>, tokio::sync::mpsc::UnboundedReceiver<crate::Outgoing>) {
        let (connection, rx) = gateway.connect();
        testing::send(
            gateway,
            &connection,
            1,
            &format!(r#"{{"tag":"bind","uuid":"{}","secret":"x","image_id":3}}"#, uuid),
        );
        (connection, rx)
    }
    fn pick_request(req_id: &str) -> ServerMessage {
        ServerMessage::PickRequest {
            draft_id: Uuid::from_u128(500),
            req_id: req_id.into(),
            ptype: RoundKind::Sealed,
            candidates: vec![PickCandidate::new("a.1".into(), vec![11])],
            npicks: PickBudget::Exact(1),
            title: None,
            shift: None,
            prev: None,
            next: None,
        }
    }

    #[tokio::test]
    async fn reconnect_pushes_recovery_before_the_request() {
        let uuid = Uuid::from_u128(31);
        let (gateway, emitter, participant) = harness(uuid);
        participant.record("1", vec![PickCandidate::new("x.1".into(), vec![9])]);
        let emitting = tokio::spawn({
            let emitter = emitter.clone();
            async move {
                emitter
                    .emit(
                        uuid,
                        ServerMessage::DraftDidStop {
                            draft_id: Uuid::from_u128(500),
                        },
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (connection, mut rx) = bind(&gateway, uuid);
        let ack = testing::next_frame(&mut rx).await;
        assert!(testing::accepted(&ack));
        let recover = testing::next_frame(&mut rx).await;
        match recover.message {
            ServerMessage::DraftRecover { picks, .. } => assert_eq!(picks.len(), 1),
            other => panic!("expected draft_recover first, got {:?}", other),
        }
        let request: ServerFrame = testing::next_frame(&mut rx).await;
        let seq = request.seq.unwrap();
        assert!(matches!(request.message, ServerMessage::DraftDidStop { .. }));
        testing::send(
            &gateway,
            &connection,
            seq,
            r#"{"tag":"ack","status":"ok","data":{"x":1}}"#,
        );
        let data = emitting.await.unwrap().unwrap();
        assert_eq!(data["x"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_window_elapses_to_timedout() {
        let uuid = Uuid::from_u128(32);
        let (_gateway, emitter, _) = harness(uuid);
        let error = emitter.emit(uuid, pick_request("1")).await.unwrap_err();
        assert_eq!(error.code, ErrorCode::Timedout);
    }

    #[tokio::test]
    async fn disconnect_of_the_last_participant_is_all_offline() {
        let uuid = Uuid::from_u128(33);
        let (gateway, emitter, _) = harness(uuid);
        let (connection, mut rx) = bind(&gateway, uuid);
        let emitting = tokio::spawn({
            let emitter = emitter.clone();
            async move { emitter.emit(uuid, pick_request("9")).await }
        });
        // bind ack, then the pick request
        let _ = testing::next_frame(&mut rx).await;
        let _ = testing::next_frame(&mut rx).await;
        gateway.disconnect(&connection);
        let error = emitting.await.unwrap().unwrap_err();
        assert_eq!(error.code, ErrorCode::AllOffline);
    }

    #[tokio::test]
    async fn rejected_ack_reissues_the_request() {
        let uuid = Uuid::from_u128(34);
        let (gateway, emitter, _) = harness(uuid);
        let (connection, mut rx) = bind(&gateway, uuid);
        let emitting = tokio::spawn({
            let emitter = emitter.clone();
            async move { emitter.emit(uuid, pick_request("2")).await }
        });
        let _bind_ack = testing::next_frame(&mut rx).await;
        let first = testing::next_frame(&mut rx).await;
        testing::send(
            &gateway,
            &connection,
            first.seq.unwrap(),
            r#"{"tag":"ack","status":"error"}"#,
        );
        let notice = testing::next_frame(&mut rx).await;
        assert!(matches!(
            notice.message,
            ServerMessage::Error {
                code: ErrorCode::Rejected,
                ..
            }
        ));
        let second = testing::next_frame(&mut rx).await;
        assert!(matches!(second.message, ServerMessage::PickRequest { .. }));
        testing::send(
            &gateway,
            &connection,
            second.seq.unwrap(),
            r#"{"tag":"ack","status":"ok","data":{"picks":["a.1"]}}"#,
        );
        let data = emitting.await.unwrap().unwrap();
        assert_eq!(data["picks"][0], "a.1");
    }

    #[tokio::test]
    async fn out_of_band_decision_settles_a_pick_request() {
        let uuid = Uuid::from_u128(35);
        let (gateway, emitter, _) = harness(uuid);
        let (connection, mut rx) = bind(&gateway, uuid);
        let emitting = tokio::spawn({
            let emitter = emitter.clone();
            async move { emitter.emit(uuid, pick_request("5")).await }
        });
        let _bind_ack = testing::next_frame(&mut rx).await;
        let _request = testing::next_frame(&mut rx).await;
        testing::send(
            &gateway,
            &connection,
            2,
            &format!(
                r#"{{"tag":"pick_selection","draft_id":"{}","req_id":"5","picks":["a.1"]}}"#,
                Uuid::from_u128(500)
            ),
        );
        let data = emitting.await.unwrap().unwrap();
        assert_eq!(data["picks"][0], "a.1");
    }
}
