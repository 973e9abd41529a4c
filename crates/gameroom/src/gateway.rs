use crate::ClientAck;
use crate::Connection;
use crate::GatewayEmitter;
use crate::Outgoing;
use dd_core::DraftError;
use dd_core::ErrorCode;
use dd_core::ID;
use dd_core::ImageId;
use dd_dispatch::Preset;
use dd_dispatch::PresetInfo;
use dd_session::BindEcho;
use dd_session::ClientFrame;
use dd_session::ClientMessage;
use dd_session::Draft;
use dd_session::DraftingSession;
use dd_session::Participant;
use dd_session::RoomInfo;
use dd_session::RoomMember;
use dd_session::RoomSummary;
use dd_session::Roster;
use dd_session::ServerMessage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::unbounded_channel;
use uuid::Uuid;

/// Validated presets by id, resolved once at startup.
pub trait PresetSource: Send + Sync {
    fn list(&self) -> Vec<PresetInfo>;
    fn preset(&self, id: &str) -> Option<Preset>;
}

/// A uuid came online on this connection.
#[derive(Clone)]
pub struct OnlineEvent {
    pub uuid: Uuid,
    pub connection: Arc<Connection>,
}

/// A pick decision arrived out-of-band, keyed by (uuid, draft, round).
#[derive(Debug, Clone)]
pub struct PickedEvent {
    pub uuid: Uuid,
    pub draft_id: Uuid,
    pub req_id: String,
    pub picks: Vec<String>,
}

/// Registered identity. Survives disconnects; the connection slot is the
/// only part that comes and goes.
struct Client {
    secret: String,
    image_id: ImageId,
    connection: Option<Arc<Connection>>,
}

struct Member {
    uuid: Uuid,
    ready: bool,
}

struct Room {
    id: Uuid,
    image_id: ImageId,
    preset: String,
    members: Vec<Member>,
}

#[derive(Default)]
struct State {
    clients: HashMap<Uuid, Client>,
    rooms: HashMap<Uuid, Room>,
    sessions: HashMap<Uuid, Arc<DraftingSession>>,
    /// Which active draft each participant uuid is bound to. A uuid in
    /// here cannot join or create rooms.
    drafting: HashMap<Uuid, Uuid>,
}

/// The session gateway. Binds logical identities to transient
/// connections, runs the room lifecycle, and converts every handler
/// error into a structured ack at the dispatch boundary.
pub struct Gateway {
    state: Mutex<State>,
    presets: Arc<dyn PresetSource>,
    online: broadcast::Sender<OnlineEvent>,
    offline: broadcast::Sender<Uuid>,
    picked: broadcast::Sender<PickedEvent>,
}

impl Gateway {
    pub fn new(presets: Arc<dyn PresetSource>) -> Arc<Self> {
        let (online, _) = broadcast::channel(64);
        let (offline, _) = broadcast::channel(64);
        let (picked, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(State::default()),
            presets,
            online,
            offline,
            picked,
        })
    }

    /// Allocates a connection for a freshly accepted socket. The caller
    /// pumps the returned receiver into the socket.
    pub fn connect(&self) -> (Arc<Connection>, UnboundedReceiver<Outgoing>) {
        let (tx, rx) = unbounded_channel();
        let connection = Arc::new(Connection::new(tx));
        log::debug!("[gateway] connection {} opened", connection.id());
        (connection, rx)
    }

    /// Entry point for every inbound frame.
    pub fn handle(self: &Arc<Self>, connection: &Arc<Connection>, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(error) => {
                log::debug!("[gateway] unparseable frame: {}", error);
                connection.push(ServerMessage::error(&DraftError::with(
                    ErrorCode::ServerError,
                    "unparseable frame",
                )));
                return;
            }
        };
        match frame.message {
            ClientMessage::Ack { status, data } => {
                connection.resolve(frame.seq, ClientAck { status, data })
            }
            message => match self.dispatch(connection, message) {
                Ok(data) => connection.ack(frame.seq, ServerMessage::ok(data)),
                Err(error) => {
                    log::debug!("[gateway] request failed: {}", error);
                    connection.ack(frame.seq, ServerMessage::err(&error));
                }
            },
        }
    }

    /// Tears down a connection. Mid-draft participants stay registered so
    /// the delivery layer can wait for them; pre-start room members leave
    /// implicitly.
    pub fn disconnect(self: &Arc<Self>, connection: &Arc<Connection>) {
        connection.abandon();
        let gone = {
            let mut state = self.lock();
            let found = state.clients.iter_mut().find(|(_, client)| {
                client
                    .connection
                    .as_ref()
                    .is_some_and(|c| c.id() == connection.id())
            });
            let Some((uuid, client)) = found else {
                log::debug!("[gateway] unbound connection {} closed", connection.id());
                return;
            };
            let uuid = *uuid;
            client.connection = None;
            if !state.drafting.contains_key(&uuid) && Self::room_of(&state, uuid).is_some() {
                let _ = self.leave(&mut state, uuid);
            }
            uuid
        };
        log::info!("[gateway] {} went offline", gone);
        let _ = self.offline.send(gone);
    }

    fn dispatch(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
        message: ClientMessage,
    ) -> Result<serde_json::Value, DraftError> {
        match message {
            ClientMessage::Bind {
                uuid,
                secret,
                image_id,
            } => self.bind(connection, uuid, secret, image_id),
            ClientMessage::CreateRoom { image_id } => self.create_room(connection, image_id),
            ClientMessage::JoinRoom { room_id } => self.join_room(connection, room_id),
            ClientMessage::LeaveRoom {} => self.leave_room(connection),
            ClientMessage::Ready { ready } => self.ready(connection, ready),
            ClientMessage::PollRooms {} => self.poll_rooms(connection),
            ClientMessage::RequestRoomInfo {} => self.request_room_info(connection),
            ClientMessage::UsePreset { id } => self.use_preset(connection, id),
            ClientMessage::PollPresets {} => json(self.presets.list()),
            ClientMessage::RequestStartDraft {} => self.start_draft(connection),
            ClientMessage::PickSelection {
                draft_id,
                req_id,
                picks,
            } => self.pick_selection(connection, draft_id, req_id, picks),
            ClientMessage::Ack { .. } => Err(DraftError::with(
                ErrorCode::ServerError,
                "ack is not a request",
            )),
        }
    }

    /// Registers or re-authenticates an identity and claims the
    /// connection for it. At most one live connection per uuid: a newer
    /// bind evicts the stale one with a REBIND error.
    fn bind(
        &self,
        connection: &Arc<Connection>,
        uuid: Uuid,
        secret: String,
        image_id: ImageId,
    ) -> Result<serde_json::Value, DraftError> {
        let (stale, room_id, draft_id) = {
            let mut state = self.lock();
            let stale = match state.clients.get_mut(&uuid) {
                Some(client) => {
                    if client.secret != secret {
                        return Err(DraftError::with(ErrorCode::Forbidden, "secret mismatch"));
                    }
                    client.image_id = image_id;
                    client
                        .connection
                        .replace(connection.clone())
                        .filter(|c| c.id() != connection.id())
                }
                None => {
                    state.clients.insert(
                        uuid,
                        Client {
                            secret,
                            image_id,
                            connection: Some(connection.clone()),
                        },
                    );
                    None
                }
            };
            (
                stale,
                Self::room_of(&state, uuid),
                state.drafting.get(&uuid).copied(),
            )
        };
        if let Some(stale) = stale {
            log::info!("[gateway] rebind of {} evicts connection {}", uuid, stale.id());
            stale.close(&DraftError::with(
                ErrorCode::Rebind,
                "superseded by a newer bind",
            ));
            stale.abandon();
        }
        log::info!("[gateway] {} bound on connection {}", uuid, connection.id());
        let _ = self.online.send(OnlineEvent {
            uuid,
            connection: connection.clone(),
        });
        json(BindEcho {
            uuid,
            image_id,
            room_id,
            draft_id,
        })
    }

    fn create_room(
        &self,
        connection: &Arc<Connection>,
        image_id: ImageId,
    ) -> Result<serde_json::Value, DraftError> {
        let mut state = self.lock();
        let uuid = Self::bound(&state, connection)?;
        Self::guard_free(&state, uuid)?;
        let preset = self
            .presets
            .list()
            .first()
            .map(|p| p.id.clone())
            .ok_or_else(|| DraftError::config("no presets loaded"))?;
        let room = Room {
            id: ID::<Room>::default().inner(),
            image_id,
            preset,
            members: vec![Member { uuid, ready: false }],
        };
        let info = self.snapshot(&state, &room);
        log::info!("[gateway] {} created room {}", uuid, room.id);
        state.rooms.insert(room.id, room);
        json(info)
    }

    fn join_room(
        &self,
        connection: &Arc<Connection>,
        room_id: Uuid,
    ) -> Result<serde_json::Value, DraftError> {
        let mut state = self.lock();
        let uuid = Self::bound(&state, connection)?;
        Self::guard_free(&state, uuid)?;
        let image_id = state.clients.get(&uuid).map(|c| c.image_id).unwrap_or(0);
        state
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| DraftError::with(ErrorCode::NotFound, "no such room"))?
            .members
            .push(Member { uuid, ready: false });
        log::info!("[gateway] {} joined room {}", uuid, room_id);
        let room = &state.rooms[&room_id];
        let info = self.snapshot(&state, room);
        for member in room.members.iter().filter(|m| m.uuid != uuid) {
            Self::push(&state, member.uuid, ServerMessage::ParticipantDidJoin { uuid, image_id });
            Self::push(&state, member.uuid, ServerMessage::RoomInfo(info.clone()));
        }
        json(info)
    }

    fn leave_room(
        &self,
        connection: &Arc<Connection>,
    ) -> Result<serde_json::Value, DraftError> {
        let mut state = self.lock();
        let uuid = Self::bound(&state, connection)?;
        if state.drafting.contains_key(&uuid) {
            return Err(DraftError::with(
                ErrorCode::Picking,
                "cannot leave during a draft",
            ));
        }
        self.leave(&mut state, uuid)?;
        Ok(serde_json::Value::Null)
    }

    /// Removes a member and rebroadcasts; the room expires when empty.
    fn leave(&self, state: &mut State, uuid: Uuid) -> Result<(), DraftError> {
        let room_id = Self::room_of(state, uuid)
            .ok_or_else(|| DraftError::with(ErrorCode::NotInRoom, "not in a room"))?;
        if let Some(room) = state.rooms.get_mut(&room_id) {
            room.members.retain(|m| m.uuid != uuid);
        }
        log::info!("[gateway] {} left room {}", uuid, room_id);
        if state.rooms.get(&room_id).is_none_or(|r| r.members.is_empty()) {
            state.rooms.remove(&room_id);
            log::info!("[gateway] room {} expired", room_id);
            return Ok(());
        }
        let room = &state.rooms[&room_id];
        let info = self.snapshot(state, room);
        for member in &room.members {
            Self::push(state, member.uuid, ServerMessage::ParticipantDidLeave { uuid });
            Self::push(state, member.uuid, ServerMessage::RoomInfo(info.clone()));
        }
        Ok(())
    }

    fn ready(
        &self,
        connection: &Arc<Connection>,
        ready: bool,
    ) -> Result<serde_json::Value, DraftError> {
        let mut state = self.lock();
        let uuid = Self::bound(&state, connection)?;
        let room_id = Self::room_of(&state, uuid)
            .ok_or_else(|| DraftError::with(ErrorCode::NotInRoom, "not in a room"))?;
        if let Some(room) = state.rooms.get_mut(&room_id) {
            if let Some(member) = room.members.iter_mut().find(|m| m.uuid == uuid) {
                member.ready = ready;
            }
        }
        let room = &state.rooms[&room_id];
        let info = self.snapshot(&state, room);
        for member in &room.members {
            Self::push(&state, member.uuid, ServerMessage::ParticipantDidReady { uuid, ready });
            Self::push(&state, member.uuid, ServerMessage::RoomInfo(info.clone()));
        }
        Ok(serde_json::Value::Null)
    }

    fn poll_rooms(&self, connection: &Arc<Connection>) -> Result<serde_json::Value, DraftError> {
        let state = self.lock();
        Self::bound(&state, connection)?;
        let rooms: Vec<RoomSummary> = state
            .rooms
            .values()
            .map(|room| RoomSummary {
                room_id: room.id,
                image_id: room.image_id,
                members: room.members.len(),
            })
            .collect();
        json(rooms)
    }

    fn request_room_info(
        &self,
        connection: &Arc<Connection>,
    ) -> Result<serde_json::Value, DraftError> {
        let state = self.lock();
        let uuid = Self::bound(&state, connection)?;
        let room_id = Self::room_of(&state, uuid)
            .ok_or_else(|| DraftError::with(ErrorCode::NotInRoom, "not in a room"))?;
        json(self.snapshot(&state, &state.rooms[&room_id]))
    }

    fn use_preset(
        &self,
        connection: &Arc<Connection>,
        id: String,
    ) -> Result<serde_json::Value, DraftError> {
        let mut state = self.lock();
        let uuid = Self::bound(&state, connection)?;
        let room_id = Self::room_of(&state, uuid)
            .ok_or_else(|| DraftError::with(ErrorCode::NotInRoom, "not in a room"))?;
        if self.presets.preset(&id).is_none() {
            return Err(DraftError::with(ErrorCode::NotFound, "no such preset"));
        }
        if let Some(room) = state.rooms.get_mut(&room_id) {
            room.preset = id;
        }
        let room = &state.rooms[&room_id];
        let info = self.snapshot(&state, room);
        for member in &room.members {
            Self::push(&state, member.uuid, ServerMessage::RoomInfo(info.clone()));
        }
        Ok(serde_json::Value::Null)
    }

    /// Deletes the room and hands its members to a fresh drafting
    /// session. The swap is atomic under the state lock, so a room and a
    /// session for the same participants never coexist.
    fn start_draft(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
    ) -> Result<serde_json::Value, DraftError> {
        let session = {
            let mut state = self.lock();
            let uuid = Self::bound(&state, connection)?;
            let room_id = Self::room_of(&state, uuid)
                .ok_or_else(|| DraftError::with(ErrorCode::NotInRoom, "not in a room"))?;
            let room = &state.rooms[&room_id];
            if room
                .members
                .iter()
                .any(|m| state.drafting.contains_key(&m.uuid))
            {
                return Err(DraftError::with(ErrorCode::Conflict, "draft already started"));
            }
            if !room.members.iter().all(|m| m.ready) {
                return Err(DraftError::with(
                    ErrorCode::NotReady,
                    "not every participant is ready",
                ));
            }
            let preset = self.presets.preset(&room.preset).ok_or_else(|| {
                DraftError::with(ErrorCode::NotFound, "room preset is gone")
            })?;
            let room = match state.rooms.remove(&room_id) {
                Some(room) => room,
                None => return Err(DraftError::new(ErrorCode::ServerError)),
            };
            let participants: Vec<Arc<Participant>> = room
                .members
                .iter()
                .map(|m| {
                    let image_id = state.clients.get(&m.uuid).map(|c| c.image_id).unwrap_or(0);
                    Arc::new(Participant::new(m.uuid, image_id))
                })
                .collect();
            for member in &room.members {
                Self::push(&state, member.uuid, ServerMessage::RoomExpired { room_id });
            }
            let roster = Arc::new(Roster::new(participants));
            let id = ID::<Draft>::default();
            let emitter = Arc::new(GatewayEmitter::new(
                Arc::downgrade(self),
                roster.clone(),
                id.inner(),
            ));
            let session = Arc::new(DraftingSession::with_id(id, preset, roster, emitter));
            state.sessions.insert(id.inner(), session.clone());
            for member in &room.members {
                state.drafting.insert(member.uuid, id.inner());
            }
            session
        };
        let draft_id = session.id().inner();
        log::info!("[gateway] draft {} starting", draft_id);
        let gateway = self.clone();
        tokio::spawn(async move {
            if let Err(error) = session.start().await {
                log::warn!("[gateway] draft {} ended with {}", draft_id, error);
            }
            let mut state = gateway.lock();
            state.sessions.remove(&draft_id);
            state.drafting.retain(|_, d| *d != draft_id);
            log::info!("[gateway] draft {} cleaned up", draft_id);
        });
        json(serde_json::json!({ "draft_id": draft_id }))
    }

    /// Out-of-band pick decision, e.g. a cached answer replayed after a
    /// reconnect. Forwarded to whatever delivery is waiting on it.
    fn pick_selection(
        &self,
        connection: &Arc<Connection>,
        draft_id: Uuid,
        req_id: String,
        picks: Vec<String>,
    ) -> Result<serde_json::Value, DraftError> {
        let uuid = Self::bound(&self.lock(), connection)?;
        log::debug!(
            "[gateway] {} picked {} ids for round {} of draft {}",
            uuid,
            picks.len(),
            req_id,
            draft_id
        );
        let _ = self.picked.send(PickedEvent {
            uuid,
            draft_id,
            req_id,
            picks,
        });
        Ok(serde_json::Value::Null)
    }

    // delivery-layer accessors

    pub(crate) fn connection_of(&self, uuid: Uuid) -> Option<Arc<Connection>> {
        self.lock()
            .clients
            .get(&uuid)
            .and_then(|client| client.connection.clone())
    }
    pub(crate) fn all_offline(&self, roster: &Roster) -> bool {
        let state = self.lock();
        roster.iter().all(|p| {
            state
                .clients
                .get(&p.uuid)
                .is_none_or(|client| client.connection.is_none())
        })
    }
    pub(crate) fn subscribe_online(&self) -> broadcast::Receiver<OnlineEvent> {
        self.online.subscribe()
    }
    pub(crate) fn subscribe_offline(&self) -> broadcast::Receiver<Uuid> {
        self.offline.subscribe()
    }
    pub(crate) fn subscribe_picked(&self) -> broadcast::Receiver<PickedEvent> {
        self.picked.subscribe()
    }

    // internals

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("state lock")
    }
    fn bound(state: &State, connection: &Arc<Connection>) -> Result<Uuid, DraftError> {
        state
            .clients
            .iter()
            .find(|(_, client)| {
                client
                    .connection
                    .as_ref()
                    .is_some_and(|c| c.id() == connection.id())
            })
            .map(|(uuid, _)| *uuid)
            .ok_or_else(|| DraftError::with(ErrorCode::Unbound, "bind first"))
    }
    fn room_of(state: &State, uuid: Uuid) -> Option<Uuid> {
        state
            .rooms
            .values()
            .find(|room| room.members.iter().any(|m| m.uuid == uuid))
            .map(|room| room.id)
    }
    fn guard_free(state: &State, uuid: Uuid) -> Result<(), DraftError> {
        if Self::room_of(state, uuid).is_some() {
            return Err(DraftError::with(ErrorCode::RoomConflict, "already in a room"));
        }
        if state.drafting.contains_key(&uuid) {
            return Err(DraftError::with(ErrorCode::Picking, "bound to an active draft"));
        }
        Ok(())
    }
    fn push(state: &State, uuid: Uuid, message: ServerMessage) {
        if let Some(connection) = state
            .clients
            .get(&uuid)
            .and_then(|client| client.connection.as_ref())
        {
            connection.push(message);
        }
    }
    fn snapshot(&self, state: &State, room: &Room) -> RoomInfo {
        let preset = self
            .presets
            .preset(&room.preset)
            .map(|p| p.info())
            .unwrap_or_else(|| PresetInfo {
                id: room.preset.clone(),
                name: room.preset.clone(),
                description: String::new(),
            });
        RoomInfo {
            room_id: room.id,
            image_id: room.image_id,
            preset,
            members: room
                .members
                .iter()
                .map(|m| RoomMember {
                    uuid: m.uuid,
                    image_id: state.clients.get(&m.uuid).map(|c| c.image_id).unwrap_or(0),
                    ready: m.ready,
                })
                .collect(),
        }
    }
}

fn json<T: Serialize>(value: T) -> Result<serde_json::Value, DraftError> {
    serde_json::to_value(value)
        .map_err(|error| DraftError::with(ErrorCode::ServerError, error.to_string()))
}
