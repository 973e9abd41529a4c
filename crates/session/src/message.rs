use dd_core::ErrorCode;
use dd_core::ImageId;
use dd_core::Seq;
use dd_dispatch::PickCandidate;
use dd_dispatch::PresetInfo;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Participant identity as echoed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub uuid: Uuid,
    pub image_id: ImageId,
}

/// One entry of a room listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: Uuid,
    pub image_id: ImageId,
    pub members: usize,
}

/// Full room snapshot, rebroadcast after every membership change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: Uuid,
    pub image_id: ImageId,
    pub preset: PresetInfo,
    pub members: Vec<RoomMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMember {
    pub uuid: Uuid,
    pub image_id: ImageId,
    pub ready: bool,
}

/// Bind acknowledgement payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindEcho {
    pub uuid: Uuid,
    pub image_id: ImageId,
    /// Present when the identity is already in a room or a running draft,
    /// so a rebinding client can find its way back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<Uuid>,
}

/// Allowed pick count carried on a pick request: an exact count for draft
/// sub-rounds, a range for sealed rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PickBudget {
    Exact(usize),
    Range { min: usize, max: usize },
}

impl PickBudget {
    pub fn contains(&self, n: usize) -> bool {
        match self {
            Self::Exact(k) => n == *k,
            Self::Range { min, max } => *min <= n && n <= *max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    Draft,
    Sealed,
}

/// A participant's answer to a pick request: the candidate ids chosen.
/// Arrives either as ack data or as an out-of-band `pick_selection`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PickSelection {
    pub picks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickProgressEntry {
    pub uuid: Uuid,
    pub image_id: ImageId,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Messages travelling client → server, multiplexed by `tag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum ClientMessage {
    Bind {
        uuid: Uuid,
        secret: String,
        image_id: ImageId,
    },
    CreateRoom {
        image_id: ImageId,
    },
    JoinRoom {
        room_id: Uuid,
    },
    LeaveRoom {},
    Ready {
        ready: bool,
    },
    PollRooms {},
    RequestRoomInfo {},
    UsePreset {
        id: String,
    },
    PollPresets {},
    RequestStartDraft {},
    PickSelection {
        draft_id: Uuid,
        req_id: String,
        picks: Vec<String>,
    },
    /// Acknowledges a server-initiated request; correlated by frame seq.
    Ack {
        status: AckStatus,
        #[serde(default)]
        data: serde_json::Value,
    },
}

/// Messages travelling server → client, multiplexed by `tag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges a client-initiated request; correlated by frame seq.
    Ack {
        status: AckStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    RoomInfo(RoomInfo),
    RoomExpired {
        room_id: Uuid,
    },
    ParticipantDidJoin {
        uuid: Uuid,
        image_id: ImageId,
    },
    ParticipantDidLeave {
        uuid: Uuid,
    },
    ParticipantDidReady {
        uuid: Uuid,
        ready: bool,
    },
    DraftDidStart {
        draft_id: Uuid,
        preset: PresetInfo,
        participants: Vec<ParticipantInfo>,
    },
    PickRequest {
        draft_id: Uuid,
        req_id: String,
        ptype: RoundKind,
        candidates: Vec<PickCandidate>,
        npicks: PickBudget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shift: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prev: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<Uuid>,
    },
    ParticipantDidPick {
        draft_id: Uuid,
        req_id: String,
        who: Uuid,
    },
    PickProgress {
        draft_id: Uuid,
        req_id: String,
        participants: Vec<PickProgressEntry>,
    },
    PickComplete {
        draft_id: Uuid,
        req_id: String,
    },
    /// Resynchronization snapshot pushed before anything else when a
    /// participant reconnects mid-draft.
    DraftRecover {
        draft_id: Uuid,
        picks: Vec<PickCandidate>,
        participants: Vec<ParticipantInfo>,
    },
    DraftComplete {
        draft_id: Uuid,
        picks: Vec<PickCandidate>,
    },
    DraftDidStop {
        draft_id: Uuid,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn ok(data: serde_json::Value) -> Self {
        Self::Ack {
            status: AckStatus::Ok,
            data: Some(data),
            code: None,
            message: None,
        }
    }
    pub fn err(error: &dd_core::DraftError) -> Self {
        Self::Ack {
            status: AckStatus::Error,
            data: None,
            code: Some(error.code),
            message: Some(error.message.clone()),
        }
    }
    pub fn error(error: &dd_core::DraftError) -> Self {
        Self::Error {
            code: error.code,
            message: error.message.clone(),
        }
    }
}

/// Client-side envelope. Every frame carries a seq; requests expect an
/// acknowledgement frame echoing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub seq: Seq,
    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Server-side envelope. Pushed events carry no seq; acknowledgements and
/// server-initiated requests do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<Seq>,
    #[serde(flatten)]
    pub message: ServerMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_multiplex_by_tag() {
        let json = r#"{"seq":3,"tag":"bind","uuid":"6ff54a43-5b0a-4fbb-b00d-7d12b4dd73bb","secret":"s3cret","image_id":5}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.seq, 3);
        assert!(matches!(
            frame.message,
            ClientMessage::Bind { image_id: 5, .. }
        ));
    }
    #[test]
    fn client_ack_data_defaults_to_null() {
        let json = r#"{"seq":9,"tag":"ack","status":"ok"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame.message {
            ClientMessage::Ack { status, data } => {
                assert_eq!(status, AckStatus::Ok);
                assert!(data.is_null());
            }
            _ => panic!("expected ack"),
        }
    }
    #[test]
    fn pick_budget_is_a_number_or_a_range() {
        let exact: PickBudget = serde_json::from_str("2").unwrap();
        assert_eq!(exact, PickBudget::Exact(2));
        assert!(exact.contains(2) && !exact.contains(1));
        let range: PickBudget = serde_json::from_str(r#"{"min":1,"max":3}"#).unwrap();
        assert!(range.contains(1) && range.contains(3) && !range.contains(4));
        assert_eq!(serde_json::to_string(&exact).unwrap(), "2");
    }
    #[test]
    fn pushed_events_omit_seq() {
        let frame = ServerFrame {
            seq: None,
            message: ServerMessage::DraftDidStop {
                draft_id: Uuid::from_u128(7),
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("seq"));
        assert!(json.contains(r#""tag":"draft_did_stop""#));
    }
    #[test]
    fn error_ack_carries_code_and_message() {
        let error = dd_core::DraftError::with(ErrorCode::NotReady, "2 of 3 ready");
        let json = serde_json::to_string(&ServerMessage::err(&error)).unwrap();
        assert!(json.contains(r#""status":"error""#));
        assert!(json.contains(r#""code":"NOT_READY""#));
        assert!(!json.contains("data"));
    }
    #[test]
    fn pick_request_omits_absent_neighbors() {
        let message = ServerMessage::PickRequest {
            draft_id: Uuid::from_u128(1),
            req_id: "4".into(),
            ptype: RoundKind::Sealed,
            candidates: vec![PickCandidate::new("A.0.1".into(), vec![77])],
            npicks: PickBudget::Range { min: 1, max: 2 },
            title: None,
            shift: None,
            prev: None,
            next: None,
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(!json.contains("prev"));
        assert!(!json.contains("shift"));
        assert!(json.contains(r#""ptype":"sealed""#));
    }
}
