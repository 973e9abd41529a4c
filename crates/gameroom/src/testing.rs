use crate::Connection;
use crate::Gateway;
use crate::Outgoing;
use crate::PresetSource;
use dd_core::ErrorCode;
use dd_core::Seq;
use dd_dispatch::Dispatcher;
use dd_dispatch::Fixed;
use dd_dispatch::Npicks;
use dd_dispatch::Preset;
use dd_dispatch::PresetInfo;
use dd_dispatch::Schema;
use dd_session::AckStatus;
use dd_session::ServerFrame;
use dd_session::ServerMessage;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Store with a single trivial sealed preset.
pub struct OnePreset;

impl PresetSource for OnePreset {
    fn list(&self) -> Vec<PresetInfo> {
        vec![PresetInfo {
            id: "starter".into(),
            name: "Starter".into(),
            description: String::new(),
        }]
    }
    fn preset(&self, id: &str) -> Option<Preset> {
        (id == "starter").then(|| Preset {
            id: "starter".into(),
            name: "Starter".into(),
            description: String::new(),
            schema: Schema::Atom(Dispatcher::Fixed(
                Fixed::new(
                    Npicks::new(1, 1).expect("valid"),
                    None,
                    vec![vec![101], vec![102]],
                )
                .expect("valid"),
            )),
        })
    }
}

/// Splices a seq into a tagged message body and feeds it to the gateway.
pub fn send(gateway: &Arc<Gateway>, connection: &Arc<Connection>, seq: Seq, body: &str) {
    let body = body.trim_start().trim_start_matches('{');
    let text = format!(r#"{{"seq":{},{}"#, seq, body);
    gateway.handle(connection, &text);
}

/// Drains everything currently queued on an outbox.
pub fn drain_outgoing(rx: &mut UnboundedReceiver<Outgoing>) -> (Vec<ServerFrame>, bool) {
    let mut frames = Vec::new();
    let mut closed = false;
    while let Ok(outgoing) = rx.try_recv() {
        match outgoing {
            Outgoing::Frame(json) => {
                frames.push(serde_json::from_str(&json).expect("server frame parses"))
            }
            Outgoing::Close => closed = true,
        }
    }
    (frames, closed)
}

pub fn drain(rx: &mut UnboundedReceiver<Outgoing>) -> Vec<ServerFrame> {
    drain_outgoing(rx).0
}

/// Awaits the next frame, skipping close markers.
pub async fn next_frame(rx: &mut UnboundedReceiver<Outgoing>) -> ServerFrame {
    loop {
        match rx.recv().await.expect("open outbox") {
            Outgoing::Frame(json) => {
                return serde_json::from_str(&json).expect("server frame parses");
            }
            Outgoing::Close => continue,
        }
    }
}

pub fn accepted(frame: &ServerFrame) -> bool {
    matches!(
        frame.message,
        ServerMessage::Ack {
            status: AckStatus::Ok,
            ..
        }
    )
}

pub fn error_code(frame: &ServerFrame) -> Option<ErrorCode> {
    match &frame.message {
        ServerMessage::Ack {
            status: AckStatus::Error,
            code,
            ..
        } => *code,
        _ => None,
    }
}

pub fn ack_data(frame: &ServerFrame) -> serde_json::Value {
    match &frame.message {
        ServerMessage::Ack { data, .. } => data.clone().unwrap_or(serde_json::Value::Null),
        _ => serde_json::Value::Null,
    }
}
