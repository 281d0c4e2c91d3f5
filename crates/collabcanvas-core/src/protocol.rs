//! Wire protocol shared by every transport.
//!
//! Every message is a `{ "type": ..., "payload": ... }` envelope. A relay
//! wraps the events it fans out as `{ "type": "evt", "payload": <event> }`
//! and delivers the room history once as `{ "type": "init", "payload": [...] }`.

use serde::{Deserialize, Serialize};

use crate::ops::Operation;
use crate::presence::User;

/// Application event carried between participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Ask the relay to add this connection to a room.
    #[serde(rename = "join")]
    Join(JoinPayload),
    /// Authoritative history snapshot from the relay.
    #[serde(rename = "init")]
    Init(Vec<Operation>),
    #[serde(rename = "presence:join")]
    PresenceJoin(PresenceJoinPayload),
    #[serde(rename = "presence:leave")]
    PresenceLeave(PresenceLeavePayload),
    #[serde(rename = "cursor")]
    Cursor(CursorPayload),
    #[serde(rename = "op:commit")]
    OpCommit(Operation),
    #[serde(rename = "op:undo")]
    OpUndo(OpRef),
    #[serde(rename = "op:redo")]
    OpRedo(OpRef),
    #[serde(rename = "op:clear")]
    OpClear(ClearPayload),
    #[serde(rename = "ping")]
    Ping(PingPayload),
    #[serde(rename = "pong")]
    Pong(PingPayload),
}

impl Event {
    /// The envelope `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Join(_) => "join",
            Event::Init(_) => "init",
            Event::PresenceJoin(_) => "presence:join",
            Event::PresenceLeave(_) => "presence:leave",
            Event::Cursor(_) => "cursor",
            Event::OpCommit(_) => "op:commit",
            Event::OpUndo(_) => "op:undo",
            Event::OpRedo(_) => "op:redo",
            Event::OpClear(_) => "op:clear",
            Event::Ping(_) => "ping",
            Event::Pong(_) => "pong",
        }
    }

    /// Serialize to the JSON envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a plain (unwrapped) envelope.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn join(room_id: impl Into<String>) -> Self {
        Event::Join(JoinPayload { room_id: room_id.into() })
    }

    pub fn presence_join(user: User) -> Self {
        Event::PresenceJoin(PresenceJoinPayload { user })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceJoinPayload {
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceLeavePayload {
    pub user_id: String,
}

/// Pointer position in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPayload {
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub p: CursorPoint,
}

/// Undo/redo notification. Both fields are optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClearPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingPayload {
    pub t0: f64,
}

/// Frames sent by a relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum RelayFrame {
    /// An application event fanned out to the room.
    Evt(Event),
    /// The room history, sent once after joining.
    Init(Vec<Operation>),
}

impl RelayFrame {
    /// Parse a relay frame into the event it carries.
    ///
    /// Returns `None` for anything malformed; callers drop such frames.
    pub fn parse(text: &str) -> Option<Event> {
        match serde_json::from_str::<RelayFrame>(text) {
            Ok(RelayFrame::Evt(event)) => Some(event),
            Ok(RelayFrame::Init(ops)) => Some(Event::Init(ops)),
            Err(e) => {
                log::debug!("Dropping malformed relay frame: {}", e);
                None
            }
        }
    }
}
