//! Wire-compatible protocol types for the signaling service.
//!
//! Every frame is a JSON object of the form `{"type": "<namespace.Name>",
//! "data": {...}}`. Requests carry a `requestId` inside `data`, and the
//! matching response echoes it back. Field names are `camelCase`; enumerated
//! values (room types, member roles, ...) use the service's `PascalCase` names.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reason::StreamEndReason;

// ── Type aliases ────────────────────────────────────────────────────

/// Correlates a request with its response.
pub type RequestId = Uuid;

/// Identifier of an authenticated signaling session.
pub type SessionId = String;

/// Identifier of a media stream assigned by the service.
pub type StreamId = String;

/// Identifier of a room.
pub type RoomId = String;

/// Status value the service uses for a successful response.
pub const STATUS_OK: &str = "ok";

/// Prefix of every stream uri published through the service.
pub const STREAM_URI_PREFIX: &str = "pcast://phenixrts.com/";

/// Build the uri for a stream id.
pub fn stream_uri(stream_id: &str) -> String {
    format!("{STREAM_URI_PREFIX}{stream_id}")
}

/// Extract the stream id from a stream uri, if it carries the service prefix.
pub fn stream_id_from_uri(uri: &str) -> Option<&str> {
    uri.strip_prefix(STREAM_URI_PREFIX)
        .filter(|stream_id| !stream_id.is_empty())
}

// ── Enums ───────────────────────────────────────────────────────────

/// Kind of room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomType {
    DirectChat,
    MultiPartyChat,
    ModeratedChat,
    TownHall,
    /// Broadcast room with one presenter and many viewers.
    Channel,
    MultiAngleChannel,
}

/// Role of a member inside a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MemberRole {
    Participant,
    Moderator,
    /// The member whose stream the audience subscribes to.
    Presenter,
    #[default]
    Audience,
}

/// Presence state of a member.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MemberState {
    #[default]
    Active,
    Passive,
    HandRaised,
    Inactive,
    Offline,
}

/// Kind of stream a member publishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StreamType {
    #[default]
    User,
    Presentation,
    Audio,
}

/// State of an audio or video track.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TrackState {
    #[default]
    TrackEnabled,
    TrackDisabled,
    TrackEnded,
}

/// What happened in a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomEventType {
    MemberJoined,
    MemberLeft,
    MemberUpdated,
    RoomUpdated,
    RoomEnded,
}

// ── Structs ─────────────────────────────────────────────────────────

/// Immutable description of the channel to join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDescriptor {
    /// Channel alias, e.g. `"ChannelAlias"`.
    pub alias: String,
    /// Stream capabilities requested when subscribing (e.g. `"real-time"`).
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ChannelDescriptor {
    /// Describe a channel by alias with no extra capabilities.
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            capabilities: Vec::new(),
        }
    }

    /// Set the capabilities requested for the subscribed stream.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Room description returned on join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub alias: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
}

/// One published stream of a member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub uri: String,
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    #[serde(default)]
    pub audio_state: TrackState,
    #[serde(default)]
    pub video_state: TrackState,
}

impl StreamRecord {
    /// The stream id encoded in [`uri`](Self::uri), if any.
    pub fn stream_id(&self) -> Option<&str> {
        stream_id_from_uri(&self.uri)
    }
}

/// A member of a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub session_id: SessionId,
    pub screen_name: String,
    pub role: MemberRole,
    pub state: MemberState,
    #[serde(default)]
    pub streams: Vec<StreamRecord>,
    /// Milliseconds since the Unix epoch.
    pub last_update: u64,
}

impl MemberRecord {
    /// Returns the stream an audience member should subscribe to, if this
    /// member is a presenter that is currently publishing.
    pub fn presenter_stream(&self) -> Option<&StreamRecord> {
        if self.role != MemberRole::Presenter || self.state == MemberState::Offline {
            return None;
        }
        self.streams
            .iter()
            .find(|stream| stream.stream_type == StreamType::Presentation)
            .or_else(|| self.streams.first())
    }
}

/// Find the presenter and the stream to subscribe to among `members`.
///
/// When several presenters exist the most recently updated one wins.
pub fn select_presenter(members: &[MemberRecord]) -> Option<(&MemberRecord, &StreamRecord)> {
    members
        .iter()
        .filter_map(|member| member.presenter_stream().map(|stream| (member, stream)))
        .max_by_key(|(member, _)| member.last_update)
}

// ── Request payloads ────────────────────────────────────────────────

/// Payload of `pcast.Authenticate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
}

/// Payload of `chat.JoinRoom`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub request_id: RequestId,
    pub alias: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub role: MemberRole,
}

/// Payload of `pcast.SetupStream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStreamRequest {
    pub request_id: RequestId,
    pub stream_uri: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Payload of `pcast.DestroyStream`. Fire-and-forget, no response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyStreamRequest {
    pub stream_id: StreamId,
    pub reason: String,
}

// ── Response and event payloads ─────────────────────────────────────

/// Payload of `pcast.AuthenticateResponse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    pub request_id: RequestId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// Payload of `chat.JoinRoomResponse`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub request_id: RequestId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomInfo>,
    #[serde(default)]
    pub members: Vec<MemberRecord>,
}

impl JoinRoomResponse {
    /// Returns `true` if the service accepted the join.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Payload of `pcast.SetupStreamResponse`; describes the stream the
/// subscriber was attached to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamSetup {
    pub request_id: RequestId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<StreamId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl StreamSetup {
    /// Returns `true` if the service created the stream.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK && self.stream_id.is_some()
    }
}

/// Payload of `pcast.StreamEnded`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamEndedEvent {
    pub stream_id: StreamId,
    pub session_id: SessionId,
    pub reason: StreamEndReason,
}

/// Payload of `chat.RoomEvent`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub room_id: RoomId,
    pub event_type: RoomEventType,
    #[serde(default)]
    pub members: Vec<MemberRecord>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Authenticate the session (MUST be the first message).
    #[serde(rename = "pcast.Authenticate")]
    Authenticate(AuthenticateRequest),
    /// Join a room by alias.
    #[serde(rename = "chat.JoinRoom")]
    JoinRoom(JoinRoomRequest),
    /// Subscribe to a published stream.
    #[serde(rename = "pcast.SetupStream")]
    SetupStream(SetupStreamRequest),
    /// Release a subscribed stream.
    #[serde(rename = "pcast.DestroyStream")]
    DestroyStream(DestroyStreamRequest),
}

impl ClientMessage {
    /// The request id of this message, if it expects a response.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Authenticate(req) => Some(req.request_id),
            Self::JoinRoom(req) => Some(req.request_id),
            Self::SetupStream(req) => Some(req.request_id),
            Self::DestroyStream(_) => None,
        }
    }
}

/// Message types sent from service to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "pcast.AuthenticateResponse")]
    AuthenticateResponse(AuthenticateResponse),
    /// Boxed to reduce enum size.
    #[serde(rename = "chat.JoinRoomResponse")]
    JoinRoomResponse(Box<JoinRoomResponse>),
    #[serde(rename = "pcast.SetupStreamResponse")]
    SetupStreamResponse(StreamSetup),
    /// Unsolicited: a stream ended.
    #[serde(rename = "pcast.StreamEnded")]
    StreamEnded(StreamEndedEvent),
    /// Unsolicited: room membership changed.
    #[serde(rename = "chat.RoomEvent")]
    RoomEvent(RoomEvent),
}

impl ServerMessage {
    /// The request id this message answers, or `None` for unsolicited events.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::AuthenticateResponse(resp) => Some(resp.request_id),
            Self::JoinRoomResponse(resp) => Some(resp.request_id),
            Self::SetupStreamResponse(resp) => Some(resp.request_id),
            Self::StreamEnded(_) | Self::RoomEvent(_) => None,
        }
    }
}
