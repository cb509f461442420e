//! Socket Mode envelope parsing and event normalization.
//!
//! Raw websocket frames become [`SocketEnvelope`]s; `events_api` and
//! `slash_commands` envelopes normalize into [`InboundEvent`]s the router
//! understands. Everything else (hello frames, pings, unsupported event
//! types, the bot's own messages) normalizes to `None`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SocketEnvelope {
    pub envelope_id: String,
    #[serde(rename = "type")]
    pub envelope_type: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileAttachment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub url_private_download: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    DirectMessage,
    Mention,
}

/// A user message destined for a session thread.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub kind: MessageKind,
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub files: Vec<FileAttachment>,
}

impl MessageEvent {
    /// The session key: the thread root when replying, else this message
    /// (a new thread is created implicitly on first reply).
    pub fn thread_id(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    pub fn starts_thread(&self) -> bool {
        self.thread_ts.is_none()
    }
}

/// A reaction added to some message; the router matches `item_ts` against
/// session thread roots.
#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub user_id: String,
    pub reaction: String,
    pub channel_id: String,
    pub item_ts: String,
}

#[derive(Debug, Clone)]
pub struct SlashCommandEvent {
    pub command: String,
    pub text: String,
    pub user_id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Message(MessageEvent),
    ReactionAdded(ReactionEvent),
    SlashCommand(SlashCommandEvent),
}

#[derive(Debug, Deserialize)]
struct EventCallbackEnvelope {
    #[serde(rename = "type")]
    callback_type: String,
    event: EventPayload,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    files: Vec<FileAttachment>,
    #[serde(default)]
    reaction: Option<String>,
    #[serde(default)]
    item: Option<ReactionItem>,
}

#[derive(Debug, Deserialize)]
struct ReactionItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlashCommandPayload {
    command: String,
    #[serde(default)]
    text: String,
    user_id: String,
    channel_id: String,
}

/// Decode one websocket frame into an envelope. Pings, pongs, and close
/// frames carry no envelope.
pub fn parse_socket_envelope(message: WsMessage) -> Result<Option<SocketEnvelope>> {
    match message {
        WsMessage::Text(text) => {
            let envelope = serde_json::from_str::<SocketEnvelope>(&text)
                .context("failed to parse slack socket envelope")?;
            Ok(Some(envelope))
        }
        WsMessage::Binary(bytes) => {
            let text =
                String::from_utf8(bytes.to_vec()).context("invalid utf-8 slack socket payload")?;
            let envelope = serde_json::from_str::<SocketEnvelope>(&text)
                .context("failed to parse slack socket envelope")?;
            Ok(Some(envelope))
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(None),
        WsMessage::Close(_) => Ok(None),
        WsMessage::Frame(_) => Ok(None),
    }
}

/// Normalize an envelope into an inbound event, filtering out everything
/// the bridge must ignore: the bot's own messages, bot_message and
/// non-`file_share` subtypes, unsupported event types.
pub fn normalize_socket_envelope(
    envelope: &SocketEnvelope,
    bot_user_id: &str,
) -> Result<Option<InboundEvent>> {
    match envelope.envelope_type.as_str() {
        "events_api" => normalize_event_callback(envelope, bot_user_id),
        "slash_commands" => {
            let payload =
                serde_json::from_value::<SlashCommandPayload>(envelope.payload.clone())
                    .context("failed to decode slack slash command payload")?;
            Ok(Some(InboundEvent::SlashCommand(SlashCommandEvent {
                command: payload.command,
                text: payload.text,
                user_id: payload.user_id,
                channel_id: payload.channel_id,
            })))
        }
        _ => Ok(None),
    }
}

fn normalize_event_callback(
    envelope: &SocketEnvelope,
    bot_user_id: &str,
) -> Result<Option<InboundEvent>> {
    let callback = serde_json::from_value::<EventCallbackEnvelope>(envelope.payload.clone())
        .context("failed to decode slack event callback payload")?;
    if callback.callback_type != "event_callback" {
        return Ok(None);
    }

    let event = callback.event;

    if event.event_type == "reaction_added" {
        let user_id = match event.user {
            Some(user) if !user.trim().is_empty() => user,
            _ => return Ok(None),
        };
        if user_id == bot_user_id {
            return Ok(None);
        }
        let Some(reaction) = event.reaction else {
            return Ok(None);
        };
        let Some(item) = event.item else {
            return Ok(None);
        };
        if item.item_type != "message" {
            return Ok(None);
        }
        let (Some(channel), Some(ts)) = (item.channel, item.ts) else {
            return Ok(None);
        };
        return Ok(Some(InboundEvent::ReactionAdded(ReactionEvent {
            user_id,
            reaction,
            channel_id: channel,
            item_ts: ts,
        })));
    }

    if event.bot_id.is_some() || event.subtype.as_deref() == Some("bot_message") {
        return Ok(None);
    }
    // Subtyped messages carry no forwardable text, except file uploads.
    if let Some(subtype) = event.subtype.as_deref() {
        if subtype != "file_share" {
            return Ok(None);
        }
    }

    let user_id = match event.user {
        Some(user) if !user.trim().is_empty() => user,
        _ => return Ok(None),
    };
    if user_id == bot_user_id {
        return Ok(None);
    }

    let channel_id = match event.channel {
        Some(channel) if !channel.trim().is_empty() => channel,
        _ => return Ok(None),
    };
    let ts = match event.ts {
        Some(ts) if !ts.trim().is_empty() => ts,
        _ => return Ok(None),
    };
    let text = event.text.unwrap_or_default();

    let kind = match event.event_type.as_str() {
        "app_mention" => MessageKind::Mention,
        "message" if event.channel_type.as_deref() == Some("im") || channel_id.starts_with('D') => {
            MessageKind::DirectMessage
        }
        _ => return Ok(None),
    };

    Ok(Some(InboundEvent::Message(MessageEvent {
        kind,
        channel_id,
        user_id,
        text,
        ts,
        thread_ts: event.thread_ts,
        files: event.files,
    })))
}
