//! Slack transport: Web API client, Socket Mode envelopes, shared helpers.

pub mod api_client;
pub mod events;
pub mod helpers;

pub use api_client::{AuthInfo, PostedMessage, SlackApiClient};
pub use events::{
    normalize_socket_envelope, parse_socket_envelope, FileAttachment, InboundEvent, MessageEvent,
    MessageKind, ReactionEvent, SlashCommandEvent, SocketEnvelope,
};
pub use helpers::{sanitize_for_path, strip_mention, truncate_for_chat};
