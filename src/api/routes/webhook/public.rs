//! Public types for the webhook API
use serde::{Deserialize, Serialize};

/// Set on every notification. `sync` is the handshake sent right after
/// a channel is created.
pub const RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";
/// Echoes the token the channel was created with.
pub const CHANNEL_TOKEN_HEADER: &str = "x-goog-channel-token";
pub const CHANNEL_ID_HEADER: &str = "x-goog-channel-id";

/// Returned when a notification triggered a sync of the source
#[derive(Debug, Deserialize, Serialize)]
pub struct CalendarNotificationAccepted {
    pub source_id: String,
}
