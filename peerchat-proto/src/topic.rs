//! Room-to-topic namespacing and join defaults.
//!
//! Two relays interoperate only if they derive the same topic from the same
//! room name, so the transform here is fixed: a constant prefix followed by
//! the room name, case and value preserved.

/// Prefix prepended to every room name to form its topic name.
pub const TOPIC_PREFIX: &str = "room-peerchat-";

/// Display name used when the caller supplies an empty one.
pub const DEFAULT_USER: &str = "newuser";

/// Room joined when the caller supplies an empty room name.
pub const DEFAULT_ROOM: &str = "lobby";

/// Returns the topic name for a room.
#[must_use]
pub fn room_topic(room_name: &str) -> String {
    format!("{TOPIC_PREFIX}{room_name}")
}

/// Returns `name`, or [`DEFAULT_USER`] if it is empty.
#[must_use]
pub fn user_or_default(name: &str) -> String {
    if name.is_empty() {
        DEFAULT_USER.to_string()
    } else {
        name.to_string()
    }
}

/// Returns `room`, or [`DEFAULT_ROOM`] if it is empty.
#[must_use]
pub fn room_or_default(room: &str) -> String {
    if room.is_empty() {
        DEFAULT_ROOM.to_string()
    } else {
        room.to_string()
    }
}
