//! Common data types for Group Call components.
//!
//! Identifiers are opaque strings on the wire (user identities are e-mail
//! addresses, meeting ids look like `meeting_<millis>_<suffix>`), wrapped in
//! newtypes so the compiler keeps them apart.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a meeting (and its call invitation / media room).
    MeetingId
);

string_id!(
    /// Identity of a user (host or participant).
    UserId
);

string_id!(
    /// Engine-assigned router id (one per media room).
    RouterId
);

string_id!(
    /// Engine-assigned transport id.
    TransportId
);

string_id!(
    /// Engine-assigned producer id.
    ProducerId
);

string_id!(
    /// Engine-assigned consumer id.
    ConsumerId
);

impl MeetingId {
    /// Generate a fresh meeting id: `meeting_<unix millis>_<9 random chars>`.
    #[must_use]
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
        Self(format!("meeting_{millis}_{suffix}"))
    }
}

/// Media kind of a producer or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the kind as a string for labels and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Direction of a transport relative to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    /// Client sends media to the engine.
    Send,
    /// Client receives media from the engine.
    Recv,
}

impl TransportDirection {
    /// Returns the direction as a string for labels and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Send => "send",
            TransportDirection::Recv => "recv",
        }
    }
}
