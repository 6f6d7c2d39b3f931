//! Chat data model: messages, sessions and the identifiers that address them.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Display name used while no session is active.
pub const ANONYMOUS: &str = "anonymous";

macro_rules! string_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw string.
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
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_newtype!(
    /// A named partition of the message log.
    RoomId
);
string_newtype!(
    /// Authenticated user identity.
    UserId
);
string_newtype!(
    /// Opaque key assigned by the remote log at append time.
    ///
    /// Keys order lexicographically in append order.
    MessageKey
);
string_newtype!(
    /// Location of a stored attachment.
    BlobKey
);

/// Location of a room's message list inside the remote log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogPath(String);

impl LogPath {
    /// Message list for `room`: `chat/<room>/messages`.
    #[must_use]
    pub fn messages(room: &RoomId) -> Self {
        Self(format!("chat/{room}/messages"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl BlobKey {
    /// Attachment key for `basename` in `room`: `chat_photos/<room>/<basename>`.
    #[must_use]
    pub fn for_attachment(room: &RoomId, basename: &str) -> Self {
        Self(format!("chat_photos/{room}/{basename}"))
    }
}

/// A chat message.
///
/// Exactly one of `text` and `photo_ref` is populated at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
    /// Creation time (Unix epoch milliseconds).
    pub timestamp: i64,
}

impl Message {
    /// A text message stamped with the current time.
    #[must_use]
    pub fn text(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            author: author.into(),
            photo_ref: None,
            timestamp: now_millis(),
        }
    }

    /// A photo message pointing at a resolved download reference.
    #[must_use]
    pub fn photo(author: impl Into<String>, photo_ref: impl Into<String>) -> Self {
        Self {
            text: None,
            author: author.into(),
            photo_ref: Some(photo_ref.into()),
            timestamp: now_millis(),
        }
    }
}

/// Current time in Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// The signed-in user and the room the session is bound to.
///
/// `room` is resolved once per activation and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Option<UserId>,
    pub display_name: String,
    pub room: RoomId,
}

impl Session {
    #[must_use]
    pub fn new(identity: UserId, display_name: impl Into<String>, room: RoomId) -> Self {
        Self {
            identity: Some(identity),
            display_name: display_name.into(),
            room,
        }
    }

    /// Path of the message list this session reads and writes.
    #[must_use]
    pub fn log_path(&self) -> LogPath {
        LogPath::messages(&self.room)
    }
}

/// Local attachment to upload.
#[derive(Debug, Clone)]
pub struct BlobSource {
    /// Where the bytes came from (a file path or URI).
    pub origin: String,
    pub data: Bytes,
}

impl BlobSource {
    #[must_use]
    pub fn new(origin: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            origin: origin.into(),
            data: data.into(),
        }
    }

    /// Last path segment of `origin`, ignoring any query or fragment.
    #[must_use]
    pub fn basename(&self) -> Option<&str> {
        let path = self
            .origin
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        path.rsplit(['/', '\\'])
            .next()
            .filter(|segment| !segment.is_empty())
    }
}

/// An attachment between blob submission and message append.
///
/// Never persisted; if the process dies in this window the blob is orphaned
/// and no message is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub blob_key: BlobKey,
    pub local_origin: String,
}
