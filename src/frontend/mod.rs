//! Front-end collaborator contracts.
//!
//! The chat front-end parses text into [`DeskCommand`]s, resolves the
//! requester's authorization level, renders replies and collects reactions.
//! Deskgate only talks to it through the traits in this module.

mod command;

pub use command::{DeskCommand, LiveToggle, Request};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Opaque requester identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(pub u64);

/// Channel or context a request was issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authorization ordinal resolved by the front-end. Higher is more privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthLevel(pub u32);

impl AuthLevel {
    pub const DEFAULT: AuthLevel = AuthLevel(0);
    pub const ADMIN: AuthLevel = AuthLevel(100);
}

/// The party behind a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub id: RequesterId,
    pub level: AuthLevel,
    pub location: LocationId,
}

/// A message rendered by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub location: LocationId,
    pub id: MessageId,
}

/// Binary payload attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// Rendering side of the front-end.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Post a new message in `location`.
    async fn send(
        &self,
        location: LocationId,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<MessageRef>;

    /// Replace the text of a message.
    async fn edit(&self, message: &MessageRef, content: &str) -> Result<()>;

    async fn delete(&self, message: &MessageRef) -> Result<()>;

    async fn add_reaction(&self, message: &MessageRef, emoji: &str) -> Result<()>;

    /// Current number of participant ballots for `emoji` on `message`.
    ///
    /// Must read the live state, not a cached copy.
    async fn reaction_count(&self, message: &MessageRef, emoji: &str) -> Result<u32>;
}

/// Per-location permission overrides used to enforce cooldowns.
#[async_trait]
pub trait LocationPermissions: Send + Sync {
    /// Stop `requester` from issuing further actions in `location`.
    async fn deny(&self, requester: RequesterId, location: LocationId) -> Result<()>;

    /// Remove a denial installed by [`LocationPermissions::deny`].
    async fn revoke(&self, requester: RequesterId, location: LocationId) -> Result<()>;
}

/// Escape mentions in user-supplied text before echoing it back.
pub fn sanitize_mentions(text: &str) -> String {
    text.replace('@', "@\u{200B}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_level_ordering() {
        assert!(AuthLevel::DEFAULT < AuthLevel(10));
        assert!(AuthLevel(10) < AuthLevel::ADMIN);
        assert!(AuthLevel(1) >= AuthLevel(1));
    }

    #[test]
    fn test_sanitize_mentions() {
        assert_eq!(sanitize_mentions("@everyone"), "@\u{200B}everyone");
        assert_eq!(sanitize_mentions("ctrl"), "ctrl");
    }
}
