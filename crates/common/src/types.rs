use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External identity of a shop user, as supplied by the transport.
///
/// The transport authenticates the user; the core trusts this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Creates a user ID from the transport's numeric identity.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric identity.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<UserId> for i64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Opaque handle of a message previously sent to a user's chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRef(i64);

impl MessageRef {
    /// Wraps a transport message handle.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw handle.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MessageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation identifier attached to one inbound transport event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_roundtrips_through_i64() {
        let id = UserId::new(424242);
        assert_eq!(i64::from(id), 424242);
        assert_eq!(UserId::from(424242), id);
        assert_eq!(id.to_string(), "424242");
    }

    #[test]
    fn user_id_serializes_transparently() {
        let json = serde_json::to_string(&UserId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn request_id_new_creates_unique_ids() {
        assert_ne!(RequestId::new(), RequestId::new());
    }
}
