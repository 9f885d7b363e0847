//! Conversation and message-created types supplied by the message-store
//! collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, UserId};

/// A channel between exactly two users. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Ordered participant pair (buyer, seller).
    pub participants: [UserId; 2],
    /// When the collaborator created the conversation.
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a conversation stamped with the current time.
    pub fn new(id: impl Into<ConversationId>, a: impl Into<UserId>, b: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            participants: [a.into(), b.into()],
            created_at: Utc::now(),
        }
    }

    /// Whether `user` is one of the two participants.
    pub fn includes(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// The participant who is not `user`.
    ///
    /// Returns `None` when `user` is not a participant. When both
    /// participants are the same user (a self-conversation) there is no
    /// "other" side and `None` is returned as well.
    pub fn other_participant(&self, user: &UserId) -> Option<&UserId> {
        let [a, b] = &self.participants;
        match (a == user, b == user) {
            (true, false) => Some(b),
            (false, true) => Some(a),
            _ => None,
        }
    }

    /// Whether two descriptions agree on the participant pair.
    pub fn same_participants(&self, other: &Self) -> bool {
        self.participants == other.participants
    }
}

/// Event emitted by the message store when a message is written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreated {
    /// Conversation the message belongs to.
    pub conversation: ConversationId,
    /// Author of the message.
    pub sender: UserId,
    /// Monotonic per-conversation sequence number, when the store provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convo() -> Conversation {
        Conversation::new("c1", "buyer", "seller")
    }

    #[test]
    fn other_participant_resolves_both_sides() {
        let c = convo();
        assert_eq!(c.other_participant(&"buyer".into()).unwrap().as_str(), "seller");
        assert_eq!(c.other_participant(&"seller".into()).unwrap().as_str(), "buyer");
    }

    #[test]
    fn other_participant_unknown_user() {
        assert!(convo().other_participant(&"stranger".into()).is_none());
    }

    #[test]
    fn self_conversation_has_no_other_side() {
        let c = Conversation::new("c2", "u", "u");
        assert!(c.other_participant(&"u".into()).is_none());
    }

    #[test]
    fn includes_checks_membership() {
        let c = convo();
        assert!(c.includes(&"buyer".into()));
        assert!(!c.includes(&"nobody".into()));
    }

    #[test]
    fn conversation_serializes_camel_case() {
        let json = serde_json::to_value(convo()).unwrap();
        assert_eq!(json["participants"][0], "buyer");
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn message_created_sequence_is_optional() {
        let msg: MessageCreated =
            serde_json::from_str(r#"{"conversation":"c1","sender":"buyer"}"#).unwrap();
        assert!(msg.sequence.is_none());
        let msg: MessageCreated =
            serde_json::from_str(r#"{"conversation":"c1","sender":"buyer","sequence":7}"#)
                .unwrap();
        assert_eq!(msg.sequence, Some(7));
    }
}
