use serde::{Deserialize, Serialize};

use crate::models::{Conversation, Message, MessageStatus};

/// Change notifications sent to the presentation layer after a write commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreEvent {
    /// A conversation was created or patched
    ConversationUpdated {
        conversation_id: String,
        conversation: Conversation,
    },

    /// One or more messages changed (upsert, status, pin, reaction, attachment)
    MessageBatchUpdated {
        conversation_id: String,
        messages: Vec<Message>,
    },

    /// A message was removed, whatever the cause (explicit, expiry, retention)
    MessageDeleted {
        conversation_id: String,
        message_id: String,
    },

    /// A peer started or stopped typing
    TypingStateChanged {
        conversation_id: String,
        peer_id: String,
        is_typing: bool,
    },

    /// A delivery receipt moved a message to a new status
    ReceiptUpdated {
        conversation_id: String,
        message_id: String,
        status: MessageStatus,
    },
}

impl StoreEvent {
    /// Every event is scoped to exactly one conversation.
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::ConversationUpdated { conversation_id, .. }
            | Self::MessageBatchUpdated { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. }
            | Self::TypingStateChanged { conversation_id, .. }
            | Self::ReceiptUpdated { conversation_id, .. } => conversation_id,
        }
    }
}
