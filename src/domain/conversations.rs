//! Conversation domain types
//!
//! Customer/technician conversations, messages, read receipts and the
//! real-time events published on each conversation channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::errors::{WorkflowError, WorkflowResult};
use super::principal::{Principal, Role};

pub const MAX_MESSAGE_LEN: usize = 5000;
pub const MAX_MESSAGE_ATTACHMENTS: usize = 10;

/// Conversation between one customer and one technician
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub technician_id: Uuid,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, principal: &Principal) -> bool {
        match principal.role {
            Role::Customer => principal.id == self.customer_id,
            Role::Technician => principal.id == self.technician_id,
            Role::Admin => false,
        }
    }

    pub fn ensure_participant(&self, principal: &Principal) -> WorkflowResult<()> {
        if self.is_participant(principal) {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden(
                "You are not part of this conversation".to_string(),
            ))
        }
    }

    /// The participant on the other side of `principal`
    pub fn counterpart(&self, principal: &Principal) -> Principal {
        if principal.role == Role::Customer {
            Principal::technician(self.technician_id)
        } else {
            Principal::customer(self.customer_id)
        }
    }
}

/// Message as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_type: Role,
    pub sender_id: Uuid,
    pub body: Option<String>,
    pub attachments: Vec<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartConversationInput {
    pub technician_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageInput {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Validated message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent {
    pub body: Option<String>,
    pub attachments: Vec<String>,
}

impl SendMessageInput {
    /// A body is required unless at least one attachment is sent.
    pub fn validate(self) -> WorkflowResult<MessageContent> {
        let body = self
            .body
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());
        let attachments: Vec<String> = self
            .attachments
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();

        if body.is_none() && attachments.is_empty() {
            return Err(WorkflowError::invalid(
                "body",
                "A message needs text or at least one attachment",
            ));
        }
        if body
            .as_ref()
            .is_some_and(|b| b.chars().count() > MAX_MESSAGE_LEN)
        {
            return Err(WorkflowError::invalid(
                "body",
                format!("Messages may not exceed {} characters", MAX_MESSAGE_LEN),
            ));
        }
        if attachments.len() > MAX_MESSAGE_ATTACHMENTS {
            return Err(WorkflowError::invalid(
                "attachments",
                format!("At most {} attachments per message", MAX_MESSAGE_ATTACHMENTS),
            ));
        }

        Ok(MessageContent { body, attachments })
    }
}

/// Minimal message view used for unread bookkeeping
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub id: Uuid,
    pub sender: Principal,
}

/// A message is unread by `reader` when someone else sent it and no read
/// receipt exists for that reader.
pub fn is_unread(message: &MessageHeader, reader: &Principal, read: &HashSet<Uuid>) -> bool {
    message.sender != *reader && !read.contains(&message.id)
}

/// Ids of messages `reader` still has to read. `read` holds the message ids
/// the reader already has receipts for.
pub fn unread_ids(messages: &[MessageHeader], reader: &Principal, read: &HashSet<Uuid>) -> Vec<Uuid> {
    messages
        .iter()
        .filter(|m| is_unread(m, reader, read))
        .map(|m| m.id)
        .collect()
}

/// Conversation summary for list endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub technician_id: Uuid,
    pub technician_name: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Events pushed to subscribers of a conversation channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ConversationEvent {
    #[serde(rename = "message.sent")]
    MessageSent { message: MessageResponse },
    #[serde(rename = "typing")]
    Typing { sender: Principal, is_typing: bool },
    #[serde(rename = "messages.read")]
    MessagesRead {
        reader: Principal,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },
    #[serde(rename = "service_request.updated")]
    ServiceRequestUpdated {
        service_request_id: Uuid,
        status: String,
        actor: Principal,
    },
}

/// Redis channel carrying events for a conversation
pub fn channel_name(conversation_id: Uuid) -> String {
    format!("conversation.{}", conversation_id)
}
