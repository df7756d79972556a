//! Conversation and messaging routes

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, DataResponse, NoContent, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::conversations::*;
use crate::domain::{Principal, Role};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestIdExt;

const PREVIEW_LEN: usize = 100;

/// Messages the reader (`$1` role, `$2` id) has not yet read in conversation `c`
const UNREAD_COUNT: &str = r#"
    SELECT COUNT(*) FROM messages m
    WHERE m.conversation_id = c.id
      AND NOT (m.sender_type = $1 AND m.sender_id = $2)
      AND NOT EXISTS (
          SELECT 1 FROM message_read_receipts r
          WHERE r.message_id = m.id AND r.reader_type = $1 AND r.reader_id = $2
      )
"#;

/// Conversations the principal (`$1` role, `$2` id) takes part in
const PARTICIPANT_FILTER: &str = r#"
    WHERE ($1 = 'customer' AND c.customer_id = $2)
       OR ($1 = 'technician' AND c.technician_id = $2)
"#;

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: Uuid,
    customer_id: Uuid,
    technician_id: Uuid,
    last_message_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            customer_id: row.customer_id,
            technician_id: row.technician_id,
            last_message_at: row.last_message_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConversationSummaryRow {
    id: Uuid,
    customer_id: Uuid,
    customer_name: String,
    technician_id: Uuid,
    technician_name: String,
    last_message_at: Option<DateTime<Utc>>,
    last_message_body: Option<String>,
    unread_count: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender_type: String,
    sender_id: Uuid,
    body: Option<String>,
    attachments: serde_json::Value,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for MessageResponse {
    type Error = ApiError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let sender_type = Role::parse(&row.sender_type).ok_or_else(|| {
            ApiError::internal(format!("Unexpected sender_type: {}", row.sender_type))
        })?;
        let attachments: Vec<String> = serde_json::from_value(row.attachments)
            .map_err(|e| ApiError::internal(format!("Invalid message attachments: {}", e)))?;

        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_type,
            sender_id: row.sender_id,
            body: row.body,
            attachments,
            is_read: row.is_read,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageHeaderRow {
    id: Uuid,
    sender_type: String,
    sender_id: Uuid,
}

pub(crate) async fn load_conversation(db: &PgPool, id: Uuid) -> ApiResult<Conversation> {
    let row = sqlx::query_as::<_, ConversationRow>(
        "SELECT id, customer_id, technician_id, last_message_at, created_at FROM conversations WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    Ok(row.into())
}

/// Load a conversation the caller takes part in.
async fn participant_conversation(
    db: &PgPool,
    id: Uuid,
    principal: &Principal,
) -> ApiResult<Conversation> {
    let conversation = load_conversation(db, id).await?;
    conversation.ensure_participant(principal)?;
    Ok(conversation)
}

fn preview(body: Option<String>) -> Option<String> {
    body.map(|b| {
        if b.chars().count() > PREVIEW_LEN {
            let mut cut: String = b.chars().take(PREVIEW_LEN).collect();
            cut.push('…');
            cut
        } else {
            b
        }
    })
}

// ============================================================================
// Conversations
// ============================================================================

/// POST /conversations
///
/// Get-or-create the conversation between the calling customer and a technician.
pub async fn start_conversation(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(input): Json<StartConversationInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    if principal.role != Role::Customer {
        return Err(ApiError::forbidden("Only customers can start conversations"));
    }

    let technician_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM technicians WHERE id = $1)")
            .bind(input.technician_id)
            .fetch_one(&state.db)
            .await?;
    if !technician_exists {
        return Err(ApiError::not_found("Technician not found"));
    }

    // The no-op update makes RETURNING yield the existing row on conflict
    let row = sqlx::query_as::<_, ConversationRow>(
        r#"
        INSERT INTO conversations (id, customer_id, technician_id)
        VALUES ($1, $2, $3)
        ON CONFLICT ON CONSTRAINT conversations_customer_technician_key
        DO UPDATE SET customer_id = EXCLUDED.customer_id
        RETURNING id, customer_id, technician_id, last_message_at, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(principal.id)
    .bind(input.technician_id)
    .fetch_one(&state.db)
    .await?;

    tracing::debug!(conversation_id = %row.id, principal = %principal, "Conversation opened");

    Ok(DataResponse::new(Conversation::from(row)))
}

/// GET /conversations
pub async fn list_conversations(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM conversations c {}",
        PARTICIPANT_FILTER
    ))
    .bind(principal.role.as_str())
    .bind(principal.id)
    .fetch_one(&state.db)
    .await?;

    let rows = sqlx::query_as::<_, ConversationSummaryRow>(&format!(
        r#"
        SELECT c.id, c.customer_id, cu.name AS customer_name,
               c.technician_id, t.name AS technician_name,
               c.last_message_at, c.created_at,
               (SELECT m.body FROM messages m
                WHERE m.conversation_id = c.id
                ORDER BY m.created_at DESC LIMIT 1) AS last_message_body,
               ({unread}) AS unread_count
        FROM conversations c
        JOIN customers cu ON cu.id = c.customer_id
        JOIN technicians t ON t.id = c.technician_id
        {filter}
        ORDER BY c.last_message_at DESC NULLS LAST, c.created_at DESC
        LIMIT $3 OFFSET $4
        "#,
        unread = UNREAD_COUNT,
        filter = PARTICIPANT_FILTER,
    ))
    .bind(principal.role.as_str())
    .bind(principal.id)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data = rows
        .into_iter()
        .map(|row| ConversationSummary {
            id: row.id,
            customer_id: row.customer_id,
            customer_name: row.customer_name,
            technician_id: row.technician_id,
            technician_name: row.technician_name,
            last_message_at: row.last_message_at,
            last_message_preview: preview(row.last_message_body),
            unread_count: row.unread_count,
            created_at: row.created_at,
        })
        .collect();

    Ok(Paginated::new(data, &params, total.max(0) as u64))
}

// ============================================================================
// Messages
// ============================================================================

/// GET /conversations/:id/messages
///
/// Newest first. `is_read` reports whether the recipient has read the message.
pub async fn list_messages(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    participant_conversation(&state.db, conversation_id, &auth.principal).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
        .bind(conversation_id)
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT m.id, m.conversation_id, m.sender_type, m.sender_id, m.body, m.attachments,
               EXISTS(
                   SELECT 1 FROM message_read_receipts r
                   WHERE r.message_id = m.id
                     AND NOT (r.reader_type = m.sender_type AND r.reader_id = m.sender_id)
               ) AS is_read,
               m.created_at
        FROM messages m
        WHERE m.conversation_id = $1
        ORDER BY m.created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(conversation_id)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data = rows
        .into_iter()
        .map(MessageResponse::try_from)
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Paginated::new(data, &params, total.max(0) as u64))
}

/// POST /conversations/:id/messages
pub async fn send_message(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(input): Json<SendMessageInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let conversation = participant_conversation(&state.db, conversation_id, &principal).await?;
    let content = input.validate()?;

    let attachments = serde_json::to_value(&content.attachments)
        .map_err(|e| ApiError::internal(format!("Serialization failed: {}", e)))?;
    let now = Utc::now();
    let message_id = Uuid::new_v4();

    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO messages (id, conversation_id, sender_type, sender_id, body, attachments, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(message_id)
    .bind(conversation_id)
    .bind(principal.role.as_str())
    .bind(principal.id)
    .bind(&content.body)
    .bind(attachments)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE conversations SET last_message_at = $2 WHERE id = $1")
        .bind(conversation_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let message = MessageResponse {
        id: message_id,
        conversation_id,
        sender_type: principal.role,
        sender_id: principal.id,
        body: content.body,
        attachments: content.attachments,
        is_read: false,
        created_at: now,
    };

    tracing::info!(
        request_id = headers.request_id(),
        conversation_id = %conversation_id,
        message_id = %message_id,
        principal = %principal,
        recipient = %conversation.counterpart(&principal),
        "Message sent"
    );

    state.broadcaster.publish(
        conversation_id,
        &ConversationEvent::MessageSent {
            message: message.clone(),
        },
    );

    Ok(Created(message))
}

#[derive(Debug, Deserialize)]
pub struct TypingInput {
    #[serde(default = "default_typing")]
    pub is_typing: bool,
}

fn default_typing() -> bool {
    true
}

/// POST /conversations/:id/typing
pub async fn typing(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    Json(input): Json<TypingInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    participant_conversation(&state.db, conversation_id, &principal).await?;

    state.broadcaster.publish(
        conversation_id,
        &ConversationEvent::Typing {
            sender: principal,
            is_typing: input.is_typing,
        },
    );

    Ok(NoContent)
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: usize,
    pub message_ids: Vec<Uuid>,
}

/// POST /conversations/:id/read
///
/// Records read receipts for every message the caller has not read yet.
pub async fn mark_read(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    participant_conversation(&state.db, conversation_id, &principal).await?;

    let mut tx = state.db.begin().await?;

    let headers = sqlx::query_as::<_, MessageHeaderRow>(
        "SELECT id, sender_type, sender_id FROM messages WHERE conversation_id = $1",
    )
    .bind(conversation_id)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|row| -> ApiResult<MessageHeader> {
        let role = Role::parse(&row.sender_type).ok_or_else(|| {
            ApiError::internal(format!("Unexpected sender_type: {}", row.sender_type))
        })?;
        Ok(MessageHeader {
            id: row.id,
            sender: Principal::new(role, row.sender_id),
        })
    })
    .collect::<ApiResult<Vec<_>>>()?;

    let already_read: HashSet<Uuid> = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT r.message_id FROM message_read_receipts r
        JOIN messages m ON m.id = r.message_id
        WHERE m.conversation_id = $1 AND r.reader_type = $2 AND r.reader_id = $3
        "#,
    )
    .bind(conversation_id)
    .bind(principal.role.as_str())
    .bind(principal.id)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .collect();

    let message_ids = unread_ids(&headers, &principal, &already_read);
    let read_at = Utc::now();

    if !message_ids.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO message_read_receipts (message_id, reader_type, reader_id, read_at)
            SELECT id, $2, $3, $4 FROM UNNEST($1::uuid[]) AS id
            ON CONFLICT (message_id, reader_type, reader_id) DO UPDATE SET read_at = EXCLUDED.read_at
            "#,
        )
        .bind(&message_ids[..])
        .bind(principal.role.as_str())
        .bind(principal.id)
        .bind(read_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    if !message_ids.is_empty() {
        state.broadcaster.publish(
            conversation_id,
            &ConversationEvent::MessagesRead {
                reader: principal,
                message_ids: message_ids.clone(),
                read_at,
            },
        );
    }

    Ok(DataResponse::new(MarkReadResponse {
        marked: message_ids.len(),
        message_ids,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConversationUnread {
    pub conversation_id: Uuid,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub total: i64,
    pub conversations: Vec<ConversationUnread>,
}

/// GET /messages/unread-count
pub async fn unread_count(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;

    let rows: Vec<(Uuid, i64)> = sqlx::query_as(&format!(
        r#"
        SELECT c.id, ({unread}) AS unread_count
        FROM conversations c
        {filter}
        "#,
        unread = UNREAD_COUNT,
        filter = PARTICIPANT_FILTER,
    ))
    .bind(principal.role.as_str())
    .bind(principal.id)
    .fetch_all(&state.db)
    .await?;

    let conversations: Vec<ConversationUnread> = rows
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(conversation_id, unread_count)| ConversationUnread {
            conversation_id,
            unread_count,
        })
        .collect();

    Ok(DataResponse::new(UnreadCountResponse {
        total: conversations.iter().map(|c| c.unread_count).sum(),
        conversations,
    }))
}

// ============================================================================
// Real-time events
// ============================================================================

/// GET /conversations/:id/events
///
/// Server-sent events relayed from the conversation's pub/sub channel.
pub async fn conversation_events(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    participant_conversation(&state.db, conversation_id, &auth.principal).await?;

    let stream = state
        .broadcaster
        .subscribe(conversation_id)
        .await?
        .map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));

    tracing::debug!(conversation_id = %conversation_id, principal = %auth.principal, "Event stream opened");

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_bodies() {
        assert_eq!(preview(None), None);
        assert_eq!(preview(Some("short".into())).as_deref(), Some("short"));

        let long = "x".repeat(PREVIEW_LEN + 20);
        let cut = preview(Some(long)).unwrap();
        assert_eq!(cut.chars().count(), PREVIEW_LEN + 1);
        assert!(cut.ends_with('…'));
    }
}
