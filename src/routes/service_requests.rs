//! Service request routes
//!
//! Every mutation runs in one transaction: lock the row, apply a single
//! workflow operation, write the row back, then notify the conversation.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::attachments::ReceiptAttachment;
use crate::domain::conversations::ConversationEvent;
use crate::domain::receipts::{ComplexityTier, LineItem};
use crate::domain::service_requests::*;
use crate::domain::{Principal, Role, WorkflowResult};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestIdExt;

// ============================================================================
// Database Row Types
// ============================================================================

const SELECT_SERVICE_REQUEST: &str = r#"
    SELECT sr.id, sr.conversation_id, sr.customer_id, sr.technician_id, sr.status,
           sr.items, sr.receipt_total, sr.amount, sr.vat_amount,
           sr.booking_fee_complexity, sr.booking_fee_total, sr.booking_fee_status,
           sr.booking_fee_paid_at, sr.booking_fee_payment_method, sr.booking_fee_reference,
           sr.customer_payment_status, sr.customer_payment_method, sr.receipt_attachments,
           sr.customer_notes, sr.technician_notes, sr.receipt_notes, sr.service_date,
           sr.created_at, sr.updated_at, sr.completed_at,
           c.name AS customer_name, t.name AS technician_name
    FROM service_requests sr
    JOIN customers c ON c.id = sr.customer_id
    JOIN technicians t ON t.id = sr.technician_id
"#;

/// Shared filter for listing queries. `$1..$6` are scope and filters.
const LIST_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR sr.customer_id = $1)
      AND ($2::uuid IS NULL OR sr.technician_id = $2)
      AND ($3::uuid IS NULL OR sr.conversation_id = $3)
      AND ($4::text IS NULL OR sr.status = $4)
      AND ($5::text IS NULL OR sr.customer_payment_status = $5)
      AND ($6::bool IS NOT TRUE OR (
            sr.booking_fee_status = 'unpaid'
            AND sr.booking_fee_total IS NOT NULL
            AND sr.status IN ('confirmed', 'in_progress', 'completed')))
"#;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ServiceRequestRow {
    id: Uuid,
    conversation_id: Uuid,
    customer_id: Uuid,
    technician_id: Uuid,
    status: String,
    items: serde_json::Value,
    receipt_total: Decimal,
    amount: Decimal,
    vat_amount: Decimal,
    booking_fee_complexity: Option<String>,
    booking_fee_total: Option<Decimal>,
    booking_fee_status: String,
    booking_fee_paid_at: Option<DateTime<Utc>>,
    booking_fee_payment_method: Option<String>,
    booking_fee_reference: Option<String>,
    customer_payment_status: String,
    customer_payment_method: Option<String>,
    receipt_attachments: serde_json::Value,
    customer_notes: Option<String>,
    technician_notes: Option<String>,
    receipt_notes: Option<String>,
    service_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    customer_name: String,
    technician_name: String,
}

/// A service request together with the joined participant names
pub(crate) struct LoadedRequest {
    pub request: ServiceRequest,
    pub customer_name: String,
    pub technician_name: String,
}

fn corrupt(column: &str, value: &str) -> ApiError {
    ApiError::internal(format!("Unexpected {} value in database: {}", column, value))
}

impl TryFrom<ServiceRequestRow> for LoadedRequest {
    type Error = ApiError;

    fn try_from(row: ServiceRequestRow) -> Result<Self, Self::Error> {
        let status = ServiceRequestStatus::parse(&row.status)
            .ok_or_else(|| corrupt("status", &row.status))?;
        let booking_fee_status = BookingFeeStatus::parse(&row.booking_fee_status)
            .ok_or_else(|| corrupt("booking_fee_status", &row.booking_fee_status))?;
        let customer_payment_status = CustomerPaymentStatus::parse(&row.customer_payment_status)
            .ok_or_else(|| corrupt("customer_payment_status", &row.customer_payment_status))?;
        let booking_fee_complexity = row
            .booking_fee_complexity
            .as_deref()
            .map(|s| ComplexityTier::parse(s).ok_or_else(|| corrupt("booking_fee_complexity", s)))
            .transpose()?;
        let customer_payment_method = row
            .customer_payment_method
            .as_deref()
            .map(|s| {
                CustomerPaymentMethod::parse(s).ok_or_else(|| corrupt("customer_payment_method", s))
            })
            .transpose()?;
        let items: Vec<LineItem> = serde_json::from_value(row.items)
            .map_err(|e| ApiError::internal(format!("Invalid items JSON: {}", e)))?;
        let receipt_attachments: Vec<ReceiptAttachment> =
            serde_json::from_value(row.receipt_attachments)
                .map_err(|e| ApiError::internal(format!("Invalid attachments JSON: {}", e)))?;

        Ok(Self {
            request: ServiceRequest {
                id: row.id,
                conversation_id: row.conversation_id,
                customer_id: row.customer_id,
                technician_id: row.technician_id,
                status,
                items,
                receipt_total: row.receipt_total,
                amount: row.amount,
                vat_amount: row.vat_amount,
                booking_fee_complexity,
                booking_fee_total: row.booking_fee_total,
                booking_fee_status,
                booking_fee_paid_at: row.booking_fee_paid_at,
                booking_fee_payment_method: row.booking_fee_payment_method,
                booking_fee_reference: row.booking_fee_reference,
                customer_payment_status,
                customer_payment_method,
                receipt_attachments,
                customer_notes: row.customer_notes,
                technician_notes: row.technician_notes,
                receipt_notes: row.receipt_notes,
                service_date: row.service_date,
                created_at: row.created_at,
                updated_at: row.updated_at,
                completed_at: row.completed_at,
            },
            customer_name: row.customer_name,
            technician_name: row.technician_name,
        })
    }
}

// ============================================================================
// Persistence helpers
// ============================================================================

/// Load a request and lock its row for the rest of the transaction.
pub(crate) async fn lock_request(conn: &mut PgConnection, id: Uuid) -> ApiResult<LoadedRequest> {
    let row = sqlx::query_as::<_, ServiceRequestRow>(&format!(
        "{} WHERE sr.id = $1 FOR UPDATE OF sr",
        SELECT_SERVICE_REQUEST
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::not_found("Service request not found"))?;

    row.try_into()
}

pub(crate) async fn fetch_request(db: &PgPool, id: Uuid) -> ApiResult<LoadedRequest> {
    let row = sqlx::query_as::<_, ServiceRequestRow>(&format!(
        "{} WHERE sr.id = $1",
        SELECT_SERVICE_REQUEST
    ))
    .bind(id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Service request not found"))?;

    row.try_into()
}

fn to_json<T: serde::Serialize>(value: &T) -> ApiResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ApiError::internal(format!("Serialization failed: {}", e)))
}

async fn insert_request(conn: &mut PgConnection, sr: &ServiceRequest) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO service_requests (
            id, conversation_id, customer_id, technician_id, status, items,
            receipt_total, amount, vat_amount, booking_fee_status, customer_payment_status,
            receipt_attachments, customer_notes, service_date, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(sr.id)
    .bind(sr.conversation_id)
    .bind(sr.customer_id)
    .bind(sr.technician_id)
    .bind(sr.status.as_str())
    .bind(to_json(&sr.items)?)
    .bind(sr.receipt_total)
    .bind(sr.amount)
    .bind(sr.vat_amount)
    .bind(sr.booking_fee_status.as_str())
    .bind(sr.customer_payment_status.as_str())
    .bind(to_json(&sr.receipt_attachments)?)
    .bind(&sr.customer_notes)
    .bind(sr.service_date)
    .bind(sr.created_at)
    .bind(sr.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(ApiError::from_write)?;

    Ok(())
}

/// Write every mutable column back.
pub(crate) async fn save_request(conn: &mut PgConnection, sr: &ServiceRequest) -> ApiResult<()> {
    sqlx::query(
        r#"
        UPDATE service_requests SET
            status = $2,
            items = $3,
            receipt_total = $4,
            amount = $5,
            vat_amount = $6,
            booking_fee_complexity = $7,
            booking_fee_total = $8,
            booking_fee_status = $9,
            booking_fee_paid_at = $10,
            booking_fee_payment_method = $11,
            booking_fee_reference = $12,
            customer_payment_status = $13,
            customer_payment_method = $14,
            receipt_attachments = $15,
            customer_notes = $16,
            technician_notes = $17,
            receipt_notes = $18,
            service_date = $19,
            updated_at = $20,
            completed_at = $21
        WHERE id = $1
        "#,
    )
    .bind(sr.id)
    .bind(sr.status.as_str())
    .bind(to_json(&sr.items)?)
    .bind(sr.receipt_total)
    .bind(sr.amount)
    .bind(sr.vat_amount)
    .bind(sr.booking_fee_complexity.map(|c| c.as_str()))
    .bind(sr.booking_fee_total)
    .bind(sr.booking_fee_status.as_str())
    .bind(sr.booking_fee_paid_at)
    .bind(&sr.booking_fee_payment_method)
    .bind(&sr.booking_fee_reference)
    .bind(sr.customer_payment_status.as_str())
    .bind(sr.customer_payment_method.map(|m| m.as_str()))
    .bind(to_json(&sr.receipt_attachments)?)
    .bind(&sr.customer_notes)
    .bind(&sr.technician_notes)
    .bind(&sr.receipt_notes)
    .bind(sr.service_date)
    .bind(sr.updated_at)
    .bind(sr.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(ApiError::from_write)?;

    Ok(())
}

pub(crate) fn to_response(state: &AppState, loaded: LoadedRequest) -> ServiceRequestResponse {
    ServiceRequestResponse::new(
        loaded.request,
        loaded.customer_name,
        loaded.technician_name,
        |path| state.storage.public_url(path),
    )
}

pub(crate) fn notify_updated(state: &AppState, sr: &ServiceRequest, actor: Principal) {
    state.broadcaster.publish(
        sr.conversation_id,
        &ConversationEvent::ServiceRequestUpdated {
            service_request_id: sr.id,
            status: sr.status.as_str().to_string(),
            actor,
        },
    );
}

/// Lock, apply `op`, persist, commit and notify.
pub(crate) async fn mutate<F>(
    state: &AppState,
    id: Uuid,
    principal: Principal,
    operation: &'static str,
    request_id: &str,
    op: F,
) -> ApiResult<ServiceRequestResponse>
where
    F: FnOnce(&mut ServiceRequest) -> WorkflowResult<()>,
{
    let mut tx = state.db.begin().await?;
    let mut loaded = lock_request(&mut tx, id).await?;
    let from = loaded.request.status;

    op(&mut loaded.request)?;

    save_request(&mut tx, &loaded.request).await?;
    tx.commit().await?;

    tracing::info!(
        request_id,
        service_request_id = %id,
        principal = %principal,
        operation,
        from = %from,
        to = %loaded.request.status,
        "Service request updated"
    );

    notify_updated(state, &loaded.request, principal);
    Ok(to_response(state, loaded))
}

// ============================================================================
// Quote Flow Endpoints
// ============================================================================

/// POST /customer/service-requests
///
/// Customer opens a request in one of their conversations.
pub async fn create_customer_request(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<CreateServiceRequestInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    if principal.role != Role::Customer {
        return Err(ApiError::forbidden("Only customers can request a service"));
    }

    let mut tx = state.db.begin().await?;

    // Locking the conversation serializes creation attempts on it
    let parties: Option<(Uuid, Uuid, Uuid)> = sqlx::query_as(
        "SELECT id, customer_id, technician_id FROM conversations WHERE id = $1 FOR UPDATE",
    )
    .bind(input.conversation_id)
    .fetch_optional(&mut *tx)
    .await?;
    let (conversation_id, customer_id, technician_id) =
        parties.ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    let active_statuses = ServiceRequestStatus::ACTIVE.map(|s| s.as_str());
    let has_active: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM service_requests WHERE conversation_id = $1 AND status = ANY($2))",
    )
    .bind(conversation_id)
    .bind(&active_statuses[..])
    .fetch_one(&mut *tx)
    .await?;

    let sr = ServiceRequest::open(
        &principal,
        ConversationParties {
            conversation_id,
            customer_id,
            technician_id,
        },
        input,
        has_active,
        Utc::now(),
    )?;

    insert_request(&mut tx, &sr).await?;
    let loaded = lock_request(&mut tx, sr.id).await?;
    tx.commit().await?;

    tracing::info!(
        request_id = headers.request_id(),
        service_request_id = %sr.id,
        conversation_id = %conversation_id,
        principal = %principal,
        "Service request created"
    );

    notify_updated(&state, &sr, principal);
    Ok(Created(to_response(&state, loaded)))
}

/// PATCH /service-requests/:id/edit-details
///
/// Technician prices the job and picks the booking-fee tier.
pub async fn edit_details(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(input): Json<EditDetailsInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let fees = state.settings.booking_fees;
    let response = mutate(&state, id, principal, "edit_details", headers.request_id(), |sr| {
        sr.edit_details(&principal, input, &fees, Utc::now())
    })
    .await?;
    Ok(DataResponse::new(response))
}

/// PATCH /service-requests/:id/approve
pub async fn approve(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let response = mutate(&state, id, principal, "approve", headers.request_id(), |sr| {
        sr.approve(&principal, Utc::now())
    })
    .await?;
    Ok(DataResponse::new(response))
}

/// PATCH /service-requests/:id/cancel
pub async fn cancel(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let response = mutate(&state, id, principal, "cancel", headers.request_id(), |sr| {
        sr.cancel(&principal, Utc::now())
    })
    .await?;
    Ok(DataResponse::new(response))
}

/// PATCH /service-requests/:id/receipt
///
/// Technician revises the final receipt after confirmation.
pub async fn update_receipt(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(input): Json<UpdateReceiptInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let response = mutate(&state, id, principal, "update_receipt", headers.request_id(), |sr| {
        sr.update_receipt(&principal, input, Utc::now())
    })
    .await?;
    Ok(DataResponse::new(response))
}

// ============================================================================
// Execution Endpoints
// ============================================================================

/// PATCH /service-requests/:id/status
pub async fn update_status(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(input): Json<UpdateStatusInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let response = mutate(&state, id, principal, "update_status", headers.request_id(), |sr| {
        sr.update_status(&principal, input, Utc::now())
    })
    .await?;
    Ok(DataResponse::new(response))
}

/// PATCH /service-requests/:id/complete
pub async fn complete(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let response = mutate(&state, id, principal, "complete", headers.request_id(), |sr| {
        sr.complete(&principal, Utc::now())
    })
    .await?;
    Ok(DataResponse::new(response))
}

// ============================================================================
// Payment Endpoints
// ============================================================================

/// PATCH /service-requests/:id/customer-payment
pub async fn record_customer_payment(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(input): Json<CustomerPaymentInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let response = mutate(
        &state,
        id,
        principal,
        "customer_payment",
        headers.request_id(),
        |sr| sr.record_customer_payment(&principal, input, Utc::now()),
    )
    .await?;
    Ok(DataResponse::new(response))
}

/// POST /service-requests/:id/booking-fee/pay
///
/// Technician reports paying the booking fee.
pub async fn pay_booking_fee(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(input): Json<BookingFeePaymentInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let response = mutate(
        &state,
        id,
        principal,
        "pay_booking_fee",
        headers.request_id(),
        |sr| sr.pay_booking_fee(&principal, input, Utc::now()),
    )
    .await?;
    Ok(DataResponse::new(response))
}

// ============================================================================
// Read Endpoints
// ============================================================================

/// GET /service-requests/:id
pub async fn get_service_request(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let loaded = fetch_request(&state.db, id).await?;
    loaded.request.ensure_visible_to(&auth.principal)?;
    Ok(DataResponse::new(to_response(&state, loaded)))
}

/// Fixed restrictions applied on top of the caller's filters
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ListScope {
    pub customer_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
}

pub(crate) async fn list_page(
    state: &AppState,
    scope: ListScope,
    filter: &ServiceRequestFilter,
) -> ApiResult<Paginated<ServiceRequestResponse>> {
    let pagination = PaginationParams {
        page: filter.page,
        per_page: filter.per_page,
    };
    let technician_id = scope.technician_id.or(filter.technician_id);
    let status = filter.status.map(|s| s.as_str());
    let payment_status = filter.payment_status.map(|s| s.as_str());

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM service_requests sr {}",
        LIST_FILTER
    ))
    .bind(scope.customer_id)
    .bind(technician_id)
    .bind(scope.conversation_id)
    .bind(status)
    .bind(payment_status)
    .bind(filter.outstanding_fees)
    .fetch_one(&state.db)
    .await?;

    let rows = sqlx::query_as::<_, ServiceRequestRow>(&format!(
        "{} {} ORDER BY sr.created_at DESC LIMIT $7 OFFSET $8",
        SELECT_SERVICE_REQUEST, LIST_FILTER
    ))
    .bind(scope.customer_id)
    .bind(technician_id)
    .bind(scope.conversation_id)
    .bind(status)
    .bind(payment_status)
    .bind(filter.outstanding_fees)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    let data = rows
        .into_iter()
        .map(|row| LoadedRequest::try_from(row).map(|loaded| to_response(state, loaded)))
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Paginated::new(data, &pagination, total.max(0) as u64))
}

/// GET /service-requests
///
/// Requests the caller takes part in; admins see everything.
pub async fn list_service_requests(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ServiceRequestFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let scope = match principal.role {
        Role::Customer => ListScope {
            customer_id: Some(principal.id),
            ..Default::default()
        },
        Role::Technician => ListScope {
            technician_id: Some(principal.id),
            ..Default::default()
        },
        Role::Admin => ListScope::default(),
    };

    list_page(&state, scope, &filter).await
}

/// GET /conversations/:id/service-requests
pub async fn list_conversation_requests(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    Query(filter): Query<ServiceRequestFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = super::conversations::load_conversation(&state.db, conversation_id).await?;
    if !auth.principal.is_admin() {
        conversation.ensure_participant(&auth.principal)?;
    }

    let scope = ListScope {
        conversation_id: Some(conversation_id),
        ..Default::default()
    };
    list_page(&state, scope, &filter).await
}
