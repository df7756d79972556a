//! Admin routes
//!
//! Booking-fee oversight across all technicians. Every handler requires an
//! admin principal via [`RequireAdmin`].

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

use super::service_requests::{list_page, mutate, ListScope};
use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::service_requests::{
    BookingFeePaymentInput, OutstandingFeeSummary, ServiceRequestFilter,
};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestIdExt;

#[derive(Debug, sqlx::FromRow)]
struct OutstandingFeeRow {
    technician_id: Uuid,
    technician_name: String,
    request_count: i64,
    total_outstanding: Decimal,
}

/// Parse a JSON body that may be left out entirely
fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))
}

/// GET /admin/service-requests
pub async fn list_service_requests(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ServiceRequestFilter>,
) -> Result<impl IntoResponse, ApiError> {
    list_page(&state, ListScope::default(), &filter).await
}

/// POST /admin/service-requests/:id/booking-fee/mark-received
///
/// The body is optional; without a method the fee is recorded as settled manually.
pub async fn mark_booking_fee_received(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let input: BookingFeePaymentInput = optional_json(&body)?;
    let response = mutate(
        &state,
        id,
        admin,
        "mark_booking_fee_received",
        headers.request_id(),
        |sr| sr.mark_booking_fee_received(&admin, input, Utc::now()),
    )
    .await?;
    Ok(DataResponse::new(response))
}

/// GET /admin/booking-fees/outstanding
///
/// Unpaid booking fees on confirmed or later requests, grouped by technician.
pub async fn outstanding_booking_fees(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = sqlx::query_as::<_, OutstandingFeeRow>(
        r#"
        SELECT sr.technician_id, t.name AS technician_name,
               COUNT(*) AS request_count,
               SUM(sr.booking_fee_total) AS total_outstanding
        FROM service_requests sr
        JOIN technicians t ON t.id = sr.technician_id
        WHERE sr.booking_fee_status = 'unpaid'
          AND sr.booking_fee_total IS NOT NULL
          AND sr.status IN ('confirmed', 'in_progress', 'completed')
        GROUP BY sr.technician_id, t.name
        ORDER BY total_outstanding DESC, t.name
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let data: Vec<OutstandingFeeSummary> = rows
        .into_iter()
        .map(|row| OutstandingFeeSummary {
            technician_id: row.technician_id,
            technician_name: row.technician_name,
            request_count: row.request_count,
            total_outstanding: row.total_outstanding,
        })
        .collect();

    Ok(DataResponse::new(data))
}
