//! Technician availability calendar routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::availability::*;
use crate::domain::Role;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, sqlx::FromRow)]
struct AvailabilityRow {
    date: NaiveDate,
    status: String,
}

impl TryFrom<AvailabilityRow> for AvailabilityEntry {
    type Error = ApiError;

    fn try_from(row: AvailabilityRow) -> Result<Self, Self::Error> {
        let status = AvailabilityStatus::parse(&row.status).ok_or_else(|| {
            ApiError::internal(format!("Unexpected availability status: {}", row.status))
        })?;
        Ok(Self {
            date: row.date,
            status,
        })
    }
}

/// GET /technicians/:id/availability?from=YYYY-MM-DD&to=YYYY-MM-DD
///
/// Every date in the range mapped to a status; dates never set are available.
pub async fn get_availability(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(technician_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    query.validate()?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM technicians WHERE id = $1)")
        .bind(technician_id)
        .fetch_one(&state.db)
        .await?;
    if !exists {
        return Err(ApiError::not_found("Technician not found"));
    }

    let stored = sqlx::query_as::<_, AvailabilityRow>(
        r#"
        SELECT date, status FROM technician_availability
        WHERE technician_id = $1 AND date BETWEEN $2 AND $3
        "#,
    )
    .bind(technician_id)
    .bind(query.from)
    .bind(query.to)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .map(AvailabilityEntry::try_from)
    .collect::<ApiResult<Vec<_>>>()?;

    Ok(DataResponse::new(calendar(query.from, query.to, &stored)))
}

/// PUT /technician/availability
///
/// The calling technician sets the status of up to 92 dates at once.
pub async fn set_availability(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(input): Json<SetAvailabilityInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    if principal.role != Role::Technician {
        return Err(ApiError::forbidden("Only technicians can set availability"));
    }
    input.validate()?;

    let dates: Vec<NaiveDate> = input.entries.iter().map(|e| e.date).collect();
    let statuses: Vec<&str> = input.entries.iter().map(|e| e.status.as_str()).collect();

    sqlx::query(
        r#"
        INSERT INTO technician_availability (technician_id, date, status, updated_at)
        SELECT $1, d, s, NOW() FROM UNNEST($2::date[], $3::text[]) AS t(d, s)
        ON CONFLICT (technician_id, date)
        DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(principal.id)
    .bind(&dates[..])
    .bind(&statuses[..])
    .execute(&state.db)
    .await?;

    tracing::info!(
        principal = %principal,
        dates = dates.len(),
        "Availability updated"
    );

    Ok(DataResponse::new(input.entries))
}
