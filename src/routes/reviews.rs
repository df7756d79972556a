//! Technician review routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::reviews::{ReviewResponse, ReviewSummary, UpsertReviewInput};
use crate::domain::Role;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, sqlx::FromRow)]
struct ReviewRow {
    id: Uuid,
    technician_id: Uuid,
    customer_id: Uuid,
    customer_name: String,
    rating: i16,
    comment: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ReviewRow> for ReviewResponse {
    fn from(row: ReviewRow) -> Self {
        Self {
            id: row.id,
            technician_id: row.technician_id,
            customer_id: row.customer_id,
            customer_name: row.customer_name,
            rating: row.rating,
            comment: row.comment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

async fn ensure_technician_exists(db: &PgPool, technician_id: Uuid) -> ApiResult<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM technicians WHERE id = $1)")
        .bind(technician_id)
        .fetch_one(db)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(ApiError::not_found("Technician not found"))
    }
}

async fn summary_for(db: &PgPool, technician_id: Uuid) -> ApiResult<ReviewSummary> {
    let (sum, count): (i64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(rating), 0)::BIGINT, COUNT(*) FROM reviews WHERE technician_id = $1",
    )
    .bind(technician_id)
    .fetch_one(db)
    .await?;
    Ok(ReviewSummary::from_totals(sum, count))
}

/// PUT /technicians/:id/review
///
/// A customer keeps one review per technician; writing again replaces it.
pub async fn upsert_review(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(technician_id): Path<Uuid>,
    Json(input): Json<UpsertReviewInput>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    if principal.role != Role::Customer {
        return Err(ApiError::forbidden("Only customers can review technicians"));
    }
    ensure_technician_exists(&state.db, technician_id).await?;
    let (rating, comment) = input.validate()?;

    let row = sqlx::query_as::<_, ReviewRow>(
        r#"
        WITH upserted AS (
            INSERT INTO reviews (id, technician_id, customer_id, rating, comment)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT ON CONSTRAINT reviews_technician_customer_key
            DO UPDATE SET rating = EXCLUDED.rating, comment = EXCLUDED.comment, updated_at = NOW()
            RETURNING *
        )
        SELECT u.id, u.technician_id, u.customer_id, c.name AS customer_name,
               u.rating, u.comment, u.created_at, u.updated_at
        FROM upserted u
        JOIN customers c ON c.id = u.customer_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(technician_id)
    .bind(principal.id)
    .bind(rating)
    .bind(&comment)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        technician_id = %technician_id,
        principal = %principal,
        rating,
        "Review saved"
    );

    Ok(DataResponse::new(ReviewResponse::from(row)))
}

/// GET /technicians/:id/reviews
pub async fn list_reviews(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(technician_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_technician_exists(&state.db, technician_id).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE technician_id = $1")
        .bind(technician_id)
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, ReviewRow>(
        r#"
        SELECT r.id, r.technician_id, r.customer_id, c.name AS customer_name,
               r.rating, r.comment, r.created_at, r.updated_at
        FROM reviews r
        JOIN customers c ON c.id = r.customer_id
        WHERE r.technician_id = $1
        ORDER BY r.updated_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(technician_id)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<ReviewResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &params, total.max(0) as u64))
}

/// GET /technicians/:id/reviews/summary
pub async fn review_summary(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(technician_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_technician_exists(&state.db, technician_id).await?;
    Ok(DataResponse::new(summary_for(&state.db, technician_id).await?))
}
