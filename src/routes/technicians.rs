//! Technician discovery

use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::reviews::ReviewSummary;
use crate::domain::technicians::{TechnicianQuery, TechnicianResponse};
use crate::error::ApiError;

#[derive(Debug, sqlx::FromRow)]
struct TechnicianRow {
    id: Uuid,
    name: String,
    specialty: Option<String>,
    location: Option<String>,
    rating_sum: i64,
    review_count: i64,
}

impl From<TechnicianRow> for TechnicianResponse {
    fn from(row: TechnicianRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            specialty: row.specialty,
            location: row.location,
            rating: ReviewSummary::from_totals(row.rating_sum, row.review_count),
        }
    }
}

/// GET /technicians?search=&page=&per_page=
///
/// `search` matches name, specialty or location.
pub async fn list_technicians(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<TechnicianQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pagination = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    };
    let pattern = query.search_pattern();

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM technicians t
        WHERE $1::text IS NULL
           OR t.name ILIKE $1 OR t.specialty ILIKE $1 OR t.location ILIKE $1
        "#,
    )
    .bind(&pattern)
    .fetch_one(&state.db)
    .await?;

    let rows = sqlx::query_as::<_, TechnicianRow>(
        r#"
        SELECT t.id, t.name, t.specialty, t.location,
               COALESCE(SUM(r.rating), 0)::BIGINT AS rating_sum,
               COUNT(r.id) AS review_count
        FROM technicians t
        LEFT JOIN reviews r ON r.technician_id = t.id
        WHERE $1::text IS NULL
           OR t.name ILIKE $1 OR t.specialty ILIKE $1 OR t.location ILIKE $1
        GROUP BY t.id
        ORDER BY t.name
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(&pattern)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<TechnicianResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &pagination, total.max(0) as u64))
}
