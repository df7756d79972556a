//! Technician reviews

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{WorkflowError, WorkflowResult};

pub const MAX_COMMENT_LEN: usize = 2000;

#[derive(Debug, Clone, Serialize)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub technician_id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertReviewInput {
    pub rating: i16,
    #[serde(default)]
    pub comment: Option<String>,
}

impl UpsertReviewInput {
    /// Returns the rating and trimmed comment.
    pub fn validate(self) -> WorkflowResult<(i16, Option<String>)> {
        if !(1..=5).contains(&self.rating) {
            return Err(WorkflowError::invalid(
                "rating",
                "Rating must be between 1 and 5",
            ));
        }
        let comment = self
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if comment
            .as_ref()
            .is_some_and(|c| c.chars().count() > MAX_COMMENT_LEN)
        {
            return Err(WorkflowError::invalid(
                "comment",
                format!("Comment may not exceed {} characters", MAX_COMMENT_LEN),
            ));
        }
        Ok((self.rating, comment))
    }
}

/// Average rating (one decimal) and review count
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ReviewSummary {
    pub average_rating: f64,
    pub review_count: i64,
}

impl ReviewSummary {
    pub fn from_totals(rating_sum: i64, review_count: i64) -> Self {
        if review_count <= 0 {
            return Self {
                average_rating: 0.0,
                review_count: 0,
            };
        }
        let average = rating_sum as f64 / review_count as f64;
        Self {
            average_rating: (average * 10.0).round() / 10.0,
            review_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_rounds_to_one_decimal() {
        let summary = ReviewSummary::from_totals(13, 3);
        assert_eq!(summary.review_count, 3);
        assert_eq!(summary.average_rating, 4.3);

        assert_eq!(ReviewSummary::from_totals(9, 2).average_rating, 4.5);
    }

    #[test]
    fn empty_summary_is_zero() {
        let summary = ReviewSummary::from_totals(0, 0);
        assert_eq!(summary.review_count, 0);
        assert_eq!(summary.average_rating, 0.0);
    }

    #[test]
    fn rating_bounds_are_enforced() {
        for rating in [0, 6, -1] {
            let err = UpsertReviewInput { rating, comment: None }.validate().unwrap_err();
            assert_eq!(err.field(), Some("rating"));
        }
        let (rating, comment) = UpsertReviewInput {
            rating: 5,
            comment: Some("  Fast and tidy  ".into()),
        }
        .validate()
        .unwrap();
        assert_eq!(rating, 5);
        assert_eq!(comment.as_deref(), Some("Fast and tidy"));
    }
}
