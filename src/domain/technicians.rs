//! Technician directory types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::reviews::ReviewSummary;

#[derive(Debug, Clone, Serialize)]
pub struct TechnicianResponse {
    pub id: Uuid,
    pub name: String,
    pub specialty: Option<String>,
    pub location: Option<String>,
    pub rating: ReviewSummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TechnicianQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl TechnicianQuery {
    /// `ILIKE` pattern for the search term, if one was given
    pub fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                let escaped = s
                    .replace('\\', "\\\\")
                    .replace('%', "\\%")
                    .replace('_', "\\_");
                format!("%{}%", escaped)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_pattern_escapes_wildcards() {
        let query = TechnicianQuery {
            search: Some(" 100%_fix ".into()),
            ..Default::default()
        };
        assert_eq!(query.search_pattern().as_deref(), Some("%100\\%\\_fix%"));
        assert_eq!(TechnicianQuery::default().search_pattern(), None);
    }
}
