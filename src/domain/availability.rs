//! Technician availability calendar
//!
//! Dates without an explicit entry are available.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::errors::{WorkflowError, WorkflowResult};

/// Widest date range served or written in one call
pub const MAX_RANGE_DAYS: i64 = 92;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    #[default]
    Available,
    Unavailable,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "unavailable" => Some(Self::Unavailable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilityEntry {
    pub date: NaiveDate,
    pub status: AvailabilityStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetAvailabilityInput {
    pub entries: Vec<AvailabilityEntry>,
}

impl AvailabilityQuery {
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.to < self.from {
            return Err(WorkflowError::invalid("to", "`to` must not be before `from`"));
        }
        if (self.to - self.from).num_days() >= MAX_RANGE_DAYS {
            return Err(WorkflowError::invalid(
                "to",
                format!("At most {} days can be requested at once", MAX_RANGE_DAYS),
            ));
        }
        Ok(())
    }
}

impl SetAvailabilityInput {
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.entries.is_empty() {
            return Err(WorkflowError::invalid("entries", "At least one date is required"));
        }
        if self.entries.len() as i64 > MAX_RANGE_DAYS {
            return Err(WorkflowError::invalid(
                "entries",
                format!("At most {} dates can be set at once", MAX_RANGE_DAYS),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.entries.iter().find(|e| !seen.insert(e.date)) {
            return Err(WorkflowError::invalid(
                "entries",
                format!("{} is listed more than once", dup.date),
            ));
        }
        Ok(())
    }
}

/// Build the date -> status map for every day in `[from, to]`.
pub fn calendar(
    from: NaiveDate,
    to: NaiveDate,
    stored: &[AvailabilityEntry],
) -> BTreeMap<NaiveDate, AvailabilityStatus> {
    let mut days: BTreeMap<NaiveDate, AvailabilityStatus> = from
        .iter_days()
        .take_while(|day| *day <= to)
        .map(|day| (day, AvailabilityStatus::default()))
        .collect();

    for entry in stored {
        if let Some(status) = days.get_mut(&entry.date) {
            *status = entry.status;
        }
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[test]
    fn missing_dates_default_to_available() {
        let stored = vec![
            AvailabilityEntry { date: date(3), status: AvailabilityStatus::Unavailable },
            // Outside the window; ignored
            AvailabilityEntry { date: date(20), status: AvailabilityStatus::Unavailable },
        ];
        let days = calendar(date(1), date(5), &stored);
        assert_eq!(days.len(), 5);
        assert_eq!(days[&date(1)], AvailabilityStatus::Available);
        assert_eq!(days[&date(3)], AvailabilityStatus::Unavailable);
        assert!(!days.contains_key(&date(20)));
    }

    #[test]
    fn range_validation() {
        assert!(AvailabilityQuery { from: date(5), to: date(1) }.validate().is_err());
        assert!(AvailabilityQuery { from: date(1), to: date(1) }.validate().is_ok());

        let wide = AvailabilityQuery {
            from: date(1),
            to: date(1) + chrono::Duration::days(MAX_RANGE_DAYS),
        };
        assert!(wide.validate().is_err());
    }

    #[test]
    fn bulk_input_rejects_duplicates_and_empty() {
        let entry = |day| AvailabilityEntry { date: date(day), status: AvailabilityStatus::Unavailable };
        assert!(SetAvailabilityInput { entries: vec![] }.validate().is_err());
        assert!(SetAvailabilityInput { entries: vec![entry(1), entry(2)] }.validate().is_ok());

        let err = SetAvailabilityInput { entries: vec![entry(1), entry(2), entry(1)] }
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("entries"));
    }

    #[test]
    fn calendar_serializes_dates_as_keys() {
        let days = calendar(date(1), date(2), &[]);
        let json = serde_json::to_value(&days).unwrap();
        assert_eq!(json["2026-03-01"], "available");
    }
}
