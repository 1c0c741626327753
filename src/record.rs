use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw student comment as read from the input table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub record_id: u64,
    pub student_id: String,
    pub group_id: String,
    pub class_id: String,
    pub raw_text: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl FeedbackRecord {
    pub fn new(
        record_id: u64,
        student_id: impl Into<String>,
        group_id: impl Into<String>,
        class_id: impl Into<String>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            record_id,
            student_id: student_id.into(),
            group_id: group_id.into(),
            class_id: class_id.into(),
            raw_text: raw_text.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A [`FeedbackRecord`] whose text survived preprocessing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedRecord {
    #[serde(flatten)]
    pub record: FeedbackRecord,
    pub normalized_text: String,
}

/// Parses the timestamp formats found in feedback exports: RFC 3339,
/// `YYYY-MM-DD HH:MM:SS` and a bare `YYYY-MM-DD` (taken as midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}
