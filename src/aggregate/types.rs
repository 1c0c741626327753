//! Data types produced by the aggregation step.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::insight::{Insight, SentimentLabel};

/// Granularity of a [`LevelSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Class,
    Group,
    Student,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Class, Level::Group, Level::Student];

    /// The identifier an insight is partitioned by at this level.
    pub fn entity_id<'a>(&self, insight: &'a Insight) -> &'a str {
        match self {
            Level::Class => &insight.class_id,
            Level::Group => &insight.group_id,
            Level::Student => &insight.student_id,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Class => "class",
            Level::Group => "group",
            Level::Student => "student",
        })
    }
}

/// Count of insights per sentiment label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentDistribution {
    #[serde(rename = "Positive")]
    pub positive: usize,
    #[serde(rename = "Negative")]
    pub negative: usize,
    #[serde(rename = "Neutral")]
    pub neutral: usize,
    #[serde(rename = "Mixed")]
    pub mixed: usize,
}

impl SentimentDistribution {
    pub fn record(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Negative => self.negative += 1,
            SentimentLabel::Neutral => self.neutral += 1,
            SentimentLabel::Mixed => self.mixed += 1,
        }
    }

    pub fn count(&self, label: SentimentLabel) -> usize {
        match label {
            SentimentLabel::Positive => self.positive,
            SentimentLabel::Negative => self.negative,
            SentimentLabel::Neutral => self.neutral,
            SentimentLabel::Mixed => self.mixed,
        }
    }

    pub fn total(&self) -> usize {
        self.positive + self.negative + self.neutral + self.mixed
    }

    /// Share of insights carrying `label`. Zero for an empty distribution.
    pub fn share(&self, label: SentimentLabel) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.count(label) as f64 / total as f64,
        }
    }
}

/// A student's own words, picked by score rather than by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeQuote {
    pub record_id: u64,
    pub student_id: String,
    pub sentiment: SentimentLabel,
    pub score: f64,
    pub text: String,
}

impl From<&Insight> for RepresentativeQuote {
    fn from(insight: &Insight) -> Self {
        Self {
            record_id: insight.record_id,
            student_id: insight.student_id.clone(),
            sentiment: insight.sentiment,
            score: insight.score,
            text: insight.text.clone(),
        }
    }
}

/// Aggregated insight statistics for one class, group or student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub level: Level,
    pub entity_id: String,
    pub insight_count: usize,
    /// Distinct students contributing to this entity.
    pub student_count: usize,
    /// Distinct groups contributing to this entity.
    pub group_count: usize,
    pub feedback_per_student: f64,
    pub sentiment_distribution: SentimentDistribution,
    pub mean_score: f64,
    pub score_stddev: f64,
    /// Mean quality score over the insights that were evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_quality_score: Option<f64>,
    /// Negative share is at or above the configured threshold.
    pub needs_attention: bool,
    pub representative_quotes: Vec<RepresentativeQuote>,
}

/// Tuning for [`aggregate`](super::aggregate).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationOptions {
    /// Quotes taken from each end of the score range.
    pub quotes_per_extreme: usize,
    /// Negative share (0.0-1.0) at which an entity needs attention.
    pub attention_threshold: f64,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            quotes_per_extreme: 1,
            attention_threshold: 0.5,
        }
    }
}

/// Roll-up counts across every insight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub classes: usize,
    pub groups: usize,
    pub students: usize,
    pub feedback: usize,
    /// Zero when there are no students.
    pub average_feedback_per_student: f64,
}

/// One summary collection per level, each sorted by entity id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelSummaries {
    pub classes: Vec<LevelSummary>,
    pub groups: Vec<LevelSummary>,
    pub students: Vec<LevelSummary>,
    #[serde(default)]
    pub totals: Totals,
}

impl LevelSummaries {
    pub fn level(&self, level: Level) -> &[LevelSummary] {
        match level {
            Level::Class => &self.classes,
            Level::Group => &self.groups,
            Level::Student => &self.students,
        }
    }

    pub fn find(&self, level: Level, entity_id: &str) -> Option<&LevelSummary> {
        self.level(level).iter().find(|s| s.entity_id == entity_id)
    }
}
