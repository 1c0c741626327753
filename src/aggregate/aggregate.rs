use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::aggregate::types::{
    AggregationOptions, Level, LevelSummaries, LevelSummary, RepresentativeQuote,
    SentimentDistribution, Totals,
};
use crate::aggregate::utility::{mean, stddev};
use crate::insight::{Insight, SentimentLabel};

/// Folds insights into class, group and student summaries.
///
/// Pure and deterministic: the same set of insights always yields the same
/// summaries, whatever order the insights arrive in.
pub fn aggregate(insights: &[Insight], options: &AggregationOptions) -> LevelSummaries {
    let classes = summarize_level(insights, Level::Class, options);
    let groups = summarize_level(insights, Level::Group, options);
    let students = summarize_level(insights, Level::Student, options);

    let totals = Totals {
        classes: classes.len(),
        groups: groups.len(),
        students: students.len(),
        feedback: insights.len(),
        average_feedback_per_student: per_student(insights.len(), students.len()),
    };

    LevelSummaries {
        classes,
        groups,
        students,
        totals,
    }
}

/// One [`LevelSummary`] per distinct entity at `level`, sorted by entity id.
/// Entities without insights do not appear.
pub fn summarize_level(
    insights: &[Insight],
    level: Level,
    options: &AggregationOptions,
) -> Vec<LevelSummary> {
    let mut partitions: BTreeMap<&str, Vec<&Insight>> = BTreeMap::new();
    for insight in insights {
        partitions
            .entry(level.entity_id(insight))
            .or_default()
            .push(insight);
    }

    let summaries: Vec<LevelSummary> = partitions
        .into_iter()
        .filter_map(|(entity_id, members)| summarize_entity(level, entity_id, members, options))
        .collect();

    debug!(level = %level, entities = summaries.len(), "Level summarized");
    summaries
}

fn summarize_entity(
    level: Level,
    entity_id: &str,
    mut members: Vec<&Insight>,
    options: &AggregationOptions,
) -> Option<LevelSummary> {
    members.sort_by_key(|i| i.record_id);

    let scores: Vec<f64> = members.iter().map(|i| i.score).collect();
    let mean_score = mean(&scores)?;

    let quality: Vec<f64> = members.iter().filter_map(|i| i.quality_score).collect();

    let mut distribution = SentimentDistribution::default();
    let mut students = BTreeSet::new();
    let mut groups = BTreeSet::new();
    for insight in &members {
        distribution.record(insight.sentiment);
        students.insert(insight.student_id.as_str());
        groups.insert(insight.group_id.as_str());
    }

    Some(LevelSummary {
        level,
        entity_id: entity_id.to_string(),
        insight_count: members.len(),
        student_count: students.len(),
        group_count: groups.len(),
        feedback_per_student: per_student(members.len(), students.len()),
        sentiment_distribution: distribution,
        mean_score,
        score_stddev: stddev(&scores, mean_score),
        mean_quality_score: mean(&quality),
        needs_attention: distribution.share(SentimentLabel::Negative)
            >= options.attention_threshold,
        representative_quotes: representative_quotes(&members, options.quotes_per_extreme),
    })
}

fn per_student(feedback: usize, students: usize) -> f64 {
    match students {
        0 => 0.0,
        n => feedback as f64 / n as f64,
    }
}

/// Highest-scoring quotes first, then lowest-scoring; ties go to the lower
/// record id and no record appears twice.
fn representative_quotes(members: &[&Insight], per_extreme: usize) -> Vec<RepresentativeQuote> {
    let mut highest = members.to_vec();
    highest.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.record_id.cmp(&b.record_id))
    });

    let mut lowest = members.to_vec();
    lowest.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then(a.record_id.cmp(&b.record_id))
    });

    let mut seen = BTreeSet::new();
    highest
        .into_iter()
        .take(per_extreme)
        .chain(lowest.into_iter().take(per_extreme))
        .filter(|insight| seen.insert(insight.record_id))
        .map(RepresentativeQuote::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insight(
        record_id: u64,
        class: &str,
        group: &str,
        student: &str,
        sentiment: SentimentLabel,
        score: f64,
    ) -> Insight {
        Insight {
            record_id,
            class_id: class.into(),
            group_id: group.into(),
            student_id: student.into(),
            sentiment,
            score,
            summary: format!("summary {record_id}"),
            text: format!("text {record_id}"),
            quality_score: None,
        }
    }

    fn sample() -> Vec<Insight> {
        use SentimentLabel::*;
        vec![
            insight(0, "C1", "A", "s1", Positive, 90.0),
            insight(1, "C1", "A", "s2", Negative, 20.0),
            insight(2, "C1", "B", "s3", Neutral, 50.0),
            insight(3, "C1", "B", "s3", Mixed, 60.0),
            insight(4, "C2", "A", "s4", Negative, 10.0),
            insight(5, "C1", "A", "s1", Positive, 80.0),
        ]
    }

    #[test]
    fn test_one_summary_per_entity_sorted() {
        let summaries = aggregate(&sample(), &AggregationOptions::default());

        let ids = |s: &[LevelSummary]| s.iter().map(|x| x.entity_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&summaries.classes), vec!["C1", "C2"]);
        assert_eq!(ids(&summaries.groups), vec!["A", "B"]);
        assert_eq!(ids(&summaries.students), vec!["s1", "s2", "s3", "s4"]);
    }

    #[test]
    fn test_distribution_sums_to_member_count() {
        let insights = sample();
        let summaries = aggregate(&insights, &AggregationOptions::default());

        for level in Level::ALL {
            for summary in summaries.level(level) {
                let members = insights
                    .iter()
                    .filter(|i| level.entity_id(i) == summary.entity_id)
                    .count();
                assert_eq!(summary.sentiment_distribution.total(), members);
                assert_eq!(summary.insight_count, members);
            }
        }
    }

    #[test]
    fn test_group_statistics() {
        let summaries = aggregate(&sample(), &AggregationOptions::default());
        let group_a = summaries.find(Level::Group, "A").unwrap();

        assert_eq!(group_a.insight_count, 4);
        assert_eq!(group_a.student_count, 3);
        assert_eq!(group_a.sentiment_distribution.positive, 2);
        assert_eq!(group_a.sentiment_distribution.negative, 2);
        assert_eq!(group_a.mean_score, 50.0);
        assert!(group_a.needs_attention);

        let group_b = summaries.find(Level::Group, "B").unwrap();
        assert_eq!(group_b.mean_score, 55.0);
        assert_eq!(group_b.score_stddev, 5.0);
        assert!(!group_b.needs_attention);
    }

    #[test]
    fn test_roll_up_counts() {
        let summaries = aggregate(&sample(), &AggregationOptions::default());

        assert_eq!(
            summaries.totals,
            Totals {
                classes: 2,
                groups: 2,
                students: 4,
                feedback: 6,
                average_feedback_per_student: 1.5,
            }
        );

        let c1 = summaries.find(Level::Class, "C1").unwrap();
        assert_eq!(c1.group_count, 2);
        assert_eq!(c1.student_count, 3);
        assert_eq!(c1.feedback_per_student, 5.0 / 3.0);

        let s1 = summaries.find(Level::Student, "s1").unwrap();
        assert_eq!(s1.group_count, 1);
        assert_eq!(s1.feedback_per_student, 2.0);
    }

    #[test]
    fn test_mean_quality_only_over_evaluated_insights() {
        let mut insights = sample();
        insights[0].quality_score = Some(80.0);
        insights[5].quality_score = Some(60.0);

        let summaries = aggregate(&insights, &AggregationOptions::default());

        assert_eq!(summaries.find(Level::Student, "s1").unwrap().mean_quality_score, Some(70.0));
        assert_eq!(summaries.find(Level::Group, "A").unwrap().mean_quality_score, Some(70.0));
        assert_eq!(summaries.find(Level::Group, "B").unwrap().mean_quality_score, None);
    }

    #[test]
    fn test_quotes_are_extremes_without_duplicates() {
        let summaries = aggregate(&sample(), &AggregationOptions::default());

        let group_a = summaries.find(Level::Group, "A").unwrap();
        let quoted: Vec<u64> = group_a.representative_quotes.iter().map(|q| q.record_id).collect();
        assert_eq!(quoted, vec![0, 4]);
        assert_eq!(group_a.representative_quotes[0].text, "text 0");

        // Single insight: highest and lowest are the same record.
        let s2 = summaries.find(Level::Student, "s2").unwrap();
        assert_eq!(s2.representative_quotes.len(), 1);
    }

    #[test]
    fn test_quote_ties_prefer_lower_record_id() {
        use SentimentLabel::*;
        let insights = vec![
            insight(9, "C", "G", "a", Positive, 70.0),
            insight(3, "C", "G", "b", Positive, 70.0),
            insight(5, "C", "G", "c", Positive, 70.0),
        ];
        let options = AggregationOptions {
            quotes_per_extreme: 1,
            ..Default::default()
        };

        let summary = &summarize_level(&insights, Level::Group, &options)[0];
        let quoted: Vec<u64> = summary.representative_quotes.iter().map(|q| q.record_id).collect();
        assert_eq!(quoted, vec![3]);
    }

    #[test]
    fn test_aggregation_is_idempotent_and_order_independent() {
        let insights = sample();
        let options = AggregationOptions::default();

        let first = aggregate(&insights, &options);
        let second = aggregate(&insights, &options);
        assert_eq!(first, second);

        let mut reversed = insights.clone();
        reversed.reverse();
        assert_eq!(aggregate(&reversed, &options), first);
    }

    #[test]
    fn test_no_insights_means_no_summaries() {
        let summaries = aggregate(&[], &AggregationOptions::default());
        assert!(summaries.classes.is_empty());
        assert!(summaries.groups.is_empty());
        assert!(summaries.students.is_empty());
        assert_eq!(summaries.totals, Totals::default());
    }

    #[test]
    fn test_attention_threshold_is_configurable() {
        let options = AggregationOptions {
            attention_threshold: 0.25,
            ..Default::default()
        };
        let summaries = aggregate(&sample(), &options);
        // Class C1: 1 negative of 5.
        assert!(!summaries.find(Level::Class, "C1").unwrap().needs_attention);
        assert!(summaries.find(Level::Class, "C2").unwrap().needs_attention);
    }
}
