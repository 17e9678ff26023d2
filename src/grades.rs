use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{
    AggregateResult, BimesterScore, CycleSummary, EntityRef, GradeEntry, SubjectAggregate,
};

/// Minimum subject average (inclusive) that counts as passed.
pub const PASS_MARK: f64 = 60.0;
pub const ZONE_MAX: f64 = 60.0;
pub const EXAM_MAX: f64 = 40.0;
pub const BIMESTERS: RangeInclusive<u8> = 1..=4;

/// How two entries that land on the same (subject, bimester) slot are
/// reconciled. The store is expected to reject such pairs; when one slips
/// through, the entry that comes later in input order replaces the earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateBimesterPolicy {
    LastWins,
}

pub const DUPLICATE_BIMESTER_POLICY: DuplicateBimesterPolicy = DuplicateBimesterPolicy::LastWins;

impl DuplicateBimesterPolicy {
    /// Places `score` in its slot and reports whether an earlier one was replaced.
    fn place(self, slots: &mut BTreeMap<u8, BimesterScore>, bimester: u8, score: BimesterScore) -> bool {
        match self {
            DuplicateBimesterPolicy::LastWins => slots.insert(bimester, score).is_some(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GradeValidationError {
    #[error("zone score must be between 0 and 60, got {0}")]
    ZoneOutOfRange(f64),
    #[error("exam score must be between 0 and 40, got {0}")]
    ExamOutOfRange(f64),
    #[error("bimester must be between 1 and 4, got {0}")]
    BimesterOutOfRange(i64),
    #[error("school cycle is required")]
    MissingCycle,
}

/// Checks a score pair before it is written to the store.
pub fn validate_scores(
    zone_score: f64,
    exam_score: f64,
    bimester: i64,
    cycle: &str,
) -> Result<(), GradeValidationError> {
    if !(0.0..=ZONE_MAX).contains(&zone_score) {
        return Err(GradeValidationError::ZoneOutOfRange(zone_score));
    }
    if !(0.0..=EXAM_MAX).contains(&exam_score) {
        return Err(GradeValidationError::ExamOutOfRange(exam_score));
    }
    if !(1..=4).contains(&bimester) {
        return Err(GradeValidationError::BimesterOutOfRange(bimester));
    }
    if cycle.trim().is_empty() {
        return Err(GradeValidationError::MissingCycle);
    }
    Ok(())
}

/// The stored total, or zone + exam when only the components are known.
/// An entry with neither yields `None` and counts as "no entry".
pub fn entry_total(entry: &GradeEntry) -> Option<f64> {
    if let Some(total) = entry.total {
        return Some(total);
    }
    if entry.zone_score.is_none() && entry.exam_score.is_none() {
        return None;
    }
    Some(entry.zone_score.unwrap_or(0.0) + entry.exam_score.unwrap_or(0.0))
}

struct SubjectGroup {
    subject_id: String,
    subject_name: Option<String>,
    course_ref: Option<EntityRef>,
    bimester_totals: BTreeMap<u8, BimesterScore>,
}

/// Aggregates every grade entry of one student in one cycle.
///
/// Subjects keep the order in which they first appear in `entries`. Entries
/// without a subject or with a bimester outside 1..=4 are skipped.
pub fn aggregate(entries: &[GradeEntry]) -> AggregateResult {
    let mut groups: Vec<SubjectGroup> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for entry in entries {
        let Some(subject) = entry.subject.as_ref() else {
            warn!(entry_id = %entry.id, "dropping grade entry without a subject");
            continue;
        };
        if !BIMESTERS.contains(&entry.bimester) {
            warn!(
                entry_id = %entry.id,
                bimester = entry.bimester,
                "dropping grade entry with an unknown bimester"
            );
            continue;
        }

        let position = *positions.entry(subject.id.as_str()).or_insert_with(|| {
            groups.push(SubjectGroup {
                subject_id: subject.id.clone(),
                subject_name: None,
                course_ref: None,
                bimester_totals: BTreeMap::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[position];

        if group.subject_name.is_none() {
            group.subject_name = subject.display_label.clone();
        }
        if group.course_ref.is_none() {
            group.course_ref = entry.course.clone();
        }

        let Some(total) = entry_total(entry) else {
            debug!(entry_id = %entry.id, "grade entry has no scores yet");
            continue;
        };
        let score = BimesterScore {
            zone_score: entry.zone_score.unwrap_or(0.0),
            exam_score: entry.exam_score.unwrap_or(0.0),
            total,
        };
        if DUPLICATE_BIMESTER_POLICY.place(&mut group.bimester_totals, entry.bimester, score) {
            debug!(
                entry_id = %entry.id,
                subject_id = %group.subject_id,
                bimester = entry.bimester,
                "duplicate bimester entry replaced an earlier one"
            );
        }
    }

    let subjects: Vec<SubjectAggregate> = groups
        .into_iter()
        .map(|group| {
            let average = mean(group.bimester_totals.values().map(|score| score.total));
            SubjectAggregate {
                subject_name: group.subject_name.unwrap_or(group.subject_id),
                course_ref: group.course_ref,
                bimester_totals: group.bimester_totals,
                average,
                passed: average.map(|value| value >= PASS_MARK),
            }
        })
        .collect();

    let summary = summarize(&subjects);
    AggregateResult { subjects, summary }
}

pub fn summarize(subjects: &[SubjectAggregate]) -> CycleSummary {
    let overall_average = match mean(subjects.iter().filter_map(|subject| subject.average)) {
        Some(value) => format_two_decimals(value),
        None => "0.00".to_string(),
    };

    CycleSummary {
        overall_average,
        subjects_passed: subjects.iter().filter(|s| s.passed == Some(true)).count(),
        subjects_failed: subjects.iter().filter(|s| s.passed == Some(false)).count(),
        subjects_total: subjects.len(),
    }
}

/// Two-decimal rendering that breaks exact ties upward (67.625 -> "67.63"),
/// where `{:.2}` would round them to even.
pub fn format_two_decimals(value: f64) -> String {
    // Only odd multiples of 1/8 sit exactly halfway between two cents.
    let exact_tie = (value * 8.0).fract() == 0.0 && (value * 4.0).fract() != 0.0;
    if exact_tie {
        let cents = (value * 100.0).floor() + 1.0;
        return format!("{:.2}", cents / 100.0);
    }
    format!("{value:.2}")
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(subject: &str, bimester: u8, total: f64) -> GradeEntry {
        GradeEntry {
            id: format!("{subject}-{bimester}"),
            student: Some(EntityRef::new("student-1")),
            subject: Some(EntityRef::labelled(subject, subject.to_uppercase())),
            course: Some(EntityRef::new("course-1")),
            cycle: "2025".to_string(),
            bimester,
            zone_score: None,
            exam_score: None,
            total: Some(total),
            remarks: None,
        }
    }

    fn unscored(subject: &str, bimester: u8) -> GradeEntry {
        GradeEntry {
            total: None,
            ..scored(subject, bimester, 0.0)
        }
    }

    #[test]
    fn empty_input_yields_empty_report() {
        let result = aggregate(&[]);
        assert!(result.subjects.is_empty());
        assert_eq!(
            result.summary,
            CycleSummary {
                overall_average: "0.00".to_string(),
                subjects_passed: 0,
                subjects_failed: 0,
                subjects_total: 0,
            }
        );
    }

    #[test]
    fn averages_all_four_bimesters() {
        let entries = vec![
            scored("math", 1, 90.0),
            scored("math", 2, 70.0),
            scored("math", 3, 50.0),
            scored("math", 4, 60.0),
        ];
        let result = aggregate(&entries);
        assert_eq!(result.subjects.len(), 1);
        let math = &result.subjects[0];
        assert_eq!(math.subject_name, "MATH");
        assert_eq!(math.average, Some(67.5));
        assert_eq!(math.passed, Some(true));
        assert_eq!(result.summary.overall_average, "67.50");
        assert_eq!(result.summary.subjects_passed, 1);
    }

    #[test]
    fn subject_without_scores_has_no_average() {
        let result = aggregate(&[unscored("art", 1)]);
        let art = &result.subjects[0];
        assert_eq!(art.average, None);
        assert_eq!(art.passed, None);
        assert!(art.bimester_totals.is_empty());
        assert_eq!(result.summary.subjects_total, 1);
        assert_eq!(result.summary.subjects_passed, 0);
        assert_eq!(result.summary.subjects_failed, 0);
        assert_eq!(result.summary.overall_average, "0.00");
    }

    #[test]
    fn counts_passed_and_failed_subjects() {
        let entries = vec![
            scored("math", 1, 80.0),
            scored("science", 1, 40.0),
            scored("math", 2, 70.0),
        ];
        let result = aggregate(&entries);
        assert_eq!(result.subjects[0].average, Some(75.0));
        assert_eq!(result.subjects[1].average, Some(40.0));
        assert_eq!(result.summary.subjects_passed, 1);
        assert_eq!(result.summary.subjects_failed, 1);
        assert_eq!(result.summary.subjects_total, 2);
        assert_eq!(result.summary.overall_average, "57.50");
    }

    #[test]
    fn derives_total_from_components() {
        let entry = GradeEntry {
            zone_score: Some(55.0),
            exam_score: Some(20.0),
            total: None,
            ..scored("math", 1, 0.0)
        };
        assert_eq!(entry_total(&entry), Some(75.0));

        let result = aggregate(&[entry]);
        let score = result.subjects[0].bimester_totals[&1u8];
        assert_eq!(score.total, 75.0);
        assert_eq!(score.zone_score, 55.0);
        assert_eq!(score.exam_score, 20.0);
    }

    #[test]
    fn missing_component_counts_as_zero_only_when_other_is_present() {
        let exam_only = GradeEntry {
            exam_score: Some(30.0),
            total: None,
            ..scored("math", 1, 0.0)
        };
        assert_eq!(entry_total(&exam_only), Some(30.0));
        assert_eq!(entry_total(&unscored("math", 1)), None);
    }

    #[test]
    fn stored_total_takes_precedence() {
        let entry = GradeEntry {
            zone_score: Some(10.0),
            exam_score: Some(10.0),
            total: Some(95.0),
            ..scored("math", 1, 0.0)
        };
        assert_eq!(entry_total(&entry), Some(95.0));
    }

    #[test]
    fn pass_mark_is_inclusive() {
        let result = aggregate(&[scored("math", 1, 60.0)]);
        assert_eq!(result.subjects[0].passed, Some(true));

        let result = aggregate(&[scored("math", 1, 59.99)]);
        assert_eq!(result.subjects[0].passed, Some(false));
    }

    #[test]
    fn duplicate_bimester_keeps_the_later_entry() {
        let entries = vec![scored("math", 1, 40.0), scored("math", 1, 85.0)];
        let result = aggregate(&entries);
        let math = &result.subjects[0];
        assert_eq!(math.bimester_totals.len(), 1);
        assert_eq!(math.bimester_totals[&1u8].total, 85.0);
        assert_eq!(math.average, Some(85.0));
    }

    #[test]
    fn unscored_duplicate_does_not_erase_a_scored_bimester() {
        let entries = vec![scored("math", 1, 70.0), unscored("math", 1)];
        let result = aggregate(&entries);
        assert_eq!(result.subjects[0].average, Some(70.0));
    }

    #[test]
    fn malformed_entries_are_dropped() {
        let no_subject = GradeEntry {
            subject: None,
            ..scored("math", 1, 10.0)
        };
        let bad_bimester = scored("math", 7, 10.0);
        let entries = vec![no_subject, scored("science", 1, 90.0), bad_bimester];
        let result = aggregate(&entries);
        assert_eq!(result.subjects.len(), 1);
        assert_eq!(result.subjects[0].subject_name, "SCIENCE");
        assert_eq!(result.summary.overall_average, "90.00");
    }

    #[test]
    fn subjects_follow_first_appearance_order() {
        let entries = vec![
            scored("zoology", 1, 70.0),
            scored("art", 1, 70.0),
            scored("zoology", 2, 70.0),
            scored("biology", 1, 70.0),
        ];
        let names: Vec<String> = aggregate(&entries)
            .subjects
            .into_iter()
            .map(|subject| subject.subject_name)
            .collect();
        assert_eq!(names, vec!["ZOOLOGY", "ART", "BIOLOGY"]);
    }

    #[test]
    fn subject_name_falls_back_to_identifier() {
        let entry = GradeEntry {
            subject: Some(EntityRef::new("subj-9")),
            ..scored("math", 1, 70.0)
        };
        assert_eq!(aggregate(&[entry]).subjects[0].subject_name, "subj-9");
    }

    #[test]
    fn subject_averages_stay_unrounded() {
        let entries = vec![
            scored("math", 1, 70.0),
            scored("math", 2, 70.0),
            scored("math", 3, 71.0),
        ];
        let result = aggregate(&entries);
        let average = result.subjects[0].average.unwrap_or_default();
        assert!((average - 211.0 / 3.0).abs() < 1e-12);
        assert_eq!(result.summary.overall_average, "70.33");
    }

    #[test]
    fn overall_average_rounds_exact_ties_up() {
        let entries = vec![
            scored("math", 1, 67.0),
            scored("math", 2, 68.0),
            scored("science", 1, 67.0),
            scored("science", 2, 68.0),
            scored("science", 3, 68.0),
            scored("science", 4, 68.0),
        ];
        let result = aggregate(&entries);
        assert_eq!(result.subjects[0].average, Some(67.5));
        assert_eq!(result.subjects[1].average, Some(67.75));
        assert_eq!(result.summary.overall_average, "67.63");

        let tiny = aggregate(&[scored("math", 1, 0.125)]);
        assert_eq!(tiny.summary.overall_average, "0.13");
    }

    #[test]
    fn two_decimal_formatting() {
        assert_eq!(format_two_decimals(0.125), "0.13");
        assert_eq!(format_two_decimals(67.625), "67.63");
        assert_eq!(format_two_decimals(2.375), "2.38");
        assert_eq!(format_two_decimals(67.5), "67.50");
        assert_eq!(format_two_decimals(0.0), "0.00");
        assert_eq!(format_two_decimals(211.0 / 3.0), "70.33");
        // 1.005 is stored just below the half, so it stays down.
        assert_eq!(format_two_decimals(1.005), "1.00");
    }

    #[test]
    fn aggregation_is_repeatable() {
        let entries = vec![
            scored("math", 1, 83.3),
            scored("science", 2, 41.7),
            unscored("art", 1),
        ];
        assert_eq!(aggregate(&entries), aggregate(&entries));
    }

    #[test]
    fn validation_enforces_domain_bounds() {
        assert!(validate_scores(60.0, 40.0, 4, "2025").is_ok());
        assert!(validate_scores(0.0, 0.0, 1, "2025").is_ok());
        assert_eq!(
            validate_scores(61.0, 10.0, 1, "2025"),
            Err(GradeValidationError::ZoneOutOfRange(61.0))
        );
        assert_eq!(
            validate_scores(10.0, -1.0, 1, "2025"),
            Err(GradeValidationError::ExamOutOfRange(-1.0))
        );
        assert_eq!(
            validate_scores(10.0, 10.0, 5, "2025"),
            Err(GradeValidationError::BimesterOutOfRange(5))
        );
        assert_eq!(
            validate_scores(10.0, 10.0, 2, " "),
            Err(GradeValidationError::MissingCycle)
        );
        assert!(validate_scores(f64::NAN, 10.0, 1, "2025").is_err());
    }
}
