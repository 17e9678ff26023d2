use std::collections::BTreeMap;

use serde::Serialize;

/// A foreign reference after boundary normalization: always an identifier,
/// optionally with a label for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub id: String,
    pub display_label: Option<String>,
}

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_label: None,
        }
    }

    pub fn labelled(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_label: Some(label.into()),
        }
    }

    pub fn label_or_id(&self) -> &str {
        self.display_label.as_deref().unwrap_or(&self.id)
    }
}

/// One evaluation record for one student, subject, bimester and cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeEntry {
    pub id: String,
    pub student: Option<EntityRef>,
    pub subject: Option<EntityRef>,
    pub course: Option<EntityRef>,
    pub cycle: String,
    pub bimester: u8,
    pub zone_score: Option<f64>,
    pub exam_score: Option<f64>,
    pub total: Option<f64>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterScore {
    pub zone_score: f64,
    pub exam_score: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAggregate {
    pub subject_name: String,
    pub course_ref: Option<EntityRef>,
    pub bimester_totals: BTreeMap<u8, BimesterScore>,
    pub average: Option<f64>,
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub overall_average: String,
    pub subjects_passed: usize,
    pub subjects_failed: usize,
    pub subjects_total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub subjects: Vec<SubjectAggregate>,
    pub summary: CycleSummary,
}

/// Student display metadata used for labels and file naming only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub id: String,
    pub name: String,
    pub surname: String,
    pub code: Option<String>,
    pub course_label: Option<String>,
}

impl StudentInfo {
    pub fn full_name(&self) -> String {
        let full = format!("{} {}", self.name.trim(), self.surname.trim());
        let full = full.trim();
        if full.is_empty() {
            "Estudiante".to_string()
        } else {
            full.to_string()
        }
    }
}
