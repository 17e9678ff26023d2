use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::grades::{BIMESTERS, PASS_MARK};
use crate::models::{AggregateResult, CycleSummary, StudentInfo};

const EXCELLENT_MARK: f64 = 80.0;
const PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Excellent,
    Passed,
    Failed,
    None,
}

/// Display band for a bimester total or an average.
pub fn classify(value: Option<f64>) -> Classification {
    match value {
        None => Classification::None,
        Some(value) if value >= EXCELLENT_MARK => Classification::Excellent,
        Some(value) if value >= PASS_MARK => Classification::Passed,
        Some(_) => Classification::Failed,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCell {
    pub bimester: u8,
    pub display: String,
    pub breakdown: Option<String>,
    pub tag: Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderableRow {
    pub subject_name: String,
    pub course_label: Option<String>,
    pub cells: Vec<ReportCell>,
    pub average: String,
    pub average_tag: Classification,
    pub status: Option<&'static str>,
}

pub fn format_score(value: f64) -> String {
    format!("{value}")
}

/// One row per subject, four bimester cells each. Averages are shown as
/// computed, without rounding.
pub fn to_report_rows(result: &AggregateResult) -> Vec<RenderableRow> {
    result
        .subjects
        .iter()
        .map(|subject| {
            let cells = BIMESTERS
                .map(|bimester| match subject.bimester_totals.get(&bimester) {
                    Some(score) => ReportCell {
                        bimester,
                        display: format_score(score.total),
                        breakdown: Some(format!(
                            "Z:{} E:{}",
                            format_score(score.zone_score),
                            format_score(score.exam_score)
                        )),
                        tag: classify(Some(score.total)),
                    },
                    None => ReportCell {
                        bimester,
                        display: PLACEHOLDER.to_string(),
                        breakdown: None,
                        tag: Classification::None,
                    },
                })
                .collect();

            RenderableRow {
                subject_name: subject.subject_name.clone(),
                course_label: subject
                    .course_ref
                    .as_ref()
                    .map(|course| course.label_or_id().to_string()),
                cells,
                average: subject
                    .average
                    .map(format_score)
                    .unwrap_or_else(|| PLACEHOLDER.to_string()),
                average_tag: classify(subject.average),
                status: subject.passed.map(status_label),
            }
        })
        .collect()
}

fn status_label(passed: bool) -> &'static str {
    if passed {
        "Aprobado"
    } else {
        "Reprobado"
    }
}

fn overall_label(summary: &CycleSummary) -> &'static str {
    let overall = summary.overall_average.parse::<f64>().ok();
    match classify(overall) {
        Classification::Excellent => "Excelente",
        Classification::Passed => "Aprobado",
        Classification::Failed | Classification::None => "Reprobado",
    }
}

/// `BOLETA_{NAME}_{SURNAME}_{CYCLE}.pdf`, uppercased with Unicode default
/// case mapping (no locale tailoring) and whitespace runs collapsed to `_`.
/// A blank name part is left out; when both are blank the stem is
/// `ESTUDIANTE`.
pub fn build_file_name(student: &StudentInfo, cycle: &str) -> String {
    let words: Vec<&str> = student
        .name
        .split_whitespace()
        .chain(student.surname.split_whitespace())
        .collect();

    let stem = if words.is_empty() {
        "ESTUDIANTE".to_string()
    } else {
        words.join("_").to_uppercase()
    };

    let cycle = cycle.split_whitespace().collect::<Vec<_>>().join("_");
    format!("BOLETA_{stem}_{cycle}.pdf")
}

/// The payload handed to the document renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportContract {
    pub student: StudentInfo,
    pub cycle: String,
    pub file_name: String,
    pub rows: Vec<RenderableRow>,
    pub summary: CycleSummary,
    pub pass_mark: f64,
}

pub fn build_contract(result: &AggregateResult, student: &StudentInfo, cycle: &str) -> ReportContract {
    ReportContract {
        student: student.clone(),
        cycle: cycle.to_string(),
        file_name: build_file_name(student, cycle),
        rows: to_report_rows(result),
        summary: result.summary.clone(),
        pass_mark: PASS_MARK,
    }
}

/// Markdown rendition of the boleta for on-screen review.
pub fn build_preview(
    student: &StudentInfo,
    cycle: &str,
    result: &AggregateResult,
    generated_on: NaiveDate,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# BOLETA DE CALIFICACIONES");
    let _ = writeln!(output, "Ciclo Escolar {cycle} (generada el {generated_on})");
    let _ = writeln!(output);
    let _ = writeln!(output, "- Estudiante: {}", student.full_name());
    let _ = writeln!(
        output,
        "- Código: {}",
        student.code.as_deref().unwrap_or(PLACEHOLDER)
    );
    let _ = writeln!(
        output,
        "- Grado: {}",
        student.course_label.as_deref().unwrap_or(PLACEHOLDER)
    );
    let _ = writeln!(output);

    let rows = to_report_rows(result);
    if rows.is_empty() {
        let _ = writeln!(
            output,
            "No hay calificaciones registradas para este estudiante en el ciclo {cycle}."
        );
        return output;
    }

    let _ = writeln!(output, "| MATERIA | B1 | B2 | B3 | B4 | PROMEDIO | ESTADO |");
    let _ = writeln!(output, "|---|---|---|---|---|---|---|");
    for row in rows.iter() {
        let cells: Vec<String> = row
            .cells
            .iter()
            .map(|cell| match &cell.breakdown {
                Some(breakdown) => format!("{} ({})", cell.display, breakdown),
                None => cell.display.clone(),
            })
            .collect();
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {} |",
            row.subject_name,
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            row.average,
            row.status.unwrap_or(PLACEHOLDER)
        );
    }

    let summary = &result.summary;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Resumen");
    let _ = writeln!(
        output,
        "- Promedio general: {} ({})",
        summary.overall_average,
        overall_label(summary)
    );
    let _ = writeln!(output, "- Aprobadas: {}", summary.subjects_passed);
    let _ = writeln!(output, "- Reprobadas: {}", summary.subjects_failed);
    let _ = writeln!(output, "- Total materias: {}", summary.subjects_total);
    let _ = writeln!(output);
    let _ = writeln!(output, "Nota mínima de aprobación: {PASS_MARK} puntos");

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::aggregate;
    use crate::models::{EntityRef, GradeEntry};

    fn entry(subject: &str, bimester: u8, zone: f64, exam: f64) -> GradeEntry {
        GradeEntry {
            id: format!("{subject}-{bimester}"),
            student: Some(EntityRef::new("s1")),
            subject: Some(EntityRef::labelled(subject, subject)),
            course: Some(EntityRef::labelled("c1", "1° Básico \"A\"")),
            cycle: "2025".to_string(),
            bimester,
            zone_score: Some(zone),
            exam_score: Some(exam),
            total: None,
            remarks: None,
        }
    }

    fn student(name: &str, surname: &str) -> StudentInfo {
        StudentInfo {
            id: "s1".to_string(),
            name: name.to_string(),
            surname: surname.to_string(),
            code: Some("E-001".to_string()),
            course_label: Some("1° Básico \"A\"".to_string()),
        }
    }

    #[test]
    fn classification_bands() {
        assert_eq!(classify(Some(95.0)), Classification::Excellent);
        assert_eq!(classify(Some(80.0)), Classification::Excellent);
        assert_eq!(classify(Some(79.9)), Classification::Passed);
        assert_eq!(classify(Some(60.0)), Classification::Passed);
        assert_eq!(classify(Some(59.0)), Classification::Failed);
        assert_eq!(classify(None), Classification::None);
        assert_eq!(serde_json::to_value(classify(None)).expect("serializes"), "none");
    }

    #[test]
    fn rows_carry_breakdown_and_placeholders() {
        let result = aggregate(&[entry("Matemática", 1, 55.0, 20.0), entry("Matemática", 3, 30.0, 10.0)]);
        let rows = to_report_rows(&result);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.subject_name, "Matemática");
        assert_eq!(row.course_label.as_deref(), Some("1° Básico \"A\""));
        assert_eq!(row.cells.len(), 4);
        assert_eq!(row.cells[0].display, "75");
        assert_eq!(row.cells[0].breakdown.as_deref(), Some("Z:55 E:20"));
        assert_eq!(row.cells[0].tag, Classification::Passed);
        assert_eq!(row.cells[1].display, "-");
        assert_eq!(row.cells[1].tag, Classification::None);
        assert_eq!(row.cells[2].tag, Classification::Failed);
        assert_eq!(row.average, "57.5");
        assert_eq!(row.average_tag, Classification::Failed);
        assert_eq!(row.status, Some("Reprobado"));
    }

    #[test]
    fn row_without_scores_shows_placeholder_average() {
        let unscored = GradeEntry {
            zone_score: None,
            exam_score: None,
            ..entry("Arte", 1, 0.0, 0.0)
        };
        let rows = to_report_rows(&aggregate(&[unscored]));
        assert_eq!(rows[0].average, "-");
        assert_eq!(rows[0].average_tag, Classification::None);
        assert_eq!(rows[0].status, None);
    }

    #[test]
    fn file_name_uppercases_and_keeps_diacritics() {
        assert_eq!(
            build_file_name(&student("María", "López"), "2025"),
            "BOLETA_MARÍA_LÓPEZ_2025.pdf"
        );
    }

    #[test]
    fn file_name_collapses_whitespace() {
        assert_eq!(
            build_file_name(&student("  Ana   Sofía ", "de la\tCruz"), "2025"),
            "BOLETA_ANA_SOFÍA_DE_LA_CRUZ_2025.pdf"
        );
    }

    #[test]
    fn file_name_falls_back_for_blank_names() {
        assert_eq!(
            build_file_name(&student(" ", ""), "2025"),
            "BOLETA_ESTUDIANTE_2025.pdf"
        );
        assert_eq!(build_file_name(&student("Ana", ""), "2025"), "BOLETA_ANA_2025.pdf");
    }

    #[test]
    fn file_name_uses_default_case_mapping() {
        assert_eq!(
            build_file_name(&student("Strauß", "Ñandú"), "2024"),
            "BOLETA_STRAUSS_ÑANDÚ_2024.pdf"
        );
    }

    #[test]
    fn contract_matches_rows_and_summary() {
        let result = aggregate(&[entry("Ciencias", 1, 50.0, 35.0)]);
        let contract = build_contract(&result, &student("Luis", "Pérez"), "2025");
        assert_eq!(contract.file_name, "BOLETA_LUIS_PÉREZ_2025.pdf");
        assert_eq!(contract.rows.len(), 1);
        assert_eq!(contract.summary.overall_average, "85.00");
        assert_eq!(contract.pass_mark, 60.0);

        let json = serde_json::to_value(&contract).expect("contract serializes");
        assert_eq!(json["summary"]["overallAverage"], "85.00");
        assert_eq!(json["rows"][0]["cells"][0]["tag"], "excellent");
        assert_eq!(json["fileName"], "BOLETA_LUIS_PÉREZ_2025.pdf");
    }

    #[test]
    fn preview_lists_subjects_and_summary() {
        let result = aggregate(&[entry("Matemática", 1, 55.0, 20.0), entry("Arte", 1, 20.0, 10.0)]);
        let date = NaiveDate::from_ymd_opt(2025, 10, 30).expect("valid date");
        let preview = build_preview(&student("María", "López"), "2025", &result, date);
        assert!(preview.contains("Ciclo Escolar 2025 (generada el 2025-10-30)"));
        assert!(preview.contains("- Estudiante: María López"));
        assert!(preview.contains("| Matemática | 75 (Z:55 E:20) | - | - | - | 75 | Aprobado |"));
        assert!(preview.contains("| Arte | 30 (Z:20 E:10) | - | - | - | 30 | Reprobado |"));
        assert!(preview.contains("- Promedio general: 52.50 (Reprobado)"));
        assert!(preview.contains("- Total materias: 2"));
        assert!(preview.contains("Nota mínima de aprobación: 60 puntos"));
    }

    #[test]
    fn preview_reports_empty_cycle() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).expect("valid date");
        let preview = build_preview(&StudentInfo::default(), "2024", &aggregate(&[]), date);
        assert!(preview.contains("- Estudiante: Estudiante"));
        assert!(preview.contains("No hay calificaciones registradas para este estudiante en el ciclo 2024."));
        assert!(!preview.contains("## Resumen"));
    }
}
