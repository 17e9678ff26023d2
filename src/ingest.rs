//! Normalization of grade payloads as they arrive from the REST boundary.
//!
//! References may be bare identifiers or nested objects, field names may be
//! English or the API's Spanish ones, and the entry list may be wrapped in an
//! envelope. Everything is resolved here so the engine only ever sees
//! [`GradeEntry`] values with plain identifiers.

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::models::{EntityRef, GradeEntry};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawScalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawScalar {
    fn into_text(self) -> String {
        match self {
            RawScalar::Int(value) => value.to_string(),
            RawScalar::Float(value) => value.to_string(),
            RawScalar::Text(value) => value.trim().to_string(),
        }
    }

    /// Scores that are not finite numbers ("NaN", "inf") count as absent.
    fn as_f64(&self) -> Option<f64> {
        let value = match self {
            RawScalar::Int(value) => Some(*value as f64),
            RawScalar::Float(value) => Some(*value),
            RawScalar::Text(value) => value.trim().parse().ok(),
        };
        value.filter(|value: &f64| value.is_finite())
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            RawScalar::Int(value) => Some(*value),
            RawScalar::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            RawScalar::Float(_) => None,
            RawScalar::Text(value) => value.trim().parse().ok(),
        }
    }
}

/// A nested reference object. Each id spelling is its own field because the
/// API often sends several of them at once.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawObject {
    #[serde(rename = "_id")]
    mongo_id: Option<RawScalar>,
    uid: Option<RawScalar>,
    mid: Option<RawScalar>,
    cid: Option<RawScalar>,
    id: Option<RawScalar>,
    name: Option<String>,
    nombre: Option<String>,
    surname: Option<String>,
    apellido: Option<String>,
    grado: Option<String>,
    seccion: Option<String>,
}

impl RawObject {
    fn identifier(&self) -> Option<String> {
        [&self.mongo_id, &self.uid, &self.mid, &self.cid, &self.id]
            .into_iter()
            .flatten()
            .map(|value| value.clone().into_text())
            .find(|value| !value.is_empty())
    }

    fn label(&self) -> Option<String> {
        if let Some(grade_level) = self.grado.as_deref() {
            return Some(course_label(grade_level, self.seccion.as_deref().unwrap_or_default()));
        }

        let name = self.name.as_deref().or(self.nombre.as_deref()).unwrap_or_default();
        let surname = self
            .surname
            .as_deref()
            .or(self.apellido.as_deref())
            .unwrap_or_default();
        let full = format!("{} {}", name.trim(), surname.trim()).trim().to_string();
        if !full.is_empty() {
            return Some(full);
        }

        self.seccion
            .as_deref()
            .map(|section| format!("Sección \"{section}\""))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawReference {
    Bare(RawScalar),
    Nested(RawObject),
}

/// Resolves either reference shape into an [`EntityRef`]. References without
/// a usable identifier resolve to `None`.
pub fn normalize_reference(raw: RawReference) -> Option<EntityRef> {
    match raw {
        RawReference::Bare(value) => {
            let id = value.into_text();
            (!id.is_empty()).then(|| EntityRef::new(id))
        }
        RawReference::Nested(object) => {
            let id = object.identifier()?;
            Some(EntityRef {
                id,
                display_label: object.label(),
            })
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGradeEntry {
    #[serde(default, rename = "_id")]
    mongo_id: Option<RawScalar>,
    #[serde(default)]
    cid: Option<RawScalar>,
    #[serde(default)]
    id: Option<RawScalar>,
    #[serde(default, alias = "estudiante", alias = "studentId")]
    student: Option<RawReference>,
    #[serde(default, alias = "materia", alias = "subjectId")]
    subject: Option<RawReference>,
    #[serde(default, alias = "curso", alias = "courseId")]
    course: Option<RawReference>,
    #[serde(default, alias = "cicloEscolar", alias = "ciclo")]
    cycle: Option<RawScalar>,
    #[serde(default, alias = "bimestre")]
    bimester: Option<RawScalar>,
    #[serde(default, alias = "zona")]
    zone_score: Option<RawScalar>,
    #[serde(default, alias = "examen")]
    exam_score: Option<RawScalar>,
    #[serde(default)]
    total: Option<RawScalar>,
    #[serde(default, alias = "observaciones")]
    remarks: Option<String>,
}

pub fn normalize_entry(raw: RawGradeEntry) -> GradeEntry {
    let id = [raw.id, raw.cid, raw.mongo_id]
        .into_iter()
        .flatten()
        .map(RawScalar::into_text)
        .find(|value| !value.is_empty())
        .unwrap_or_default();

    // Unparseable bimesters become 0 so the engine drops them as unknown.
    let bimester = raw
        .bimester
        .as_ref()
        .and_then(RawScalar::as_i64)
        .and_then(|value| u8::try_from(value).ok())
        .unwrap_or(0);

    GradeEntry {
        id,
        student: raw.student.and_then(normalize_reference),
        subject: raw.subject.and_then(normalize_reference),
        course: raw.course.and_then(normalize_reference),
        cycle: raw.cycle.map(RawScalar::into_text).unwrap_or_default(),
        bimester,
        zone_score: raw.zone_score.as_ref().and_then(RawScalar::as_f64),
        exam_score: raw.exam_score.as_ref().and_then(RawScalar::as_f64),
        total: raw.total.as_ref().and_then(RawScalar::as_f64),
        remarks: raw.remarks.filter(|text| !text.trim().is_empty()),
    }
}

/// The shapes a grade fetch may come back in.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPayload {
    Bare(Vec<Value>),
    Nested {
        #[serde(alias = "calificaciones")]
        grades: Vec<Value>,
    },
    Envelope {
        #[serde(default)]
        error: bool,
        #[serde(default)]
        data: Option<Box<RawPayload>>,
    },
}

pub fn normalize_payload(payload: RawPayload) -> anyhow::Result<Vec<GradeEntry>> {
    match payload {
        RawPayload::Bare(values) | RawPayload::Nested { grades: values } => {
            Ok(normalize_values(values))
        }
        RawPayload::Envelope { error: true, .. } => {
            bail!("grade fetch reported an error")
        }
        RawPayload::Envelope { data: Some(data), .. } => normalize_payload(*data),
        RawPayload::Envelope { data: None, .. } => {
            warn!("grade payload carried no entries");
            Ok(Vec::new())
        }
    }
}

pub fn parse_payload(json: &str) -> anyhow::Result<Vec<GradeEntry>> {
    let payload: RawPayload =
        serde_json::from_str(json).context("grade payload is not in a recognised shape")?;
    normalize_payload(payload)
}

fn normalize_values(values: Vec<Value>) -> Vec<GradeEntry> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<RawGradeEntry>(value) {
            Ok(raw) => Some(normalize_entry(raw)),
            Err(err) => {
                warn!(index, error = %err, "skipping unreadable grade entry");
                None
            }
        })
        .collect()
}

/// Display name for a grade-level code. Unknown codes pass through.
pub fn format_grade_level(code: &str) -> String {
    let label = match code {
        "PARVULOS_1" => "Párvulos 1",
        "PARVULOS_2" => "Párvulos 2",
        "PARVULOS_3" => "Párvulos 3",
        "PREPARATORIA" => "Preparatoria",
        "PRIMERO_PRIMARIA" => "1° Primaria",
        "SEGUNDO_PRIMARIA" => "2° Primaria",
        "TERCERO_PRIMARIA" => "3° Primaria",
        "CUARTO_PRIMARIA" => "4° Primaria",
        "QUINTO_PRIMARIA" => "5° Primaria",
        "SEXTO_PRIMARIA" => "6° Primaria",
        "PRIMERO_BASICO" => "1° Básico",
        "SEGUNDO_BASICO" => "2° Básico",
        "TERCERO_BASICO" => "3° Básico",
        other => other,
    };
    label.to_string()
}

pub fn course_label(grade_level: &str, section: &str) -> String {
    format!("{} \"{}\"", format_grade_level(grade_level), section)
}
