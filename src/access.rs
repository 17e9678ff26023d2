use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::models::GradeEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Coordinator,
    Teacher,
    Parent,
    Student,
}

impl Role {
    pub fn as_code(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN_ROLE",
            Role::Coordinator => "COORDINADOR_ROLE",
            Role::Teacher => "PROFESOR_ROLE",
            Role::Parent => "PADRE_ROLE",
            Role::Student => "ALUMNO_ROLE",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADMIN_ROLE" | "ADMIN" => Ok(Role::Admin),
            "COORDINADOR_ROLE" | "COORDINATOR" => Ok(Role::Coordinator),
            "PROFESOR_ROLE" | "TEACHER" => Ok(Role::Teacher),
            "PADRE_ROLE" | "PARENT" => Ok(Role::Parent),
            "ALUMNO_ROLE" | "STUDENT" => Ok(Role::Student),
            other => anyhow::bail!("unknown role: {other}"),
        }
    }
}

/// Who is asking. Passed explicitly into every role-sensitive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerContext {
    pub role: Role,
    pub user_id: String,
}

impl ViewerContext {
    pub fn new(role: Role, user_id: impl Into<String>) -> Self {
        Self {
            role,
            user_id: user_id.into(),
        }
    }
}

/// Relationship data loaded once per viewer. Teachers get the subjects they
/// teach plus the students enrolled in those subjects' courses; parents get
/// their children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityScope {
    pub taught_subjects: HashSet<String>,
    pub students: HashSet<String>,
}

pub fn can_manage_grades(viewer: &ViewerContext) -> bool {
    matches!(viewer.role, Role::Admin | Role::Teacher)
}

pub fn can_delete_grades(viewer: &ViewerContext) -> bool {
    viewer.role == Role::Admin
}

/// Whether the viewer may record or correct grades in `subject_id`.
pub fn can_grade_subject(viewer: &ViewerContext, scope: &VisibilityScope, subject_id: &str) -> bool {
    match viewer.role {
        Role::Admin => true,
        Role::Teacher => scope.taught_subjects.contains(subject_id),
        _ => false,
    }
}

pub fn can_edit_entry(viewer: &ViewerContext, scope: &VisibilityScope, entry: &GradeEntry) -> bool {
    entry
        .subject
        .as_ref()
        .is_some_and(|subject| can_grade_subject(viewer, scope, &subject.id))
}

pub fn can_view_report(viewer: &ViewerContext, scope: &VisibilityScope, student_id: &str) -> bool {
    match viewer.role {
        Role::Admin | Role::Coordinator => true,
        Role::Teacher | Role::Parent => scope.students.contains(student_id),
        Role::Student => viewer.user_id == student_id,
    }
}

/// The subset of `entries` the viewer may see.
pub fn visible_entries(
    viewer: &ViewerContext,
    scope: &VisibilityScope,
    entries: &[GradeEntry],
) -> Vec<GradeEntry> {
    entries
        .iter()
        .filter(|entry| match viewer.role {
            Role::Admin | Role::Coordinator => true,
            Role::Teacher => teaches(scope, entry),
            Role::Parent => student_of(entry).is_some_and(|id| scope.students.contains(id)),
            Role::Student => student_of(entry) == Some(viewer.user_id.as_str()),
        })
        .cloned()
        .collect()
}

fn teaches(scope: &VisibilityScope, entry: &GradeEntry) -> bool {
    entry
        .subject
        .as_ref()
        .is_some_and(|subject| scope.taught_subjects.contains(&subject.id))
}

fn student_of(entry: &GradeEntry) -> Option<&str> {
    entry.student.as_ref().map(|student| student.id.as_str())
}
