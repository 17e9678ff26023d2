use anyhow::Context;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::access::{Role, ViewerContext, VisibilityScope};
use crate::grades;
use crate::ingest::course_label;
use crate::models::{EntityRef, GradeEntry, StudentInfo};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const ADMIN_ID: &str = "8f1c2a8e-4d53-4a55-9a3e-1b7f0c9d2e01";
const TEACHER_ID: &str = "2b7e4c1a-9f0d-4e63-8a21-5c3d7e9f1a02";
const PARENT_ID: &str = "6d3a9e2f-1c84-4b7a-b5e0-8f2c4a6d3b03";
const STUDENT_ONE_ID: &str = "a4e8c6b2-7d19-4f3e-9c05-2e6b8d1f4c04";
const STUDENT_TWO_ID: &str = "c9b1d7e3-5a26-4e8f-a4c3-7d0e2b5f6a05";
const COURSE_ID: &str = "f2a6e0c4-8b37-4d91-b6e2-9a4c1e7d0b06";

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let users = vec![
        (ADMIN_ID, "Carmen", "Ortiz", None, Role::Admin),
        (TEACHER_ID, "Jorge", "Méndez", None, Role::Teacher),
        (PARENT_ID, "Rosa", "López", None, Role::Parent),
        (STUDENT_ONE_ID, "María", "López", Some("E-2025-001"), Role::Student),
        (STUDENT_TWO_ID, "Diego", "Ramírez", Some("E-2025-002"), Role::Student),
    ];

    for (id, name, surname, code, role) in users {
        sqlx::query(
            r#"
            INSERT INTO boletas.users (id, name, surname, code, role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, surname = EXCLUDED.surname, role = EXCLUDED.role
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(name)
        .bind(surname)
        .bind(code)
        .bind(role.as_code())
        .execute(pool)
        .await?;
    }

    // An import may already have created this course under another id.
    let course_id = upsert_course(pool, Uuid::parse_str(COURSE_ID)?, "PRIMERO_BASICO", "A").await?;

    let teacher_id = Uuid::parse_str(TEACHER_ID)?;
    let mut subject_ids = Vec::new();
    for name in ["Matemática", "Comunicación y Lenguaje", "Ciencias Naturales"] {
        let subject_id = upsert_subject(pool, name, course_id, Some(teacher_id)).await?;
        subject_ids.push(subject_id);
    }

    for student in [STUDENT_ONE_ID, STUDENT_TWO_ID] {
        enroll(pool, Uuid::parse_str(student)?, course_id, "2025").await?;
    }

    sqlx::query(
        r#"
        INSERT INTO boletas.guardianships (parent_id, student_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(Uuid::parse_str(PARENT_ID)?)
    .bind(Uuid::parse_str(STUDENT_ONE_ID)?)
    .execute(pool)
    .await?;

    // (student, subject index, bimester, zone, exam)
    let scores = vec![
        (STUDENT_ONE_ID, 0, 1, 55.0, 35.0),
        (STUDENT_ONE_ID, 0, 2, 45.0, 25.0),
        (STUDENT_ONE_ID, 0, 3, 30.0, 20.0),
        (STUDENT_ONE_ID, 0, 4, 40.0, 20.0),
        (STUDENT_ONE_ID, 1, 1, 50.0, 25.0),
        (STUDENT_ONE_ID, 2, 1, 25.0, 15.0),
        (STUDENT_TWO_ID, 0, 1, 58.0, 38.0),
    ];

    for (student, subject_index, bimester, zone_score, exam_score) in scores {
        upsert_grade(
            pool,
            &NewGradeEntry {
                student_id: Uuid::parse_str(student)?,
                subject_id: subject_ids[subject_index],
                course_id: Some(course_id),
                cycle: "2025".to_string(),
                bimester,
                zone_score,
                exam_score,
                remarks: None,
            },
        )
        .await?;
    }

    Ok(())
}

const UPSERT_COURSE: &str = r#"
    INSERT INTO boletas.courses (id, grade_level, section)
    VALUES ($1, $2, $3)
    ON CONFLICT (grade_level, section) DO UPDATE
    SET shift = boletas.courses.shift
    RETURNING id
"#;

/// Returns the id of the (grade level, section) course, creating it with
/// `id` when it does not exist yet.
async fn upsert_course(
    pool: &PgPool,
    id: Uuid,
    grade_level: &str,
    section: &str,
) -> anyhow::Result<Uuid> {
    let row = sqlx::query(UPSERT_COURSE)
        .bind(id)
        .bind(grade_level)
        .bind(section)
        .fetch_one(pool)
        .await?;
    Ok(row.get("id"))
}

async fn upsert_subject(
    pool: &PgPool,
    name: &str,
    course_id: Uuid,
    teacher_id: Option<Uuid>,
) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO boletas.subjects (id, name, course_id, teacher_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name, course_id) DO UPDATE
        SET teacher_id = COALESCE(EXCLUDED.teacher_id, boletas.subjects.teacher_id)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(course_id)
    .bind(teacher_id)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn enroll(pool: &PgPool, student_id: Uuid, course_id: Uuid, cycle: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO boletas.enrollments (student_id, course_id, cycle)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .bind(cycle)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewGradeEntry {
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub course_id: Option<Uuid>,
    pub cycle: String,
    pub bimester: i64,
    pub zone_score: f64,
    pub exam_score: f64,
    pub remarks: Option<String>,
}

/// Inserts or overwrites the entry for its (student, subject, bimester, cycle)
/// key. Returns true when a row was written.
async fn upsert_grade(pool: &PgPool, entry: &NewGradeEntry) -> anyhow::Result<bool> {
    grades::validate_scores(entry.zone_score, entry.exam_score, entry.bimester, &entry.cycle)?;

    let result = sqlx::query(
        r#"
        INSERT INTO boletas.grade_entries
        (id, student_id, subject_id, course_id, cycle, bimester, zone_score, exam_score, total, remarks)
        VALUES ($1, $2, $3,
                COALESCE($4, (SELECT course_id FROM boletas.subjects WHERE id = $3)),
                $5, $6, $7, $8, $7 + $8, $9)
        ON CONFLICT (student_id, subject_id, bimester, cycle) DO UPDATE
        SET zone_score = EXCLUDED.zone_score,
            exam_score = EXCLUDED.exam_score,
            total = EXCLUDED.total,
            remarks = EXCLUDED.remarks
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.student_id)
    .bind(entry.subject_id)
    .bind(entry.course_id)
    .bind(&entry.cycle)
    .bind(entry.bimester as i16)
    .bind(entry.zone_score)
    .bind(entry.exam_score)
    .bind(&entry.remarks)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Creates a grade entry. The natural key must not exist yet.
pub async fn create_grade_entry(pool: &PgPool, entry: &NewGradeEntry) -> anyhow::Result<Uuid> {
    grades::validate_scores(entry.zone_score, entry.exam_score, entry.bimester, &entry.cycle)?;

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO boletas.grade_entries
        (id, student_id, subject_id, course_id, cycle, bimester, zone_score, exam_score, total, remarks)
        VALUES ($1, $2, $3,
                COALESCE($4, (SELECT course_id FROM boletas.subjects WHERE id = $3)),
                $5, $6, $7, $8, $7 + $8, $9)
        "#,
    )
    .bind(id)
    .bind(entry.student_id)
    .bind(entry.subject_id)
    .bind(entry.course_id)
    .bind(&entry.cycle)
    .bind(entry.bimester as i16)
    .bind(entry.zone_score)
    .bind(entry.exam_score)
    .bind(&entry.remarks)
    .execute(pool)
    .await
    .context("grade entry could not be created (is this bimester already graded?)")?;

    info!(%id, student_id = %entry.student_id, bimester = entry.bimester, "grade entry created");
    Ok(id)
}

/// Corrects the scores of an existing entry.
pub async fn update_grade_entry(
    pool: &PgPool,
    existing: &GradeEntry,
    zone_score: f64,
    exam_score: f64,
    remarks: Option<String>,
) -> anyhow::Result<bool> {
    grades::validate_scores(zone_score, exam_score, existing.bimester.into(), &existing.cycle)?;
    let id = Uuid::parse_str(&existing.id)?;

    let result = sqlx::query(
        r#"
        UPDATE boletas.grade_entries
        SET zone_score = $2, exam_score = $3, total = $2 + $3, remarks = COALESCE($4, remarks)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(zone_score)
    .bind(exam_score)
    .bind(remarks)
    .execute(pool)
    .await?;

    info!(%id, "grade entry corrected");
    Ok(result.rows_affected() > 0)
}

pub async fn delete_grade_entry(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM boletas.grade_entries WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

const ENTRY_COLUMNS: &str = "g.id, g.student_id, u.name, u.surname, g.subject_id, \
     s.name AS subject_name, g.course_id, c.grade_level, c.section, g.cycle, g.bimester, \
     g.zone_score, g.exam_score, g.total, g.remarks \
     FROM boletas.grade_entries g \
     JOIN boletas.users u ON u.id = g.student_id \
     JOIN boletas.subjects s ON s.id = g.subject_id \
     LEFT JOIN boletas.courses c ON c.id = g.course_id";

fn entry_from_row(row: &PgRow) -> GradeEntry {
    let id: Uuid = row.get("id");
    let student_id: Uuid = row.get("student_id");
    let name: String = row.get("name");
    let surname: String = row.get("surname");
    let subject_id: Uuid = row.get("subject_id");
    let subject_name: String = row.get("subject_name");
    let course_id: Option<Uuid> = row.get("course_id");
    let grade_level: Option<String> = row.get("grade_level");
    let section: Option<String> = row.get("section");
    let bimester: i16 = row.get("bimester");

    let course = course_id.map(|course_id| match grade_level.as_deref() {
        Some(grade_level) => EntityRef::labelled(
            course_id.to_string(),
            course_label(grade_level, section.as_deref().unwrap_or_default()),
        ),
        None => EntityRef::new(course_id.to_string()),
    });

    GradeEntry {
        id: id.to_string(),
        student: Some(EntityRef::labelled(
            student_id.to_string(),
            format!("{name} {surname}").trim(),
        )),
        subject: Some(EntityRef::labelled(subject_id.to_string(), subject_name)),
        course,
        cycle: row.get("cycle"),
        bimester: u8::try_from(bimester).unwrap_or(0),
        zone_score: row.get("zone_score"),
        exam_score: row.get("exam_score"),
        total: row.get("total"),
        remarks: row.get("remarks"),
    }
}

/// All entries for one student in one cycle, in the order they were recorded.
pub async fn fetch_grade_entries(
    pool: &PgPool,
    student_id: Uuid,
    cycle: &str,
) -> anyhow::Result<Vec<GradeEntry>> {
    let query = format!(
        "SELECT {ENTRY_COLUMNS} WHERE g.student_id = $1 AND g.cycle = $2 \
         ORDER BY g.recorded_at, g.bimester, g.id"
    );
    let rows = sqlx::query(&query)
        .bind(student_id)
        .bind(cycle)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(entry_from_row).collect())
}

pub async fn fetch_grade_entry(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<GradeEntry>> {
    let query = format!("SELECT {ENTRY_COLUMNS} WHERE g.id = $1");
    let row = sqlx::query(&query).bind(id).fetch_optional(pool).await?;
    Ok(row.as_ref().map(entry_from_row))
}

pub async fn fetch_student(
    pool: &PgPool,
    student_id: Uuid,
    cycle: &str,
) -> anyhow::Result<Option<StudentInfo>> {
    let row = sqlx::query(
        r#"
        SELECT u.id, u.name, u.surname, u.code, c.grade_level, c.section
        FROM boletas.users u
        LEFT JOIN boletas.enrollments e ON e.student_id = u.id AND e.cycle = $2
        LEFT JOIN boletas.courses c ON c.id = e.course_id
        WHERE u.id = $1
        LIMIT 1
        "#,
    )
    .bind(student_id)
    .bind(cycle)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let id: Uuid = row.get("id");
        let grade_level: Option<String> = row.get("grade_level");
        let section: Option<String> = row.get("section");
        StudentInfo {
            id: id.to_string(),
            name: row.get("name"),
            surname: row.get("surname"),
            code: row.get("code"),
            course_label: grade_level
                .map(|grade_level| course_label(&grade_level, section.as_deref().unwrap_or_default())),
        }
    }))
}

const TEACHER_STUDENTS: &str = r#"
    SELECT DISTINCT e.student_id
    FROM boletas.enrollments e
    JOIN boletas.subjects s ON s.course_id = e.course_id
    WHERE s.teacher_id = $1 AND e.cycle = $2
"#;

/// Loads the viewer's relationships. Teacher access to students is limited to
/// enrollments in `cycle`.
pub async fn fetch_visibility_scope(
    pool: &PgPool,
    viewer: &ViewerContext,
    cycle: &str,
) -> anyhow::Result<VisibilityScope> {
    let viewer_id = Uuid::parse_str(&viewer.user_id)
        .with_context(|| format!("viewer id is not a valid identifier: {}", viewer.user_id))?;

    let mut scope = VisibilityScope::default();
    match viewer.role {
        Role::Teacher => {
            let subjects = sqlx::query("SELECT id FROM boletas.subjects WHERE teacher_id = $1")
                .bind(viewer_id)
                .fetch_all(pool)
                .await?;
            scope.taught_subjects = subjects
                .iter()
                .map(|row| row.get::<Uuid, _>("id").to_string())
                .collect();

            let students = sqlx::query(TEACHER_STUDENTS)
                .bind(viewer_id)
                .bind(cycle)
                .fetch_all(pool)
                .await?;
            scope.students = students
                .iter()
                .map(|row| row.get::<Uuid, _>("student_id").to_string())
                .collect();
        }
        Role::Parent => {
            let children =
                sqlx::query("SELECT student_id FROM boletas.guardianships WHERE parent_id = $1")
                    .bind(viewer_id)
                    .fetch_all(pool)
                    .await?;
            scope.students = children
                .iter()
                .map(|row| row.get::<Uuid, _>("student_id").to_string())
                .collect();
        }
        Role::Admin | Role::Coordinator | Role::Student => {}
    }

    Ok(scope)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_code: String,
        name: String,
        surname: String,
        grade_level: String,
        section: String,
        subject: String,
        cycle: String,
        bimester: i64,
        zone_score: f64,
        exam_score: f64,
        remarks: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut written = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("unreadable row at line {line}"))?;
        grades::validate_scores(row.zone_score, row.exam_score, row.bimester, &row.cycle)
            .with_context(|| format!("invalid scores at line {line}"))?;

        let student_id: Uuid = sqlx::query(
            r#"
            INSERT INTO boletas.users (id, name, surname, code, role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO UPDATE
            SET name = EXCLUDED.name, surname = EXCLUDED.surname
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.name)
        .bind(&row.surname)
        .bind(&row.student_code)
        .bind(Role::Student.as_code())
        .fetch_one(pool)
        .await?
        .get("id");

        let course_id = upsert_course(pool, Uuid::new_v4(), &row.grade_level, &row.section).await?;

        let subject_id = upsert_subject(pool, &row.subject, course_id, None).await?;
        enroll(pool, student_id, course_id, &row.cycle).await?;

        let entry = NewGradeEntry {
            student_id,
            subject_id,
            course_id: Some(course_id),
            cycle: row.cycle,
            bimester: row.bimester,
            zone_score: row.zone_score,
            exam_score: row.exam_score,
            remarks: row.remarks.filter(|text| !text.trim().is_empty()),
        };
        if upsert_grade(pool, &entry).await? {
            written += 1;
        }
    }

    Ok(written)
}
