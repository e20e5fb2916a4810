use anyhow::Context;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::access::{self, ProgressScope, Role};
use crate::error::AppError;
use crate::models::{Classroom, ClassroomRef, Profile, ProgressEntry, ProgressRecord};
use crate::validation;

/// Applies the `school_progress` schema. Both migrators may share one
/// database, so each ignores versions that belong to the other.
pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    let mut migrator = sqlx::migrate!("./migrations/progress");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await?;
    Ok(())
}

/// Applies the `progress_analytics` schema to the analytics database.
pub async fn init_analytics_db(pool: &PgPool) -> anyhow::Result<()> {
    let mut migrator = sqlx::migrate!("./migrations/analytics");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let school_id = Uuid::parse_str("6a1f3c1e-6f0b-4d59-9a8e-1d2b3c4d5e6f")?;
    sqlx::query(
        r#"
        INSERT INTO school_progress.schools (id, name)
        VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
        "#,
    )
    .bind(school_id)
    .bind("Northfield High")
    .execute(pool)
    .await?;

    let profiles = vec![
        (
            Uuid::parse_str("1b6f8a52-3c1d-4c2e-9f0a-7e5d4c3b2a10")?,
            "Renata Alvarez",
            "renata.alvarez@northfield.edu",
            Role::HeadTeacher,
            None,
        ),
        (
            Uuid::parse_str("2c7a9b63-4d2e-4d3f-8a1b-8f6e5d4c3b21")?,
            "Dana Ortiz",
            "dana.ortiz@northfield.edu",
            Role::Teacher,
            None,
        ),
        (
            Uuid::parse_str("3d8bac74-5e3f-4e4a-9b2c-9a7f6e5d4c32")?,
            "Samuel Okafor",
            "samuel.okafor@northfield.edu",
            Role::Teacher,
            None,
        ),
        (
            Uuid::parse_str("4e9cbd85-6f4a-4f5b-8c3d-ab8a7f6e5d43")?,
            "Avery Lee",
            "avery.lee@northfield.edu",
            Role::Student,
            Some("10th"),
        ),
        (
            Uuid::parse_str("5fadce96-7a5b-4a6c-9d4e-bc9b8a7f6e54")?,
            "Jules Moreno",
            "jules.moreno@northfield.edu",
            Role::Student,
            Some("10th"),
        ),
        (
            Uuid::parse_str("6abedfa7-8b6c-4b7d-8e5f-cdac9b8a7f65")?,
            "Kiara Patel",
            "kiara.patel@northfield.edu",
            Role::Student,
            Some("11th"),
        ),
    ];

    for (id, name, email, role, grade) in &profiles {
        sqlx::query(
            r#"
            INSERT INTO school_progress.profiles (id, full_name, email, role, grade, school_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, role = EXCLUDED.role, grade = EXCLUDED.grade
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(role.as_str())
        .bind(grade)
        .bind(school_id)
        .execute(pool)
        .await?;
    }

    let classrooms = vec![
        (
            Uuid::parse_str("a1b2c3d4-0001-4e5f-8a9b-0c1d2e3f4a5b")?,
            "Algebra II - Period 1",
            "Math",
            "dana.ortiz@northfield.edu",
        ),
        (
            Uuid::parse_str("a1b2c3d4-0002-4e5f-8a9b-0c1d2e3f4a5b")?,
            "Geometry - Period 3",
            "Math",
            "dana.ortiz@northfield.edu",
        ),
        (
            Uuid::parse_str("a1b2c3d4-0003-4e5f-8a9b-0c1d2e3f4a5b")?,
            "Biology - Period 2",
            "Science",
            "samuel.okafor@northfield.edu",
        ),
    ];

    for (id, name, subject, teacher_email) in &classrooms {
        sqlx::query(
            r#"
            INSERT INTO school_progress.classrooms (id, name, subject, school_id, teacher_id)
            SELECT $1, $2, $3, $4, p.id FROM school_progress.profiles p WHERE p.email = $5
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, subject = EXCLUDED.subject
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(subject)
        .bind(school_id)
        .bind(teacher_email)
        .execute(pool)
        .await?;
    }

    let progress = vec![
        ("seed-001", "avery.lee@northfield.edu", 0, 85.0),
        ("seed-002", "jules.moreno@northfield.edu", 0, 92.0),
        ("seed-003", "kiara.patel@northfield.edu", 1, 78.0),
        ("seed-004", "avery.lee@northfield.edu", 2, 66.5),
        ("seed-005", "kiara.patel@northfield.edu", 2, 88.0),
        ("seed-006", "jules.moreno@northfield.edu", 2, 95.0),
    ];

    for (source_key, email, classroom, score) in progress {
        let (classroom_id, _, subject, _) = classrooms[classroom];
        sqlx::query(
            r#"
            INSERT INTO school_progress.progress
            (id, student_id, classroom_id, school_id, subject, score, max_score, source_key)
            SELECT $1, p.id, $2, $3, $4, $5, 100, $6
            FROM school_progress.profiles p WHERE p.email = $7
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(classroom_id)
        .bind(school_id)
        .bind(subject)
        .bind(score)
        .bind(source_key)
        .bind(email)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Full working set for an aggregation run, one query.
pub async fn fetch_progress_records(
    conn: &mut PgConnection,
) -> Result<Vec<ProgressRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT p.id, p.student_id, p.classroom_id, p.school_id, p.subject,
               p.score, p.max_score, p.created_at,
               c.id AS c_id, c.name AS c_name, c.subject AS c_subject,
               c.school_id AS c_school_id, c.teacher_id AS c_teacher_id,
               s.name AS school_name, t.full_name AS teacher_name,
               st.grade AS student_grade
        FROM school_progress.progress p
        LEFT JOIN school_progress.classrooms c ON c.id = p.classroom_id
        LEFT JOIN school_progress.schools s ON s.id = c.school_id
        LEFT JOIN school_progress.profiles t ON t.id = c.teacher_id
        LEFT JOIN school_progress.profiles st ON st.id = p.student_id
        ORDER BY p.created_at, p.id
        "#,
    )
    .fetch_all(conn)
    .await?;

    rows.iter().map(progress_record_from_row).collect()
}

fn progress_record_from_row(row: &PgRow) -> Result<ProgressRecord, sqlx::Error> {
    let classroom = match row.try_get::<Option<Uuid>, _>("c_id")? {
        Some(id) => Some(ClassroomRef {
            id,
            name: row.try_get("c_name")?,
            subject: row.try_get("c_subject")?,
            school_id: row.try_get("c_school_id")?,
            school_name: row.try_get("school_name")?,
            teacher_id: row.try_get("c_teacher_id")?,
            teacher_name: row.try_get("teacher_name")?,
        }),
        None => None,
    };

    Ok(ProgressRecord {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        classroom_id: row.try_get("classroom_id")?,
        school_id: row.try_get("school_id")?,
        subject: row.try_get("subject")?,
        score: row.try_get("score")?,
        max_score: row.try_get("max_score")?,
        created_at: row.try_get("created_at")?,
        classroom,
        student_grade: row.try_get("student_grade")?,
    })
}

pub async fn fetch_profile<'e, E>(executor: E, email: &str) -> anyhow::Result<Profile>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT id, full_name, email, role, grade, school_id
        FROM school_progress.profiles WHERE email = $1
        "#,
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::ProfileNotFound(email.to_string()))?;

    let role: String = row.try_get("role")?;
    Ok(Profile {
        id: row.try_get("id")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        role: role.parse()?,
        grade: row.try_get("grade")?,
        school_id: row.try_get("school_id")?,
    })
}

pub async fn fetch_classroom<'e, E>(executor: E, id: Uuid) -> anyhow::Result<Classroom>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT id, name, subject, school_id, teacher_id
        FROM school_progress.classrooms WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(AppError::ClassroomNotFound(id))?;

    Ok(classroom_from_row(&row)?)
}

fn classroom_from_row(row: &PgRow) -> Result<Classroom, sqlx::Error> {
    Ok(Classroom {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        subject: row.try_get("subject")?,
        school_id: row.try_get("school_id")?,
        teacher_id: row.try_get("teacher_id")?,
    })
}

fn progress_entry_from_row(row: &PgRow) -> Result<ProgressEntry, sqlx::Error> {
    Ok(ProgressEntry {
        id: row.try_get("id")?,
        student_name: row.try_get("student_name")?,
        subject: row.try_get("subject")?,
        score: row.try_get("score")?,
        max_score: row.try_get("max_score")?,
        created_at: row.try_get("created_at")?,
    })
}

const PROGRESS_ENTRY_COLUMNS: &str = "p.id, st.full_name AS student_name, \
     p.subject, p.score, p.max_score, p.created_at";

/// Progress rows visible to `actor`, newest first.
pub async fn list_progress(pool: &PgPool, actor: &Profile) -> anyhow::Result<Vec<ProgressEntry>> {
    let filter = match access::progress_scope(actor) {
        ProgressScope::Student(id) => Some(("p.student_id = $1", id)),
        ProgressScope::Teacher(id) => Some(("c.teacher_id = $1", id)),
        ProgressScope::School(id) => Some(("p.school_id = $1", id)),
        ProgressScope::Nothing => None,
    };
    let Some((clause, id)) = filter else {
        return Ok(Vec::new());
    };

    let query = format!(
        "SELECT {PROGRESS_ENTRY_COLUMNS} \
         FROM school_progress.progress p \
         JOIN school_progress.profiles st ON st.id = p.student_id \
         LEFT JOIN school_progress.classrooms c ON c.id = p.classroom_id \
         WHERE {clause} \
         ORDER BY p.created_at DESC"
    );

    let rows = sqlx::query(&query).bind(id).fetch_all(pool).await?;
    let entries = rows
        .iter()
        .map(progress_entry_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

#[derive(Debug, Clone)]
pub struct NewProgress {
    pub student_email: String,
    pub classroom_id: Uuid,
    pub subject: Option<String>,
    pub score: f64,
    pub max_score: f64,
    pub source_key: Option<String>,
}

/// Inserts a progress row on behalf of `actor`. The school comes from the
/// classroom, and the subject defaults to the classroom's subject. Returns
/// `None` when `source_key` already exists.
pub async fn create_progress(
    conn: &mut PgConnection,
    actor: &Profile,
    new: &NewProgress,
) -> anyhow::Result<Option<Uuid>> {
    validation::score(new.score, new.max_score)?;
    let classroom = fetch_classroom(&mut *conn, new.classroom_id).await?;
    access::ensure_can_write_classroom(actor, &classroom)?;

    let student = fetch_profile(&mut *conn, &new.student_email).await?;
    access::ensure_enrolled(&student, &classroom)?;
    let subject =
        validation::progress_subject(new.subject.as_deref(), classroom.subject.as_deref())?;

    let id = Uuid::new_v4();
    let result = sqlx::query(
        r#"
        INSERT INTO school_progress.progress
        (id, student_id, classroom_id, school_id, subject, score, max_score, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(student.id)
    .bind(classroom.id)
    .bind(classroom.school_id)
    .bind(subject)
    .bind(new.score)
    .bind(new.max_score)
    .bind(new.source_key.as_deref())
    .execute(&mut *conn)
    .await?;

    Ok((result.rows_affected() > 0).then_some(id))
}

pub async fn update_progress(
    pool: &PgPool,
    actor: &Profile,
    id: Uuid,
    score: Option<f64>,
    subject: Option<&str>,
) -> anyhow::Result<ProgressEntry> {
    if score.is_none() && subject.is_none() {
        return Err(AppError::Validation("No fields to update".to_string()).into());
    }
    if let Some(subject) = subject {
        validation::subject(subject)?;
    }

    let current = sqlx::query(
        "SELECT classroom_id, school_id, max_score FROM school_progress.progress WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::ProgressNotFound(id))?;

    let classroom_id: Option<Uuid> = current.try_get("classroom_id")?;
    let school_id: Uuid = current.try_get("school_id")?;
    let max_score: f64 = current.try_get("max_score")?;
    let classroom = match classroom_id {
        Some(classroom_id) => Some(fetch_classroom(pool, classroom_id).await?),
        None => None,
    };
    access::ensure_can_write_progress(actor, classroom.as_ref(), school_id)?;
    if let Some(score) = score {
        validation::score(score, max_score)?;
    }

    let query = format!(
        "UPDATE school_progress.progress p \
         SET score = COALESCE($2, p.score), subject = COALESCE($3, p.subject), updated_at = now() \
         FROM school_progress.profiles st \
         WHERE p.id = $1 AND st.id = p.student_id \
         RETURNING {PROGRESS_ENTRY_COLUMNS}"
    );
    let row = sqlx::query(&query)
        .bind(id)
        .bind(score)
        .bind(subject.map(str::trim))
        .fetch_one(pool)
        .await
        .context("failed to update progress record")?;

    Ok(progress_entry_from_row(&row)?)
}

pub async fn list_classrooms(pool: &PgPool, actor: &Profile) -> anyhow::Result<Vec<Classroom>> {
    let filter = match access::classroom_scope(actor) {
        ProgressScope::Teacher(id) => Some(("teacher_id = $1", id)),
        ProgressScope::School(id) => Some(("school_id = $1", id)),
        ProgressScope::Student(_) | ProgressScope::Nothing => None,
    };
    let Some((clause, id)) = filter else {
        return Ok(Vec::new());
    };

    let query = format!(
        "SELECT id, name, subject, school_id, teacher_id \
         FROM school_progress.classrooms WHERE {clause} ORDER BY name"
    );
    let rows = sqlx::query(&query).bind(id).fetch_all(pool).await?;
    let classrooms = rows
        .iter()
        .map(classroom_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(classrooms)
}

/// Creates a classroom owned by `actor` in the actor's school.
pub async fn create_classroom(
    pool: &PgPool,
    actor: &Profile,
    name: &str,
    subject: Option<&str>,
) -> anyhow::Result<Classroom> {
    access::ensure_can_write(actor)?;
    validation::classroom_name(name)?;
    if let Some(subject) = subject {
        validation::subject(subject)?;
    }
    let school_id = actor.school_id.ok_or_else(|| {
        AppError::Validation(format!("{} is not attached to a school", actor.email))
    })?;

    let classroom = Classroom {
        id: Uuid::new_v4(),
        name: name.trim().to_string(),
        subject: subject.map(|s| s.trim().to_string()),
        school_id,
        teacher_id: actor.id,
    };

    sqlx::query(
        r#"
        INSERT INTO school_progress.classrooms (id, name, subject, school_id, teacher_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(classroom.id)
    .bind(&classroom.name)
    .bind(classroom.subject.as_deref())
    .bind(classroom.school_id)
    .bind(classroom.teacher_id)
    .execute(pool)
    .await?;

    Ok(classroom)
}

pub async fn import_csv(
    pool: &PgPool,
    actor: &Profile,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_email: String,
        classroom_id: Uuid,
        subject: Option<String>,
        score: f64,
        max_score: Option<f64>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;
    let mut tx = pool.begin().await?;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("row {line} of {}", csv_path.display()))?;
        let source_key = row
            .source_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| import_source_key(&row.student_email, row.classroom_id, line));
        let new = NewProgress {
            student_email: row.student_email,
            classroom_id: row.classroom_id,
            subject: row.subject,
            score: row.score,
            max_score: row.max_score.unwrap_or(100.0),
            source_key: Some(source_key),
        };

        let created = create_progress(&mut tx, actor, &new)
            .await
            .with_context(|| format!("row {line} of {}", csv_path.display()))?;
        if created.is_some() {
            inserted += 1;
        }
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Key for CSV rows without their own `source_key`, stable across re-runs of
/// the same file.
fn import_source_key(student_email: &str, classroom_id: Uuid, line: usize) -> String {
    format!(
        "import:{}:{}:{}",
        student_email.trim().to_lowercase(),
        classroom_id,
        line
    )
}

pub async fn create_school(pool: &PgPool, name: &str) -> anyhow::Result<Uuid> {
    validation::school_name(name)?;
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO school_progress.schools (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(name.trim())
        .execute(pool)
        .await?;
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub grade: Option<String>,
    pub school_id: Uuid,
}

/// Registers a profile. Students must carry a grade; staff must not.
pub async fn create_profile(pool: &PgPool, new: &NewProfile) -> anyhow::Result<Uuid> {
    validation::full_name(&new.full_name)?;
    validation::email(&new.email)?;
    validation::profile_grade(new.role, new.grade.as_deref())?;

    let id = Uuid::new_v4();
    let result = sqlx::query(
        r#"
        INSERT INTO school_progress.profiles (id, full_name, email, role, grade, school_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (email) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(new.full_name.trim())
    .bind(new.email.trim().to_lowercase())
    .bind(new.role.as_str())
    .bind(new.grade.as_deref())
    .bind(new.school_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Validation(format!("{} is already registered", new.email)).into());
    }
    Ok(id)
}
