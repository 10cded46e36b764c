//! Catalog records and queries: subjects and the projects filed under them.
//!
//! The order lifecycle only ever reads from here ([`get_project`] at order
//! creation and fulfillment time); all mutation happens through the admin
//! endpoints.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::{Result, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    /// Number of projects filed under this subject, computed on read.
    pub project_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub description: String,
    pub subject_id: String,
    pub subject_name: String,
    /// Whole currency units, always positive.
    pub price: i64,
    /// Asset file name inside the upload directory.
    pub file_name: String,
    pub original_file_name: String,
    pub created_at: String,
}

const SUBJECT_COLUMNS: &str = r#"
    s.id, s.name, s.description, s.icon, s.created_at,
    (SELECT COUNT(*) FROM projects p WHERE p.subject_id = s.id) AS project_count
"#;

// ─────────────────────────────────────────────────────────
// Subject reads
// ─────────────────────────────────────────────────────────

pub async fn list_subjects(pool: &SqlitePool) -> Result<Vec<Subject>> {
    let rows = sqlx::query_as::<_, Subject>(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects s ORDER BY s.name ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_subject(pool: &SqlitePool, subject_id: &str) -> Result<Subject> {
    sqlx::query_as::<_, Subject>(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects s WHERE s.id = ?1"
    ))
    .bind(subject_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("Subject"))
}

// ─────────────────────────────────────────────────────────
// Subject writes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NewSubject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_icon")]
    pub icon: String,
}

fn default_icon() -> String {
    "📚".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct SubjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

pub async fn create_subject(pool: &SqlitePool, new: &NewSubject) -> Result<Subject> {
    if new.name.trim().is_empty() {
        return Err(StoreError::Validation(
            "Subject name must not be empty".to_string(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO subjects (id, name, description, icon, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&id)
    .bind(new.name.trim())
    .bind(&new.description)
    .bind(&new.icon)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    get_subject(pool, &id).await
}

pub async fn update_subject(
    pool: &SqlitePool,
    subject_id: &str,
    patch: &SubjectPatch,
) -> Result<Subject> {
    if patch.name.is_none() && patch.description.is_none() && patch.icon.is_none() {
        return Err(StoreError::Validation("No data to update".to_string()));
    }
    if matches!(&patch.name, Some(n) if n.trim().is_empty()) {
        return Err(StoreError::Validation(
            "Subject name must not be empty".to_string(),
        ));
    }

    let rows = sqlx::query(
        r#"
        UPDATE subjects
        SET    name        = COALESCE(?1, name),
               description = COALESCE(?2, description),
               icon        = COALESCE(?3, icon)
        WHERE  id = ?4
        "#,
    )
    .bind(patch.name.as_deref().map(str::trim))
    .bind(patch.description.as_deref())
    .bind(patch.icon.as_deref())
    .bind(subject_id)
    .execute(pool)
    .await?
    .rows_affected();

    if rows == 0 {
        return Err(StoreError::NotFound("Subject"));
    }

    // Keep the denormalized display name on catalog projects in sync.
    // Order rows are snapshots and are deliberately left untouched.
    if let Some(name) = patch.name.as_deref() {
        sqlx::query("UPDATE projects SET subject_name = ?1 WHERE subject_id = ?2")
            .bind(name.trim())
            .bind(subject_id)
            .execute(pool)
            .await?;
    }

    get_subject(pool, subject_id).await
}

/// Deleting a subject is refused while projects still reference it.
pub async fn delete_subject(pool: &SqlitePool, subject_id: &str) -> Result<()> {
    let project_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE subject_id = ?1")
            .bind(subject_id)
            .fetch_one(pool)
            .await?;
    if project_count > 0 {
        return Err(StoreError::Conflict(format!(
            "Cannot delete subject with {project_count} projects"
        )));
    }

    let rows = sqlx::query("DELETE FROM subjects WHERE id = ?1")
        .bind(subject_id)
        .execute(pool)
        .await?
        .rows_affected();
    if rows == 0 {
        return Err(StoreError::NotFound("Subject"));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Project reads
// ─────────────────────────────────────────────────────────

pub async fn list_projects(pool: &SqlitePool, subject_id: Option<&str>) -> Result<Vec<Project>> {
    let rows = match subject_id {
        Some(sid) => {
            sqlx::query_as::<_, Project>(
                "SELECT * FROM projects WHERE subject_id = ?1 ORDER BY created_at DESC",
            )
            .bind(sid)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY created_at DESC")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows)
}

/// Look up a single project. This is the only catalog call the order
/// lifecycle depends on; an unknown id rejects the order creation.
pub async fn get_project(pool: &SqlitePool, project_id: &str) -> Result<Project> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?1")
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound("Project"))
}

// ─────────────────────────────────────────────────────────
// Project writes
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct NewProject {
    pub id: String,
    pub title: String,
    pub description: String,
    pub subject_id: String,
    pub subject_name: String,
    pub price: i64,
    pub file_name: String,
    pub original_file_name: String,
}

pub async fn create_project(pool: &SqlitePool, new: &NewProject) -> Result<Project> {
    if new.price <= 0 {
        return Err(StoreError::Validation(
            "Project price must be positive".to_string(),
        ));
    }

    sqlx::query(
        r#"
        INSERT INTO projects
            (id, title, description, subject_id, subject_name, price,
             file_name, original_file_name, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&new.id)
    .bind(&new.title)
    .bind(&new.description)
    .bind(&new.subject_id)
    .bind(&new.subject_name)
    .bind(new.price)
    .bind(&new.file_name)
    .bind(&new.original_file_name)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    get_project(pool, &new.id).await
}

#[derive(Debug, Default)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Paired with the freshly resolved subject name.
    pub subject: Option<(String, String)>,
    pub price: Option<i64>,
    /// Replacement asset, already saved to the upload directory.
    pub file: Option<(String, String)>,
}

pub async fn update_project(
    pool: &SqlitePool,
    project_id: &str,
    patch: &ProjectPatch,
) -> Result<Project> {
    if matches!(patch.price, Some(p) if p <= 0) {
        return Err(StoreError::Validation(
            "Project price must be positive".to_string(),
        ));
    }

    let (subject_id, subject_name) = match &patch.subject {
        Some((id, name)) => (Some(id.as_str()), Some(name.as_str())),
        None => (None, None),
    };
    let (file_name, original_file_name) = match &patch.file {
        Some((file, original)) => (Some(file.as_str()), Some(original.as_str())),
        None => (None, None),
    };

    let rows = sqlx::query(
        r#"
        UPDATE projects
        SET    title              = COALESCE(?1, title),
               description        = COALESCE(?2, description),
               subject_id         = COALESCE(?3, subject_id),
               subject_name       = COALESCE(?4, subject_name),
               price              = COALESCE(?5, price),
               file_name          = COALESCE(?6, file_name),
               original_file_name = COALESCE(?7, original_file_name)
        WHERE  id = ?8
        "#,
    )
    .bind(patch.title.as_deref())
    .bind(patch.description.as_deref())
    .bind(subject_id)
    .bind(subject_name)
    .bind(patch.price)
    .bind(file_name)
    .bind(original_file_name)
    .bind(project_id)
    .execute(pool)
    .await?
    .rows_affected();

    if rows == 0 {
        return Err(StoreError::NotFound("Project"));
    }
    get_project(pool, project_id).await
}

/// Remove the project record, returning it so the caller can also delete the
/// asset file.
pub async fn delete_project(pool: &SqlitePool, project_id: &str) -> Result<Project> {
    let project = get_project(pool, project_id).await?;
    sqlx::query("DELETE FROM projects WHERE id = ?1")
        .bind(project_id)
        .execute(pool)
        .await?;
    Ok(project)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::testutil::test_pool;

    pub async fn seed_subject(pool: &SqlitePool, name: &str) -> Subject {
        create_subject(
            pool,
            &NewSubject {
                name: name.to_string(),
                description: String::new(),
                icon: default_icon(),
            },
        )
        .await
        .unwrap()
    }

    pub async fn seed_project(pool: &SqlitePool, subject: &Subject, title: &str, price: i64) -> Project {
        let id = Uuid::new_v4().to_string();
        create_project(
            pool,
            &NewProject {
                id: id.clone(),
                title: title.to_string(),
                description: "desc".to_string(),
                subject_id: subject.id.clone(),
                subject_name: subject.name.clone(),
                price,
                file_name: format!("{id}.pdf"),
                original_file_name: "upload.pdf".to_string(),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn project_count_is_computed() {
        let pool = test_pool().await;
        let subject = seed_subject(&pool, "Economics").await;
        assert_eq!(get_subject(&pool, &subject.id).await.unwrap().project_count, 0);

        seed_project(&pool, &subject, "Demand Curves", 500).await;
        seed_project(&pool, &subject, "Inflation Study", 300).await;
        assert_eq!(get_subject(&pool, &subject.id).await.unwrap().project_count, 2);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let pool = test_pool().await;
        assert!(matches!(
            get_project(&pool, "missing").await,
            Err(StoreError::NotFound("Project"))
        ));
    }

    #[tokio::test]
    async fn delete_subject_refused_while_projects_exist() {
        let pool = test_pool().await;
        let subject = seed_subject(&pool, "Accountancy").await;
        seed_project(&pool, &subject, "Ledgers", 450).await;

        assert!(matches!(
            delete_subject(&pool, &subject.id).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn subject_rename_propagates_to_projects() {
        let pool = test_pool().await;
        let subject = seed_subject(&pool, "BST").await;
        let project = seed_project(&pool, &subject, "Marketing Mix", 350).await;

        update_subject(
            &pool,
            &subject.id,
            &SubjectPatch {
                name: Some("Business Studies".to_string()),
                ..SubjectPatch::default()
            },
        )
        .await
        .unwrap();

        let refreshed = get_project(&pool, &project.id).await.unwrap();
        assert_eq!(refreshed.subject_name, "Business Studies");
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let pool = test_pool().await;
        let subject = seed_subject(&pool, "PE").await;
        assert!(matches!(
            update_subject(&pool, &subject.id, &SubjectPatch::default()).await,
            Err(StoreError::Validation(_))
        ));
    }
}
