//! Admin REST API handlers. Every handler takes the bearer capability from
//! the request headers and validates it before touching anything.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth;
use crate::catalog::{self, NewProject, NewSubject, ProjectPatch, SubjectPatch};
use crate::errors::{Result, StoreError};
use crate::{assets, orders};

// ─────────────────────────────────────────────────────────
// Login and session probe
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
}

/// `POST /api/admin/login`
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let session = auth::login(&state.pool, &req.username, &req.password).await?;
    Ok(Json(LoginResponse {
        token: session.token,
        username: session.username,
    }))
}

/// `GET /api/admin/verify`
pub async fn verify_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let session = auth::require_admin(&state.pool, &headers).await?;
    Ok(Json(json!({ "valid": true, "username": session.username })))
}

/// `GET /api/admin/dashboard`
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth::require_admin(&state.pool, &headers).await?;
    Ok(Json(orders::dashboard_stats(&state.pool).await?))
}

/// `GET /api/orders`
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth::require_admin(&state.pool, &headers).await?;
    Ok(Json(orders::list_orders(&state.pool).await?))
}

// ─────────────────────────────────────────────────────────
// Subject CRUD
// ─────────────────────────────────────────────────────────

/// `POST /api/subjects`
pub async fn create_subject(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewSubject>,
) -> Result<impl IntoResponse> {
    auth::require_admin(&state.pool, &headers).await?;
    Ok(Json(catalog::create_subject(&state.pool, &req).await?))
}

/// `PUT /api/subjects/:id`
pub async fn update_subject(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<SubjectPatch>,
) -> Result<impl IntoResponse> {
    auth::require_admin(&state.pool, &headers).await?;
    Ok(Json(
        catalog::update_subject(&state.pool, &subject_id, &patch).await?,
    ))
}

/// `DELETE /api/subjects/:id`
pub async fn delete_subject(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth::require_admin(&state.pool, &headers).await?;
    catalog::delete_subject(&state.pool, &subject_id).await?;
    Ok(Json(json!({ "message": "Subject deleted" })))
}

// ─────────────────────────────────────────────────────────
// Project CRUD (multipart: form fields plus the PDF file)
// ─────────────────────────────────────────────────────────

#[derive(Default)]
struct ProjectForm {
    title: Option<String>,
    description: Option<String>,
    subject_id: Option<String>,
    price: Option<i64>,
    file: Option<(String, Vec<u8>)>,
}

async fn read_project_form(mut multipart: Multipart) -> Result<ProjectForm> {
    let mut form = ProjectForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| StoreError::Validation(format!("Malformed upload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => form.title = Some(read_text(field).await?),
            "description" => form.description = Some(read_text(field).await?),
            "subject_id" => form.subject_id = Some(read_text(field).await?),
            "price" => {
                let raw = read_text(field).await?;
                let price = raw.parse::<i64>().map_err(|_| {
                    StoreError::Validation(format!("Invalid price: {raw}"))
                })?;
                form.price = Some(price);
            }
            "file" => {
                let original_name = field
                    .file_name()
                    .unwrap_or("upload.pdf")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| StoreError::Validation(format!("Malformed upload: {e}")))?;
                form.file = Some((original_name, bytes.to_vec()));
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| StoreError::Validation(format!("Malformed upload: {e}")))
}

fn file_extension(original_name: &str) -> &str {
    std::path::Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("pdf")
}

/// `POST /api/projects`
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse> {
    auth::require_admin(&state.pool, &headers).await?;
    let form = read_project_form(multipart).await?;

    let title = required(form.title, "title")?;
    let subject_id = required(form.subject_id, "subject_id")?;
    let price = form
        .price
        .ok_or_else(|| StoreError::Validation("Missing field: price".to_string()))?;
    let (original_name, bytes) = form
        .file
        .ok_or_else(|| StoreError::Validation("Missing field: file".to_string()))?;

    let subject = catalog::get_subject(&state.pool, &subject_id).await?;

    let project_id = Uuid::new_v4().to_string();
    let file_name = format!("{project_id}.{}", file_extension(&original_name));
    assets::save(&state.config.upload_dir, &file_name, &bytes).await?;

    let project = catalog::create_project(
        &state.pool,
        &NewProject {
            id: project_id,
            title,
            description: form.description.unwrap_or_default(),
            subject_id,
            subject_name: subject.name,
            price,
            file_name,
            original_file_name: original_name,
        },
    )
    .await?;
    Ok(Json(project))
}

/// `PUT /api/projects/:id`
pub async fn update_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse> {
    auth::require_admin(&state.pool, &headers).await?;
    let existing = catalog::get_project(&state.pool, &project_id).await?;
    let form = read_project_form(multipart).await?;

    let subject = match &form.subject_id {
        Some(subject_id) => {
            let subject = catalog::get_subject(&state.pool, subject_id).await?;
            Some((subject.id, subject.name))
        }
        None => None,
    };

    let file = match form.file {
        Some((original_name, bytes)) => {
            // Replace the stored asset before touching the record; the old
            // file is gone either way once the new one is in place.
            assets::remove(&state.config.upload_dir, &existing.file_name).await?;
            let file_name = format!("{project_id}.{}", file_extension(&original_name));
            assets::save(&state.config.upload_dir, &file_name, &bytes).await?;
            Some((file_name, original_name))
        }
        None => None,
    };

    let project = catalog::update_project(
        &state.pool,
        &project_id,
        &ProjectPatch {
            title: form.title,
            description: form.description,
            subject,
            price: form.price,
            file,
        },
    )
    .await?;
    Ok(Json(project))
}

/// `DELETE /api/projects/:id`
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    auth::require_admin(&state.pool, &headers).await?;
    let project = catalog::delete_project(&state.pool, &project_id).await?;

    if let Err(e) = assets::remove(&state.config.upload_dir, &project.file_name).await {
        warn!("Could not remove asset {}: {e}", project.file_name);
    }
    Ok(Json(json!({ "message": "Project deleted" })))
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(StoreError::Validation(format!("Missing field: {field}"))),
    }
}
