//! Public REST API handlers and the application router.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::errors::{Result, StoreError};
use crate::gateway::SessionRef;
use crate::orders::{Customer, Order, PaymentStatus};
use crate::payments::OrderLocks;
use crate::{admin, assets, catalog, orders, payments};

/// Uploaded project PDFs can be a couple of dozen megabytes.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub client: reqwest::Client,
    pub locks: OrderLocks,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/subjects", get(list_subjects).post(admin::create_subject))
        .route(
            "/api/subjects/:id",
            get(get_subject)
                .put(admin::update_subject)
                .delete(admin::delete_subject),
        )
        .route("/api/projects", get(list_projects).post(admin::create_project))
        .route(
            "/api/projects/:id",
            get(get_project)
                .put(admin::update_project)
                .delete(admin::delete_project),
        )
        .route("/api/payments/create-order", post(create_order))
        .route("/api/payments/verify/:order_id", post(verify_order))
        .route("/api/payments/demo-complete/:order_id", post(demo_complete))
        .route("/api/payments/webhook", post(payment_webhook))
        .route("/api/orders", get(admin::list_orders))
        .route("/api/orders/:order_id", get(get_order))
        .route("/api/download/:order_id", get(download))
        .route("/api/admin/login", post(admin::login))
        .route("/api/admin/verify", get(admin::verify_token))
        .route("/api/admin/dashboard", get(admin::dashboard))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Order as shown to the buyer, with the demo flag made explicit so a
/// simulated completion can never pass for a real charge.
#[derive(Serialize)]
pub struct OrderSnapshot {
    #[serde(flatten)]
    pub order: Order,
    pub demo: bool,
}

impl From<Order> for OrderSnapshot {
    fn from(order: Order) -> Self {
        let demo = order.payment_session_id.is_none();
        Self { order, demo }
    }
}

#[derive(Serialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub payment_session_id: Option<String>,
    pub amount: i64,
    pub project_title: String,
    pub demo: bool,
}

// ─────────────────────────────────────────────────────────
// Health and catalog reads
// ─────────────────────────────────────────────────────────

/// `GET /api/health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/subjects`
pub async fn list_subjects(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    Ok(Json(catalog::list_subjects(&state.pool).await?))
}

/// `GET /api/subjects/:id`
pub async fn get_subject(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(catalog::get_subject(&state.pool, &subject_id).await?))
}

#[derive(Deserialize)]
pub struct ProjectFilter {
    pub subject_id: Option<String>,
}

/// `GET /api/projects?subject_id=`
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProjectFilter>,
) -> Result<impl IntoResponse> {
    let projects = catalog::list_projects(&state.pool, filter.subject_id.as_deref()).await?;
    Ok(Json(projects))
}

/// `GET /api/projects/:id`
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(catalog::get_project(&state.pool, &project_id).await?))
}

// ─────────────────────────────────────────────────────────
// Order and payment endpoints
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub project_id: String,
    #[serde(flatten)]
    pub customer: Customer,
}

/// `POST /api/payments/create-order`
///
/// Validates the buyer, snapshots the project into a PENDING order and opens
/// a payment session. A `null` session id means demo mode.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse> {
    let project = catalog::get_project(&state.pool, &req.project_id).await?;
    let order = orders::create_order(&state.pool, &req.customer, &project).await?;
    let session =
        payments::open_session(&state.pool, &state.client, &state.config, &order).await?;

    let (payment_session_id, demo) = match session {
        SessionRef::Hosted(session_id) => (Some(session_id), false),
        SessionRef::Simulated => (None, true),
    };
    Ok(Json(CreateOrderResponse {
        order_id: order.order_id,
        payment_session_id,
        amount: order.amount,
        project_title: order.project_title,
        demo,
    }))
}

/// `POST /api/payments/verify/:order_id`
///
/// Pollable: resolves the order against the gateway until it reaches a
/// terminal state, then keeps returning that state without further gateway
/// calls.
pub async fn verify_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse> {
    let order = payments::verify(
        &state.pool,
        &state.client,
        &state.config,
        &state.locks,
        &order_id,
    )
    .await?;
    Ok(Json(OrderSnapshot::from(order)))
}

/// `POST /api/payments/demo-complete/:order_id`
pub async fn demo_complete(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse> {
    let order = payments::complete_demo(
        &state.pool,
        &state.client,
        &state.config,
        &state.locks,
        &order_id,
    )
    .await?;
    Ok(Json(OrderSnapshot::from(order)))
}

/// `POST /api/payments/webhook`
///
/// Gateway callback. The payload is untrusted: only the order id is taken
/// from it, and the verification engine re-queries the gateway for the real
/// settlement state, so a forged body cannot flip an order. Always answers
/// 200 so the gateway does not retry forever; processing failures are logged
/// server-side.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    match webhook_order_id(&body) {
        Ok(order_id) => {
            if let Err(e) = payments::verify(
                &state.pool,
                &state.client,
                &state.config,
                &state.locks,
                &order_id,
            )
            .await
            {
                warn!("Webhook verification for order {order_id} failed: {e}");
            }
        }
        Err(e) => warn!("Ignoring webhook payload: {e}"),
    }

    Json(serde_json::json!({ "status": "received" }))
}

/// Dig the order id out of a gateway webhook body. Accepts both the nested
/// notification shape (`data.order.order_id`) and a flat `order_id`.
fn webhook_order_id(body: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    value
        .pointer("/data/order/order_id")
        .or_else(|| value.get("order_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| StoreError::Validation("webhook payload carried no order id".to_string()))
}

/// `GET /api/orders/:order_id`
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse> {
    let order = orders::get_order(&state.pool, &order_id).await?;
    Ok(Json(OrderSnapshot::from(order)))
}

// ─────────────────────────────────────────────────────────
// Download
// ─────────────────────────────────────────────────────────

/// `GET /api/download/:order_id`
///
/// Streams the purchased PDF. Served only once the order is PAID.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Response> {
    let order = orders::get_order(&state.pool, &order_id).await?;
    if order.payment_status != PaymentStatus::Paid {
        return Err(StoreError::Forbidden("Payment not completed"));
    }

    let project = catalog::get_project(&state.pool, &order.project_id).await?;
    let file = assets::open(&state.config.upload_dir, &project.file_name).await?;
    let stream = ReaderStream::new(file);

    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.pdf\"", order.project_title),
        ),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_nested_order_id() {
        let body = r#"{
            "type": "PAYMENT_SUCCESS_WEBHOOK",
            "data": { "order": { "order_id": "ORD_20260807120000_1a2b3c4d" } }
        }"#;
        assert_eq!(
            webhook_order_id(body).unwrap(),
            "ORD_20260807120000_1a2b3c4d"
        );
    }

    #[test]
    fn webhook_flat_order_id() {
        let body = r#"{ "order_id": "ORD_20260807120000_1a2b3c4d" }"#;
        assert_eq!(
            webhook_order_id(body).unwrap(),
            "ORD_20260807120000_1a2b3c4d"
        );
    }

    #[test]
    fn webhook_without_order_id_is_rejected() {
        assert!(matches!(
            webhook_order_id(r#"{ "event": "ping" }"#),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn webhook_garbage_is_rejected() {
        assert!(matches!(
            webhook_order_id("not json"),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn order_snapshot_flags_demo_orders() {
        let order = Order {
            order_id: "ORD_20260807120000_deadbeef".to_string(),
            project_id: "p1".to_string(),
            project_title: "Demand Curves".to_string(),
            subject_name: "Economics".to_string(),
            amount: 500,
            customer_name: "Asha Verma".to_string(),
            customer_email: "asha@example.com".to_string(),
            customer_phone: "9876543210".to_string(),
            payment_status: PaymentStatus::Pending,
            payment_session_id: None,
            fulfilled_at: None,
            created_at: "2026-08-07T12:00:00+00:00".to_string(),
        };
        let snapshot = OrderSnapshot::from(order.clone());
        assert!(snapshot.demo);

        let hosted = Order {
            payment_session_id: Some("session_abc".to_string()),
            ..order
        };
        assert!(!OrderSnapshot::from(hosted).demo);
    }
}
