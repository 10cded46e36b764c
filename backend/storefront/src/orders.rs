//! Order records and the payment-status state machine.
//!
//! An order is one purchase attempt for one project by one buyer. Catalog
//! data (price, title, subject) is snapshotted into the row at creation time
//! and never rewritten, so later catalog edits cannot change what the buyer
//! was charged. `payment_status` moves through
//!
//! ```text
//! PENDING ──gateway success──────▶ PAID    (terminal)
//! PENDING ──gateway failure/expiry▶ FAILED (terminal)
//! ```
//!
//! and nothing else. Status writes go through a conditional UPDATE keyed on
//! the expected prior state, so of N concurrent callers exactly one observes
//! the transition as applied; the same trick guards `fulfilled_at` against
//! double delivery. A FAILED order is never revived: retrying a purchase
//! means creating a fresh order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::catalog::Project;
use crate::errors::{Result, StoreError};

// ─────────────────────────────────────────────────────────
// Payment status state machine
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Outcome of a status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// This call performed the transition; the caller owns its side effects.
    Applied,
    /// The order was already in the requested state.
    Unchanged,
}

// ─────────────────────────────────────────────────────────
// Records and buyer input
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub order_id: String,
    pub project_id: String,
    pub project_title: String,
    pub subject_name: String,
    pub amount: i64,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub payment_status: PaymentStatus,
    /// Gateway session handle; `None` means the order runs in demo mode.
    pub payment_session_id: Option<String>,
    /// Set exactly once, when delivery succeeds.
    pub fulfilled_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
}

impl Customer {
    pub fn validate(&self) -> Result<()> {
        if self.customer_name.trim().is_empty() {
            return Err(StoreError::Validation(
                "Customer name must not be empty".to_string(),
            ));
        }
        if !valid_phone(&self.customer_phone) {
            return Err(StoreError::Validation(
                "Phone number must be exactly 10 digits".to_string(),
            ));
        }
        if !valid_email(&self.customer_email) {
            return Err(StoreError::Validation(
                "Invalid email address".to_string(),
            ));
        }
        Ok(())
    }
}

fn valid_phone(phone: &str) -> bool {
    phone.len() == 10 && phone.bytes().all(|b| b.is_ascii_digit())
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Externally visible order id, e.g. `ORD_20260807143015_1a2b3c4d`.
fn new_order_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD_{}_{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
}

// ─────────────────────────────────────────────────────────
// Order creation and reads
// ─────────────────────────────────────────────────────────

/// Validate the buyer and persist a new PENDING order carrying a snapshot of
/// the project's catalog data. Nothing is written when validation fails.
pub async fn create_order(
    pool: &SqlitePool,
    customer: &Customer,
    project: &Project,
) -> Result<Order> {
    customer.validate()?;

    let order_id = new_order_id();
    sqlx::query(
        r#"
        INSERT INTO orders
            (order_id, project_id, project_title, subject_name, amount,
             customer_name, customer_email, customer_phone,
             payment_status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'PENDING', ?9)
        "#,
    )
    .bind(&order_id)
    .bind(&project.id)
    .bind(&project.title)
    .bind(&project.subject_name)
    .bind(project.price)
    .bind(customer.customer_name.trim())
    .bind(&customer.customer_email)
    .bind(&customer.customer_phone)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    get_order(pool, &order_id).await
}

pub async fn get_order(pool: &SqlitePool, order_id: &str) -> Result<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_id = ?1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound("Order"))
}

// ─────────────────────────────────────────────────────────
// Status writes
// ─────────────────────────────────────────────────────────

/// Apply a status transition.
///
/// Returns [`StatusChange::Applied`] only for the caller whose conditional
/// UPDATE actually moved the row out of PENDING; a caller that finds the
/// order already in the requested state gets [`StatusChange::Unchanged`].
/// Any move outside the transition table is an [`StoreError::InvalidTransition`].
pub async fn update_status(
    pool: &SqlitePool,
    order_id: &str,
    new_status: PaymentStatus,
) -> Result<StatusChange> {
    if new_status.is_terminal() {
        let rows = sqlx::query(
            "UPDATE orders SET payment_status = ?1 WHERE order_id = ?2 AND payment_status = 'PENDING'",
        )
        .bind(new_status)
        .bind(order_id)
        .execute(pool)
        .await?
        .rows_affected();

        if rows == 1 {
            return Ok(StatusChange::Applied);
        }
    }

    // Either the requested state is PENDING or the conditional write lost:
    // read the row and decide between a no-op and an illegal move.
    let current = get_order(pool, order_id).await?.payment_status;
    if current == new_status {
        Ok(StatusChange::Unchanged)
    } else {
        Err(StoreError::InvalidTransition {
            from: current.as_str(),
            to: new_status.as_str(),
        })
    }
}

/// Record that delivery happened. Requires a PAID order; calling it again
/// once `fulfilled_at` is set is a successful no-op so retries cannot
/// double-deliver.
pub async fn mark_fulfilled(pool: &SqlitePool, order_id: &str) -> Result<()> {
    let rows = sqlx::query(
        r#"
        UPDATE orders SET fulfilled_at = ?1
        WHERE  order_id = ?2 AND payment_status = 'PAID' AND fulfilled_at IS NULL
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(order_id)
    .execute(pool)
    .await?
    .rows_affected();

    if rows == 1 {
        return Ok(());
    }

    let order = get_order(pool, order_id).await?;
    match (order.payment_status, order.fulfilled_at) {
        (PaymentStatus::Paid, Some(_)) => Ok(()),
        (status, _) => Err(StoreError::InvalidTransition {
            from: status.as_str(),
            to: "FULFILLED",
        }),
    }
}

/// Attach the gateway session handle. Write-once: a second call leaves the
/// stored handle untouched.
pub async fn set_session_id(pool: &SqlitePool, order_id: &str, session_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE orders SET payment_session_id = ?1 WHERE order_id = ?2 AND payment_session_id IS NULL",
    )
    .bind(session_id)
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Admin reads
// ─────────────────────────────────────────────────────────

pub async fn list_orders(pool: &SqlitePool) -> Result<Vec<Order>> {
    let rows =
        sqlx::query_as::<_, Order>("SELECT * FROM orders ORDER BY created_at DESC LIMIT 100")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_subjects: i64,
    pub total_projects: i64,
    pub total_orders: i64,
    pub paid_orders: i64,
    pub total_revenue: i64,
    pub recent_orders: Vec<Order>,
}

pub async fn dashboard_stats(pool: &SqlitePool) -> Result<DashboardStats> {
    let total_subjects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subjects")
        .fetch_one(pool)
        .await?;
    let total_projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(pool)
        .await?;
    let total_orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
        .fetch_one(pool)
        .await?;
    let paid_orders: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE payment_status = 'PAID'")
            .fetch_one(pool)
            .await?;
    let total_revenue: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM orders WHERE payment_status = 'PAID'",
    )
    .fetch_one(pool)
    .await?;
    let recent_orders =
        sqlx::query_as::<_, Order>("SELECT * FROM orders ORDER BY created_at DESC LIMIT 5")
            .fetch_all(pool)
            .await?;

    Ok(DashboardStats {
        total_subjects,
        total_projects,
        total_orders,
        paid_orders,
        total_revenue,
        recent_orders,
    })
}
