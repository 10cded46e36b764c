//! Payment session brokering and order verification.
//!
//! [`verify`] is the single entry point through which an order reaches a
//! terminal state, whether driven by buyer polling, the gateway webhook, or
//! the demo completion endpoint. Callers may hit it concurrently for the
//! same order; a per-order async lock serializes the resolve-and-fulfill
//! step, and the order store's conditional updates enforce the transition
//! table a second time underneath.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::{Result, StoreError};
use crate::fulfillment;
use crate::gateway::{self, SessionRef, SettlementState};
use crate::orders::{self, Order, PaymentStatus};

/// Registry of per-order locks. Entries are created on first use and kept
/// for the process lifetime; order volume is bounded by catalog sales, not
/// by request rate.
#[derive(Default)]
pub struct OrderLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    pub async fn for_order(&self, order_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().await;
        map.entry(order_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// ─────────────────────────────────────────────────────────
// Session broker
// ─────────────────────────────────────────────────────────

/// Open a payment session for a freshly created order and record the handle.
pub async fn open_session(
    pool: &SqlitePool,
    client: &Client,
    config: &Config,
    order: &Order,
) -> Result<SessionRef> {
    let session = gateway::create_session(client, config, order).await?;
    if let SessionRef::Hosted(session_id) = &session {
        orders::set_session_id(pool, &order.order_id, session_id).await?;
    }
    Ok(session)
}

// ─────────────────────────────────────────────────────────
// Verification engine
// ─────────────────────────────────────────────────────────

/// Resolve the current payment state of an order.
///
/// * Terminal orders come back unchanged without a gateway round trip,
///   except that a PAID order whose delivery previously failed gets a
///   fulfillment retry.
/// * Pending demo orders stay pending until [`complete_demo`] fires.
/// * Pending hosted orders are checked against the gateway; the caller whose
///   transition wins runs fulfillment before returning.
pub async fn verify(
    pool: &SqlitePool,
    client: &Client,
    config: &Config,
    locks: &OrderLocks,
    order_id: &str,
) -> Result<Order> {
    let order = orders::get_order(pool, order_id).await?;

    // Fast path, no lock: nothing left to resolve or deliver.
    match order.payment_status {
        PaymentStatus::Failed => return Ok(order),
        PaymentStatus::Paid if order.fulfilled_at.is_some() => return Ok(order),
        _ => {}
    }

    let lock = locks.for_order(order_id).await;
    let _guard = lock.lock().await;

    // Re-read under the lock; another caller may have resolved the order
    // while we waited.
    let order = orders::get_order(pool, order_id).await?;
    match order.payment_status {
        PaymentStatus::Failed => Ok(order),
        PaymentStatus::Paid => {
            retry_fulfillment(pool, client, config, &order).await;
            orders::get_order(pool, order_id).await
        }
        PaymentStatus::Pending => {
            if order.payment_session_id.is_none() {
                // Demo order: only the explicit completion endpoint settles it.
                return Ok(order);
            }
            let state = gateway::fetch_settlement(client, config, &order.order_id).await?;
            apply_settlement(pool, client, config, order, state).await
        }
    }
}

/// Settle a demo order as paid, without a real charge.
///
/// Only legal for orders that never got a hosted session; an order with a
/// live gateway session must settle through [`verify`].
pub async fn complete_demo(
    pool: &SqlitePool,
    client: &Client,
    config: &Config,
    locks: &OrderLocks,
    order_id: &str,
) -> Result<Order> {
    let order = orders::get_order(pool, order_id).await?;
    if order.payment_session_id.is_some() {
        return Err(StoreError::Conflict(
            "Order has a live payment session; demo completion is not available".to_string(),
        ));
    }

    let lock = locks.for_order(order_id).await;
    let _guard = lock.lock().await;

    let order = orders::get_order(pool, order_id).await?;
    match order.payment_status {
        PaymentStatus::Failed => Ok(order),
        PaymentStatus::Paid => {
            retry_fulfillment(pool, client, config, &order).await;
            orders::get_order(pool, order_id).await
        }
        PaymentStatus::Pending => {
            info!("Completing simulated payment for order {}", order.order_id);
            apply_settlement(pool, client, config, order, SettlementState::Paid).await
        }
    }
}

/// Map a settlement report onto the status table and run fulfillment when
/// this caller performed the PENDING -> PAID transition.
async fn apply_settlement(
    pool: &SqlitePool,
    client: &Client,
    config: &Config,
    order: Order,
    state: SettlementState,
) -> Result<Order> {
    let new_status = match state {
        SettlementState::Paid => PaymentStatus::Paid,
        SettlementState::Failed => PaymentStatus::Failed,
        SettlementState::Processing => return Ok(order),
    };

    orders::update_status(pool, &order.order_id, new_status).await?;

    if new_status == PaymentStatus::Paid {
        let paid = orders::get_order(pool, &order.order_id).await?;
        retry_fulfillment(pool, client, config, &paid).await;
    }
    orders::get_order(pool, &order.order_id).await
}

/// Run fulfillment unless delivery already happened. Failures are logged and
/// left for a later verify call to retry; they never corrupt the paid order.
async fn retry_fulfillment(pool: &SqlitePool, client: &Client, config: &Config, order: &Order) {
    if order.fulfilled_at.is_some() {
        return;
    }
    if let Err(e) = fulfillment::fulfill(pool, client, config, order).await {
        warn!("Fulfillment for order {} failed: {e}", order.order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets;
    use crate::catalog;
    use crate::db::testutil::test_pool;
    use crate::orders::tests::seed_order;

    struct DemoSetup {
        pool: SqlitePool,
        config: Config,
        client: Client,
        locks: Arc<OrderLocks>,
        order: Order,
        _dir: tempfile::TempDir,
    }

    /// Demo-mode storefront with one pending order whose asset exists.
    async fn demo_setup() -> DemoSetup {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::test();
        config.upload_dir = dir.path().to_path_buf();

        let order = seed_order(&pool).await;
        let project = catalog::get_project(&pool, &order.project_id).await.unwrap();
        assets::save(dir.path(), &project.file_name, b"%PDF-1.4 demo")
            .await
            .unwrap();

        DemoSetup {
            pool,
            config,
            client: Client::new(),
            locks: Arc::new(OrderLocks::default()),
            order,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn open_session_without_gateway_is_simulated() {
        let s = demo_setup().await;
        let session = open_session(&s.pool, &s.client, &s.config, &s.order)
            .await
            .unwrap();
        assert_eq!(session, SessionRef::Simulated);

        let refreshed = orders::get_order(&s.pool, &s.order.order_id).await.unwrap();
        assert!(refreshed.payment_session_id.is_none());
    }

    #[tokio::test]
    async fn verify_unknown_order_is_not_found() {
        let s = demo_setup().await;
        let err = verify(&s.pool, &s.client, &s.config, &s.locks, "ORD_nope")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound("Order")));
    }

    #[tokio::test]
    async fn verify_leaves_pending_demo_order_alone() {
        let s = demo_setup().await;
        let order = verify(&s.pool, &s.client, &s.config, &s.locks, &s.order.order_id)
            .await
            .unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn demo_completion_pays_and_fulfills() {
        let s = demo_setup().await;
        let order = complete_demo(&s.pool, &s.client, &s.config, &s.locks, &s.order.order_id)
            .await
            .unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert!(order.fulfilled_at.is_some());
    }

    #[tokio::test]
    async fn demo_completion_is_idempotent() {
        let s = demo_setup().await;
        let first = complete_demo(&s.pool, &s.client, &s.config, &s.locks, &s.order.order_id)
            .await
            .unwrap();
        let second = complete_demo(&s.pool, &s.client, &s.config, &s.locks, &s.order.order_id)
            .await
            .unwrap();
        assert_eq!(first.fulfilled_at, second.fulfilled_at);
    }

    #[tokio::test]
    async fn demo_completion_refused_for_hosted_order() {
        let s = demo_setup().await;
        orders::set_session_id(&s.pool, &s.order.order_id, "session_live")
            .await
            .unwrap();

        let err = complete_demo(&s.pool, &s.client, &s.config, &s.locks, &s.order.order_id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn verify_after_terminal_state_is_stable() {
        let s = demo_setup().await;
        complete_demo(&s.pool, &s.client, &s.config, &s.locks, &s.order.order_id)
            .await
            .unwrap();

        // No gateway is configured, so a second resolve that tried to reach
        // one would fail loudly; a paid order must come back as-is instead.
        let order = verify(&s.pool, &s.client, &s.config, &s.locks, &s.order.order_id)
            .await
            .unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn concurrent_demo_completions_fulfill_once() {
        let s = demo_setup().await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = s.pool.clone();
            let client = s.client.clone();
            let config = s.config.clone();
            let locks = s.locks.clone();
            let order_id = s.order.order_id.clone();
            handles.push(tokio::spawn(async move {
                complete_demo(&pool, &client, &config, &locks, &order_id).await
            }));
        }

        let mut fulfilled_at = None;
        for handle in handles {
            let order = handle.await.unwrap().unwrap();
            assert_eq!(order.payment_status, PaymentStatus::Paid);
            let ts = order.fulfilled_at.expect("fulfilled");
            if let Some(prev) = &fulfilled_at {
                assert_eq!(prev, &ts);
            }
            fulfilled_at = Some(ts);
        }
    }
}
