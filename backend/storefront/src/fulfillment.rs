//! Fulfillment dispatcher: delivery of the purchased PDF after payment.
//!
//! Runs at most once per order. The asset read is the hard precondition
//! (no file, no fulfillment, retry later); the email is best-effort. A
//! failed or skipped email is logged and the order is still marked
//! fulfilled, since the buyer retains the authenticated download endpoint.

use reqwest::Client;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{Result, StoreError};
use crate::mailer::{self, MailOutcome};
use crate::orders::{self, Order, PaymentStatus};
use crate::{assets, catalog};

/// Deliver the purchased asset for a PAID order.
///
/// Preconditions: `payment_status == PAID` and `fulfilled_at` unset. A call
/// on an already fulfilled order is a successful no-op; a call on an unpaid
/// order is an invalid transition. On [`StoreError::AssetUnavailable`] the
/// order stays unfulfilled so a later retry can succeed.
pub async fn fulfill(
    pool: &SqlitePool,
    client: &Client,
    config: &Config,
    order: &Order,
) -> Result<()> {
    if order.payment_status != PaymentStatus::Paid {
        return Err(StoreError::InvalidTransition {
            from: order.payment_status.as_str(),
            to: "FULFILLED",
        });
    }
    if order.fulfilled_at.is_some() {
        debug!("Order {} already fulfilled; skipping delivery", order.order_id);
        return Ok(());
    }

    let project = catalog::get_project(pool, &order.project_id).await?;
    let pdf = assets::read(&config.upload_dir, &project.file_name).await?;

    match mailer::send_project_pdf(client, config, order, &pdf).await {
        Ok(MailOutcome::Sent) => {}
        Ok(MailOutcome::Skipped) => {
            warn!(
                "Mailer not configured; order {} delivered without email",
                order.order_id
            );
        }
        Err(e) => {
            warn!(
                "Email dispatch for order {} failed ({e}); order still fulfilled",
                order.order_id
            );
        }
    }

    orders::mark_fulfilled(pool, &order.order_id).await?;
    info!(
        "Order {} fulfilled for {}",
        order.order_id, order.customer_email
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::test_pool;
    use crate::orders::tests::seed_order;
    use crate::orders::{get_order, update_status, StatusChange};

    async fn paid_order_with_asset(
        pool: &SqlitePool,
        dir: &std::path::Path,
    ) -> Order {
        let order = seed_order(pool).await;
        let project = catalog::get_project(pool, &order.project_id).await.unwrap();
        assets::save(dir, &project.file_name, b"%PDF-1.4 content")
            .await
            .unwrap();
        assert_eq!(
            update_status(pool, &order.order_id, PaymentStatus::Paid)
                .await
                .unwrap(),
            StatusChange::Applied
        );
        get_order(pool, &order.order_id).await.unwrap()
    }

    #[tokio::test]
    async fn fulfill_sets_fulfilled_at() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::test();
        config.upload_dir = dir.path().to_path_buf();

        let order = paid_order_with_asset(&pool, dir.path()).await;
        fulfill(&pool, &Client::new(), &config, &order).await.unwrap();

        let refreshed = get_order(&pool, &order.order_id).await.unwrap();
        assert!(refreshed.fulfilled_at.is_some());
    }

    #[tokio::test]
    async fn second_fulfill_is_noop() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::test();
        config.upload_dir = dir.path().to_path_buf();

        let order = paid_order_with_asset(&pool, dir.path()).await;
        fulfill(&pool, &Client::new(), &config, &order).await.unwrap();
        let first = get_order(&pool, &order.order_id)
            .await
            .unwrap()
            .fulfilled_at
            .expect("fulfilled");

        // Re-read: the second invocation must observe fulfilled_at and stop.
        let refreshed = get_order(&pool, &order.order_id).await.unwrap();
        fulfill(&pool, &Client::new(), &config, &refreshed)
            .await
            .unwrap();
        let second = get_order(&pool, &order.order_id)
            .await
            .unwrap()
            .fulfilled_at
            .expect("still fulfilled");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn fulfill_rejects_unpaid_order() {
        let pool = test_pool().await;
        let config = Config::test();
        let order = seed_order(&pool).await;

        let err = fulfill(&pool, &Client::new(), &config, &order)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn missing_asset_leaves_order_unfulfilled() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::test();
        config.upload_dir = dir.path().to_path_buf();

        let order = seed_order(&pool).await;
        update_status(&pool, &order.order_id, PaymentStatus::Paid)
            .await
            .unwrap();
        let paid = get_order(&pool, &order.order_id).await.unwrap();

        let err = fulfill(&pool, &Client::new(), &config, &paid)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AssetUnavailable(_)));

        let refreshed = get_order(&pool, &order.order_id).await.unwrap();
        assert_eq!(refreshed.payment_status, PaymentStatus::Paid);
        assert!(refreshed.fulfilled_at.is_none());
    }
}
