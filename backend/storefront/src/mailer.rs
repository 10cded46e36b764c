//! Outgoing email via a Resend-style JSON API.
//!
//! The purchased PDF rides along as a base64 attachment. Without an API key
//! the mailer reports the send as skipped instead of failing, mirroring the
//! gateway's degraded mode.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::errors::{Result, StoreError};
use crate::orders::Order;

/// Whether the dispatch actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailOutcome {
    Sent,
    Skipped,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: Option<String>,
}

/// Email the purchased PDF to the buyer.
pub async fn send_project_pdf(
    client: &Client,
    config: &Config,
    order: &Order,
    pdf: &[u8],
) -> Result<MailOutcome> {
    let Some(api_key) = &config.resend_api_key else {
        return Ok(MailOutcome::Skipped);
    };

    let payload = json!({
        "from": config.sender_email,
        "to": [order.customer_email],
        "subject": format!("Your Project PDF - {}", order.project_title),
        "html": purchase_email_html(config, order),
        "attachments": [{
            "filename": format!("{}.pdf", order.project_title),
            "content": BASE64.encode(pdf),
        }],
    });

    let resp = client
        .post(format!("{}/emails", config.resend_api_url))
        .bearer_auth(api_key)
        .json(&payload)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(StoreError::Mail(format!(
            "email API returned {status}: {body}"
        )));
    }

    let body: SendEmailResponse = resp.json().await?;
    info!(
        "Purchase email for order {} dispatched (id: {})",
        order.order_id,
        body.id.unwrap_or_default()
    );
    Ok(MailOutcome::Sent)
}

fn purchase_email_html(config: &Config, order: &Order) -> String {
    format!(
        r#"<html>
  <body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #0F172A;">Thank You for Your Purchase!</h1>
    <p>Hi {name},</p>
    <p>Thank you for purchasing from <strong>{store}</strong>.</p>
    <p>Your project PDF "<strong>{title}</strong>" is attached to this email.</p>
    <hr style="border: 1px solid #E2E8F0; margin: 20px 0;">
    <p style="color: #64748B; font-size: 14px;">
      If you have any questions, please contact us.<br>
      Best regards,<br>
      {store} Team
    </p>
  </body>
</html>"#,
        name = order.customer_name,
        store = config.store_name,
        title = order.project_title,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::PaymentStatus;

    fn demo_order() -> Order {
        Order {
            order_id: "ORD_20260807120000_deadbeef".to_string(),
            project_id: "p1".to_string(),
            project_title: "Demand Curves".to_string(),
            subject_name: "Economics".to_string(),
            amount: 500,
            customer_name: "Asha Verma".to_string(),
            customer_email: "asha@example.com".to_string(),
            customer_phone: "9876543210".to_string(),
            payment_status: PaymentStatus::Paid,
            payment_session_id: None,
            fulfilled_at: None,
            created_at: "2026-08-07T12:00:00+00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn unconfigured_mailer_skips() {
        let config = Config::test();
        let outcome = send_project_pdf(&Client::new(), &config, &demo_order(), b"%PDF")
            .await
            .unwrap();
        assert_eq!(outcome, MailOutcome::Skipped);
    }

    #[test]
    fn email_body_mentions_buyer_and_title() {
        let config = Config::test();
        let html = purchase_email_html(&config, &demo_order());
        assert!(html.contains("Asha Verma"));
        assert!(html.contains("Demand Curves"));
        assert!(html.contains("Project Store"));
    }
}
