//! Application configuration loaded from environment variables.

use std::path::PathBuf;

use crate::errors::{Result, StoreError};

/// Credentials for the hosted payment gateway. Absent credentials put the
/// storefront in demo mode rather than blocking purchases.
#[derive(Debug, Clone)]
pub struct GatewayCredentials {
    pub app_id: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path or URL of the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Directory holding uploaded project PDFs
    pub upload_dir: PathBuf,
    /// Payment gateway credentials; `None` means no live gateway
    pub gateway: Option<GatewayCredentials>,
    /// Payment gateway base URL (e.g. https://sandbox.cashfree.com/pg)
    pub gateway_api_url: String,
    /// Where the hosted checkout sends the buyer back to
    pub payment_return_url: String,
    /// Email API key; `None` disables outgoing mail
    pub resend_api_key: Option<String>,
    /// Email API base URL
    pub resend_api_url: String,
    /// From-address for purchase emails
    pub sender_email: String,
    /// Storefront display name used in emails
    pub store_name: String,
    /// Bootstrap admin credentials, applied only when no admin exists yet
    pub admin_username: String,
    pub admin_password: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let gateway = match (env_var("CASHFREE_APP_ID"), env_var("CASHFREE_SECRET_KEY")) {
            (Ok(app_id), Ok(secret_key)) => Some(GatewayCredentials { app_id, secret_key }),
            _ => None,
        };

        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./storefront.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| StoreError::Config("Invalid API_PORT".to_string()))?,
            upload_dir: PathBuf::from(
                env_var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            ),
            gateway,
            gateway_api_url: env_var("CASHFREE_API_URL")
                .unwrap_or_else(|_| "https://sandbox.cashfree.com/pg".to_string()),
            payment_return_url: env_var("PAYMENT_RETURN_URL")
                .unwrap_or_else(|_| "http://localhost:3000/payment-status".to_string()),
            resend_api_key: env_var("RESEND_API_KEY").ok(),
            resend_api_url: env_var("RESEND_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com".to_string()),
            sender_email: env_var("SENDER_EMAIL")
                .unwrap_or_else(|_| "onboarding@resend.dev".to_string()),
            store_name: env_var("STORE_NAME").unwrap_or_else(|_| "Project Store".to_string()),
            admin_username: env_var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            admin_password: env_var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin123".to_string()),
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| StoreError::Config(format!("Missing env var: {key}")))
}

#[cfg(test)]
impl Config {
    /// Defaults with no gateway and no mailer, i.e. full demo mode.
    pub(crate) fn test() -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            api_port: 0,
            upload_dir: PathBuf::from("./uploads"),
            gateway: None,
            gateway_api_url: "https://sandbox.cashfree.com/pg".to_string(),
            payment_return_url: "http://localhost:3000/payment-status".to_string(),
            resend_api_key: None,
            resend_api_url: "https://api.resend.com".to_string(),
            sender_email: "onboarding@resend.dev".to_string(),
            store_name: "Project Store".to_string(),
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
        }
    }
}
