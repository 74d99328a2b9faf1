use std::time::Duration;

use anyhow::Context;
use url::Url;

/// Runtime configuration, read from the environment exactly once at startup
/// and passed into components by injection. Business logic never touches
/// `std::env` directly.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub allowed_origins: Vec<String>,
    pub admin_token: String,
    pub daily_task_limit: i64,
    pub gateway_timeout: Duration,
    pub lipwa: LipwaConfig,
    pub palmpesa: PalmPesaConfig,
    pub mail: MailConfig,
}

/// Gateway A: STK-push style collection API.
#[derive(Debug, Clone)]
pub struct LipwaConfig {
    pub base_url: Url,
    pub api_key: String,
    pub channel_id: String,
    pub callback_url: String,
}

/// Gateway B: PalmPesa mobile collection API.
#[derive(Debug, Clone)]
pub struct PalmPesaConfig {
    pub base_url: Url,
    pub api_token: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: Url,
    pub access_token: String,
    pub from_address: String,
    pub enabled: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "https://kazipesa.co.tz,https://www.kazipesa.co.tz".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let admin_token = std::env::var("ADMIN_TOKEN").context("ADMIN_TOKEN must be set")?;

        let daily_task_limit = std::env::var("DAILY_TASK_LIMIT")
            .unwrap_or_else(|_| "20".to_string())
            .parse::<i64>()
            .context("DAILY_TASK_LIMIT must be a valid number")?;

        let gateway_timeout_secs = std::env::var("GATEWAY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse::<u64>()
            .context("GATEWAY_TIMEOUT_SECS must be a valid number")?;

        let lipwa = LipwaConfig {
            base_url: env_url("LIPWA_BASE_URL", "https://payment.lipwa.io/api/v1/")?,
            api_key: std::env::var("LIPWA_API_KEY").unwrap_or_default(),
            channel_id: std::env::var("LIPWA_CHANNEL_ID").unwrap_or_default(),
            callback_url: std::env::var("LIPWA_CALLBACK_URL")
                .unwrap_or_else(|_| "https://api.kazipesa.co.tz/api/payments/lipwa/callback".to_string()),
        };

        let palmpesa = PalmPesaConfig {
            base_url: env_url("PALMPESA_BASE_URL", "https://palmpesa.co.tz/api/v1/")?,
            api_token: std::env::var("PALMPESA_API_TOKEN").unwrap_or_default(),
        };

        let mail = MailConfig {
            api_url: env_url("MAIL_API_URL", "https://mailer.kazipesa.co.tz/v1/send")?,
            access_token: std::env::var("MAIL_ACCESS_TOKEN").unwrap_or_default(),
            from_address: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "notifications@kazipesa.co.tz".to_string()),
            enabled: std::env::var("MAIL_ENABLED").unwrap_or_default() == "true",
        };

        Ok(Config {
            host,
            port,
            database_url,
            allowed_origins,
            admin_token,
            daily_task_limit,
            gateway_timeout: Duration::from_secs(gateway_timeout_secs),
            lipwa,
            palmpesa,
            mail,
        })
    }
}

fn env_url(key: &str, default: &str) -> anyhow::Result<Url> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).with_context(|| format!("{} is not a valid URL", key))
}
