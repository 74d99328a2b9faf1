use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::MailConfig;

/// Sends transactional mail through the OAuth2 bearer-token mail relay.
/// Notification failures are logged, never surfaced to the requester.
#[derive(Clone)]
pub struct Mailer {
    http: reqwest::Client,
    config: MailConfig,
}

#[derive(Debug, Serialize)]
struct SendMailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    text: String,
}

impl Mailer {
    pub fn new(config: MailConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Mailer { http, config })
    }

    /// Task-award notification, sent after an approval commits.
    pub async fn send_award_notification(
        &self,
        to: &str,
        recipient_name: &str,
        task_title: &str,
        amount: Decimal,
    ) {
        if !self.config.enabled {
            return;
        }

        let request = SendMailRequest {
            from: &self.config.from_address,
            to,
            subject: format!("Your task \"{}\" was approved", task_title),
            text: format!(
                "Hi {},\n\nYour submission for \"{}\" was approved and TZS {} has been \
                 credited to your balance.\n\nKaziPesa",
                recipient_name, task_title, amount
            ),
        };

        let result = self
            .http
            .post(self.config.api_url.clone())
            .bearer_auth(&self.config.access_token)
            .json(&request)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!("Award notification sent to {}", to);
            }
            Ok(response) => {
                warn!(
                    "Mail relay returned {} for award notification to {}",
                    response.status(),
                    to
                );
            }
            Err(e) => {
                warn!("Failed to send award notification to {}: {}", to, e);
            }
        }
    }
}
