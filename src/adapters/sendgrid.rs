use crate::domain::ports::Notifier;
use crate::utils::error::{BloodSearchError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

/// Sends plain-text mail through the SendGrid v3 `mail/send` API.
pub struct SendGridNotifier {
    client: Client,
    endpoint: String,
    api_key: String,
    from_email: String,
    from_name: String,
}

impl SendGridNotifier {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        from_email: impl Into<String>,
        from_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BloodSearchError::ConfigError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            from_email: from_email.into(),
            from_name: from_name.into(),
        })
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let message = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.from_email, "name": self.from_name },
            "subject": subject,
            "content": [{ "type": "text/plain", "value": body }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&message)
            .send()
            .await
            .map_err(|e| BloodSearchError::NotificationError {
                message: format!("Mail request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(BloodSearchError::NotificationError {
                message: format!("Mail provider returned status: {}", response.status()),
            });
        }

        tracing::debug!(to, "Email sent");
        Ok(())
    }
}

/// Used when notifications are switched off in configuration.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        tracing::info!(to, subject, "Notifications disabled, not sending");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn notifier(server: &MockServer) -> SendGridNotifier {
        SendGridNotifier::new(
            server.url("/v3/mail/send"),
            "sg-key",
            "noreply@example.org",
            "Health Organization",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_posts_mail_payload() {
        let server = MockServer::start();
        let api_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v3/mail/send")
                .header("Authorization", "Bearer sg-key")
                .json_body(serde_json::json!({
                    "personalizations": [{ "to": [{ "email": "requester@example.com" }] }],
                    "from": { "email": "noreply@example.org", "name": "Health Organization" },
                    "subject": "Blood Request",
                    "content": [{ "type": "text/plain", "value": "The requested blood type found" }]
                }));
            then.status(202);
        });

        notifier(&server)
            .send("requester@example.com", "Blood Request", "The requested blood type found")
            .await
            .unwrap();

        api_mock.assert();
    }

    #[tokio::test]
    async fn test_send_reports_rejection() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v3/mail/send");
            then.status(401);
        });

        let result = notifier(&server).send("requester@example.com", "s", "b").await;
        assert!(matches!(result, Err(BloodSearchError::NotificationError { .. })));
    }
}
