use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

const RESEND_API_URL: &str = "https://api.resend.com";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email send failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("email API error ({status}): {body}")]
    Api { status: u16, body: String },
}

/// Thin client over the Resend HTTP API.
#[derive(Clone)]
pub struct EmailClient {
    client: Client,
    api_url: String,
    api_key: String,
    from_email: String,
    from_name: String,
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: String,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl EmailClient {
    pub fn new(api_key: &str, from_email: &str, from_name: &str) -> Result<Self, EmailError> {
        let client = Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_url: RESEND_API_URL.to_string(),
            api_key: api_key.to_string(),
            from_email: from_email.to_string(),
            from_name: from_name.to_string(),
        })
    }

    /// Point the client at another Resend-compatible endpoint.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn sender(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }

    pub async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        let request = ResendRequest {
            from: self.sender(),
            to: [to],
            subject,
            html,
        };

        let response = self.client
            .post(format!("{}/emails", self.api_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Api { status: status.as_u16(), body });
        }

        tracing::debug!(to = %to, subject = %subject, "email sent");
        Ok(())
    }

    pub async fn send_verification_code(&self, to: &str, code: &str, ttl_minutes: i64) -> Result<(), EmailError> {
        let html = verification_code_html(&self.from_name, code, ttl_minutes);
        self.send_email(to, "Verify your email address", &html).await
    }

    pub async fn send_password_reset_link(&self, to: &str, reset_url: &str, ttl_minutes: i64) -> Result<(), EmailError> {
        let html = password_reset_html(reset_url, ttl_minutes);
        self.send_email(to, "Password Reset Request", &html).await
    }
}

fn verification_code_html(brand: &str, code: &str, ttl_minutes: i64) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
        <h1 style="color: #333;">{brand} - Verify your email address</h1>
        <p style="color: #666;">Your verification code is:</p>
        <div style="background: #f4f4f5; color: #4F46E5; font-size: 32px; font-weight: bold; text-align: center; padding: 20px; border-radius: 8px; letter-spacing: 8px;">{code}</div>
        <p style="color: #666; font-size: 14px;">This code expires in {ttl_minutes} minutes.</p>
        <p style="color: #666; font-size: 14px;">If you didn't create an account, please ignore this email.</p>
        </div>"#
    )
}

fn password_reset_html(reset_url: &str, ttl_minutes: i64) -> String {
    let expiry = if ttl_minutes % 60 == 0 {
        let hours = ttl_minutes / 60;
        if hours == 1 { "1 hour".to_string() } else { format!("{hours} hours") }
    } else {
        format!("{ttl_minutes} minutes")
    };

    format!(
        r#"<h1>Password Reset Request</h1>
        <p>You requested a password reset for your account.</p>
        <p>Click the link below to reset your password:</p>
        <a href="{reset_url}">{reset_url}</a>
        <p>This link will expire in {expiry}.</p>
        <p>If you didn't request this, please ignore this email.</p>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_includes_display_name() {
        let client = EmailClient::new("re_test", "hello@atrium.dev", "Atrium").unwrap();
        assert_eq!(client.sender(), "Atrium <hello@atrium.dev>");
    }

    #[test]
    fn verification_template_contains_code_and_ttl() {
        let html = verification_code_html("Atrium", "482913", 15);
        assert!(html.contains("482913"));
        assert!(html.contains("15 minutes"));
    }

    #[test]
    fn reset_template_formats_hours() {
        let html = password_reset_html("https://app.test/reset-password?token=abc", 60);
        assert!(html.contains(r#"href="https://app.test/reset-password?token=abc""#));
        assert!(html.contains("1 hour."));

        let html = password_reset_html("https://x", 30);
        assert!(html.contains("30 minutes"));
    }

    #[tokio::test]
    async fn unreachable_api_is_a_transport_error() {
        let client = EmailClient::new("re_test", "hello@atrium.dev", "Atrium")
            .unwrap()
            .with_api_url("http://127.0.0.1:9");
        let err = client.send_email("a@b.dev", "hi", "<p>hi</p>").await.unwrap_err();
        assert!(matches!(err, EmailError::Transport(_)));
    }
}
