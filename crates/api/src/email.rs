//! Transactional email via the Resend API
//!
//! Renders a notification template and posts it to Resend. Used by the
//! notification worker and by the in-process channel dispatcher.

use serde_json::Value;

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Support email
    pub support_email: String,
    /// Dashboard URL
    pub dashboard_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Fleetseat <noreply@localhost>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Fleetseat".to_string()),
            support_email: std::env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@localhost".to_string()),
            dashboard_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Unknown email template: {0}")]
    UnknownTemplate(String),
    #[error("Resend rejected email ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Failed to reach Resend: {0}")]
    Transport(String),
}

/// Subject and HTML body for one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

fn field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("")
}

fn layout(config: &EmailConfig, heading: &str, body: &str, cta_label: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #1d4ed8;">{heading}</h2>
    {body}
    <p>
        <a href="{dashboard_url}" style="display: inline-block; padding: 12px 24px; background-color: #1d4ed8; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            {cta_label}
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">
        Questions? Contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
        heading = heading,
        body = body,
        cta_label = cta_label,
        dashboard_url = config.dashboard_url,
        support_email = config.support_email,
        app_name = config.app_name,
    )
}

/// Render a template key with its data
pub fn render(
    config: &EmailConfig,
    template_key: &str,
    data: &Value,
) -> Result<RenderedEmail, MailError> {
    let fleet = field(data, "fleet_name");
    let app = &config.app_name;

    let rendered = match template_key {
        "invite-unregistered" => RenderedEmail {
            subject: format!("You've been invited to join {} on {}", fleet, app),
            html: layout(
                config,
                "You're invited",
                &format!(
                    "<p>{} has invited you to drive for <strong>{}</strong>.</p>\
                     <p>Sign up with this email address to accept.</p>",
                    field(data, "owner_email"),
                    fleet
                ),
                "Create your account",
            ),
        },
        "invite-registered" => RenderedEmail {
            subject: format!("New fleet invitation from {}", fleet),
            html: layout(
                config,
                "New fleet invitation",
                &format!(
                    "<p>{} has invited you to join <strong>{}</strong>.</p>\
                     <p>Sign in to accept or decline.</p>",
                    field(data, "owner_email"),
                    fleet
                ),
                "View invitation",
            ),
        },
        "invitation-accepted" => RenderedEmail {
            subject: format!("{} joined {}", field(data, "driver_email"), fleet),
            html: layout(
                config,
                "Invitation accepted",
                &format!(
                    "<p><strong>{}</strong> accepted your invitation and is now a driver in {}.</p>",
                    field(data, "driver_email"),
                    fleet
                ),
                "Open your fleet",
            ),
        },
        "invitation-rejected" => RenderedEmail {
            subject: format!("{} declined your invitation", field(data, "driver_email")),
            html: layout(
                config,
                "Invitation declined",
                &format!(
                    "<p><strong>{}</strong> declined your invitation to {}.</p>",
                    field(data, "driver_email"),
                    fleet
                ),
                "Open your fleet",
            ),
        },
        other => return Err(MailError::UnknownTemplate(other.to_string())),
    };

    Ok(rendered)
}

/// Resend-backed mailer
#[derive(Clone)]
pub struct ResendMailer {
    config: EmailConfig,
    client: reqwest::Client,
}

impl ResendMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Render and send one message. Skipped (and `Ok`) when no API key is set.
    pub async fn send(
        &self,
        template_key: &str,
        data: &Value,
        recipient: &str,
        bcc: Option<&str>,
    ) -> Result<(), MailError> {
        let email = render(&self.config, template_key, data)?;

        if !self.config.is_enabled() {
            tracing::warn!(template_key = %template_key, "Email not configured, skipping");
            return Ok(());
        }

        let mut body = serde_json::json!({
            "from": self.config.email_from,
            "to": [recipient],
            "subject": email.subject,
            "html": email.html
        });
        if let Some(bcc) = bcc {
            body["bcc"] = serde_json::json!([bcc]);
        }

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header("Authorization", format!("Bearer {}", self.config.resend_api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(to = %recipient, template_key = %template_key, "Email sent");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, "Failed to send email");
        Err(MailError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn config() -> EmailConfig {
        EmailConfig {
            resend_api_key: String::new(),
            email_from: "Fleetseat <noreply@example.com>".to_string(),
            app_name: "Fleetseat".to_string(),
            support_email: "support@example.com".to_string(),
            dashboard_url: "https://app.example.com".to_string(),
        }
    }

    #[test]
    fn test_render_invite_mentions_fleet_and_owner() {
        let data = json!({ "fleet_name": "Acme Haulage", "owner_email": "owner@example.com" });
        let email = render(&config(), "invite-unregistered", &data).unwrap();
        assert!(email.subject.contains("Acme Haulage"));
        assert!(email.html.contains("owner@example.com"));
        assert!(email.html.contains("https://app.example.com"));
    }

    #[test]
    fn test_unknown_template_is_an_error() {
        assert!(matches!(
            render(&config(), "password-reset", &json!({})),
            Err(MailError::UnknownTemplate(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_mailer_skips_send() {
        let mailer = ResendMailer::new(config());
        assert!(!mailer.is_enabled());
        let data = json!({ "fleet_name": "Acme", "driver_email": "d@example.com" });
        mailer
            .send("invitation-rejected", &data, "owner@example.com", None)
            .await
            .unwrap();
    }
}
