//! Email service for password resets and subscription notices.

use std::path::Path;

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use uuid::Uuid;

use crate::{
    config::{Config, EmailTransportConfig},
    errors::Error,
};

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    reply_to: Option<String>,
    public_url: String,
    reset_token_minutes: u64,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            reply_to: email_config.reply_to.clone(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
            reset_token_minutes: config.auth.native.password_reset_token_duration.as_secs() / 60,
        })
    }

    pub async fn send_password_reset(&self, to_email: &str, to_name: &str, token_id: &Uuid, token: &str) -> Result<(), Error> {
        let reset_link = format!("{}/reset-password?id={}&token={}", self.public_url, token_id, token);
        let body = self.password_reset_body(to_name, &reset_link);
        self.send_email(to_email, to_name, "Reset your password", &body).await
    }

    /// Sent once subscription sync has granted the subscriber role
    pub async fn send_subscription_activated(&self, to_email: &str, to_name: &str, tier_name: Option<&str>) -> Result<(), Error> {
        let plan = tier_name.map(|t| format!(" to {}", escape(t))).unwrap_or_default();
        let content = format!(
            r#"<p>Thanks for subscribing{plan}! Subscriber-only articles and forums are now open to you.</p>
        <p><a href="{url}">Start reading</a></p>"#,
            url = self.public_url
        );
        let body = self.wrap("Your subscription is active", to_name, &content);
        self.send_email(to_email, to_name, "Your subscription is active", &body).await
    }

    /// Sent once subscription sync has revoked the subscriber role
    pub async fn send_subscription_ended(&self, to_email: &str, to_name: &str, tier_name: Option<&str>) -> Result<(), Error> {
        let plan = tier_name.map(|t| format!(" to {}", escape(t))).unwrap_or_default();
        let content = format!(
            r#"<p>Your subscription{plan} has ended, so subscriber-only content is no longer available on your account.</p>
        <p>You can resubscribe at any time from <a href="{url}">your account</a>.</p>"#,
            url = self.public_url
        );
        let body = self.wrap("Your subscription has ended", to_name, &content);
        self.send_email(to_email, to_name, "Your subscription has ended", &body).await
    }

    async fn send_email(&self, to_email: &str, to_name: &str, subject: &str, body: &str) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = Mailbox::new(
            Some(to_name.to_string()).filter(|n| !n.is_empty()),
            to_email.parse().map_err(|e| Error::Internal {
                operation: format!("parse to email: {e}"),
            })?,
        );

        let mut builder = Message::builder().from(from).to(to).subject(subject).header(ContentType::TEXT_HTML);
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.parse::<Mailbox>().map_err(|e| Error::Internal {
                operation: format!("parse reply-to email: {e}"),
            })?);
        }
        let message = builder.body(body.to_string()).map_err(|e| Error::Internal {
            operation: format!("build email message: {e}"),
        })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }

    fn password_reset_body(&self, to_name: &str, reset_link: &str) -> String {
        let content = format!(
            r#"<p>We received a request to reset your password. If you didn't make this request, you can safely ignore this email.</p>
        <p><a href="{reset_link}">Reset your password</a></p>
        <p>Or copy and paste this link into your browser:</p>
        <p>{reset_link}</p>
        <p>This link will expire in {minutes} minutes.</p>"#,
            minutes = self.reset_token_minutes
        );
        self.wrap("Password Reset Request", to_name, &content)
    }

    fn wrap(&self, title: &str, to_name: &str, content: &str) -> String {
        let greeting = if to_name.is_empty() {
            "Hello,".to_string()
        } else {
            format!("Hello {},", escape(to_name))
        };

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>{title}</h2>
        <p>{greeting}</p>
        {content}
        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
        )
    }
}

/// Display names are member-controlled. Only the HTML metacharacters are encoded so names read
/// naturally in mail clients.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
