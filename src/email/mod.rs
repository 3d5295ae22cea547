/*!
 * Email Module
 * Thin wrapper over the Resend HTTP API
 */
pub mod templates;

use once_cell::sync::Lazy;
use serde::Serialize;
use thiserror::Error;

use crate::config::CONFIG;
use templates::RenderedEmail;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap_or_default()
});

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email delivery is not configured (RESEND_API_KEY missing)")]
    NotConfigured,

    #[error("email provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("email provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<ResendHeaders>,
}

#[derive(Debug, Serialize)]
struct ResendHeaders {
    #[serde(rename = "List-Unsubscribe")]
    list_unsubscribe: String,
}

pub async fn send(
    to: &str,
    email: &RenderedEmail,
    unsubscribe_url: Option<&str>,
) -> Result<(), EmailError> {
    let api_key = CONFIG
        .resend_api_key
        .as_deref()
        .ok_or(EmailError::NotConfigured)?;

    let payload = ResendPayload {
        from: &CONFIG.email_from,
        to: [to],
        subject: &email.subject,
        html: &email.html,
        headers: unsubscribe_url.map(|url| ResendHeaders {
            list_unsubscribe: format!("<{}>", url),
        }),
    };

    let response = HTTP_CLIENT
        .post(RESEND_ENDPOINT)
        .bearer_auth(api_key)
        .json(&payload)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EmailError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    tracing::info!(to = %to, subject = %email.subject, "email sent");
    Ok(())
}

/// Send and log failures instead of propagating them. Returns whether it went out.
pub async fn send_or_log(to: &str, email: &RenderedEmail, unsubscribe_url: Option<&str>) -> bool {
    match send(to, email, unsubscribe_url).await {
        Ok(()) => true,
        Err(EmailError::NotConfigured) => {
            tracing::warn!(to = %to, subject = %email.subject, "email skipped: delivery not configured");
            false
        }
        Err(e) => {
            tracing::error!(to = %to, subject = %email.subject, error = %e, "failed to send email");
            false
        }
    }
}

pub fn confirm_url(token: &str) -> String {
    CONFIG.site_link(&format!("newsletter/confirm?token={}", token))
}

pub fn unsubscribe_url(token: &str) -> String {
    CONFIG.site_link(&format!("newsletter/unsubscribe?token={}", token))
}

pub async fn send_confirmation(to: &str, confirmation_token: &str, unsubscribe_token: &str) -> bool {
    let unsubscribe = unsubscribe_url(unsubscribe_token);
    let email = templates::confirmation(
        &CONFIG.site_name,
        &CONFIG.site_url,
        &confirm_url(confirmation_token),
        &unsubscribe,
    );
    send_or_log(to, &email, Some(&unsubscribe)).await
}

pub async fn send_welcome(to: &str, unsubscribe_token: &str) -> bool {
    let unsubscribe = unsubscribe_url(unsubscribe_token);
    let email = templates::welcome(&CONFIG.site_name, &CONFIG.site_url, &unsubscribe);
    send_or_log(to, &email, Some(&unsubscribe)).await
}

pub async fn send_broadcast(
    to: &str,
    subject: &str,
    content_html: &str,
    unsubscribe_token: &str,
) -> bool {
    let unsubscribe = unsubscribe_url(unsubscribe_token);
    let email = templates::broadcast(
        &CONFIG.site_name,
        &CONFIG.site_url,
        subject,
        content_html,
        &unsubscribe,
    );
    send_or_log(to, &email, Some(&unsubscribe)).await
}

pub async fn send_reply_notification(
    to: &str,
    recipient_name: &str,
    original_subject: &str,
    reply_content: &str,
) -> bool {
    let email = templates::reply_notification(
        &CONFIG.site_name,
        &CONFIG.site_url,
        recipient_name,
        original_subject,
        reply_content,
    );
    send_or_log(to, &email, None).await
}
