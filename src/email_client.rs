use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::time;

use crate::domain::email_address::EmailAddress;

const DEFAULT_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Transactional mail sender (password resets) speaking the SendGrid v3 `mail/send` API.
pub struct EmailClient {
    http_client: Client,
    base_url: String,
    sender: EmailAddress,
    api_key: Secret<String>,
}

#[derive(serde::Serialize)]
struct MailSendRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: [Content<'a>; 2],
}

#[derive(serde::Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(serde::Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(serde::Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    mime_type: &'static str,
    value: &'a str,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: EmailAddress,
        api_key: Secret<String>,
        timeout: Option<time::Duration>,
    ) -> Result<EmailClient, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;

        Ok(EmailClient {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sender,
            api_key,
        })
    }

    /// Sends a single message with a plain text and an HTML alternative.
    ///
    /// Any non 2xx answer from the provider is returned as an error.
    pub async fn send_email(
        &self,
        recipient: &EmailAddress,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> Result<(), reqwest::Error> {
        let body = MailSendRequest {
            personalizations: [Personalization {
                to: [Address {
                    email: recipient.as_ref(),
                }],
            }],
            from: Address {
                email: self.sender.as_ref(),
            },
            subject,
            // SendGrid rejects text/html listed before text/plain
            content: [
                Content {
                    mime_type: "text/plain",
                    value: text_content,
                },
                Content {
                    mime_type: "text/html",
                    value: html_content,
                },
            ],
        };

        self.http_client
            .post(format!("{}/mail/send", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
