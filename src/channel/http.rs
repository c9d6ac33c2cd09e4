use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{ChannelClient, ChannelClientFactory, ChannelError, MessageContent, SendOutcome};
use crate::{
    phone::{PhoneNumber, CHANNEL_PREFIX},
    tenants::ChannelCredentials,
};

pub const DEFAULT_API_BASE_URL: &str = "https://api.twilio.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct MessageResource {
    sid: String,
}

/// Twilio-compatible messages API client for one account.
pub struct HttpChannelClient {
    http: reqwest::Client,
    messages_url: Url,
    credentials: ChannelCredentials,
}

impl HttpChannelClient {
    fn from_address(&self) -> String {
        let from = self.credentials.from_address.trim();
        if from.starts_with(CHANNEL_PREFIX) {
            from.to_string()
        } else {
            format!("{CHANNEL_PREFIX}{from}")
        }
    }

    fn form(
        &self,
        to: &PhoneNumber,
        content: &MessageContent,
        status_callback: &str,
    ) -> Vec<(&'static str, String)> {
        let mut form = vec![("From", self.from_address()), ("To", to.channel_address())];
        match content {
            MessageContent::Template {
                template_id,
                variables,
            } => {
                form.push(("ContentSid", template_id.clone()));
                form.push(("ContentVariables", content_variables(variables)));
            }
            MessageContent::Text { body } => form.push(("Body", body.clone())),
        }
        form.push(("StatusCallback", status_callback.to_string()));
        form
    }
}

/// Positional template variables keyed "1", "2", ... as the provider expects.
pub fn content_variables(variables: &[String]) -> String {
    let keyed: serde_json::Map<String, serde_json::Value> = variables
        .iter()
        .enumerate()
        .map(|(index, value)| ((index + 1).to_string(), value.as_str().into()))
        .collect();
    serde_json::Value::Object(keyed).to_string()
}

#[async_trait]
impl ChannelClient for HttpChannelClient {
    async fn send(
        &self,
        to: &PhoneNumber,
        content: &MessageContent,
        status_callback: &str,
    ) -> SendOutcome {
        let response = match self
            .http
            .post(self.messages_url.clone())
            .basic_auth(&self.credentials.account_id, Some(&self.credentials.secret))
            .form(&self.form(to, content, status_callback))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return SendOutcome::Failed {
                    reason: format!("request failed: {err}"),
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return SendOutcome::Failed {
                reason: format!("provider returned {status}: {body}"),
            };
        }

        match response.json::<MessageResource>().await {
            Ok(resource) => SendOutcome::Sent {
                provider_message_id: resource.sid,
            },
            Err(err) => SendOutcome::Failed {
                reason: format!("unreadable provider response: {err}"),
            },
        }
    }
}

pub struct HttpChannelFactory {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpChannelFactory {
    pub fn new(base_url: &str) -> Result<Self, ChannelError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| ChannelError::Configuration(format!("invalid API base URL: {err}")))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ChannelError::Configuration(err.to_string()))?;
        Ok(Self { http, base_url })
    }

    fn messages_url(&self, account_id: &str) -> Result<Url, ChannelError> {
        self.base_url
            .join(&format!("/2010-04-01/Accounts/{account_id}/Messages.json"))
            .map_err(|err| ChannelError::Configuration(format!("invalid account id: {err}")))
    }
}

impl ChannelClientFactory for HttpChannelFactory {
    fn build(&self, credentials: ChannelCredentials) -> Result<Arc<dyn ChannelClient>, ChannelError> {
        let messages_url = self.messages_url(&credentials.account_id)?;
        Ok(Arc::new(HttpChannelClient {
            http: self.http.clone(),
            messages_url,
            credentials,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phone::PhoneNormalizer;

    fn credentials() -> ChannelCredentials {
        ChannelCredentials {
            account_id: "AC123".into(),
            secret: "token".into(),
            from_address: "+5511888888888".into(),
        }
    }

    fn client() -> HttpChannelClient {
        let factory = HttpChannelFactory::new(DEFAULT_API_BASE_URL).unwrap();
        HttpChannelClient {
            http: factory.http.clone(),
            messages_url: factory.messages_url("AC123").unwrap(),
            credentials: credentials(),
        }
    }

    #[test]
    fn builds_account_messages_url() {
        let factory = HttpChannelFactory::new("https://api.twilio.com").unwrap();
        assert_eq!(
            factory.messages_url("AC123").unwrap().as_str(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            HttpChannelFactory::new("not a url"),
            Err(ChannelError::Configuration(_))
        ));
    }

    #[test]
    fn numbers_template_variables_from_one() {
        let json = content_variables(&["Maria".into(), "01/03/2025".into(), "09:00".into()]);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["1"], "Maria");
        assert_eq!(parsed["2"], "01/03/2025");
        assert_eq!(parsed["3"], "09:00");
    }

    #[test]
    fn text_form_carries_body_and_callback() {
        let to = PhoneNormalizer::default().normalize("+5511999999999").unwrap();
        let form = client().form(
            &to,
            &MessageContent::text("Olá"),
            "https://hooks.example/api/whatsapp/webhook",
        );
        assert!(form.contains(&("From", "whatsapp:+5511888888888".to_string())));
        assert!(form.contains(&("To", "whatsapp:+5511999999999".to_string())));
        assert!(form.contains(&("Body", "Olá".to_string())));
        assert!(form.contains(&(
            "StatusCallback",
            "https://hooks.example/api/whatsapp/webhook".to_string()
        )));
    }

    #[test]
    fn template_form_uses_content_sid() {
        let to = PhoneNormalizer::default().normalize("+5511999999999").unwrap();
        let form = client().form(
            &to,
            &MessageContent::Template {
                template_id: "HX1".into(),
                variables: vec!["Maria".into()],
            },
            "https://hooks.example/api/whatsapp/webhook",
        );
        assert!(form.contains(&("ContentSid", "HX1".to_string())));
        assert!(!form.iter().any(|(key, _)| *key == "Body"));
        assert_eq!(
            form.iter().filter(|(key, _)| *key == "StatusCallback").count(),
            1
        );
    }
}
