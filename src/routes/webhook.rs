use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, State},
    http::StatusCode,
    Form, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{
    jobs::{enqueue_payload, EnqueueOptions, NotificationJob},
    replies::{InboundEvent, ReplyInterpreter},
    state::AppState,
};

/// Provider callback body. Delivery status updates and patient replies share
/// the same shape; older callbacks use the `Sms*` names.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookForm {
    #[serde(rename = "AccountSid")]
    pub account_sid: Option<String>,
    #[serde(rename = "MessageSid", alias = "SmsSid")]
    pub message_sid: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
    #[serde(rename = "MessageStatus", alias = "SmsStatus")]
    pub message_status: Option<String>,
    #[serde(rename = "ButtonText")]
    pub button_text: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
}

impl From<WebhookForm> for InboundEvent {
    fn from(form: WebhookForm) -> Self {
        let reply = form
            .button_text
            .filter(|text| !text.trim().is_empty())
            .or(form.body);
        Self {
            account_id: form.account_sid,
            message_id: form.message_sid,
            from: form.from,
            to: form.to,
            status: form.message_status,
            reply,
        }
    }
}

/// Always acknowledges so the provider never retries a callback we already
/// saw; failures are raised as an `error_alert` job instead.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> (StatusCode, Json<Value>) {
    match form {
        Ok(Form(form)) => {
            let event = InboundEvent::from(form);
            let interpreter = ReplyInterpreter::new(state.clone());
            match interpreter.handle(event, Utc::now().naive_utc()).await {
                Ok(outcome) => info!(?outcome, "webhook processed"),
                Err(err) => {
                    error!(error = %err, "webhook processing failed");
                    let alert = NotificationJob::error_alert("webhook", &err);
                    if let Err(alert_err) =
                        enqueue_payload(state.queue.as_ref(), &alert, EnqueueOptions::default())
                            .await
                    {
                        error!(error = %alert_err, "failed to raise error alert");
                    }
                }
            }
        }
        Err(rejection) => warn!(error = %rejection, "unreadable webhook body"),
    }

    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": "webhook received" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_text_wins_over_body() {
        let event = InboundEvent::from(WebhookForm {
            button_text: Some("Sim".into()),
            body: Some("sim, confirmo".into()),
            ..WebhookForm::default()
        });
        assert_eq!(event.reply.as_deref(), Some("Sim"));

        let event = InboundEvent::from(WebhookForm {
            button_text: Some(" ".into()),
            body: Some("Cancelar".into()),
            ..WebhookForm::default()
        });
        assert_eq!(event.reply.as_deref(), Some("Cancelar"));
    }
}
