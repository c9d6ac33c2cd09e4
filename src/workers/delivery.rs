use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::{JobExecution, JobHandler};
use crate::{
    channel::{MessageContent, SendOutcome},
    error::PipelineError,
    jobs::{DeliveryJob, QueuePayload, QUEUE_DELIVERY},
    models::{AppointmentId, Job, MessageKind, NewNotification, Tenant},
    phone::PhoneNumber,
    state::AppState,
};

pub struct DeliveryDispatcher;

impl DeliveryDispatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeliveryDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for DeliveryDispatcher {
    fn queue(&self) -> &'static str {
        QUEUE_DELIVERY
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload = match DeliveryJob::decode(&job) {
            Ok(payload) => payload,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "invalid delivery payload");
                return JobExecution::Failed {
                    error: format!("invalid delivery payload: {err}"),
                };
            }
        };

        match payload {
            DeliveryJob::SendMessage {
                tenant_id,
                appointment_id,
                to,
                message_kind,
                content,
            } => {
                let result: Result<(), PipelineError> = async {
                    let tenant = state.tenants.by_id(tenant_id).await?;
                    let phone = state.phones.normalize(&to)?;
                    deliver(&state, &tenant, appointment_id, &phone, message_kind, &content)
                        .await
                        .map(|_| ())
                }
                .await;
                result.into()
            }
        }
    }
}

/// Sends `content` through the tenant's channel client and logs the outbound
/// message. A provider rejection is a recoverable failure.
pub(crate) async fn deliver(
    state: &AppState,
    tenant: &Tenant,
    appointment_id: Option<AppointmentId>,
    to: &PhoneNumber,
    kind: MessageKind,
    content: &MessageContent,
) -> Result<String, PipelineError> {
    match state.channel.send(tenant, to, content).await? {
        SendOutcome::Sent {
            provider_message_id,
        } => {
            state
                .store
                .record_notification(NewNotification {
                    tenant_id: tenant.id,
                    appointment_id,
                    kind,
                    delivery_status: "sent".to_string(),
                    provider_message_id: Some(provider_message_id.clone()),
                    template_used: content.template_id().map(str::to_string),
                })
                .await?;
            info!(
                tenant_id = tenant.id,
                appointment_id = ?appointment_id,
                kind = kind.as_str(),
                %provider_message_id,
                "message delivered to channel"
            );
            Ok(provider_message_id)
        }
        SendOutcome::Failed { reason } => Err(PipelineError::RecoverableDelivery(reason)),
    }
}
