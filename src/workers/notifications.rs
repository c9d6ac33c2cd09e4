use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info};

use super::{delivery::deliver, JobExecution, JobHandler};
use crate::{
    error::PipelineError,
    jobs::{NotificationJob, QueuePayload, QUEUE_NOTIFICATIONS},
    messages,
    models::{Appointment, AppointmentId, AppointmentStatus, Job, MessageKind, TenantId},
    replies::{apply_reply, ensure_follow_up, ReplyToken},
    state::AppState,
};

/// Handles every job on the notifications queue.
pub struct NotificationDispatcher;

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for NotificationDispatcher {
    fn queue(&self) -> &'static str {
        QUEUE_NOTIFICATIONS
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload = match NotificationJob::decode(&job) {
            Ok(payload) => payload,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "invalid notification payload");
                return JobExecution::Failed {
                    error: format!("invalid notification payload: {err}"),
                };
            }
        };

        match payload {
            NotificationJob::Appointment { appointment_id, .. } => {
                mark_sent(&state, appointment_id).await.into()
            }
            NotificationJob::AppointmentLeadTime {
                tenant_id,
                appointment_id,
                lead_hours,
            } => {
                debug!(job_id = %job.id, appointment_id, lead_hours, "lead-time notification");
                send_confirmation_request(&state, tenant_id, appointment_id)
                    .await
                    .into()
            }
            NotificationJob::AppointmentResponse {
                tenant_id,
                appointment_id,
                reply,
                ..
            } => handle_response(&state, tenant_id, appointment_id, &reply)
                .await
                .into(),
            NotificationJob::BusinessAreaReport {
                tenant_id,
                date,
                appointment_count,
            } => match state
                .ops
                .business_area_report(tenant_id, date, appointment_count)
                .await
            {
                Ok(()) => JobExecution::Success,
                Err(err) => JobExecution::Retry {
                    error: format!("business area report failed: {err}"),
                },
            },
            NotificationJob::ErrorAlert {
                process,
                error,
                job_id,
            } => match state.ops.error_alert(&process, &error, job_id).await {
                Ok(()) => JobExecution::Success,
                Err(err) => JobExecution::Retry {
                    error: format!("error alert failed: {err}"),
                },
            },
        }
    }
}

async fn load_appointment(
    state: &AppState,
    appointment_id: AppointmentId,
) -> Result<Appointment, PipelineError> {
    state
        .store
        .find_appointment(appointment_id)
        .await?
        .ok_or(PipelineError::UnknownAppointment(appointment_id))
}

async fn mark_sent(state: &AppState, appointment_id: AppointmentId) -> Result<(), PipelineError> {
    load_appointment(state, appointment_id).await?;
    state.store.mark_notification_sent(appointment_id).await?;
    Ok(())
}

async fn send_confirmation_request(
    state: &AppState,
    tenant_id: TenantId,
    appointment_id: AppointmentId,
) -> Result<(), PipelineError> {
    let appointment = load_appointment(state, appointment_id).await?;
    if appointment.status != AppointmentStatus::Scheduled || appointment.notification_sent {
        info!(
            appointment_id,
            status = appointment.status.as_str(),
            notification_sent = appointment.notification_sent,
            "skipping confirmation request"
        );
        return Ok(());
    }

    let already_delivered = state
        .store
        .count_notifications(appointment.id, MessageKind::ConfirmationRequest)
        .await?
        > 0;
    if already_delivered {
        info!(appointment_id, "confirmation request already delivered");
    } else {
        let tenant = state.tenants.by_id(tenant_id).await?;
        let phone = state.phones.normalize(&appointment.patient_phone)?;
        let content = messages::confirmation_request(&appointment, &tenant);
        deliver(
            state,
            &tenant,
            Some(appointment.id),
            &phone,
            MessageKind::ConfirmationRequest,
            &content,
        )
        .await?;
    }
    state.store.mark_notification_sent(appointment.id).await?;
    Ok(())
}

/// Follow-up for a reply the interpreter could not classify. Re-prompts up to
/// the configured limit, then sends the contact fallback once.
async fn handle_response(
    state: &AppState,
    tenant_id: TenantId,
    appointment_id: AppointmentId,
    reply: &str,
) -> Result<(), PipelineError> {
    let appointment = load_appointment(state, appointment_id).await?;
    let tenant = state.tenants.by_id(tenant_id).await?;
    if appointment.status != AppointmentStatus::Scheduled {
        debug!(
            appointment_id,
            status = appointment.status.as_str(),
            "appointment no longer awaits a reply"
        );
        ensure_follow_up(state, &tenant, &appointment).await?;
        return Ok(());
    }

    if let Some(token) = ReplyToken::parse(reply) {
        apply_reply(state, &tenant, &appointment, token, reply, Utc::now().naive_utc()).await?;
        return Ok(());
    }

    let fallbacks = state
        .store
        .count_notifications(appointment.id, MessageKind::Fallback)
        .await?;
    if fallbacks > 0 {
        info!(appointment_id, "fallback already sent, ignoring reply");
        return Ok(());
    }

    let reprompts = state
        .store
        .count_notifications(appointment.id, MessageKind::Reprompt)
        .await?;
    let (kind, content) = if reprompts < state.config.max_reprompts {
        (
            MessageKind::Reprompt,
            messages::reprompt(&appointment, &tenant),
        )
    } else {
        (MessageKind::Fallback, messages::fallback(&tenant))
    };

    let phone = state.phones.normalize(&appointment.patient_phone)?;
    deliver(state, &tenant, Some(appointment.id), &phone, kind, &content).await?;
    info!(
        appointment_id,
        reprompts,
        kind = kind.as_str(),
        "answered unrecognised reply"
    );
    Ok(())
}
