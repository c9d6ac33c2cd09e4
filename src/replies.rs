use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::{
    error::PipelineError,
    jobs::{enqueue_payload, DeliveryJob, EnqueueOptions, JobHandle, NotificationJob},
    messages,
    models::{
        Appointment, AppointmentKind, AppointmentStatus, DiscardReason, DiscardedMessage,
        MessageKind, Tenant,
    },
    phone::PhoneNumber,
    state::AppState,
    store::{AppointmentFilter, AppointmentPatch, ReplyTransition},
};

const AFFIRMATIVE: &[&str] = &[
    "sim",
    "confirma presença",
    "confirmar presença",
    "confirmar",
    "confirmo",
];
const NEGATIVE: &[&str] = &["não", "nao", "cancelar", "cancela", "desmarcar"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyToken {
    Confirm,
    Cancel,
}

impl ReplyToken {
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let normalized = normalized.trim_end_matches(&['.', '!'][..]);
        if AFFIRMATIVE.contains(&normalized) {
            Some(Self::Confirm)
        } else if NEGATIVE.contains(&normalized) {
            Some(Self::Cancel)
        } else {
            None
        }
    }

    pub fn target_status(self) -> AppointmentStatus {
        match self {
            Self::Confirm => AppointmentStatus::Confirmed,
            Self::Cancel => AppointmentStatus::Cancelled,
        }
    }

    /// The token that moved an appointment into `status`, if any.
    pub fn resolving(status: AppointmentStatus) -> Option<Self> {
        match status {
            AppointmentStatus::Confirmed => Some(Self::Confirm),
            AppointmentStatus::Cancelled => Some(Self::Cancel),
            _ => None,
        }
    }

    pub fn acknowledgment_kind(self) -> MessageKind {
        match self {
            Self::Confirm => MessageKind::ConfirmationAck,
            Self::Cancel => MessageKind::CancellationAck,
        }
    }
}

/// One provider callback: either a delivery status update for an outbound
/// message or a patient reply.
#[derive(Debug, Clone, Default)]
pub struct InboundEvent {
    pub account_id: Option<String>,
    pub message_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<String>,
    pub reply: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl InboundEvent {
    pub fn message_id(&self) -> Option<&str> {
        present(&self.message_id)
    }

    pub fn status(&self) -> Option<&str> {
        present(&self.status)
    }

    pub fn reply(&self) -> Option<&str> {
        present(&self.reply)
    }

    /// The patient side of the conversation. Replies come from the patient,
    /// status callbacks are addressed to them.
    pub fn patient_address(&self) -> Option<&str> {
        if self.reply().is_some() {
            present(&self.from)
        } else {
            present(&self.to).or_else(|| present(&self.from))
        }
    }

    fn has_minimum_fields(&self) -> bool {
        self.message_id().is_some()
            && self.patient_address().is_some()
            && (self.status().is_some() || self.reply().is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Discarded(DiscardReason),
    StatusRecorded { appointment_id: i64 },
    AlreadyResolved { appointment_id: i64 },
    Transitioned {
        appointment_id: i64,
        status: AppointmentStatus,
    },
    AwaitingValidReply { appointment_id: i64 },
}

pub struct ReplyInterpreter {
    state: Arc<AppState>,
}

impl ReplyInterpreter {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn handle(
        &self,
        event: InboundEvent,
        now: NaiveDateTime,
    ) -> Result<ReplyOutcome, PipelineError> {
        let account_id = event.account_id.as_deref().unwrap_or_default();
        let tenant = match self.state.tenants.by_account_id(account_id).await {
            Ok(tenant) => tenant,
            Err(PipelineError::UnknownTenant(account)) => {
                warn!(%account, "inbound event for unknown account");
                return self
                    .discard(None, &event, DiscardReason::UnknownTenant, now)
                    .await;
            }
            Err(err) => return Err(err),
        };

        if !event.has_minimum_fields() {
            return self
                .discard(Some(&tenant), &event, DiscardReason::InvalidMessageFormat, now)
                .await;
        }

        if let (Some(message_id), Some(status)) = (event.message_id(), event.status()) {
            let known = self
                .state
                .store
                .update_delivery_status(message_id, status)
                .await?;
            debug!(%message_id, %status, known, "delivery status received");
        }

        let phone = match event
            .patient_address()
            .map(|address| self.state.phones.normalize(address))
        {
            Some(Ok(phone)) => phone,
            _ => {
                return self
                    .discard(Some(&tenant), &event, DiscardReason::InvalidMessageFormat, now)
                    .await
            }
        };

        let Some(appointment) = self.resolve_appointment(&tenant, &phone).await? else {
            return self
                .discard(Some(&tenant), &event, DiscardReason::NoAppointmentFound, now)
                .await;
        };

        let outcome = if appointment.status.is_reply_terminal() {
            if event.reply().is_some() {
                ensure_follow_up(&self.state, &tenant, &appointment).await?;
            }
            ReplyOutcome::AlreadyResolved {
                appointment_id: appointment.id,
            }
        } else {
            match event.reply() {
                Some(reply) => match ReplyToken::parse(reply) {
                    Some(token) => {
                        apply_reply(&self.state, &tenant, &appointment, token, reply, now).await?
                    }
                    None => {
                        let message_id = event.message_id().unwrap_or_default();
                        enqueue_payload(
                            self.state.queue.as_ref(),
                            &NotificationJob::AppointmentResponse {
                                tenant_id: tenant.id,
                                appointment_id: appointment.id,
                                message_id: message_id.to_string(),
                                reply: reply.to_string(),
                            },
                            EnqueueOptions::default()
                                .max_attempts(self.state.config.notification_max_attempts)
                                .dedupe_key(format!("reply:{message_id}")),
                        )
                        .await?;
                        ReplyOutcome::AwaitingValidReply {
                            appointment_id: appointment.id,
                        }
                    }
                },
                None => ReplyOutcome::StatusRecorded {
                    appointment_id: appointment.id,
                },
            }
        };

        self.state
            .store
            .update_appointment(
                appointment.id,
                AppointmentPatch {
                    last_interaction_at: Some(now),
                    last_channel_status: event.status().map(str::to_string),
                    last_reply: event.reply().map(str::to_string),
                    ..AppointmentPatch::default()
                },
            )
            .await?;

        Ok(outcome)
    }

    /// Latest-created scheduled appointment for the sender, falling back to the
    /// latest one already resolved by a reply so replays are recognised.
    async fn resolve_appointment(
        &self,
        tenant: &Tenant,
        phone: &PhoneNumber,
    ) -> Result<Option<Appointment>, PipelineError> {
        let base = AppointmentFilter {
            tenant_id: Some(tenant.id),
            patient_phone: Some(phone.e164().to_string()),
            ..AppointmentFilter::default()
        };

        let scheduled = self
            .state
            .store
            .find_appointments(base.clone().with_status(AppointmentStatus::Scheduled))
            .await?;
        if let Some(appointment) = scheduled.into_iter().next() {
            return Ok(Some(appointment));
        }

        let resolved = self
            .state
            .store
            .find_appointments(
                base.with_status(AppointmentStatus::Confirmed)
                    .with_status(AppointmentStatus::Cancelled),
            )
            .await?;
        Ok(resolved.into_iter().next())
    }

    async fn discard(
        &self,
        tenant: Option<&Tenant>,
        event: &InboundEvent,
        reason: DiscardReason,
        now: NaiveDateTime,
    ) -> Result<ReplyOutcome, PipelineError> {
        info!(reason = reason.as_str(), "discarding inbound event");
        self.state
            .store
            .record_discarded(DiscardedMessage {
                tenant_id: tenant.map(|tenant| tenant.id),
                message_id: event.message_id.clone(),
                sender: event.from.clone(),
                content: event.reply.clone(),
                reason,
                received_at: now,
            })
            .await?;
        Ok(ReplyOutcome::Discarded(reason))
    }
}

/// Moves a scheduled appointment to its reply-driven terminal state and queues
/// the acknowledgment. Losing the race to another reply counts as resolved.
pub async fn apply_reply(
    state: &AppState,
    tenant: &Tenant,
    appointment: &Appointment,
    token: ReplyToken,
    raw_reply: &str,
    now: NaiveDateTime,
) -> Result<ReplyOutcome, PipelineError> {
    let target = token.target_status();
    let moved = state
        .store
        .transition_appointment(
            appointment.id,
            ReplyTransition {
                to: target,
                confirmed_at: now,
                response: raw_reply.to_string(),
            },
        )
        .await?;

    if !moved {
        info!(appointment_id = appointment.id, "appointment already resolved");
        return Ok(ReplyOutcome::AlreadyResolved {
            appointment_id: appointment.id,
        });
    }

    state
        .store
        .record_response(appointment.id, raw_reply, now)
        .await?;
    enqueue_follow_up(state, tenant, appointment, token).await?;

    info!(
        appointment_id = appointment.id,
        tenant_id = tenant.id,
        status = target.as_str(),
        "appointment resolved by patient reply"
    );
    Ok(ReplyOutcome::Transitioned {
        appointment_id: appointment.id,
        status: target,
    })
}

/// Re-queues the acknowledgment for an appointment a reply already resolved
/// when none was ever delivered. Returns whether a new job was queued.
pub async fn ensure_follow_up(
    state: &AppState,
    tenant: &Tenant,
    appointment: &Appointment,
) -> Result<bool, PipelineError> {
    let Some(token) = ReplyToken::resolving(appointment.status) else {
        return Ok(false);
    };
    if appointment.confirmation_response.is_none() {
        return Ok(false);
    }
    let delivered = state
        .store
        .count_notifications(appointment.id, token.acknowledgment_kind())
        .await?;
    if delivered > 0 {
        return Ok(false);
    }

    let handle = enqueue_follow_up(state, tenant, appointment, token).await?;
    if !handle.deduplicated {
        warn!(
            appointment_id = appointment.id,
            "re-queued missing reply acknowledgment"
        );
    }
    Ok(!handle.deduplicated)
}

/// At most one live acknowledgment job per appointment.
async fn enqueue_follow_up(
    state: &AppState,
    tenant: &Tenant,
    appointment: &Appointment,
    token: ReplyToken,
) -> Result<JobHandle, PipelineError> {
    let content = match token {
        ReplyToken::Confirm => {
            let link = match (appointment.kind, appointment.procedure_code.as_deref()) {
                (AppointmentKind::Procedure, Some(code)) => {
                    tenant.documents.lookup(code, appointment.time)
                }
                _ => None,
            };
            messages::confirmation_ack(appointment, link)
        }
        ReplyToken::Cancel => messages::cancellation_ack(),
    };

    let phone = state.phones.normalize(&appointment.patient_phone)?;
    let handle = enqueue_payload(
        state.queue.as_ref(),
        &DeliveryJob::SendMessage {
            tenant_id: tenant.id,
            appointment_id: Some(appointment.id),
            to: phone.e164().to_string(),
            message_kind: token.acknowledgment_kind(),
            content,
        },
        EnqueueOptions::default()
            .max_attempts(state.config.notification_max_attempts)
            .dedupe_key(format!("follow_up:{}", appointment.id)),
    )
    .await?;
    Ok(handle)
}
