use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use tokio::sync::Mutex;

use super::{
    AppointmentFilter, AppointmentPatch, AppointmentStore, NotificationLog, ReplyTransition,
    StoreError, StoreResult, TenantStore,
};
use crate::models::{
    Appointment, AppointmentId, AppointmentStatus, DiscardedMessage, MessageKind, NewAppointment,
    NewNotification, NewTenant, NotificationRecord, Tenant, TenantId,
};

#[derive(Default)]
struct MemoryState {
    tenants: Vec<Tenant>,
    appointments: Vec<Appointment>,
    notifications: Vec<NotificationRecord>,
    discarded: Vec<DiscardedMessage>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn appointment_mut(&mut self, id: AppointmentId) -> StoreResult<&mut Appointment> {
        self.appointments
            .iter_mut()
            .find(|appointment| appointment.id == id)
            .ok_or(StoreError::AppointmentNotFound(id))
    }
}

/// In-process store backing local runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn discarded(&self) -> Vec<DiscardedMessage> {
        self.state.lock().await.discarded.clone()
    }

    /// Inserts a fully built appointment under its own id, as imported records
    /// arrive. Later generated ids continue above it.
    pub async fn insert_appointment(&self, appointment: Appointment) -> StoreResult<Appointment> {
        let mut state = self.state.lock().await;
        if state
            .appointments
            .iter()
            .any(|existing| existing.id == appointment.id)
        {
            return Err(StoreError::Corrupt(format!(
                "appointment {} already exists",
                appointment.id
            )));
        }
        state.next_id = state.next_id.max(appointment.id);
        state.appointments.push(appointment.clone());
        Ok(appointment)
    }

    /// Overrides the creation time, mainly to arrange ordering in tests.
    pub async fn set_created_at(&self, id: AppointmentId, at: NaiveDateTime) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.appointment_mut(id)?.created_at = at;
        Ok(())
    }
}

#[async_trait]
impl AppointmentStore for MemoryStore {
    async fn find_appointments(&self, filter: AppointmentFilter) -> StoreResult<Vec<Appointment>> {
        let state = self.state.lock().await;
        let mut found: Vec<Appointment> = state
            .appointments
            .iter()
            .filter(|appointment| filter.matches(appointment))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn update_appointment(
        &self,
        id: AppointmentId,
        patch: AppointmentPatch,
    ) -> StoreResult<Appointment> {
        let mut state = self.state.lock().await;
        let appointment = state.appointment_mut(id)?;
        patch.apply(appointment);
        Ok(appointment.clone())
    }

    async fn create_appointment(&self, data: NewAppointment) -> StoreResult<Appointment> {
        let mut state = self.state.lock().await;
        let appointment = Appointment {
            id: state.next_id(),
            tenant_id: data.tenant_id,
            patient_name: data.patient_name,
            patient_phone: data.patient_phone,
            patient_document: data.patient_document,
            date: data.date,
            time: data.time,
            status: AppointmentStatus::Scheduled,
            kind: data.kind,
            specialty: data.specialty,
            procedure_code: data.procedure_code,
            notification_sent: false,
            notification_sent_at: None,
            last_interaction_at: None,
            last_channel_status: None,
            last_reply: None,
            confirmed_at: None,
            confirmation_response: None,
            created_at: Utc::now().naive_utc(),
        };
        state.appointments.push(appointment.clone());
        Ok(appointment)
    }

    async fn mark_notification_sent(&self, id: AppointmentId) -> StoreResult<Appointment> {
        self.update_appointment(
            id,
            AppointmentPatch {
                notification_sent: Some(true),
                notification_sent_at: Some(Utc::now().naive_utc()),
                ..AppointmentPatch::default()
            },
        )
        .await
    }

    async fn transition_appointment(
        &self,
        id: AppointmentId,
        transition: ReplyTransition,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let appointment = state.appointment_mut(id)?;
        if appointment.status != AppointmentStatus::Scheduled {
            return Ok(false);
        }
        appointment.status = transition.to;
        appointment.confirmed_at = Some(transition.confirmed_at);
        appointment.confirmation_response = Some(transition.response);
        Ok(true)
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn find_tenant_by_channel_account_id(
        &self,
        account_id: &str,
    ) -> StoreResult<Option<Tenant>> {
        let state = self.state.lock().await;
        Ok(state
            .tenants
            .iter()
            .find(|tenant| tenant.channel_account_id == account_id)
            .cloned())
    }

    async fn find_tenant_by_id(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        let state = self.state.lock().await;
        Ok(state.tenants.iter().find(|tenant| tenant.id == id).cloned())
    }

    async fn create_tenant(&self, data: NewTenant) -> StoreResult<Tenant> {
        let mut state = self.state.lock().await;
        let tenant = Tenant {
            id: state.next_id(),
            display_name: data.display_name,
            channel_account_id: data.channel_account_id,
            channel_secret: data.channel_secret,
            from_address: data.from_address,
            documents: data.documents,
            templates: data.templates,
            support_contact: data.support_contact,
        };
        state.tenants.push(tenant.clone());
        Ok(tenant)
    }
}

#[async_trait]
impl NotificationLog for MemoryStore {
    async fn record_notification(&self, data: NewNotification) -> StoreResult<NotificationRecord> {
        let mut state = self.state.lock().await;
        let record = NotificationRecord {
            id: state.next_id(),
            tenant_id: data.tenant_id,
            appointment_id: data.appointment_id,
            kind: data.kind,
            delivery_status: data.delivery_status,
            provider_message_id: data.provider_message_id,
            reply_text: None,
            sent_at: Utc::now().naive_utc(),
            responded_at: None,
            template_used: data.template_used,
        };
        state.notifications.push(record.clone());
        Ok(record)
    }

    async fn update_delivery_status(
        &self,
        provider_message_id: &str,
        status: &str,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state
            .notifications
            .iter_mut()
            .find(|record| record.provider_message_id.as_deref() == Some(provider_message_id))
        {
            Some(record) => {
                record.delivery_status = status.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_response(
        &self,
        appointment_id: AppointmentId,
        reply: &str,
        at: NaiveDateTime,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(record) = state
            .notifications
            .iter_mut()
            .rev()
            .find(|record| {
                record.appointment_id == Some(appointment_id)
                    && matches!(
                        record.kind,
                        MessageKind::ConfirmationRequest | MessageKind::Reprompt
                    )
            })
        {
            record.reply_text = Some(reply.to_string());
            record.responded_at = Some(at);
        }
        Ok(())
    }

    async fn count_notifications(
        &self,
        appointment_id: AppointmentId,
        kind: MessageKind,
    ) -> StoreResult<i64> {
        let state = self.state.lock().await;
        let count = state
            .notifications
            .iter()
            .filter(|record| record.appointment_id == Some(appointment_id) && record.kind == kind)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn notifications_for(
        &self,
        appointment_id: AppointmentId,
    ) -> StoreResult<Vec<NotificationRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .filter(|record| record.appointment_id == Some(appointment_id))
            .cloned()
            .collect())
    }

    async fn record_discarded(&self, message: DiscardedMessage) -> StoreResult<()> {
        self.state.lock().await.discarded.push(message);
        Ok(())
    }
}
