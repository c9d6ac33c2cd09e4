use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::models::{
    Appointment, AppointmentId, AppointmentStatus, DiscardedMessage, MessageKind, NewAppointment,
    NewNotification, NewTenant, NotificationRecord, Tenant, TenantId,
};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("appointment {0} not found")]
    AppointmentNotFound(AppointmentId),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Conjunctive appointment filter. Unset fields do not constrain the query.
#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub id: Option<AppointmentId>,
    pub tenant_id: Option<TenantId>,
    pub date: Option<NaiveDate>,
    /// Inclusive on both ends.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub statuses: Vec<AppointmentStatus>,
    pub notification_sent: Option<bool>,
    pub patient_phone: Option<String>,
}

impl AppointmentFilter {
    pub fn by_id(id: AppointmentId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: AppointmentStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.id.map_or(true, |id| appointment.id == id)
            && self
                .tenant_id
                .map_or(true, |tenant| appointment.tenant_id == tenant)
            && self.date.map_or(true, |date| appointment.date == date)
            && self
                .date_range
                .map_or(true, |(from, to)| appointment.date >= from && appointment.date <= to)
            && (self.statuses.is_empty() || self.statuses.contains(&appointment.status))
            && self
                .notification_sent
                .map_or(true, |sent| appointment.notification_sent == sent)
            && self
                .patient_phone
                .as_deref()
                .map_or(true, |phone| appointment.patient_phone == phone)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentPatch {
    pub status: Option<AppointmentStatus>,
    pub notification_sent: Option<bool>,
    pub notification_sent_at: Option<NaiveDateTime>,
    pub last_interaction_at: Option<NaiveDateTime>,
    pub last_channel_status: Option<String>,
    pub last_reply: Option<String>,
    pub confirmed_at: Option<NaiveDateTime>,
    pub confirmation_response: Option<String>,
}

impl AppointmentPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.notification_sent.is_none()
            && self.notification_sent_at.is_none()
            && self.last_interaction_at.is_none()
            && self.last_channel_status.is_none()
            && self.last_reply.is_none()
            && self.confirmed_at.is_none()
            && self.confirmation_response.is_none()
    }

    pub fn apply(self, appointment: &mut Appointment) {
        if let Some(status) = self.status {
            appointment.status = status;
        }
        if let Some(sent) = self.notification_sent {
            appointment.notification_sent = sent;
        }
        if self.notification_sent_at.is_some() {
            appointment.notification_sent_at = self.notification_sent_at;
        }
        if self.last_interaction_at.is_some() {
            appointment.last_interaction_at = self.last_interaction_at;
        }
        if self.last_channel_status.is_some() {
            appointment.last_channel_status = self.last_channel_status;
        }
        if self.last_reply.is_some() {
            appointment.last_reply = self.last_reply;
        }
        if self.confirmed_at.is_some() {
            appointment.confirmed_at = self.confirmed_at;
        }
        if self.confirmation_response.is_some() {
            appointment.confirmation_response = self.confirmation_response;
        }
    }
}

/// Reply-driven move out of `scheduled`.
#[derive(Debug, Clone)]
pub struct ReplyTransition {
    pub to: AppointmentStatus,
    pub confirmed_at: NaiveDateTime,
    pub response: String,
}

#[async_trait]
pub trait AppointmentStore: Send + Sync + 'static {
    /// Matching appointments, most recently created first.
    async fn find_appointments(&self, filter: AppointmentFilter) -> StoreResult<Vec<Appointment>>;

    async fn update_appointment(
        &self,
        id: AppointmentId,
        patch: AppointmentPatch,
    ) -> StoreResult<Appointment>;

    async fn create_appointment(&self, data: NewAppointment) -> StoreResult<Appointment>;

    async fn mark_notification_sent(&self, id: AppointmentId) -> StoreResult<Appointment>;

    /// Applies the transition only while the appointment is still `scheduled`.
    /// Returns `false` when another reply already moved it.
    async fn transition_appointment(
        &self,
        id: AppointmentId,
        transition: ReplyTransition,
    ) -> StoreResult<bool>;

    async fn find_appointment(&self, id: AppointmentId) -> StoreResult<Option<Appointment>> {
        Ok(self
            .find_appointments(AppointmentFilter::by_id(id))
            .await?
            .into_iter()
            .next())
    }
}

#[async_trait]
pub trait TenantStore: Send + Sync + 'static {
    async fn find_tenant_by_channel_account_id(
        &self,
        account_id: &str,
    ) -> StoreResult<Option<Tenant>>;

    async fn find_tenant_by_id(&self, id: TenantId) -> StoreResult<Option<Tenant>>;

    async fn create_tenant(&self, data: NewTenant) -> StoreResult<Tenant>;
}

#[async_trait]
pub trait NotificationLog: Send + Sync + 'static {
    async fn record_notification(&self, data: NewNotification) -> StoreResult<NotificationRecord>;

    /// Correlates a provider status callback with the outbound message it
    /// belongs to. Returns `false` when the id is unknown.
    async fn update_delivery_status(
        &self,
        provider_message_id: &str,
        status: &str,
    ) -> StoreResult<bool>;

    /// Stores a patient reply on the latest confirmation request sent for the
    /// appointment.
    async fn record_response(
        &self,
        appointment_id: AppointmentId,
        reply: &str,
        at: NaiveDateTime,
    ) -> StoreResult<()>;

    async fn count_notifications(
        &self,
        appointment_id: AppointmentId,
        kind: MessageKind,
    ) -> StoreResult<i64>;

    async fn notifications_for(
        &self,
        appointment_id: AppointmentId,
    ) -> StoreResult<Vec<NotificationRecord>>;

    async fn record_discarded(&self, message: DiscardedMessage) -> StoreResult<()>;
}

/// Everything the pipeline needs from persistence.
pub trait Store: AppointmentStore + TenantStore + NotificationLog {}

impl<T> Store for T where T: AppointmentStore + TenantStore + NotificationLog {}
