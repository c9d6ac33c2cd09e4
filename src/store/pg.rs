use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use tokio::task;

use super::{
    AppointmentFilter, AppointmentPatch, AppointmentStore, NotificationLog, ReplyTransition,
    StoreError, StoreResult, TenantStore,
};
use crate::db::PgPool;
use crate::models::{
    Appointment, AppointmentId, AppointmentStatus, DiscardedMessage, MessageKind, NewAppointment,
    NewNotification, NewTenant, NotificationRecord, Tenant, TenantId,
};
use crate::schema::{appointments, discarded_messages, notifications, tenants};

#[derive(Queryable, Selectable)]
#[diesel(table_name = appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct AppointmentRow {
    id: i64,
    tenant_id: i64,
    patient_name: String,
    patient_phone: String,
    patient_document: String,
    appointment_date: NaiveDate,
    appointment_time: NaiveTime,
    status: String,
    kind: String,
    specialty: String,
    procedure_code: Option<String>,
    notification_sent: bool,
    notification_sent_at: Option<NaiveDateTime>,
    last_interaction_at: Option<NaiveDateTime>,
    last_channel_status: Option<String>,
    last_reply: Option<String>,
    confirmed_at: Option<NaiveDateTime>,
    confirmation_response: Option<String>,
    created_at: NaiveDateTime,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            id: row.id,
            tenant_id: row.tenant_id,
            patient_name: row.patient_name,
            patient_phone: row.patient_phone,
            patient_document: row.patient_document,
            date: row.appointment_date,
            time: row.appointment_time,
            status: row.status.parse().map_err(corrupt)?,
            kind: row.kind.parse().map_err(corrupt)?,
            specialty: row.specialty,
            procedure_code: row.procedure_code,
            notification_sent: row.notification_sent,
            notification_sent_at: row.notification_sent_at,
            last_interaction_at: row.last_interaction_at,
            last_channel_status: row.last_channel_status,
            last_reply: row.last_reply,
            confirmed_at: row.confirmed_at,
            confirmation_response: row.confirmation_response,
            created_at: row.created_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = appointments)]
struct NewAppointmentRow<'a> {
    tenant_id: i64,
    patient_name: &'a str,
    patient_phone: &'a str,
    patient_document: &'a str,
    appointment_date: NaiveDate,
    appointment_time: NaiveTime,
    status: &'a str,
    kind: &'a str,
    specialty: &'a str,
    procedure_code: Option<&'a str>,
}

#[derive(AsChangeset)]
#[diesel(table_name = appointments)]
struct AppointmentChangeset {
    status: Option<String>,
    notification_sent: Option<bool>,
    notification_sent_at: Option<NaiveDateTime>,
    last_interaction_at: Option<NaiveDateTime>,
    last_channel_status: Option<String>,
    last_reply: Option<String>,
    confirmed_at: Option<NaiveDateTime>,
    confirmation_response: Option<String>,
}

impl From<AppointmentPatch> for AppointmentChangeset {
    fn from(patch: AppointmentPatch) -> Self {
        Self {
            status: patch.status.map(|status| status.as_str().to_string()),
            notification_sent: patch.notification_sent,
            notification_sent_at: patch.notification_sent_at,
            last_interaction_at: patch.last_interaction_at,
            last_channel_status: patch.last_channel_status,
            last_reply: patch.last_reply,
            confirmed_at: patch.confirmed_at,
            confirmation_response: patch.confirmation_response,
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = tenants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct TenantRow {
    id: i64,
    display_name: String,
    channel_account_id: String,
    channel_secret: String,
    from_address: String,
    document_catalog: Value,
    template_catalog: Value,
    support_contact: Option<String>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = StoreError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        Ok(Tenant {
            id: row.id,
            display_name: row.display_name,
            channel_account_id: row.channel_account_id,
            channel_secret: row.channel_secret,
            from_address: row.from_address,
            documents: serde_json::from_value(row.document_catalog).map_err(corrupt)?,
            templates: serde_json::from_value(row.template_catalog).map_err(corrupt)?,
            support_contact: row.support_contact,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = tenants)]
struct NewTenantRow<'a> {
    display_name: &'a str,
    channel_account_id: &'a str,
    channel_secret: &'a str,
    from_address: &'a str,
    document_catalog: Value,
    template_catalog: Value,
    support_contact: Option<&'a str>,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct NotificationRow {
    id: i64,
    tenant_id: i64,
    appointment_id: Option<i64>,
    message_kind: String,
    delivery_status: String,
    provider_message_id: Option<String>,
    reply_text: Option<String>,
    sent_at: NaiveDateTime,
    responded_at: Option<NaiveDateTime>,
    template_used: Option<String>,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(NotificationRecord {
            id: row.id,
            tenant_id: row.tenant_id,
            appointment_id: row.appointment_id,
            kind: row.message_kind.parse().map_err(corrupt)?,
            delivery_status: row.delivery_status,
            provider_message_id: row.provider_message_id,
            reply_text: row.reply_text,
            sent_at: row.sent_at,
            responded_at: row.responded_at,
            template_used: row.template_used,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = notifications)]
struct NewNotificationRow<'a> {
    tenant_id: i64,
    appointment_id: Option<i64>,
    message_kind: &'a str,
    delivery_status: &'a str,
    provider_message_id: Option<&'a str>,
    sent_at: NaiveDateTime,
    template_used: Option<&'a str>,
}

#[derive(Insertable)]
#[diesel(table_name = discarded_messages)]
struct NewDiscardedRow<'a> {
    tenant_id: Option<i64>,
    message_id: Option<&'a str>,
    sender: Option<&'a str>,
    content: Option<&'a str>,
    reason: &'a str,
    received_at: NaiveDateTime,
}

fn corrupt<E: std::fmt::Display>(error: E) -> StoreError {
    StoreError::Corrupt(error.to_string())
}

/// Postgres-backed store. Diesel calls are blocking, so every operation runs on
/// the blocking pool with its own pooled connection.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("store task failed: {err}")))?
    }
}

fn load_appointment(conn: &mut PgConnection, id: AppointmentId) -> StoreResult<Appointment> {
    appointments::table
        .find(id)
        .select(AppointmentRow::as_select())
        .first::<AppointmentRow>(conn)
        .optional()?
        .ok_or(StoreError::AppointmentNotFound(id))?
        .try_into()
}

#[async_trait]
impl AppointmentStore for PgStore {
    async fn find_appointments(&self, filter: AppointmentFilter) -> StoreResult<Vec<Appointment>> {
        self.with_conn(move |conn| {
            let mut query = appointments::table
                .select(AppointmentRow::as_select())
                .into_boxed();

            if let Some(id) = filter.id {
                query = query.filter(appointments::id.eq(id));
            }
            if let Some(tenant_id) = filter.tenant_id {
                query = query.filter(appointments::tenant_id.eq(tenant_id));
            }
            if let Some(date) = filter.date {
                query = query.filter(appointments::appointment_date.eq(date));
            }
            if let Some((from, to)) = filter.date_range {
                query = query.filter(appointments::appointment_date.between(from, to));
            }
            if !filter.statuses.is_empty() {
                let statuses: Vec<&'static str> =
                    filter.statuses.iter().map(AppointmentStatus::as_str).collect();
                query = query.filter(appointments::status.eq_any(statuses));
            }
            if let Some(sent) = filter.notification_sent {
                query = query.filter(appointments::notification_sent.eq(sent));
            }
            if let Some(phone) = filter.patient_phone {
                query = query.filter(appointments::patient_phone.eq(phone));
            }

            let rows: Vec<AppointmentRow> = query
                .order((appointments::created_at.desc(), appointments::id.desc()))
                .load(conn)?;
            rows.into_iter().map(Appointment::try_from).collect()
        })
        .await
    }

    async fn update_appointment(
        &self,
        id: AppointmentId,
        patch: AppointmentPatch,
    ) -> StoreResult<Appointment> {
        self.with_conn(move |conn| {
            if patch.is_empty() {
                return load_appointment(conn, id);
            }
            let changeset = AppointmentChangeset::from(patch);
            diesel::update(appointments::table.find(id))
                .set(&changeset)
                .returning(AppointmentRow::as_returning())
                .get_result::<AppointmentRow>(conn)
                .optional()?
                .ok_or(StoreError::AppointmentNotFound(id))?
                .try_into()
        })
        .await
    }

    async fn create_appointment(&self, data: NewAppointment) -> StoreResult<Appointment> {
        self.with_conn(move |conn| {
            let row = NewAppointmentRow {
                tenant_id: data.tenant_id,
                patient_name: &data.patient_name,
                patient_phone: &data.patient_phone,
                patient_document: &data.patient_document,
                appointment_date: data.date,
                appointment_time: data.time,
                status: AppointmentStatus::Scheduled.as_str(),
                kind: data.kind.as_str(),
                specialty: &data.specialty,
                procedure_code: data.procedure_code.as_deref(),
            };
            diesel::insert_into(appointments::table)
                .values(&row)
                .returning(AppointmentRow::as_returning())
                .get_result::<AppointmentRow>(conn)?
                .try_into()
        })
        .await
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
        self.with_conn(move |conn| {
            let updated = diesel::update(
                appointments::table
                    .filter(appointments::id.eq(id))
                    .filter(appointments::status.eq(AppointmentStatus::Scheduled.as_str())),
            )
            .set((
                appointments::status.eq(transition.to.as_str()),
                appointments::confirmed_at.eq(Some(transition.confirmed_at)),
                appointments::confirmation_response.eq(Some(transition.response)),
            ))
            .execute(conn)?;

            if updated == 0 {
                // Distinguish "already moved" from "never existed".
                load_appointment(conn, id)?;
                return Ok(false);
            }
            Ok(true)
        })
        .await
    }
}

#[async_trait]
impl TenantStore for PgStore {
    async fn find_tenant_by_channel_account_id(
        &self,
        account_id: &str,
    ) -> StoreResult<Option<Tenant>> {
        let account_id = account_id.to_string();
        self.with_conn(move |conn| {
            tenants::table
                .filter(tenants::channel_account_id.eq(account_id))
                .select(TenantRow::as_select())
                .first::<TenantRow>(conn)
                .optional()?
                .map(Tenant::try_from)
                .transpose()
        })
        .await
    }

    async fn find_tenant_by_id(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        self.with_conn(move |conn| {
            tenants::table
                .find(id)
                .select(TenantRow::as_select())
                .first::<TenantRow>(conn)
                .optional()?
                .map(Tenant::try_from)
                .transpose()
        })
        .await
    }

    async fn create_tenant(&self, data: NewTenant) -> StoreResult<Tenant> {
        self.with_conn(move |conn| {
            let row = NewTenantRow {
                display_name: &data.display_name,
                channel_account_id: &data.channel_account_id,
                channel_secret: &data.channel_secret,
                from_address: &data.from_address,
                document_catalog: serde_json::to_value(&data.documents).map_err(corrupt)?,
                template_catalog: serde_json::to_value(&data.templates).map_err(corrupt)?,
                support_contact: data.support_contact.as_deref(),
            };
            diesel::insert_into(tenants::table)
                .values(&row)
                .returning(TenantRow::as_returning())
                .get_result::<TenantRow>(conn)?
                .try_into()
        })
        .await
    }
}

#[async_trait]
impl NotificationLog for PgStore {
    async fn record_notification(&self, data: NewNotification) -> StoreResult<NotificationRecord> {
        self.with_conn(move |conn| {
            let row = NewNotificationRow {
                tenant_id: data.tenant_id,
                appointment_id: data.appointment_id,
                message_kind: data.kind.as_str(),
                delivery_status: &data.delivery_status,
                provider_message_id: data.provider_message_id.as_deref(),
                sent_at: Utc::now().naive_utc(),
                template_used: data.template_used.as_deref(),
            };
            diesel::insert_into(notifications::table)
                .values(&row)
                .returning(NotificationRow::as_returning())
                .get_result::<NotificationRow>(conn)?
                .try_into()
        })
        .await
    }

    async fn update_delivery_status(
        &self,
        provider_message_id: &str,
        status: &str,
    ) -> StoreResult<bool> {
        let provider_message_id = provider_message_id.to_string();
        let status = status.to_string();
        self.with_conn(move |conn| {
            let updated = diesel::update(
                notifications::table
                    .filter(notifications::provider_message_id.eq(provider_message_id)),
            )
            .set(notifications::delivery_status.eq(status))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    async fn record_response(
        &self,
        appointment_id: AppointmentId,
        reply: &str,
        at: NaiveDateTime,
    ) -> StoreResult<()> {
        let reply = reply.to_string();
        self.with_conn(move |conn| {
            let latest = notifications::table
                .filter(notifications::appointment_id.eq(appointment_id))
                .filter(notifications::message_kind.eq_any([
                    MessageKind::ConfirmationRequest.as_str(),
                    MessageKind::Reprompt.as_str(),
                ]))
                .order((notifications::sent_at.desc(), notifications::id.desc()))
                .select(notifications::id)
                .first::<i64>(conn)
                .optional()?;

            if let Some(id) = latest {
                diesel::update(notifications::table.find(id))
                    .set((
                        notifications::reply_text.eq(Some(reply)),
                        notifications::responded_at.eq(Some(at)),
                    ))
                    .execute(conn)?;
            }
            Ok(())
        })
        .await
    }

    async fn count_notifications(
        &self,
        appointment_id: AppointmentId,
        kind: MessageKind,
    ) -> StoreResult<i64> {
        self.with_conn(move |conn| {
            let count = notifications::table
                .filter(notifications::appointment_id.eq(appointment_id))
                .filter(notifications::message_kind.eq(kind.as_str()))
                .count()
                .get_result::<i64>(conn)?;
            Ok(count)
        })
        .await
    }

    async fn notifications_for(
        &self,
        appointment_id: AppointmentId,
    ) -> StoreResult<Vec<NotificationRecord>> {
        self.with_conn(move |conn| {
            let rows: Vec<NotificationRow> = notifications::table
                .filter(notifications::appointment_id.eq(appointment_id))
                .order((notifications::sent_at.asc(), notifications::id.asc()))
                .select(NotificationRow::as_select())
                .load(conn)?;
            rows.into_iter().map(NotificationRecord::try_from).collect()
        })
        .await
    }

    async fn record_discarded(&self, message: DiscardedMessage) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let row = NewDiscardedRow {
                tenant_id: message.tenant_id,
                message_id: message.message_id.as_deref(),
                sender: message.sender.as_deref(),
                content: message.content.as_deref(),
                reason: message.reason.as_str(),
                received_at: message.received_at,
            };
            diesel::insert_into(discarded_messages::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}
