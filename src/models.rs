use std::{fmt, str::FromStr};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::schema::jobs;
use crate::tenants::{DocumentCatalog, TemplateCatalog};

pub type TenantId = i64;
pub type AppointmentId = i64;

#[derive(Debug, Error)]
#[error("unknown {kind} value `{value}`")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError::new($label, other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
}

string_enum!(AppointmentStatus, "appointment status", {
    Scheduled => "scheduled",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
    Completed => "completed",
});

impl AppointmentStatus {
    /// Statuses a patient reply can move an appointment into.
    pub fn is_reply_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentKind {
    Consultation,
    Procedure,
}

string_enum!(AppointmentKind, "appointment kind", {
    Consultation => "consultation",
    Procedure => "procedure",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    ConfirmationRequest,
    Reprompt,
    Fallback,
    ConfirmationAck,
    CancellationAck,
}

string_enum!(MessageKind, "message kind", {
    ConfirmationRequest => "confirmation_request",
    Reprompt => "reprompt",
    Fallback => "fallback",
    ConfirmationAck => "confirmation_ack",
    CancellationAck => "cancellation_ack",
});

#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub tenant_id: TenantId,
    pub patient_name: String,
    pub patient_phone: String,
    pub patient_document: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub kind: AppointmentKind,
    pub specialty: String,
    pub procedure_code: Option<String>,
    pub notification_sent: bool,
    pub notification_sent_at: Option<NaiveDateTime>,
    pub last_interaction_at: Option<NaiveDateTime>,
    pub last_channel_status: Option<String>,
    pub last_reply: Option<String>,
    pub confirmed_at: Option<NaiveDateTime>,
    pub confirmation_response: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Appointment {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub tenant_id: TenantId,
    pub patient_name: String,
    pub patient_phone: String,
    pub patient_document: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub kind: AppointmentKind,
    pub specialty: String,
    pub procedure_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: TenantId,
    pub display_name: String,
    pub channel_account_id: String,
    pub channel_secret: String,
    pub from_address: String,
    pub documents: DocumentCatalog,
    pub templates: TemplateCatalog,
    pub support_contact: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTenant {
    pub display_name: String,
    pub channel_account_id: String,
    pub channel_secret: String,
    pub from_address: String,
    pub documents: DocumentCatalog,
    pub templates: TemplateCatalog,
    pub support_contact: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub tenant_id: TenantId,
    pub appointment_id: Option<AppointmentId>,
    pub kind: MessageKind,
    pub delivery_status: String,
    pub provider_message_id: Option<String>,
    pub reply_text: Option<String>,
    pub sent_at: NaiveDateTime,
    pub responded_at: Option<NaiveDateTime>,
    pub template_used: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub tenant_id: TenantId,
    pub appointment_id: Option<AppointmentId>,
    pub kind: MessageKind,
    pub delivery_status: String,
    pub provider_message_id: Option<String>,
    pub template_used: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    UnknownTenant,
    InvalidMessageFormat,
    NoAppointmentFound,
}

string_enum!(DiscardReason, "discard reason", {
    UnknownTenant => "unknown_tenant",
    InvalidMessageFormat => "invalid_message_format",
    NoAppointmentFound => "no_appointment_found",
});

#[derive(Debug, Clone, Serialize)]
pub struct DiscardedMessage {
    pub tenant_id: Option<TenantId>,
    pub message_id: Option<String>,
    pub sender: Option<String>,
    pub content: Option<String>,
    pub reason: DiscardReason,
    pub received_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub dedupe_key: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub priority: i32,
    pub max_attempts: i32,
    pub run_after: NaiveDateTime,
    pub dedupe_key: Option<String>,
}
