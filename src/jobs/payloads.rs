use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::{
    EnqueueOptions, JobHandle, JobQueue, JobQueueResult, QUEUE_DELIVERY, QUEUE_NOTIFICATIONS,
    QUEUE_REPORTS,
};
use crate::channel::MessageContent;
use crate::models::{AppointmentId, Job, MessageKind, TenantId};

/// A payload family bound to one queue. The serialized `type` tag doubles as the
/// stored job type.
pub trait QueuePayload: Serialize + DeserializeOwned {
    const QUEUE: &'static str;

    fn kind(&self) -> &'static str;

    fn decode(job: &Job) -> Result<Self, serde_json::Error> {
        serde_json::from_value(job.payload.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationJob {
    Appointment {
        tenant_id: TenantId,
        appointment_id: AppointmentId,
    },
    #[serde(rename = "appointment_nh")]
    AppointmentLeadTime {
        tenant_id: TenantId,
        appointment_id: AppointmentId,
        lead_hours: u32,
    },
    AppointmentResponse {
        tenant_id: TenantId,
        appointment_id: AppointmentId,
        message_id: String,
        reply: String,
    },
    BusinessAreaReport {
        tenant_id: TenantId,
        date: NaiveDate,
        appointment_count: usize,
    },
    ErrorAlert {
        process: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<Uuid>,
    },
}

impl QueuePayload for NotificationJob {
    const QUEUE: &'static str = QUEUE_NOTIFICATIONS;

    fn kind(&self) -> &'static str {
        match self {
            Self::Appointment { .. } => "appointment",
            Self::AppointmentLeadTime { .. } => "appointment_nh",
            Self::AppointmentResponse { .. } => "appointment_response",
            Self::BusinessAreaReport { .. } => "business_area_report",
            Self::ErrorAlert { .. } => "error_alert",
        }
    }
}

impl NotificationJob {
    pub fn error_alert(process: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::ErrorAlert {
            process: process.into(),
            error: error.to_string(),
            job_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryJob {
    SendMessage {
        tenant_id: TenantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        appointment_id: Option<AppointmentId>,
        to: String,
        message_kind: MessageKind,
        content: MessageContent,
    },
}

impl QueuePayload for DeliveryJob {
    const QUEUE: &'static str = QUEUE_DELIVERY;

    fn kind(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyReportKind {
    Cancellation,
    Confirmation,
    NoResponse,
}

impl DailyReportKind {
    pub const ALL: [DailyReportKind; 3] = [
        DailyReportKind::Cancellation,
        DailyReportKind::Confirmation,
        DailyReportKind::NoResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancellation => "cancellation",
            Self::Confirmation => "confirmation",
            Self::NoResponse => "no_response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportJob {
    DailyReport {
        report: DailyReportKind,
        date: NaiveDate,
    },
}

impl QueuePayload for ReportJob {
    const QUEUE: &'static str = QUEUE_REPORTS;

    fn kind(&self) -> &'static str {
        match self {
            Self::DailyReport { .. } => "daily_report",
        }
    }
}

pub async fn enqueue_payload<P: QueuePayload>(
    queue: &dyn JobQueue,
    payload: &P,
    options: EnqueueOptions,
) -> JobQueueResult<JobHandle> {
    let value = serde_json::to_value(payload)?;
    queue.enqueue(P::QUEUE, payload.kind(), value, options).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lead_time_jobs_are_tagged_appointment_nh() {
        let job = NotificationJob::AppointmentLeadTime {
            tenant_id: 1,
            appointment_id: 42,
            lead_hours: 40,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "appointment_nh");
        assert_eq!(job.kind(), "appointment_nh");
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let jobs = [
            NotificationJob::Appointment {
                tenant_id: 1,
                appointment_id: 2,
            },
            NotificationJob::AppointmentResponse {
                tenant_id: 1,
                appointment_id: 2,
                message_id: "SM1".into(),
                reply: "talvez".into(),
            },
            NotificationJob::BusinessAreaReport {
                tenant_id: 1,
                date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                appointment_count: 12,
            },
            NotificationJob::error_alert("collector", "boom"),
        ];
        for job in jobs {
            let value = serde_json::to_value(&job).unwrap();
            assert_eq!(value["type"], job.kind());
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = json!({"type": "appointment_72h", "tenant_id": 1, "appointment_id": 2});
        assert!(serde_json::from_value::<NotificationJob>(raw).is_err());
    }

    #[test]
    fn delivery_job_carries_content() {
        let job = DeliveryJob::SendMessage {
            tenant_id: 3,
            appointment_id: Some(42),
            to: "whatsapp:+5511999999999".into(),
            message_kind: MessageKind::CancellationAck,
            content: MessageContent::text("ok"),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "send_message");
        assert_eq!(value["message_kind"], "cancellation_ack");
        let back: DeliveryJob = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }
}
