use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use http_body_util::BodyExt;
use notifier::{
    channel::{
        ChannelAdapter, ChannelClient, ChannelClientFactory, ChannelError, MessageContent,
        SendOutcome,
    },
    config::AppConfig,
    default_handlers,
    jobs::{
        DailyReportKind, EnqueueOptions, FailureDisposition, JobHandle, JobQueue, JobQueueError,
        JobQueueResult, MemoryJobQueue, QUEUE_DELIVERY,
    },
    models::{
        Appointment, AppointmentId, AppointmentKind, AppointmentStatus, DiscardedMessage, Job,
        MessageKind, NewAppointment, NewNotification, NewTenant, NotificationRecord, Tenant,
        TenantId,
    },
    notifier::OpsNotifier,
    phone::PhoneNumber,
    routes,
    state::AppState,
    store::{
        AppointmentFilter, AppointmentPatch, AppointmentStore, MemoryStore, NotificationLog,
        ReplyTransition, Store, StoreError, StoreResult, TenantStore,
    },
    tenants::{ChannelCredentials, DayPeriod, DocumentCatalog, DocumentRule, TemplateCatalog},
    Worker,
};
use serde_json::Value;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const ACCOUNT_ID: &str = "AC-clinic";
pub const PATIENT_PHONE: &str = "+5511999999999";
pub const CLINIC_ADDRESS: &str = "+5511888888888";
pub const MORNING_LINK: &str = "https://docs.example/preparo-11380-manha.pdf";
pub const AFTERNOON_LINK: &str = "https://docs.example/preparo-11380-tarde.pdf";

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub account_id: String,
    pub to: String,
    pub content: MessageContent,
    pub status_callback: String,
}

#[allow(dead_code)]
impl SentMessage {
    pub fn body(&self) -> &str {
        match &self.content {
            MessageContent::Text { body } => body,
            MessageContent::Template { template_id, .. } => template_id,
        }
    }
}

/// Records every outbound message instead of calling the provider.
#[derive(Default)]
pub struct FakeChannel {
    sent: Mutex<Vec<SentMessage>>,
    counter: AtomicUsize,
    failing: AtomicBool,
    clients_built: AtomicUsize,
}

#[allow(dead_code)]
impl FakeChannel {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn clients_built(&self) -> usize {
        self.clients_built.load(Ordering::SeqCst)
    }
}

struct FakeClient {
    account_id: String,
    channel: Arc<FakeChannel>,
}

#[async_trait]
impl ChannelClient for FakeClient {
    async fn send(
        &self,
        to: &PhoneNumber,
        content: &MessageContent,
        status_callback: &str,
    ) -> SendOutcome {
        if self.channel.failing.load(Ordering::SeqCst) {
            return SendOutcome::Failed {
                reason: "provider unavailable".to_string(),
            };
        }
        let n = self.channel.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut sent) = self.channel.sent.lock() {
            sent.push(SentMessage {
                account_id: self.account_id.clone(),
                to: to.e164().to_string(),
                content: content.clone(),
                status_callback: status_callback.to_string(),
            });
        }
        SendOutcome::Sent {
            provider_message_id: format!("SM-out-{n}"),
        }
    }
}

struct FakeChannelFactory(Arc<FakeChannel>);

impl ChannelClientFactory for FakeChannelFactory {
    fn build(&self, credentials: ChannelCredentials) -> Result<Arc<dyn ChannelClient>, ChannelError> {
        self.0.clients_built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            account_id: credentials.account_id,
            channel: self.0.clone(),
        }))
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub enum OpsEvent {
    BusinessAreaReport {
        tenant_id: TenantId,
        date: NaiveDate,
        appointment_count: usize,
    },
    ErrorAlert {
        process: String,
        error: String,
        job_id: Option<Uuid>,
    },
    DailyReport {
        report: DailyReportKind,
        date: NaiveDate,
    },
}

#[derive(Default)]
pub struct RecordingOps {
    events: Mutex<Vec<OpsEvent>>,
}

impl RecordingOps {
    fn push(&self, event: OpsEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("ops log poisoned"))?
            .push(event);
        Ok(())
    }

    #[allow(dead_code)]
    pub fn events(&self) -> Vec<OpsEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OpsNotifier for RecordingOps {
    async fn business_area_report(
        &self,
        tenant_id: TenantId,
        date: NaiveDate,
        appointment_count: usize,
    ) -> anyhow::Result<()> {
        self.push(OpsEvent::BusinessAreaReport {
            tenant_id,
            date,
            appointment_count,
        })
    }

    async fn error_alert(
        &self,
        process: &str,
        error: &str,
        job_id: Option<Uuid>,
    ) -> anyhow::Result<()> {
        self.push(OpsEvent::ErrorAlert {
            process: process.to_string(),
            error: error.to_string(),
            job_id,
        })
    }

    async fn daily_report(&self, report: DailyReportKind, date: NaiveDate) -> anyhow::Result<()> {
        self.push(OpsEvent::DailyReport { report, date })
    }
}

/// Transient failures injected in front of the memory store and queue. Each
/// counter is the number of upcoming calls that fail.
#[derive(Default)]
pub struct Faults {
    delivery_enqueues: AtomicUsize,
    appointment_queries: AtomicUsize,
    mark_sent: AtomicUsize,
}

#[allow(dead_code)]
impl Faults {
    pub fn fail_delivery_enqueues(&self, times: usize) {
        self.delivery_enqueues.store(times, Ordering::SeqCst);
    }

    pub fn fail_appointment_queries(&self, times: usize) {
        self.appointment_queries.store(times, Ordering::SeqCst);
    }

    pub fn fail_mark_sent(&self, times: usize) {
        self.mark_sent.store(times, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct FaultyQueue {
    inner: Arc<MemoryJobQueue>,
    faults: Arc<Faults>,
}

#[async_trait]
impl JobQueue for FaultyQueue {
    async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> JobQueueResult<JobHandle> {
        if queue == QUEUE_DELIVERY && Faults::take(&self.faults.delivery_enqueues) {
            return Err(JobQueueError::Unavailable("connection reset".to_string()));
        }
        self.inner.enqueue(queue, job_type, payload, options).await
    }

    async fn reserve(&self, queues: &[&str]) -> JobQueueResult<Option<Job>> {
        self.inner.reserve(queues).await
    }

    async fn complete(&self, job_id: Uuid) -> JobQueueResult<()> {
        self.inner.complete(job_id).await
    }

    async fn fail(
        &self,
        job: &Job,
        error: &str,
        retryable: bool,
    ) -> JobQueueResult<FailureDisposition> {
        self.inner.fail(job, error, retryable).await
    }

    async fn dead_jobs(&self, limit: i64) -> JobQueueResult<Vec<Job>> {
        self.inner.dead_jobs(limit).await
    }

    async fn requeue(&self, job_id: Uuid) -> JobQueueResult<bool> {
        self.inner.requeue(job_id).await
    }
}

struct FaultyStore {
    inner: Arc<MemoryStore>,
    faults: Arc<Faults>,
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("connection reset".to_string())
}

#[async_trait]
impl AppointmentStore for FaultyStore {
    async fn find_appointments(&self, filter: AppointmentFilter) -> StoreResult<Vec<Appointment>> {
        if Faults::take(&self.faults.appointment_queries) {
            return Err(unavailable());
        }
        self.inner.find_appointments(filter).await
    }

    async fn update_appointment(
        &self,
        id: AppointmentId,
        patch: AppointmentPatch,
    ) -> StoreResult<Appointment> {
        self.inner.update_appointment(id, patch).await
    }

    async fn create_appointment(&self, data: NewAppointment) -> StoreResult<Appointment> {
        self.inner.create_appointment(data).await
    }

    async fn mark_notification_sent(&self, id: AppointmentId) -> StoreResult<Appointment> {
        if Faults::take(&self.faults.mark_sent) {
            return Err(unavailable());
        }
        self.inner.mark_notification_sent(id).await
    }

    async fn transition_appointment(
        &self,
        id: AppointmentId,
        transition: ReplyTransition,
    ) -> StoreResult<bool> {
        self.inner.transition_appointment(id, transition).await
    }

    async fn find_appointment(&self, id: AppointmentId) -> StoreResult<Option<Appointment>> {
        self.inner.find_appointment(id).await
    }
}

#[async_trait]
impl TenantStore for FaultyStore {
    async fn find_tenant_by_channel_account_id(
        &self,
        account_id: &str,
    ) -> StoreResult<Option<Tenant>> {
        self.inner.find_tenant_by_channel_account_id(account_id).await
    }

    async fn find_tenant_by_id(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        self.inner.find_tenant_by_id(id).await
    }

    async fn create_tenant(&self, data: NewTenant) -> StoreResult<Tenant> {
        self.inner.create_tenant(data).await
    }
}

#[async_trait]
impl NotificationLog for FaultyStore {
    async fn record_notification(&self, data: NewNotification) -> StoreResult<NotificationRecord> {
        self.inner.record_notification(data).await
    }

    async fn update_delivery_status(
        &self,
        provider_message_id: &str,
        status: &str,
    ) -> StoreResult<bool> {
        self.inner
            .update_delivery_status(provider_message_id, status)
            .await
    }

    async fn record_response(
        &self,
        appointment_id: AppointmentId,
        reply: &str,
        at: NaiveDateTime,
    ) -> StoreResult<()> {
        self.inner.record_response(appointment_id, reply, at).await
    }

    async fn count_notifications(
        &self,
        appointment_id: AppointmentId,
        kind: MessageKind,
    ) -> StoreResult<i64> {
        self.inner.count_notifications(appointment_id, kind).await
    }

    async fn notifications_for(
        &self,
        appointment_id: AppointmentId,
    ) -> StoreResult<Vec<NotificationRecord>> {
        self.inner.notifications_for(appointment_id).await
    }

    async fn record_discarded(&self, message: DiscardedMessage) -> StoreResult<()> {
        self.inner.record_discarded(message).await
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub channel: Arc<FakeChannel>,
    pub ops: Arc<RecordingOps>,
    pub faults: Arc<Faults>,
    router: Router,
    worker: Worker,
}

#[allow(dead_code)]
impl TestApp {
    pub fn new() -> Self {
        let config = AppConfig::new("postgres://unused/notifier", "https://notifier.example");

        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let channel = Arc::new(FakeChannel::default());
        let ops = Arc::new(RecordingOps::default());
        let faults = Arc::new(Faults::default());

        let adapter = Arc::new(ChannelAdapter::new(
            Arc::new(FakeChannelFactory(channel.clone())),
            config.status_callback_url(),
        ));
        let store_for_state: Arc<dyn Store> = Arc::new(FaultyStore {
            inner: store.clone(),
            faults: faults.clone(),
        });
        let queue_for_state: Arc<dyn JobQueue> = Arc::new(FaultyQueue {
            inner: queue.clone(),
            faults: faults.clone(),
        });
        let ops_for_state: Arc<dyn OpsNotifier> = ops.clone();
        let state = Arc::new(AppState::new(
            config,
            store_for_state,
            queue_for_state,
            adapter,
            ops_for_state,
        ));
        let router = routes::create_router(state.clone());
        let worker = Worker::new(
            "test-worker",
            state.clone(),
            default_handlers(),
            Duration::from_millis(10),
        );

        Self {
            state,
            store,
            queue,
            channel,
            ops,
            faults,
            router,
            worker,
        }
    }

    pub async fn seed_tenant(&self, account_id: &str) -> Result<Tenant> {
        let documents = DocumentCatalog::new(vec![
            DocumentRule {
                procedure_code: "11380".to_string(),
                period: Some(DayPeriod::Morning),
                link: MORNING_LINK.to_string(),
            },
            DocumentRule {
                procedure_code: "11380".to_string(),
                period: Some(DayPeriod::Afternoon),
                link: AFTERNOON_LINK.to_string(),
            },
        ]);
        Ok(self
            .store
            .create_tenant(NewTenant {
                display_name: "Clínica Central".to_string(),
                channel_account_id: account_id.to_string(),
                channel_secret: "secret".to_string(),
                from_address: CLINIC_ADDRESS.to_string(),
                documents,
                templates: TemplateCatalog::default(),
                support_contact: Some("(11) 4000-0000".to_string()),
            })
            .await?)
    }

    /// Stores a scheduled appointment under a fixed id.
    pub async fn seed_appointment(
        &self,
        id: AppointmentId,
        tenant: &Tenant,
        date: NaiveDate,
        time: NaiveTime,
        kind: AppointmentKind,
    ) -> Result<Appointment> {
        let procedure_code = match kind {
            AppointmentKind::Procedure => Some("11380".to_string()),
            AppointmentKind::Consultation => None,
        };
        Ok(self
            .store
            .insert_appointment(Appointment {
                id,
                tenant_id: tenant.id,
                patient_name: "Maria Souza".to_string(),
                patient_phone: PATIENT_PHONE.to_string(),
                patient_document: "12345678900".to_string(),
                date,
                time,
                status: AppointmentStatus::Scheduled,
                kind,
                specialty: "Endoscopia".to_string(),
                procedure_code,
                notification_sent: false,
                notification_sent_at: None,
                last_interaction_at: None,
                last_channel_status: None,
                last_reply: None,
                confirmed_at: None,
                confirmation_response: None,
                created_at: Utc::now().naive_utc(),
            })
            .await?)
    }

    pub async fn appointment(&self, id: AppointmentId) -> Result<Appointment> {
        self.store
            .find_appointment(id)
            .await?
            .ok_or_else(|| anyhow!("appointment {id} missing"))
    }

    /// Drains every job that is ready now.
    pub async fn run_workers(&self) -> Result<usize> {
        Ok(self.worker.run_until_idle().await?)
    }

    pub async fn post_form(
        &self,
        path: &str,
        fields: &[(&str, &str)],
    ) -> Result<hyper::Response<Body>> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Posts a patient reply the way the provider does.
    pub async fn reply(
        &self,
        account_id: &str,
        message_id: &str,
        body: &str,
    ) -> Result<hyper::Response<Body>> {
        let from = format!("whatsapp:{PATIENT_PHONE}");
        let to = format!("whatsapp:{CLINIC_ADDRESS}");
        self.post_form(
            "/api/whatsapp/webhook",
            &[
                ("AccountSid", account_id),
                ("MessageSid", message_id),
                ("From", from.as_str()),
                ("To", to.as_str()),
                ("SmsStatus", "received"),
                ("Body", body),
            ],
        )
        .await
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}
