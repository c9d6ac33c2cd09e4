use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    models::{Tenant, TenantId},
    phone::PhoneNumber,
    tenants::ChannelCredentials,
};

pub mod http;

pub use http::{HttpChannelClient, HttpChannelFactory};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel misconfigured: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum MessageContent {
    /// Provider-approved template filled with positional variables.
    Template {
        template_id: String,
        variables: Vec<String>,
    },
    Text { body: String },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn template_id(&self) -> Option<&str> {
        match self {
            Self::Template { template_id, .. } => Some(template_id),
            Self::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { provider_message_id: String },
    Failed { reason: String },
}

/// A provider client bound to a single tenant's credentials.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    async fn send(
        &self,
        to: &PhoneNumber,
        content: &MessageContent,
        status_callback: &str,
    ) -> SendOutcome;
}

pub trait ChannelClientFactory: Send + Sync {
    fn build(&self, credentials: ChannelCredentials) -> Result<Arc<dyn ChannelClient>, ChannelError>;
}

/// Multi-tenant front for the messaging provider. Clients are created on first
/// use per tenant and kept for the life of the process. Every send registers
/// the same status-callback address.
pub struct ChannelAdapter {
    factory: Arc<dyn ChannelClientFactory>,
    clients: RwLock<HashMap<TenantId, Arc<dyn ChannelClient>>>,
    status_callback: String,
}

impl ChannelAdapter {
    pub fn new(factory: Arc<dyn ChannelClientFactory>, status_callback: impl Into<String>) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
            status_callback: status_callback.into(),
        }
    }

    pub fn status_callback(&self) -> &str {
        &self.status_callback
    }

    async fn client_for(&self, tenant: &Tenant) -> Result<Arc<dyn ChannelClient>, ChannelError> {
        if let Some(client) = self.clients.read().await.get(&tenant.id) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(&tenant.id) {
            return Ok(client.clone());
        }
        let client = self.factory.build(tenant.credentials()?)?;
        clients.insert(tenant.id, client.clone());
        info!(tenant_id = tenant.id, "initialised channel client");
        Ok(client)
    }

    /// Sends a message on behalf of `tenant`. Delivery problems come back as
    /// `SendOutcome::Failed`; only unusable credentials are an error.
    pub async fn send(
        &self,
        tenant: &Tenant,
        to: &PhoneNumber,
        content: &MessageContent,
    ) -> Result<SendOutcome, ChannelError> {
        let client = self.client_for(tenant).await?;
        let outcome = client.send(to, content, &self.status_callback).await;
        match &outcome {
            SendOutcome::Sent {
                provider_message_id,
            } => debug!(tenant_id = tenant.id, %provider_message_id, "message sent"),
            SendOutcome::Failed { reason } => {
                warn!(tenant_id = tenant.id, %reason, "message delivery failed")
            }
        }
        Ok(outcome)
    }

    pub async fn cached_clients(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::phone::PhoneNormalizer;
    use crate::tenants::{DocumentCatalog, TemplateCatalog};

    #[derive(Default)]
    struct CountingFactory {
        built: AtomicUsize,
        callbacks: Arc<Mutex<Vec<String>>>,
    }

    struct CountingClient {
        account_id: String,
        callbacks: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ChannelClient for CountingClient {
        async fn send(
            &self,
            _to: &PhoneNumber,
            _content: &MessageContent,
            status_callback: &str,
        ) -> SendOutcome {
            self.callbacks
                .lock()
                .unwrap()
                .push(status_callback.to_string());
            SendOutcome::Sent {
                provider_message_id: format!("SM-{}", self.account_id),
            }
        }
    }

    impl ChannelClientFactory for CountingFactory {
        fn build(
            &self,
            credentials: ChannelCredentials,
        ) -> Result<Arc<dyn ChannelClient>, ChannelError> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingClient {
                account_id: credentials.account_id,
                callbacks: self.callbacks.clone(),
            }))
        }
    }

    fn tenant(id: TenantId, account: &str, secret: &str) -> Tenant {
        Tenant {
            id,
            display_name: format!("Clinic {id}"),
            channel_account_id: account.into(),
            channel_secret: secret.into(),
            from_address: "+5511888888888".into(),
            documents: DocumentCatalog::default(),
            templates: TemplateCatalog::default(),
            support_contact: None,
        }
    }

    #[tokio::test]
    async fn caches_one_client_per_tenant() {
        let factory = Arc::new(CountingFactory::default());
        let adapter = ChannelAdapter::new(
            factory.clone(),
            "https://hooks.example/api/whatsapp/webhook",
        );
        let to = PhoneNormalizer::default().normalize("11999999999").unwrap();
        let content = MessageContent::text("Olá");

        let first = adapter.send(&tenant(1, "AC1", "s1"), &to, &content).await.unwrap();
        adapter.send(&tenant(1, "AC1", "s1"), &to, &content).await.unwrap();
        let other = adapter.send(&tenant(2, "AC2", "s2"), &to, &content).await.unwrap();

        assert_eq!(factory.built.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.cached_clients().await, 2);
        assert_eq!(
            first,
            SendOutcome::Sent {
                provider_message_id: "SM-AC1".into()
            }
        );
        assert_eq!(
            other,
            SendOutcome::Sent {
                provider_message_id: "SM-AC2".into()
            }
        );
        let callbacks = factory.callbacks.lock().unwrap();
        assert_eq!(callbacks.len(), 3);
        assert!(callbacks
            .iter()
            .all(|cb| cb == "https://hooks.example/api/whatsapp/webhook"));
    }

    #[tokio::test]
    async fn missing_credentials_are_a_configuration_error() {
        let factory = Arc::new(CountingFactory::default());
        let adapter = ChannelAdapter::new(
            factory.clone(),
            "https://hooks.example/api/whatsapp/webhook",
        );
        let to = PhoneNormalizer::default().normalize("11999999999").unwrap();

        let err = adapter
            .send(&tenant(3, "AC3", ""), &to, &MessageContent::text("Olá"))
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::Configuration(_)));
        assert_eq!(factory.built.load(Ordering::SeqCst), 0);
        assert_eq!(adapter.cached_clients().await, 0);
    }

    #[test]
    fn content_serializes_with_format_tag() {
        let content = MessageContent::Template {
            template_id: "HX123".into(),
            variables: vec!["Maria".into(), "01/03/2025".into()],
        };
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["format"], "template");
        assert_eq!(content.template_id(), Some("HX123"));
        assert_eq!(MessageContent::text("oi").template_id(), None);
    }
}
