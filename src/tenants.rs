use std::{collections::HashMap, sync::Arc};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::{
    channel::ChannelError,
    error::PipelineError,
    models::{MessageKind, Tenant, TenantId},
    store::Store,
};

/// First appointment time that counts as a morning slot.
pub fn morning_start() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default()
}

/// Last appointment time that still counts as a morning slot.
pub fn morning_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(11, 30, 0).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPeriod {
    Morning,
    Afternoon,
}

impl DayPeriod {
    pub fn of(time: NaiveTime) -> Self {
        if time >= morning_start() && time <= morning_cutoff() {
            Self::Morning
        } else {
            Self::Afternoon
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRule {
    pub procedure_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<DayPeriod>,
    pub link: String,
}

/// Preparation documents a tenant sends for procedure codes, optionally split by
/// time of day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentCatalog {
    rules: Vec<DocumentRule>,
}

impl DocumentCatalog {
    pub fn new(rules: Vec<DocumentRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[DocumentRule] {
        &self.rules
    }

    pub fn requires_preparation(&self, procedure_code: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.procedure_code == procedure_code)
    }

    pub fn lookup(&self, procedure_code: &str, time: NaiveTime) -> Option<&str> {
        let period = DayPeriod::of(time);
        let mut fallback = None;
        for rule in self
            .rules
            .iter()
            .filter(|rule| rule.procedure_code == procedure_code)
        {
            match rule.period {
                Some(rule_period) if rule_period == period => return Some(rule.link.as_str()),
                None if fallback.is_none() => fallback = Some(rule.link.as_str()),
                _ => {}
            }
        }
        fallback
    }
}

/// Provider template ids keyed by message kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateCatalog {
    templates: HashMap<String, String>,
}

impl TemplateCatalog {
    pub fn with_template(mut self, kind: MessageKind, template_id: impl Into<String>) -> Self {
        self.templates
            .insert(kind.as_str().to_string(), template_id.into());
        self
    }

    pub fn template_for(&self, kind: MessageKind) -> Option<&str> {
        self.templates.get(kind.as_str()).map(String::as_str)
    }
}

#[derive(Clone)]
pub struct ChannelCredentials {
    pub account_id: String,
    pub secret: String,
    pub from_address: String,
}

impl std::fmt::Debug for ChannelCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCredentials")
            .field("account_id", &self.account_id)
            .field("secret", &"*****")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl Tenant {
    pub fn credentials(&self) -> Result<ChannelCredentials, ChannelError> {
        let missing = [
            ("channel account id", self.channel_account_id.trim()),
            ("channel secret", self.channel_secret.trim()),
            ("from address", self.from_address.trim()),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty());

        if let Some((field, _)) = missing {
            return Err(ChannelError::Configuration(format!(
                "tenant {} has no {field}",
                self.id
            )));
        }

        Ok(ChannelCredentials {
            account_id: self.channel_account_id.clone(),
            secret: self.channel_secret.clone(),
            from_address: self.from_address.clone(),
        })
    }
}

#[derive(Clone)]
pub struct TenantResolver {
    store: Arc<dyn Store>,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn by_account_id(&self, account_id: &str) -> Result<Tenant, PipelineError> {
        if account_id.trim().is_empty() {
            return Err(PipelineError::UnknownTenant("<missing account id>".into()));
        }
        self.store
            .find_tenant_by_channel_account_id(account_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownTenant(account_id.to_string()))
    }

    pub async fn by_id(&self, tenant_id: TenantId) -> Result<Tenant, PipelineError> {
        self.store
            .find_tenant_by_id(tenant_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownTenant(tenant_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn catalog() -> DocumentCatalog {
        DocumentCatalog::new(vec![
            DocumentRule {
                procedure_code: "11380".into(),
                period: Some(DayPeriod::Morning),
                link: "https://docs.example/colonoscopia-manha.pdf".into(),
            },
            DocumentRule {
                procedure_code: "11380".into(),
                period: Some(DayPeriod::Afternoon),
                link: "https://docs.example/colonoscopia-tarde.pdf".into(),
            },
            DocumentRule {
                procedure_code: "40201".into(),
                period: None,
                link: "https://docs.example/endoscopia.pdf".into(),
            },
        ])
    }

    #[test]
    fn splits_day_at_half_past_eleven() {
        assert_eq!(DayPeriod::of(time(9, 0)), DayPeriod::Morning);
        assert_eq!(DayPeriod::of(time(11, 30)), DayPeriod::Morning);
        assert_eq!(DayPeriod::of(time(11, 31)), DayPeriod::Afternoon);
        assert_eq!(DayPeriod::of(time(15, 0)), DayPeriod::Afternoon);
    }

    #[test]
    fn early_slots_use_the_afternoon_document() {
        assert_eq!(DayPeriod::of(time(7, 30)), DayPeriod::Afternoon);
        assert_eq!(DayPeriod::of(time(8, 0)), DayPeriod::Morning);
        assert_eq!(
            catalog().lookup("11380", time(7, 30)),
            Some("https://docs.example/colonoscopia-tarde.pdf")
        );
    }

    #[test]
    fn picks_period_specific_document() {
        let catalog = catalog();
        assert_eq!(
            catalog.lookup("11380", time(9, 0)),
            Some("https://docs.example/colonoscopia-manha.pdf")
        );
        assert_eq!(
            catalog.lookup("11380", time(14, 0)),
            Some("https://docs.example/colonoscopia-tarde.pdf")
        );
    }

    #[test]
    fn falls_back_to_period_less_rule() {
        let catalog = catalog();
        assert_eq!(
            catalog.lookup("40201", time(16, 45)),
            Some("https://docs.example/endoscopia.pdf")
        );
        assert_eq!(catalog.lookup("99999", time(9, 0)), None);
        assert!(catalog.requires_preparation("40201"));
        assert!(!catalog.requires_preparation("99999"));
    }

    #[test]
    fn catalog_deserializes_from_tenant_json() {
        let raw = serde_json::json!([
            {"procedure_code": "11380", "period": "morning", "link": "a"},
            {"procedure_code": "11380", "period": "afternoon", "link": "b"},
            {"procedure_code": "40201", "link": "c"}
        ]);
        let catalog: DocumentCatalog = serde_json::from_value(raw).unwrap();
        assert_eq!(catalog.rules().len(), 3);
        assert_eq!(catalog.lookup("11380", time(13, 0)), Some("b"));
    }

    #[test]
    fn credentials_require_every_field() {
        let mut tenant = Tenant {
            id: 7,
            display_name: "Clinic".into(),
            channel_account_id: "AC123".into(),
            channel_secret: "secret".into(),
            from_address: "+5511888888888".into(),
            documents: DocumentCatalog::default(),
            templates: TemplateCatalog::default(),
            support_contact: None,
        };
        assert!(tenant.credentials().is_ok());

        tenant.channel_secret = "  ".into();
        let err = tenant.credentials().unwrap_err();
        assert!(matches!(err, ChannelError::Configuration(_)));
        assert!(err.to_string().contains("channel secret"));
    }
}
