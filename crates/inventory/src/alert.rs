use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockguard_core::{AlertId, DomainError, DomainResult, Entity, ProductId, TenantId, UserId};
use stockguard_events::{NotificationKind, StockNotification};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    AbnormalReduction,
    Expired,
    NearExpiry,
}

impl AlertType {
    pub const ALL: [AlertType; 4] = [
        AlertType::LowStock,
        AlertType::AbnormalReduction,
        AlertType::Expired,
        AlertType::NearExpiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowStock => "low_stock",
            AlertType::AbnormalReduction => "abnormal_reduction",
            AlertType::Expired => "expired",
            AlertType::NearExpiry => "near_expiry",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "low_stock" => Ok(AlertType::LowStock),
            "abnormal_reduction" => Ok(AlertType::AbnormalReduction),
            "expired" => Ok(AlertType::Expired),
            "near_expiry" => Ok(AlertType::NearExpiry),
            other => Err(DomainError::validation(format!("unknown alert type '{other}'"))),
        }
    }

    pub fn notification_kind(&self) -> NotificationKind {
        match self {
            AlertType::LowStock => NotificationKind::LowStock,
            AlertType::AbnormalReduction => NotificationKind::AbnormalReduction,
            AlertType::Expired => NotificationKind::ExpiredProduct,
            AlertType::NearExpiry => NotificationKind::NearExpiry,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(DomainError::validation(format!("unknown severity '{other}'"))),
        }
    }
}

/// What an alert rule found, before it is stamped with identity and tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDraft {
    pub product_id: ProductId,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub current_stock: i64,
    pub previous_stock: Option<i64>,
    pub threshold: Option<i64>,
}

/// A raised stock condition. Only resolution mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub id: AlertId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub current_stock: i64,
    pub previous_stock: Option<i64>,
    pub threshold: Option<i64>,
    pub is_resolved: bool,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StockAlert {
    pub fn raise(tenant_id: TenantId, draft: AlertDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::new(),
            tenant_id,
            product_id: draft.product_id,
            alert_type: draft.alert_type,
            severity: draft.severity,
            title: draft.title,
            message: draft.message,
            current_stock: draft.current_stock,
            previous_stock: draft.previous_stock,
            threshold: draft.threshold,
            is_resolved: false,
            resolved_by: None,
            resolved_at: None,
            created_at,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.is_resolved
    }

    /// Key of the one-open-alert-per-pair rule.
    pub fn dedup_key(&self) -> (TenantId, ProductId, AlertType) {
        (self.tenant_id, self.product_id, self.alert_type)
    }

    /// Mark resolved. Returns `false` (and changes nothing) if it already was.
    pub fn resolve(&mut self, resolved_by: Option<UserId>, resolved_at: DateTime<Utc>) -> bool {
        if self.is_resolved {
            return false;
        }
        self.is_resolved = true;
        self.resolved_by = resolved_by;
        self.resolved_at = Some(resolved_at);
        true
    }

    pub fn notification(&self) -> StockNotification {
        StockNotification::for_all_tenant_users(
            self.tenant_id,
            self.title.clone(),
            self.message.clone(),
            self.alert_type.notification_kind(),
            Some(self.product_id),
            self.created_at,
        )
    }
}

impl Entity for StockAlert {
    type Id = AlertId;

    fn id(&self) -> Self::Id {
        self.id
    }
}
