use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockguard_core::{ProductId, TenantId};

/// Category of a user-facing stock notification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LowStock,
    AbnormalReduction,
    ExpiredProduct,
    NearExpiry,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::LowStock => "low_stock",
            NotificationKind::AbnormalReduction => "abnormal_reduction",
            NotificationKind::ExpiredProduct => "expired_product",
            NotificationKind::NearExpiry => "near_expiry",
        }
    }
}

/// Who should receive a notification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Audience {
    /// Every user that belongs to the tenant.
    AllTenantUsers,
}

/// `notify(allTenantUsers, title, message, type, relatedProduct)` as a message.
///
/// Published once per newly created alert. The delivery subsystem resolves the
/// audience to concrete recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockNotification {
    pub notification_id: Uuid,
    pub tenant_id: TenantId,
    pub audience: Audience,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub related_product: Option<ProductId>,
    pub created_at: DateTime<Utc>,
}

impl StockNotification {
    pub fn for_all_tenant_users(
        tenant_id: TenantId,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
        related_product: Option<ProductId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            notification_id: Uuid::now_v7(),
            tenant_id,
            audience: Audience::AllTenantUsers,
            title: title.into(),
            message: message.into(),
            kind,
            related_product,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&NotificationKind::ExpiredProduct).unwrap();
        assert_eq!(json, "\"expired_product\"");
        assert_eq!(NotificationKind::ExpiredProduct.as_str(), "expired_product");
    }

    #[test]
    fn audience_defaults_to_all_tenant_users() {
        let n = StockNotification::for_all_tenant_users(
            TenantId::new(),
            "Low Stock Alert: Soap",
            "running low",
            NotificationKind::LowStock,
            Some(ProductId::new()),
            Utc::now(),
        );
        assert_eq!(n.audience, Audience::AllTenantUsers);
    }
}
