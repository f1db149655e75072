use stockguard_core::TenantId;

use crate::StockNotification;

/// Helper trait for tenant-scoped messages.
///
/// Subscribers that serve a single tenant use this to drop messages that
/// belong to anyone else.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl TenantScoped for StockNotification {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::bus::EventBus;
    use crate::in_memory_bus::InMemoryEventBus;
    use crate::notification::NotificationKind;

    #[test]
    fn drain_for_keeps_one_tenant() {
        let bus = InMemoryEventBus::<StockNotification>::new();
        let sub = bus.subscribe();
        let (a, b) = (TenantId::new(), TenantId::new());
        for tenant in [a, b, a] {
            bus.publish(StockNotification::for_all_tenant_users(
                tenant,
                "Low Stock Alert: Tea",
                "low",
                NotificationKind::LowStock,
                None,
                Utc::now(),
            ))
            .unwrap();
        }

        let mine = sub.drain_for(a);
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|n| n.tenant_id() == a));
    }
}
